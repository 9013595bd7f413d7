//! # Zip Archives
//!
//! Models move in and out of the service as zip files of their folder, and
//! dataset and transcription downloads use the same format.
//!
//! ## Unpacking:
//! Entries are extracted with their enclosed names only, so an archive can
//! never write outside the destination folder. Archives produced by zipping
//! a folder from a file manager wrap everything in one top-level directory;
//! [`unpack`] lifts the contents of such a wrapper up into the destination.

use crate::registry::{RegistryError, RegistryResult};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ARCHIVE_EXTENSION: &str = "zip";

pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Fresh path in the system temp folder for an archive labelled `label`.
pub fn temp_archive_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}.{}", label, uuid::Uuid::new_v4(), ARCHIVE_EXTENSION))
}

fn zip_io(err: ZipError) -> io::Error {
    io::Error::other(err)
}

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Entry name for a relative path: components joined with `/`.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Zip the whole of `source` into `archive_path`, names relative to `source`.
pub fn pack_dir(source: &Path, archive_path: &Path) -> io::Result<()> {
    let mut zip = ZipWriter::new(File::create(archive_path)?);

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(name, options()).map_err(zip_io)?;
        } else {
            zip.start_file(name, options()).map_err(zip_io)?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
        }
    }

    zip.finish().map_err(zip_io)?;
    Ok(())
}

/// Zip individual files; each entry is `(file on disk, path inside archive)`.
pub fn pack_files(entries: &[(PathBuf, PathBuf)], archive_path: &Path) -> io::Result<()> {
    let mut zip = ZipWriter::new(File::create(archive_path)?);
    for (source, name) in entries {
        zip.start_file(entry_name(name), options()).map_err(zip_io)?;
        io::copy(&mut File::open(source)?, &mut zip)?;
    }
    zip.finish().map_err(zip_io)?;
    Ok(())
}

/// Extract `archive_path` into `dest`, then lift the contents of a single
/// wrapping directory (e.g. `model/…`) up into `dest`.
pub fn unpack(archive_path: &Path, dest: &Path) -> RegistryResult<()> {
    let invalid = |e: ZipError| RegistryError::InvalidArchive(e.to_string());

    let mut zip = ZipArchive::new(File::open(archive_path)?).map_err(invalid)?;
    fs::create_dir_all(dest)?;
    zip.extract(dest).map_err(invalid)?;
    flatten_single_dir(dest)?;
    Ok(())
}

/// If `dir` contains exactly one entry and it is a directory, move that
/// directory's children into `dir` and remove it. Returns whether it did.
pub fn flatten_single_dir(dir: &Path) -> io::Result<bool> {
    let entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<_>>()?;

    let [wrapper] = entries.as_slice() else {
        return Ok(false);
    };
    if !wrapper.is_dir() {
        return Ok(false);
    }

    for child in fs::read_dir(wrapper)? {
        let child = child?;
        fs::rename(child.path(), dir.join(child.file_name()))?;
    }
    fs::remove_dir(wrapper)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_files;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_pack_and_unpack_dir() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("model");
        write_files(&source, &["config.json", "weights.bin"]);
        write_files(&source.join("tokenizer"), &["vocab.json"]);

        let archive = dir.path().join("model.zip");
        pack_dir(&source, &archive).unwrap();

        let dest = dir.path().join("restored");
        unpack(&archive, &dest).unwrap();
        assert!(dest.join("config.json").exists());
        assert!(dest.join("weights.bin").exists());
        assert!(dest.join("tokenizer").join("vocab.json").exists());
    }

    #[test]
    fn test_unpack_flattens_wrapping_directory() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        write_files(&source.join("wrapped"), &["config.json"]);

        let archive = dir.path().join("wrapped.zip");
        pack_dir(&source, &archive).unwrap();

        let dest = dir.path().join("dest");
        unpack(&archive, &dest).unwrap();
        assert!(dest.join("config.json").exists());
        assert!(!dest.join("wrapped").exists());
    }

    #[test]
    fn test_single_file_is_not_flattened() {
        let dir = TempDir::new().unwrap();
        write_files(dir.path(), &["only.txt"]);
        assert!(!flatten_single_dir(dir.path()).unwrap());
    }

    #[test]
    fn test_garbage_is_invalid_archive() {
        let dir = TempDir::new().unwrap();
        let archive = write_files(dir.path(), &["bogus.zip"]).remove(0);

        let result = unpack(&archive, &dir.path().join("dest"));
        assert!(matches!(result, Err(RegistryError::InvalidArchive(_))));
    }

    #[test]
    fn test_entries_cannot_escape_destination() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        let mut zip = ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("../escaped.txt", options()).unwrap();
        zip.write_all(b"outside").unwrap();
        zip.finish().unwrap();

        let dest = dir.path().join("dest");
        let _ = unpack(&archive, &dest);
        assert!(!dir.path().join("escaped.txt").exists());
    }
}

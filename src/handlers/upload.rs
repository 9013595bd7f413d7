//! Multipart upload handling.
//!
//! File parts are streamed chunk by chunk into a private staging folder
//! under `{data_dir}/uploads/{uuid}` before any registry sees them; text
//! parts are collected by field name. The staging folder is removed when the
//! [`UploadForm`] is dropped, after the registry has copied what it needs.

use crate::error::{AppError, AppResult};
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const UPLOADS_FOLDER: &str = "uploads";

/// Largest accepted single file.
pub const MAX_FILE_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Largest accepted text field.
pub const MAX_FIELD_SIZE: usize = 64 * 1024;

fn too_large(what: &str, limit: usize) -> AppError {
    AppError::ValidationError(format!("{} too large (max: {} bytes)", what, limit))
}

fn chunk_error(e: impl std::fmt::Display) -> AppError {
    AppError::ValidationError(format!("Chunk error: {}", e))
}

#[derive(Debug)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    /// Staged files, in upload order, keyed by their form field name.
    pub files: Vec<(String, PathBuf)>,
    staging_dir: PathBuf,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    pub fn required_field(&self, name: &str) -> AppResult<&str> {
        self.field(name)
            .ok_or_else(|| AppError::ValidationError(format!("Missing form field '{}'", name)))
    }

    /// Staged paths of every file sent under `field`.
    pub fn files_named(&self, field: &str) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|(name, _)| name == field)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

impl Drop for UploadForm {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.staging_dir.display(), error = %e, "Failed to remove upload staging folder");
            }
        }
    }
}

/// Reduce a client-supplied file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

async fn read_text_field(field: &mut Field) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(chunk_error)?;
        if bytes.len() + chunk.len() > MAX_FIELD_SIZE {
            return Err(too_large("Field", MAX_FIELD_SIZE));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Stream a file part to `path`, returning the number of bytes written.
async fn stream_to_file(field: &mut Field, path: &Path) -> AppResult<usize> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(chunk_error)?;
        written += chunk.len();
        if written > MAX_FILE_SIZE {
            return Err(too_large("File", MAX_FILE_SIZE));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

/// Drain `payload`, staging file parts under `{data_dir}/uploads`.
pub async fn read_multipart(mut payload: Multipart, data_dir: &Path) -> AppResult<UploadForm> {
    let staging_dir = data_dir
        .join(UPLOADS_FOLDER)
        .join(uuid::Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&staging_dir).await?;

    let mut form = UploadForm {
        fields: HashMap::new(),
        files: Vec::new(),
        staging_dir,
    };

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("Missing content disposition".to_string()))?;
        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?
            .to_string();
        let file_name = content_disposition.get_filename().map(str::to_string);

        match file_name {
            Some(file_name) => {
                let safe_name = sanitize_file_name(&file_name)
                    .ok_or_else(|| AppError::ValidationError(format!("Invalid file name '{}'", file_name)))?;
                let path = form.staging_dir.join(&safe_name);
                let size = stream_to_file(&mut field, &path).await?;
                debug!(field = %field_name, file = %safe_name, size, "Staged upload");
                form.files.push((field_name, path));
            }
            None => {
                let bytes = read_text_field(&mut field).await?;
                let value = String::from_utf8(bytes)
                    .map_err(|_| AppError::ValidationError(format!("Field '{}' is not UTF-8", field_name)))?;
                form.fields.insert(field_name, value);
            }
        }
    }

    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("story.wav").as_deref(), Some("story.wav"));
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\corpus\\a.eaf").as_deref(), Some("a.eaf"));
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
    }

    #[test]
    fn test_staging_folder_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let staging_dir = dir.path().join(UPLOADS_FOLDER).join("one");
        fs::create_dir_all(&staging_dir).unwrap();

        let form = UploadForm {
            fields: HashMap::from([("name".to_string(), "d1".to_string())]),
            files: Vec::new(),
            staging_dir: staging_dir.clone(),
        };
        assert_eq!(form.required_field("name").unwrap(), "d1");
        assert!(form.required_field("missing").is_err());

        drop(form);
        assert!(!staging_dir.exists());
    }
}

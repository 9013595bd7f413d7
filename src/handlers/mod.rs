//! # HTTP Handlers
//!
//! Thin layer between the web client and the [`Interface`](crate::interface::Interface).
//! Handlers validate input, move registry calls onto the blocking pool
//! (registry operations do filesystem work and may run the engine for
//! minutes) and shape the JSON responses.
//!
//! ## Routes (under `/api`):
//! - `/datasets`: list, create (multipart), get, delete, download
//! - `/models`: list, create, delete, train, status, logs, upload, download
//! - `/transcriptions`: list, create (multipart), delete, transcribe, status,
//!   text, elan, download, reset
//! - `/reset`: reset every registry

pub mod case;
pub mod datasets;
pub mod models;
pub mod transcriptions;
pub mod upload;

use crate::archive::{ARCHIVE_CONTENT_TYPE, ARCHIVE_EXTENSION};
use crate::error::{AppError, AppResult};
use crate::registry::RegistryResult;
use crate::state::AppState;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

/// Register every `/api` route on `cfg`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/datasets")
                    .route("", web::get().to(datasets::list_datasets))
                    .route("", web::post().to(datasets::create_dataset))
                    .route("/download/{name}", web::get().to(datasets::download_dataset))
                    .route("/{name}", web::get().to(datasets::get_dataset))
                    .route("/{name}", web::delete().to(datasets::delete_dataset)),
            )
            .service(
                web::scope("/models")
                    .route("", web::get().to(models::list_models))
                    .route("", web::post().to(models::create_model))
                    .route("/upload", web::post().to(models::upload_model))
                    .route("/train/{name}", web::get().to(models::train_model))
                    .route("/status/{name}", web::get().to(models::model_status))
                    .route("/logs/{name}", web::get().to(models::model_logs))
                    .route("/download/{name}", web::get().to(models::download_model))
                    .route("/{name}", web::delete().to(models::delete_model)),
            )
            .service(
                web::scope("/transcriptions")
                    .route("", web::get().to(transcriptions::list_transcriptions))
                    .route("", web::post().to(transcriptions::create_transcriptions))
                    .route("", web::delete().to(transcriptions::delete_transcription))
                    .route("/transcribe", web::get().to(transcriptions::transcribe))
                    .route("/status", web::get().to(transcriptions::transcription_status))
                    .route("/text", web::get().to(transcriptions::transcription_text))
                    .route("/elan", web::get().to(transcriptions::transcription_elan))
                    .route("/download", web::get().to(transcriptions::download_transcriptions))
                    .route("/reset", web::get().to(transcriptions::reset_transcriptions)),
            )
            .route("/reset", web::get().to(reset_all)),
    );
}

/// Query flag shared by the create endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuery {
    /// Leave an entry with the same key untouched instead of replacing it.
    #[serde(default = "default_keep_existing")]
    pub keep_existing: bool,
}

fn default_keep_existing() -> bool {
    true
}

/// Run a registry operation on the blocking thread pool.
pub async fn blocking<T, F>(operation: F) -> AppResult<T>
where
    F: FnOnce() -> RegistryResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(web::block(operation).await??)
}

/// Respond with the contents of a temporary archive, deleting it afterwards.
pub async fn archive_response(archive_path: &Path, download_name: &str) -> AppResult<HttpResponse> {
    let bytes = tokio::fs::read(archive_path).await;
    if let Err(e) = tokio::fs::remove_file(archive_path).await {
        tracing::warn!(path = %archive_path.display(), error = %e, "Failed to remove temporary archive");
    }
    let bytes = bytes?;

    Ok(HttpResponse::Ok()
        .content_type(ARCHIVE_CONTENT_TYPE)
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(format!(
                "{}.{}",
                download_name, ARCHIVE_EXTENSION
            ))],
        })
        .body(bytes))
}

/// `GET /api/reset`
pub async fn reset_all(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let interface = state.interface.clone();
    blocking(move || interface.reset()).await?;
    Ok(HttpResponse::Ok().json(json!({ "reset": true })))
}

pub(crate) fn not_found(what: &str, name: &str) -> AppError {
    AppError::NotFound(format!("{} '{}' not found", what, name))
}

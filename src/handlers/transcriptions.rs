//! Transcription endpoints.
//!
//! Jobs are addressed with the `modelLocation` and `audioName` query
//! parameters. `POST /api/transcriptions` takes a multipart form with a
//! `modelLocation` field and one `file` part per `.wav` recording; a location
//! naming a registered model is treated as local unless `isLocal` says
//! otherwise.

use super::case::json_response;
use super::upload::read_multipart;
use super::{archive_response, blocking, not_found};
use crate::entities::{FileKind, TranscriptionJob, TranscriptionKey};
use crate::error::{AppError, AppResult};
use crate::registry::RegistryKind;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionQuery {
    pub model_location: String,
    pub audio_name: String,
}

impl TranscriptionQuery {
    fn key(&self) -> TranscriptionKey {
        TranscriptionKey::new(&self.model_location, &self.audio_name)
    }
}

fn job_not_found(key: &TranscriptionKey) -> AppError {
    not_found("Transcription", &key.to_string())
}

/// `GET /api/transcriptions`
pub async fn list_transcriptions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let registry = &state.interface.transcriptions;
    let jobs: Vec<_> = registry
        .list()
        .into_iter()
        .map(|job| {
            let completed = registry.has_completed(&job.model_location, &job.audio_name);
            json!({
                "model_location": job.model_location,
                "audio_name": job.audio_name,
                "is_local": job.is_local,
                "status": job.status,
                "last_error": job.last_error,
                "completed": completed
            })
        })
        .collect();
    json_response(&jobs)
}

/// `POST /api/transcriptions`
pub async fn create_transcriptions(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let form = read_multipart(payload, &state.config.data_dir()).await?;
    let model_location = form.required_field("modelLocation")?.to_string();
    let is_local = match form.field("isLocal") {
        Some(raw) => raw
            .parse::<bool>()
            .map_err(|_| AppError::ValidationError("isLocal must be true or false".to_string()))?,
        None => state.interface.models.contains(&model_location),
    };

    let files = form.files_named("file");
    if files.is_empty() {
        return Err(AppError::ValidationError("No audio files provided".to_string()));
    }

    let mut jobs = Vec::with_capacity(files.len());
    for file in &files {
        if FileKind::of(file) != FileKind::Audio {
            return Err(AppError::ValidationError(format!(
                "{} is not a supported audio file",
                file.display()
            )));
        }
        let audio_name = file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AppError::ValidationError(format!("Invalid audio file name {}", file.display())))?;
        jobs.push(TranscriptionJob::new(&model_location, audio_name, is_local));
    }

    info!(model = %model_location, count = jobs.len(), local = is_local, "Adding transcription jobs");
    let interface = state.interface.clone();
    let added = blocking(move || {
        let _form = form;
        for (job, file) in jobs.iter().zip(&files) {
            interface
                .transcriptions
                .add_transcription_job(job.clone(), Some(file.as_path()))?;
        }
        Ok(jobs)
    })
    .await?;
    json_response(&added)
}

/// `DELETE /api/transcriptions?modelLocation=..&audioName=..`
pub async fn delete_transcription(
    state: web::Data<AppState>,
    query: web::Query<TranscriptionQuery>,
) -> AppResult<HttpResponse> {
    let key = query.key();
    let interface = state.interface.clone();
    let target = key.clone();
    if !blocking(move || interface.transcriptions.remove_job(&target)).await? {
        return Err(job_not_found(&key));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// `GET /api/transcriptions/transcribe?modelLocation=..&audioName=..`
pub async fn transcribe(state: web::Data<AppState>, query: web::Query<TranscriptionQuery>) -> AppResult<HttpResponse> {
    let key = query.key();
    let interface = state.interface.clone();
    let target = key.clone();
    let status = blocking(move || {
        interface
            .transcriptions
            .transcribe(&target.model_location, &target.audio_name)
    })
    .await?
    .ok_or_else(|| job_not_found(&key))?;

    let last_error = state.interface.transcriptions.get(&key).and_then(|job| job.last_error);
    json_response(&json!({ "status": status, "last_error": last_error }))
}

/// `GET /api/transcriptions/status?modelLocation=..&audioName=..`
pub async fn transcription_status(
    state: web::Data<AppState>,
    query: web::Query<TranscriptionQuery>,
) -> AppResult<HttpResponse> {
    let key = query.key();
    let status = state
        .interface
        .transcriptions
        .status(&key)
        .ok_or_else(|| job_not_found(&key))?;
    json_response(&json!({ "status": status }))
}

/// `GET /api/transcriptions/text?modelLocation=..&audioName=..`
pub async fn transcription_text(
    state: web::Data<AppState>,
    query: web::Query<TranscriptionQuery>,
) -> AppResult<HttpResponse> {
    let text = state.interface.transcriptions.text(&query.key())?;
    Ok(HttpResponse::Ok().content_type("text/plain; charset=utf-8").body(text))
}

/// `GET /api/transcriptions/elan?modelLocation=..&audioName=..`
pub async fn transcription_elan(
    state: web::Data<AppState>,
    query: web::Query<TranscriptionQuery>,
) -> AppResult<HttpResponse> {
    let path = state.interface.transcriptions.annotation_file(&query.key())?;
    let contents = tokio::fs::read(&path).await?;
    Ok(HttpResponse::Ok().content_type("application/xml").body(contents))
}

/// `GET /api/transcriptions/download`
pub async fn download_transcriptions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let interface = state.interface.clone();
    let archive_path = blocking(move || interface.transcriptions.export_all()).await?;
    archive_response(&archive_path, RegistryKind::Transcriptions.as_str()).await
}

/// `GET /api/transcriptions/reset`
pub async fn reset_transcriptions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let interface = state.interface.clone();
    blocking(move || interface.transcriptions.reset()).await?;
    Ok(HttpResponse::Ok().json(json!({ "reset": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::handlers::tests::{multipart_body, multipart_request};
    use crate::state::tests::test_state;
    use crate::testing::StubEngine;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use actix_web::App;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    const QUERY: &str = "modelLocation=m1&audioName=a1";

    #[actix_web::test]
    async fn test_transcription_lifecycle() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let body = multipart_body(&[("modelLocation", "m1"), ("isLocal", "true")], &[("file", "a1.wav", b"RIFF")]);
        let created: Value =
            actix_test::call_and_read_body_json(&app, multipart_request("/api/transcriptions", body).to_request()).await;
        assert_eq!(created[0]["audioName"], "a1");
        assert_eq!(created[0]["isLocal"], true);

        // Text is not available before transcription.
        let early = actix_test::call_service(
            &app,
            actix_test::TestRequest::get().uri(&format!("/api/transcriptions/text?{QUERY}")).to_request(),
        )
        .await;
        assert_eq!(early.status(), StatusCode::BAD_REQUEST);

        let result: Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::get().uri(&format!("/api/transcriptions/transcribe?{QUERY}")).to_request(),
        )
        .await;
        assert_eq!(result["status"], "finished");

        let text = actix_test::call_and_read_body(
            &app,
            actix_test::TestRequest::get().uri(&format!("/api/transcriptions/text?{QUERY}")).to_request(),
        )
        .await;
        assert_eq!(&text[..], b"hello world");

        let elan = actix_test::call_and_read_body(
            &app,
            actix_test::TestRequest::get().uri(&format!("/api/transcriptions/elan?{QUERY}")).to_request(),
        )
        .await;
        assert!(String::from_utf8_lossy(&elan).contains("ANNOTATION_DOCUMENT"));

        let listed: Value =
            actix_test::call_and_read_body_json(&app, actix_test::TestRequest::get().uri("/api/transcriptions").to_request())
                .await;
        assert_eq!(listed[0]["completed"], true);

        let deleted = actix_test::call_service(
            &app,
            actix_test::TestRequest::delete().uri(&format!("/api/transcriptions?{QUERY}")).to_request(),
        )
        .await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.interface.transcriptions.len(), 0);
    }

    #[actix_web::test]
    async fn test_unknown_job_is_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        for path in ["transcribe", "status", "text", "elan"] {
            let uri = format!("/api/transcriptions/{path}?{QUERY}");
            let response = actix_test::call_service(&app, actix_test::TestRequest::get().uri(&uri).to_request()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[actix_web::test]
    async fn test_non_audio_upload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let body = multipart_body(&[("modelLocation", "m1")], &[("file", "notes.txt", b"hello")]);
        let response = actix_test::call_service(&app, multipart_request("/api/transcriptions", body).to_request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.interface.transcriptions.len(), 0);
    }
}

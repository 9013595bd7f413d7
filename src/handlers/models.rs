//! Model (training job) endpoints.
//!
//! Training runs synchronously inside the request on the blocking pool, so
//! `GET /api/models/train/{name}` returns once training has finished or
//! failed. A second train request for a job already training returns
//! immediately with status `training`.

use super::case::{from_client, json_response};
use super::upload::read_multipart;
use super::{archive_response, blocking, not_found, CreateQuery};
use crate::archive::ARCHIVE_EXTENSION;
use crate::entities::TrainingJob;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};
use tracing::info;

/// `GET /api/models`
pub async fn list_models(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    json_response(&state.interface.models.list())
}

/// `POST /api/models`
pub async fn create_model(
    state: web::Data<AppState>,
    query: web::Query<CreateQuery>,
    body: web::Json<Value>,
) -> AppResult<HttpResponse> {
    let mut job: TrainingJob = from_client(body.into_inner())?;
    job.validate().map_err(|e| AppError::ValidationError(e.to_string()))?;
    job.status = Default::default();
    job.last_error = None;

    let name = job.model_name.clone();
    let interface = state.interface.clone();
    let keep_existing = query.keep_existing;
    blocking(move || interface.models.add_job(job, keep_existing)).await?;

    let job = state.interface.models.get(&name).ok_or_else(|| not_found("Model", &name))?;
    json_response(&job)
}

/// `DELETE /api/models/{name}`
pub async fn delete_model(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let name = name.into_inner();
    let interface = state.interface.clone();
    let target = name.clone();
    if !blocking(move || interface.models.delete_model(&target)).await? {
        return Err(not_found("Model", &name));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// `GET /api/models/train/{name}`
pub async fn train_model(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let name = name.into_inner();
    let interface = state.interface.clone();
    let target = name.clone();
    let status = blocking(move || interface.train_model(&target))
        .await?
        .ok_or_else(|| not_found("Model", &name))?;

    let last_error = state.interface.models.get(&name).and_then(|job| job.last_error);
    json_response(&json!({ "model_name": name, "status": status, "last_error": last_error }))
}

/// `GET /api/models/status/{name}`
pub async fn model_status(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let status = state
        .interface
        .models
        .status(&name)
        .ok_or_else(|| not_found("Model", &name))?;
    json_response(&json!({ "model_name": name.as_str(), "status": status }))
}

/// `GET /api/models/logs/{name}`
pub async fn model_logs(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let logs = state.interface.models.logs(&name)?;
    Ok(HttpResponse::Ok().content_type("text/plain; charset=utf-8").body(logs))
}

/// `POST /api/models/upload`
///
/// Multipart form with a `.zip` under `file` and an optional `name`
/// (defaults to the archive's file name without extension).
pub async fn upload_model(state: web::Data<AppState>, payload: Multipart) -> AppResult<HttpResponse> {
    let form = read_multipart(payload, &state.config.data_dir()).await?;
    let archive_path = form
        .files_named("file")
        .into_iter()
        .next()
        .ok_or_else(|| AppError::ValidationError("No model archive provided".to_string()))?;

    let name = match form.field("name") {
        Some(name) => name.to_string(),
        None => archive_stem(&archive_path)?,
    };

    info!(model = %name, "Importing uploaded model");
    let interface = state.interface.clone();
    let job = blocking(move || {
        let _form = form;
        interface.models.import_model(&name, &archive_path)
    })
    .await?;
    json_response(&job)
}

fn archive_stem(path: &std::path::Path) -> AppResult<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::ValidationError("Invalid archive name".to_string()))?;
    let stem = file_name
        .strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))
        .unwrap_or(file_name);
    if stem.is_empty() {
        return Err(AppError::ValidationError("Invalid archive name".to_string()));
    }
    Ok(stem.to_string())
}

/// `GET /api/models/download/{name}`
pub async fn download_model(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let name = name.into_inner();
    let interface = state.interface.clone();
    let target = name.clone();
    let archive_path = blocking(move || interface.models.export_model(&target)).await?;
    archive_response(&archive_path, &name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TrainingStatus;
    use crate::handlers::configure;
    use crate::handlers::tests::{multipart_body, multipart_request};
    use crate::state::tests::test_state;
    use crate::testing::StubEngine;
    use actix_web::http::StatusCode;
    use actix_web::test as actix_test;
    use actix_web::App;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem(Path::new("/tmp/my-model.zip")).unwrap(), "my-model");
        assert_eq!(archive_stem(Path::new("/tmp/other")).unwrap(), "other");
        assert!(archive_stem(Path::new("/tmp/.zip")).is_err());
    }

    #[actix_web::test]
    async fn test_create_and_train_model() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new());
        let state = test_state(&dir, engine.clone());
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let request = actix_test::TestRequest::post()
            .uri("/api/models")
            .set_json(json!({"modelName": "m1", "datasetName": "/corpora/ready", "options": {"epochs": 3}}))
            .to_request();
        let created: Value = actix_test::call_and_read_body_json(&app, request).await;
        assert_eq!(created["modelName"], "m1");
        assert_eq!(created["options"]["epochs"], 3);
        assert_eq!(created["status"], "waiting");

        let trained: Value =
            actix_test::call_and_read_body_json(&app, actix_test::TestRequest::get().uri("/api/models/train/m1").to_request())
                .await;
        assert_eq!(trained["status"], "finished");
        assert_eq!(engine.train_calls(), 1);

        let status: Value =
            actix_test::call_and_read_body_json(&app, actix_test::TestRequest::get().uri("/api/models/status/m1").to_request())
                .await;
        assert_eq!(status["status"], "finished");

        let logs = actix_test::call_and_read_body(&app, actix_test::TestRequest::get().uri("/api/models/logs/m1").to_request())
            .await;
        assert!(String::from_utf8_lossy(&logs).contains("/corpora/ready"));
    }

    #[actix_web::test]
    async fn test_invalid_options_are_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let request = actix_test::TestRequest::post()
            .uri("/api/models")
            .set_json(json!({"modelName": "m1", "datasetName": "d1", "options": {"batchSize": 0}}))
            .to_request();
        let response = actix_test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!state.interface.models.contains("m1"));
    }

    #[actix_web::test]
    async fn test_unknown_model_is_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        for uri in ["/api/models/train/ghost", "/api/models/status/ghost", "/api/models/logs/ghost"] {
            let response = actix_test::call_service(&app, actix_test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[actix_web::test]
    async fn test_upload_with_escaping_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        state.interface.models.add_job(TrainingJob::new("m1", "d1"), true).unwrap();
        let app =
            actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let body = multipart_body(&[("name", "..")], &[("file", "bogus.zip", b"not a zip")]);
        let response =
            actix_test::call_service(&app, multipart_request("/api/models/upload", body).to_request()).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.config.data_dir().join("models.json").exists());
        assert!(state.interface.models.model_folder("m1").is_dir());
    }

    #[actix_web::test]
    async fn test_retraining_a_running_model_is_refused() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(StubEngine::new());
        let state = test_state(&dir, engine.clone());
        state.interface.models.add_job(TrainingJob::new("m1", "d1"), true).unwrap();
        let app =
            actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        engine.hold_training();
        let interface = state.interface.clone();
        let first = std::thread::spawn(move || interface.train_model("m1").unwrap());
        engine.wait_for_train_calls(1);

        let request = actix_test::TestRequest::post()
            .uri("/api/models?keepExisting=false")
            .set_json(json!({"modelName": "m1", "datasetName": "d2"}))
            .to_request();
        let response = actix_test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        engine.release_training();
        assert_eq!(first.join().unwrap(), Some(TrainingStatus::Finished));
        assert_eq!(engine.train_calls(), 1);
    }

    #[actix_web::test]
    async fn test_download_then_upload_model() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        state.interface.models.add_job(TrainingJob::new("m1", "d1"), true).unwrap();
        state.interface.train_model("m1").unwrap();
        let app = actix_test::init_service(App::new().app_data(web::Data::new(state.clone())).configure(configure)).await;

        let archive =
            actix_test::call_and_read_body(&app, actix_test::TestRequest::get().uri("/api/models/download/m1").to_request())
                .await;
        assert!(!archive.is_empty());

        let body = multipart_body(&[("name", "m2")], &[("file", "m1.zip", &archive[..])]);
        let uploaded: Value =
            actix_test::call_and_read_body_json(&app, multipart_request("/api/models/upload", body).to_request()).await;
        assert_eq!(uploaded["modelName"], "m2");
        assert_eq!(state.interface.models.status("m2"), Some(TrainingStatus::Finished));
    }
}

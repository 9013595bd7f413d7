//! Dataset endpoints.
//!
//! `POST /api/datasets` takes a multipart form:
//! - `name`: dataset name
//! - `file`: one part per audio or transcription file
//! - `cleaningOptions`: optional JSON object
//! - `elanOptions`: optional JSON object

use super::case::{from_client, json_response};
use super::upload::read_multipart;
use super::{archive_response, blocking, not_found, CreateQuery};
use crate::entities::{CleaningOptions, Dataset, ElanOptions};
use crate::error::{AppError, AppResult};
use crate::interface::Interface;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct DatasetView {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub processed: bool,
}

fn view(interface: &Interface, dataset: Dataset) -> AppResult<DatasetView> {
    let processed = interface.datasets.is_dataset_processed(&dataset.name)?;
    Ok(DatasetView { dataset, processed })
}

fn parse_json_field<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> AppResult<T> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::ValidationError(format!("{} is not valid JSON: {}", field, e)))?;
    from_client(value)
}

/// `GET /api/datasets`
pub async fn list_datasets(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let interface = &state.interface;
    let views = interface
        .datasets
        .list()
        .into_iter()
        .map(|dataset| view(interface, dataset))
        .collect::<AppResult<Vec<_>>>()?;
    json_response(&views)
}

/// `GET /api/datasets/{name}`
pub async fn get_dataset(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let dataset = state
        .interface
        .datasets
        .get(&name)
        .ok_or_else(|| not_found("Dataset", &name))?;
    json_response(&view(&state.interface, dataset)?)
}

/// `POST /api/datasets`
pub async fn create_dataset(
    state: web::Data<AppState>,
    query: web::Query<CreateQuery>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let form = read_multipart(payload, &state.config.data_dir()).await?;

    let name = form.required_field("name")?.to_string();
    let files = form.files_named("file");
    if files.is_empty() {
        return Err(AppError::ValidationError("No files provided".to_string()));
    }

    let mut dataset = Dataset::new(&name, files);
    if let Some(raw) = form.field("cleaningOptions") {
        dataset.cleaning_options = parse_json_field::<CleaningOptions>("cleaningOptions", raw)?;
    }
    if let Some(raw) = form.field("elanOptions") {
        dataset.elan_options = Some(parse_json_field::<ElanOptions>("elanOptions", raw)?);
    }

    if !dataset.is_valid() {
        let mismatched: Vec<String> = dataset
            .mismatched_files()
            .iter()
            .filter_map(|f| f.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        return Err(AppError::ValidationError(format!(
            "Every audio file needs a matching transcription; unmatched: {}",
            mismatched.join(", ")
        )));
    }

    info!(dataset = %name, files = dataset.files.len(), "Creating dataset");
    let interface = state.interface.clone();
    let keep_existing = query.keep_existing;
    blocking(move || {
        // Staged files must outlive the copy into the registry.
        let _form = form;
        interface.datasets.add_dataset(dataset, keep_existing)
    })
    .await?;

    let dataset = state
        .interface
        .datasets
        .get(&name)
        .ok_or_else(|| not_found("Dataset", &name))?;
    json_response(&view(&state.interface, dataset)?)
}

/// `DELETE /api/datasets/{name}`
pub async fn delete_dataset(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let name = name.into_inner();
    let interface = state.interface.clone();
    let target = name.clone();
    if !blocking(move || interface.datasets.delete_dataset(&target)).await? {
        return Err(not_found("Dataset", &name));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// `GET /api/datasets/download/{name}`
pub async fn download_dataset(state: web::Data<AppState>, name: web::Path<String>) -> AppResult<HttpResponse> {
    let name = name.into_inner();
    let interface = state.interface.clone();
    let target = name.clone();
    let archive_path = blocking(move || interface.datasets.export(&target)).await?;
    archive_response(&archive_path, &name).await
}

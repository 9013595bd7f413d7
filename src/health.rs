//! # Health Check
//!
//! `GET /health` reports uptime, request metrics, registry sizes and which
//! inference pipelines are currently loaded.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();
    let interface = &state.interface;
    let pipelines = interface.transcriptions.pipelines();

    let endpoints: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "average_duration_ms": metric.average_duration_ms()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": state.config.server.host,
            "port": state.config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "endpoints": endpoints
        },
        "registries": {
            "datasets": interface.datasets.len(),
            "models": interface.models.len(),
            "transcriptions": interface.transcriptions.len()
        },
        "pipelines": {
            "capacity": pipelines.capacity(),
            "count": pipelines.len(),
            "loaded": pipelines.locations()
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use crate::testing::StubEngine;
    use actix_web::test as actix_test;
    use actix_web::App;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[actix_web::test]
    async fn test_health_reports_registries() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir, Arc::new(StubEngine::new()));
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let request = actix_test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, request).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["registries"]["datasets"], 0);
        assert_eq!(body["pipelines"]["capacity"], 2);
        assert_eq!(body["pipelines"]["count"], 0);
    }
}

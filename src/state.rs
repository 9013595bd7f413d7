//! # Application State
//!
//! Shared across every worker thread through `web::Data<AppState>`:
//! - the loaded configuration (read-only after startup)
//! - the [`Interface`] holding the registries
//! - request metrics, written by the request-tracking middleware
//! - the server start time, for uptime reporting
//!
//! ## Thread Safety:
//! `AppState` is cheap to clone; clones share the same `Arc`s. Metrics sit
//! behind a `parking_lot::RwLock` so health checks can read while requests
//! are being recorded.

use crate::config::AppConfig;
use crate::interface::Interface;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Process-wide state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub interface: Arc<Interface>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Request counters since startup, reported by `/health`.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Keyed by `"{method} {path}"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, interface: Interface) -> Self {
        Self {
            config: Arc::new(config),
            interface: Arc::new(interface),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Record one finished request against its endpoint.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the metrics, taken under the read lock.
    pub fn metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    /// Fraction of requests that ended in a 4xx or 5xx; `0.0` before any request.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

//! Performance telemetry and health monitoring.
//!
//! This module provides metrics collection and health reporting for
//! FleetWatch components. Components push their counters in as custom
//! metrics; the collector derives a worst-of health verdict from the
//! signals it has seen.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Telemetry collection errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Metric collection failed: {0}")]
    CollectionError(String),

    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Performance metrics for a component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metrics {
    /// Component name
    pub component: String,
    /// Collection timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Number of operations performed
    pub operation_count: u64,
    /// Average operation duration in milliseconds
    pub avg_operation_duration_ms: f64,
    /// Error count
    pub error_count: u64,
    /// Custom metrics
    pub custom_metrics: HashMap<String, f64>,
}

impl Metrics {
    /// Create new metrics for a component.
    pub fn new(component: String) -> Self {
        Self {
            component,
            timestamp: chrono::Utc::now(),
            operation_count: 0,
            avg_operation_duration_ms: 0.0,
            error_count: 0,
            custom_metrics: HashMap::new(),
        }
    }

    /// Add a custom metric.
    pub fn add_custom_metric(&mut self, name: String, value: f64) {
        self.custom_metrics.insert(name, value);
    }
}

/// Health status for a component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health check result for a component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    /// Component name
    pub component: String,
    /// Health status
    pub status: HealthStatus,
    /// Check timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
    /// Error message if check failed
    pub error_message: Option<String>,
    /// Additional details
    pub details: HashMap<String, String>,
}

impl HealthCheck {
    /// Create a new health check result.
    pub fn new(component: String, status: HealthStatus, duration_ms: u64) -> Self {
        Self {
            component,
            status,
            timestamp: chrono::Utc::now(),
            duration_ms,
            error_message: None,
            details: HashMap::new(),
        }
    }

    /// Add a detail to the health check.
    pub fn add_detail(&mut self, key: String, value: String) {
        self.details.insert(key, value);
    }
}

/// Telemetry collector for gathering metrics and health information.
pub struct TelemetryCollector {
    component: String,
    metrics: Metrics,
    operation_times: Vec<Duration>,
    error_count: u64,
    worker_alive: Option<bool>,
}

impl TelemetryCollector {
    /// Create a new telemetry collector.
    pub fn new(component: String) -> Self {
        Self {
            component: component.clone(),
            metrics: Metrics::new(component),
            operation_times: Vec::new(),
            error_count: 0,
            worker_alive: None,
        }
    }

    /// Record an operation completion.
    pub fn record_operation(&mut self, duration: Duration) {
        self.operation_times.push(duration);
        self.metrics.operation_count += 1;

        let total_duration: Duration = self.operation_times.iter().sum();
        self.metrics.avg_operation_duration_ms =
            total_duration.as_millis() as f64 / self.operation_times.len() as f64;
    }

    /// Record an error occurrence.
    pub fn record_error(&mut self) {
        self.error_count += 1;
        self.metrics.error_count = self.error_count;
    }

    /// Record the liveness verdict of the component's worker thread.
    pub fn record_worker_liveness(&mut self, alive: bool) {
        self.worker_alive = Some(alive);
    }

    /// Add a custom metric (e.g. a counter snapshot from the engine).
    pub fn add_custom_metric(&mut self, name: String, value: f64) {
        self.metrics.add_custom_metric(name, value);
    }

    /// Get current metrics.
    pub fn get_metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Perform a health check.
    pub fn health_check(&self) -> Result<HealthCheck, TelemetryError> {
        let start_time = Instant::now();

        let mut status = HealthStatus::Healthy;
        let mut error_message = None;
        let mut details = HashMap::new();

        // A dead worker means data is silently piling up in the queues.
        match self.worker_alive {
            Some(false) => {
                status = HealthStatus::Unhealthy;
                error_message = Some("Worker thread is not ticking".to_string());
            }
            None => {
                status = HealthStatus::Unknown;
            }
            Some(true) => {}
        }

        if status == HealthStatus::Healthy && self.error_count > 100 {
            status = HealthStatus::Degraded;
            error_message = Some("High error count detected".to_string());
        }

        // Sustained drops on a bounded queue degrade the verdict.
        for (name, value) in &self.metrics.custom_metrics {
            if name.ends_with("_dropped") && *value > 0.0 {
                if status == HealthStatus::Healthy {
                    status = HealthStatus::Degraded;
                }
                details.insert(name.clone(), value.to_string());
            }
        }

        let duration = start_time.elapsed();
        let mut health_check =
            HealthCheck::new(self.component.clone(), status, duration.as_millis() as u64);

        if let Some(error) = error_message {
            health_check.error_message = Some(error);
        }
        for (key, value) in details {
            health_check.add_detail(key, value);
        }

        Ok(health_check)
    }

    /// Reset the collector.
    pub fn reset(&mut self) {
        self.operation_times.clear();
        self.error_count = 0;
        self.worker_alive = None;
        self.metrics = Metrics::new(self.component.clone());
    }
}

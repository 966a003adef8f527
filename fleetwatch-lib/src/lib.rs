//! # FleetWatch Shared Library
//!
//! Shared operational foundation for FleetWatch edge components:
//!
//! - Hierarchical configuration loading with environment overrides
//! - Performance telemetry and component health reporting
//! - Upstream MQTT connectivity with SDK heap budgeting
//! - Payload spooling for deferred upload
//!
//! The collection and inspection engine lives in the `inspection-core`
//! crate and builds on the facilities here.

pub mod config;
pub mod connectivity;
pub mod spool;
pub mod telemetry;

// Re-export main types for convenience
pub use config::{AgentConfig, Config, ConfigError, ConfigLoader, ConnectivityConfig, LoggingConfig};
pub use connectivity::{
    ConnectivityError, MemoryLedger, MqttChannel, MqttConnection, SendParams,
    AWS_IOT_MAX_MESSAGE_SIZE, MAXIMUM_IOT_SDK_HEAP_MEMORY_BYTES,
};
pub use spool::{MemorySpool, PayloadSpool, SpoolError, SpooledPayload};
pub use telemetry::{HealthCheck, HealthStatus, Metrics, TelemetryCollector, TelemetryError};

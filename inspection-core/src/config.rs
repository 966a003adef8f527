//! Runtime configuration for the inspection engine.
//!
//! Thin wrapper over the knobs the worker and its queues need, integrating
//! with the hierarchical `fleetwatch-lib` configuration used by the other
//! agent components.

use fleetwatch_lib::config::{Config as AgentWideConfig, ConfigError, ConfigLoader};
use serde::{Deserialize, Serialize};

/// Configuration for the collection and inspection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InspectionConfig {
    /// Capacity of the signal ingress queue
    pub signal_queue_capacity: usize,

    /// Capacity of the publish queue
    pub publish_queue_capacity: usize,

    /// Worker sleep when no wakeup arrives, in milliseconds
    pub idle_time_ms: u64,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            signal_queue_capacity: 10_000,
            publish_queue_capacity: 1_000,
            idle_time_ms: 50,
        }
    }
}

impl InspectionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value would stall or disable the pipeline.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.signal_queue_capacity == 0 {
            anyhow::bail!("signal_queue_capacity must be greater than 0");
        }
        if self.publish_queue_capacity == 0 {
            anyhow::bail!("publish_queue_capacity must be greater than 0");
        }
        if self.idle_time_ms == 0 {
            anyhow::bail!("idle_time_ms must be greater than 0");
        }

        if self.signal_queue_capacity < 100 {
            tracing::warn!(
                capacity = self.signal_queue_capacity,
                "signal queue is very small, bursty buses will overflow it"
            );
        }

        Ok(())
    }

    /// Sets the signal ingress queue capacity.
    pub fn with_signal_queue_capacity(mut self, capacity: usize) -> Self {
        self.signal_queue_capacity = capacity;
        self
    }

    /// Sets the publish queue capacity.
    pub fn with_publish_queue_capacity(mut self, capacity: usize) -> Self {
        self.publish_queue_capacity = capacity;
        self
    }

    /// Sets the worker idle timeout.
    pub fn with_idle_time_ms(mut self, idle_time_ms: u64) -> Self {
        self.idle_time_ms = idle_time_ms;
        self
    }

    /// Extracts the inspection knobs from an agent-wide configuration.
    pub fn from_agent_config(config: &AgentWideConfig) -> Self {
        Self {
            signal_queue_capacity: config.agent.signal_queue_capacity,
            publish_queue_capacity: config.agent.publish_queue_capacity,
            idle_time_ms: config.agent.idle_time_ms,
        }
    }

    /// Loads the agent-wide configuration hierarchy and extracts the
    /// inspection knobs from it.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or validation fails.
    pub fn load(component: &str) -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new(component);
        let agent_config = loader.load()?;
        Ok(Self::from_agent_config(&agent_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InspectionConfig::default();
        assert_eq!(config.signal_queue_capacity, 10_000);
        assert_eq!(config.publish_queue_capacity, 1_000);
        assert_eq!(config.idle_time_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = InspectionConfig::new()
            .with_signal_queue_capacity(2_000)
            .with_publish_queue_capacity(200)
            .with_idle_time_ms(25);

        assert_eq!(config.signal_queue_capacity, 2_000);
        assert_eq!(config.publish_queue_capacity, 200);
        assert_eq!(config.idle_time_ms, 25);
    }

    #[test]
    fn test_validation_failures() {
        assert!(InspectionConfig::new()
            .with_signal_queue_capacity(0)
            .validate()
            .is_err());
        assert!(InspectionConfig::new()
            .with_publish_queue_capacity(0)
            .validate()
            .is_err());
        assert!(InspectionConfig::new()
            .with_idle_time_ms(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_agent_config() {
        let mut agent_config = AgentWideConfig::default();
        agent_config.agent.signal_queue_capacity = 123;
        agent_config.agent.idle_time_ms = 7;

        let config = InspectionConfig::from_agent_config(&agent_config);
        assert_eq!(config.signal_queue_capacity, 123);
        assert_eq!(config.idle_time_ms, 7);
        assert_eq!(config.publish_queue_capacity, 1_000);
    }
}

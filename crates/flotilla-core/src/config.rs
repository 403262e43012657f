//! Orchestrator configuration.

use crate::error::{CoreError, Result};
use flotilla_runtime::ResourceLimits;
use std::time::Duration;

/// Timeouts and defaults for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Limits used when a request does not specify any (default: 128 MiB, 1 vCPU).
    pub default_limits: ResourceLimits,
    /// Bound on a single image pull (default: 60s).
    pub pull_timeout: Duration,
    /// Bound on every other runtime call (default: 30s).
    pub call_timeout: Duration,
    /// How long teardown waits for a unit to exit before killing it (default: 10s).
    pub teardown_timeout: Duration,
    /// Overall bound on [`Orchestrator::close`](crate::Orchestrator::close) (default: 30s).
    pub shutdown_deadline: Duration,
    /// Reserve ids while a create is in flight so a second create for the
    /// same id fails fast (default: true).
    pub reserve_ids: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_limits: ResourceLimits::default(),
            pull_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(10),
            shutdown_deadline: Duration::from_secs(30),
            reserve_ids: true,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new config builder.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.default_limits
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        for (name, value) in [
            ("pull_timeout", self.pull_timeout),
            ("call_timeout", self.call_timeout),
            ("teardown_timeout", self.teardown_timeout),
            ("shutdown_deadline", self.shutdown_deadline),
        ] {
            if value.is_zero() {
                return Err(CoreError::Config(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Builder for OrchestratorConfig.
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the default resource limits.
    pub fn default_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.default_limits = limits;
        self
    }

    /// Set the image pull timeout.
    pub fn pull_timeout(mut self, timeout: Duration) -> Self {
        self.config.pull_timeout = timeout;
        self
    }

    /// Set the per-call timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Set the teardown wait bound.
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.config.teardown_timeout = timeout;
        self
    }

    /// Set the shutdown deadline.
    pub fn shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.config.shutdown_deadline = deadline;
        self
    }

    /// Enable or disable id reservation.
    pub fn reserve_ids(mut self, reserve: bool) -> Self {
        self.config.reserve_ids = reserve;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.default_limits, ResourceLimits::new(128, 1));
        assert_eq!(config.teardown_timeout, Duration::from_secs(10));
        assert!(config.reserve_ids);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_timeouts() {
        let result = OrchestratorConfig::builder()
            .teardown_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_limits() {
        let result = OrchestratorConfig::builder()
            .default_limits(ResourceLimits::new(0, 1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_success() {
        let config = OrchestratorConfig::builder()
            .default_limits(ResourceLimits::new(512, 2))
            .call_timeout(Duration::from_secs(5))
            .reserve_ids(false)
            .build()
            .expect("should build successfully");

        assert_eq!(config.default_limits.memory_mib, 512);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert!(!config.reserve_ids);
    }
}

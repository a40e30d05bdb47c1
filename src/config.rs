//! Configuration for the execution loop.
//!
//! Configuration can be set via environment variables:
//! - `TASKCREW_MAX_ITERATIONS` - Optional. Maximum loop iterations. Defaults to `15`.
//! - `TASKCREW_MAX_RPM` - Optional. Requests-per-minute cap shared across agents. Unset means no cap.
//! - `TASKCREW_MAX_EXECUTION_SECS` - Optional. Wall-clock budget for one execution. Unset means no budget.
//!
//! The parsing and stop policies carry capabilities and are set in code,
//! not through the environment.

use std::time::Duration;

use thiserror::Error;

use crate::executor::StopPolicy;
use crate::parser::ParsingPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Execution loop configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard ceiling on loop iterations.
    pub max_iterations: usize,

    /// Requests-per-minute cap; `None` disables rate limiting.
    pub max_rpm: Option<u32>,

    /// Wall-clock budget for one execution; `None` disables it.
    pub max_execution_time: Option<Duration>,

    /// How malformed planner output is handled.
    pub parsing_policy: ParsingPolicy,

    /// How the budget-exceeded response is produced.
    pub stop_policy: StopPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorConfig {
    pub const DEFAULT_MAX_ITERATIONS: usize = 15;

    pub fn new() -> Self {
        Self {
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            max_rpm: None,
            max_execution_time: None,
            parsing_policy: ParsingPolicy::default(),
            stop_policy: StopPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a set variable does not
    /// parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_iterations = match std::env::var("TASKCREW_MAX_ITERATIONS") {
            Ok(value) => value.parse().map_err(|e| {
                ConfigError::InvalidValue("TASKCREW_MAX_ITERATIONS".to_string(), format!("{e}"))
            })?,
            Err(_) => Self::DEFAULT_MAX_ITERATIONS,
        };

        let max_rpm = std::env::var("TASKCREW_MAX_RPM")
            .ok()
            .map(|value| {
                value.parse().map_err(|e| {
                    ConfigError::InvalidValue("TASKCREW_MAX_RPM".to_string(), format!("{e}"))
                })
            })
            .transpose()?;

        let max_execution_time = std::env::var("TASKCREW_MAX_EXECUTION_SECS")
            .ok()
            .map(|value| {
                value.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                    ConfigError::InvalidValue(
                        "TASKCREW_MAX_EXECUTION_SECS".to_string(),
                        format!("{e}"),
                    )
                })
            })
            .transpose()?;

        Ok(Self {
            max_iterations,
            max_rpm,
            max_execution_time,
            parsing_policy: ParsingPolicy::default(),
            stop_policy: StopPolicy::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ExecutorConfig::new();
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.max_rpm, None);
        assert_eq!(config.max_execution_time, None);
        assert!(matches!(config.parsing_policy, ParsingPolicy::Fail));
        assert_eq!(config.stop_policy, StopPolicy::Force);
    }

    // Single test mutating the environment so parallel test threads never
    // see each other's values.
    #[test]
    fn from_env_parses_and_rejects() {
        std::env::remove_var("TASKCREW_MAX_ITERATIONS");
        std::env::remove_var("TASKCREW_MAX_RPM");
        std::env::remove_var("TASKCREW_MAX_EXECUTION_SECS");
        let config = ExecutorConfig::from_env().expect("defaults load");
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.max_rpm, None);

        std::env::set_var("TASKCREW_MAX_ITERATIONS", "7");
        std::env::set_var("TASKCREW_MAX_RPM", "30");
        std::env::set_var("TASKCREW_MAX_EXECUTION_SECS", "120");
        let config = ExecutorConfig::from_env().expect("set values load");
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.max_rpm, Some(30));
        assert_eq!(config.max_execution_time, Some(Duration::from_secs(120)));

        std::env::set_var("TASKCREW_MAX_RPM", "lots");
        let err = ExecutorConfig::from_env().expect_err("rejects junk");
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "TASKCREW_MAX_RPM"));

        std::env::remove_var("TASKCREW_MAX_ITERATIONS");
        std::env::remove_var("TASKCREW_MAX_RPM");
        std::env::remove_var("TASKCREW_MAX_EXECUTION_SECS");
    }
}

//! Client configuration.
//!
//! Every field has a default, so a config file only needs the values that
//! differ. Binaries load the file first and then apply CLI overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::ArmInfo;
use crate::error::ConfigError;
use crate::solver::SolverConfig;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Robot WebSocket endpoint.
    pub url: String,
    /// Grid widget id of the arm.
    pub widget_uuid: u32,
    pub retry_interval_ms: u64,
    /// Attempt budget for bounded reliable commands.
    pub retry_attempts: u32,
    pub frame_interval_ms: u64,
    /// Position is pushed every this many frames.
    pub frame_divider: u32,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub solver: SolverConfig,
    /// Layout used until the robot sends its own.
    pub arm: ArmInfo,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://192.168.0.1/ws".to_string(),
            widget_uuid: 0,
            retry_interval_ms: 100,
            retry_attempts: 30,
            frame_interval_ms: 16,
            frame_divider: 2,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
            solver: SolverConfig::default(),
            arm: ArmInfo::default(),
        }
    }
}

impl ClientConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("bad url {:?}: {}", self.url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConfigError::Invalid(format!(
                "url scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }

        for (name, value) in [
            ("retry_interval_ms", self.retry_interval_ms),
            ("frame_interval_ms", self.frame_interval_ms),
            ("reconnect_initial_ms", self.reconnect_initial_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(ConfigError::Invalid(
                "reconnect_max_ms is below reconnect_initial_ms".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be positive".to_string(),
            ));
        }
        if self.frame_divider == 0 {
            return Err(ConfigError::Invalid(
                "frame_divider must be positive".to_string(),
            ));
        }
        if self.solver.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "solver.max_iterations must be positive".to_string(),
            ));
        }
        self.arm.validate()
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_interval(), Duration::from_millis(100));
        assert_eq!(config.retry_attempts, 30);
        assert_eq!(config.solver.max_iterations, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(
            r#"{"url": "ws://127.0.0.1:9000/ws", "widget_uuid": 4, "solver": {"root_snap": 2.5}}"#,
        )
        .unwrap();
        assert_eq!(config.url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.widget_uuid, 4);
        assert_eq!(config.frame_divider, 2);
        assert_eq!(config.solver.root_snap, 2.5);
        assert_eq!(config.solver.reach_tolerance_sq, 10.0);
        assert_eq!(config.arm, ArmInfo::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            ClientConfig::from_json(r#"{"url": "http://robot/ws"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"retry_interval_ms": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"reconnect_initial_ms": 5000, "reconnect_max_ms": 100}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"arm": {"radius": 1, "height": 1, "off_y": 0, "bones": []}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ClientConfig::load("/nonexistent/gridarm.json"),
            Err(ConfigError::Io(_))
        ));
    }
}

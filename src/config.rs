//! Konfiguration eines Anrufs
//!
//! Alle Felder haben Defaults, eine leere JSON-Datei (`{}`) ist gültig.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    pub restart_debounce_ms: u64,
    pub restart_step_delay_ms: u64,
    pub telephony_managed: bool,
}

impl AudioConfig {
    pub fn restart_debounce(&self) -> Duration {
        Duration::from_millis(self.restart_debounce_ms)
    }

    pub fn restart_step_delay(&self) -> Duration {
        Duration::from_millis(self.restart_step_delay_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            restart_debounce_ms: 1000,
            restart_step_delay_ms: 200,
            telephony_managed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IceConfig {
    pub disconnected_grace_ms: u64,
}

impl IceConfig {
    pub fn disconnected_grace(&self) -> Duration {
        Duration::from_millis(self.disconnected_grace_ms)
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            disconnected_grace_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalingConfig {
    pub url: String,
    pub request_timeout_ms: u64,
    pub event_buffer: usize,
}

impl SignalingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3031".to_string(),
            request_timeout_ms: 10_000,
            event_buffer: 100,
        }
    }
}

// ============================================================================
// CALL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallConfig {
    pub audio: AudioConfig,
    pub ice: IceConfig,
    pub signaling: SignalingConfig,
    pub log_filter: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            ice: IceConfig::default(),
            signaling: SignalingConfig::default(),
            log_filter: "sfu_call_lib=debug".to_string(),
        }
    }
}

impl CallConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.signaling.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.signaling.url, e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(ConfigError::InvalidUrl(format!(
                "unsupported scheme {}",
                other
            ))),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

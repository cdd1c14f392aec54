//! Server configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! an optional TOML file, then command-line flags (see `main.rs`).

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

// ─── Defaults ────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DEBOUNCE_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// A collector slower than this is considered hung.
const MAX_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Interface to listen on
    pub bind: IpAddr,

    /// TCP port; 0 picks an ephemeral port
    pub port: u16,

    /// Minimum interval between two collector runs
    pub debounce_secs: u64,

    /// Hard wall-clock limit for one collector run
    pub timeout_secs: u64,

    /// Collector script or executable
    pub collector: PathBuf,

    /// Program used to run `collector`; `None` executes it directly.
    /// In TOML, `interpreter = ""` selects direct execution.
    #[serde(deserialize_with = "blank_as_none")]
    pub interpreter: Option<String>,

    /// Working directory for the collector process
    pub workdir: PathBuf,

    /// File the collector writes and `/api/refresh` serves
    pub snapshot: PathBuf,

    /// Root directory for static dashboard assets
    pub static_dir: PathBuf,

    /// Treat a collector that exits non-zero as a successful run
    pub accept_nonzero_exit: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([127, 0, 0, 1]),
            port: DEFAULT_PORT,
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            collector: PathBuf::from("refresh.sh"),
            interpreter: Some("bash".into()),
            workdir: PathBuf::from("."),
            snapshot: PathBuf::from("data.json"),
            static_dir: PathBuf::from("."),
            accept_nonzero_exit: false,
        }
    }
}

impl DashboardConfig {
    /// Load a config from a TOML file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject values that would make the refresh path misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs".to_string(),
                reason: format!("Collector timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds"),
            });
        }

        if self.collector.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "collector".to_string(),
                reason: "Collector path must not be empty".to_string(),
            });
        }

        if self.snapshot.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "snapshot".to_string(),
                reason: "Snapshot path must not be empty".to_string(),
            });
        }

        if matches!(&self.interpreter, Some(i) if i.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "interpreter".to_string(),
                reason: "Interpreter must be omitted or non-empty".to_string(),
            });
        }

        Ok(())
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

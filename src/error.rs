//! Error types for the dashboard refresh server.

use std::time::Duration;

use thiserror::Error;

/// Failures of a single collector invocation.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The collector did not finish before the deadline and was killed.
    #[error("collector timed out after {0:?}")]
    TimedOut(Duration),

    /// The executable could not be started (missing, not executable, ...).
    #[error("failed to spawn collector: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The child started but waiting on it failed.
    #[error("failed to wait for collector: {0}")]
    Wait(#[source] std::io::Error),

    /// The collector ran to completion but reported failure.
    #[error("collector exited with {0}")]
    ExitStatus(std::process::ExitStatus),
}

impl CollectorError {
    /// Short, stable label safe to expose outside the process.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimedOut(_) => "timed_out",
            Self::SpawnFailed(_) => "spawn_failed",
            Self::Wait(_) => "wait_failed",
            Self::ExitStatus(_) => "exit_status",
        }
    }
}

/// Failures reading the snapshot file.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// No snapshot has been produced yet.
    #[error("snapshot not found")]
    NotFound,

    /// Any other I/O failure.
    #[error("failed to read snapshot: {0}")]
    Read(#[from] std::io::Error),

    /// Replacing the snapshot file failed.
    #[error("failed to write snapshot: {0}")]
    Write(#[source] std::io::Error),
}

/// Invalid startup configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_error_kind_labels() {
        assert_eq!(
            CollectorError::TimedOut(Duration::from_secs(15)).kind(),
            "timed_out"
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        assert_eq!(CollectorError::SpawnFailed(io).kind(), "spawn_failed");
    }

    #[test]
    fn test_snapshot_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SnapshotError = io.into();
        assert!(matches!(err, SnapshotError::Read(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_timed_out_message_includes_duration() {
        let err = CollectorError::TimedOut(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "collector timed out after 1.5s");
    }
}

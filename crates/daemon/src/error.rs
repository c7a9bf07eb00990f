use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no UVC camera found")]
    NoCandidateFound,
    #[error("permission denied for {0}")]
    PermissionDenied(String),
    #[error("permission request for {0} was cancelled")]
    PermissionCancelled(String),
    #[error("failed to open {device}: {reason}")]
    DeviceOpenFailed { device: String, reason: String },
    #[error("preview failed to start after {attempts} attempts: {last}")]
    PreviewStartFailed { attempts: u32, last: String },
    #[error("device {0} was lost")]
    DeviceLost(String),
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("no preview target is bound")]
    NoPreviewTarget,
    #[error("preview target {0} was destroyed")]
    TargetLost(String),
    #[error("operation cancelled by teardown")]
    Cancelled,
    #[error("session worker has stopped")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

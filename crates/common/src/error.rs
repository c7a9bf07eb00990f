use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("operation not supported by the device")]
    Unsupported,
    #[error("control handle {0} is not open")]
    InvalidHandle(u64),
    #[error("device rejected open: {0}")]
    OpenRejected(String),
    #[error("device is not streaming")]
    NotStreaming,
    #[error("device i/o failed: {0}")]
    Io(String),
}

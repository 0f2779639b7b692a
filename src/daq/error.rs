use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaqError {
    #[error("driver failure: {0}")]
    Driver(String),
    #[error("file I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel count mismatch: log has {expected}, block has {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("timestamp count mismatch: block has {expected} samples, got {actual} timestamps")]
    TimestampMismatch { expected: usize, actual: usize },
    #[error("peer channel disconnected")]
    Disconnected,
}

/// Service-level errors
/// These represent failures in the ingestion service's core operations.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request body too large: {0} bytes (max: {1})")]
    BodyTooLarge(usize, usize),

    #[error("invalid partition count: {0}")]
    InvalidPartitionCount(u32),

    #[error("invalid offset file {path}: {reason}")]
    InvalidOffsetFile { path: String, reason: String },

    #[error("unknown sink mode: {0}")]
    UnknownSinkMode(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

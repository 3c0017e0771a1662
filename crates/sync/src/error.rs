use booksync_middleware::TransportError;
use thiserror::Error;

/// A payload that could not be turned into a [`DeltaFrame`](crate::codec::DeltaFrame).
///
/// Decode failures drop the frame; they never touch book state and never trigger a resync.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("frame exceeds {limit} bytes after decompression")]
    TooLarge { limit: usize },

    #[error("malformed frame: {0}")]
    Deserialize(String),

    #[error("unknown frame type: {0:?}")]
    UnknownType(String),

    #[error("batch frames cannot contain batches")]
    NestedBatch,

    #[error("invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: f64 },
}

/// A sequence number arrived past the next expected one.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sequence gap: expected {expected}, received {received}")]
pub struct GapError {
    pub expected: u64,
    pub received: u64,
}

impl GapError {
    /// Number of frames missing between the last accepted and the received sequence.
    pub fn missing(&self) -> u64 {
        self.received.saturating_sub(self.expected)
    }
}

/// No frame of any kind arrived within the liveness window.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no frames received within {timeout_ms}ms")]
pub struct LivenessTimeout {
    pub timeout_ms: u64,
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("snapshot endpoint returned status {0}")]
    Status(u16),

    #[error("invalid snapshot payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("snapshot request timed out after {0}ms")]
    Timeout(u64),
}

impl From<reqwest::Error> for SnapshotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return SnapshotError::Http(format!("timed out: {}", e));
        }
        match e.status() {
            Some(status) => SnapshotError::Status(status.as_u16()),
            None => SnapshotError::Http(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid subscription {0:?}, expected MARKET:GRANULARITY")]
    InvalidSubscription(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to encode ack: {0}")]
    Ack(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

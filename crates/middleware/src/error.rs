use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("no responder for subject: {0}")]
    NoResponders(String),
    #[error("timeout")]
    Timeout,
    #[error("subscription closed")]
    Closed,
    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),
}

impl TransportError {
    /// Whether the subscription can keep delivering after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

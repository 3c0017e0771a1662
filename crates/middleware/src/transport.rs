use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TransportError;

/// Header carrying the application event name of a message (e.g. `ack`).
pub const EVENT_HEADER: &str = "event";

/// Message envelope with metadata
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
    /// Receive time, Unix millis
    pub timestamp: i64,
    pub sequence: Option<u64>,
}

impl TransportMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// The value of the [`EVENT_HEADER`], if any.
    pub fn event(&self) -> Option<&str> {
        self.header(EVENT_HEADER)
    }
}

/// Subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Receive next message (blocks until available)
    async fn next(&mut self) -> Result<TransportMessage, TransportError>;

    /// Unsubscribe and close
    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError>;
}

/// Transport abstraction for pub/sub messaging
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message (fire and forget)
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Publish with headers
    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Subscribe to a subject
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError>;

    /// Request/reply pattern with timeout
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<TransportMessage, TransportError>;
}

/// Current wall-clock time in Unix millis.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_event_header() {
        let msg = TransportMessage {
            subject: "prod.book.BTC-YES.g1".to_string(),
            payload: Bytes::from(r#"{"event":"ack","seq":1}"#),
            headers: HashMap::from([(EVENT_HEADER.to_string(), "ack".to_string())]),
            timestamp: 1703318400000,
            sequence: Some(1),
        };

        assert_eq!(msg.event(), Some("ack"));
        assert_eq!(msg.header("missing"), None);
        assert_eq!(msg.sequence, Some(1));
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2023-12-23 as a floor
        assert!(now_millis() > 1703318400000);
    }
}

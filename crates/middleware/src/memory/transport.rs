use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::TransportError;
use crate::transport::{now_millis, Subscription, Transport, TransportMessage};

const CHANNEL_BUFFER_SIZE: usize = 1024;

type Responder = Arc<dyn Fn(Bytes) -> Result<Bytes, TransportError> + Send + Sync>;

/// Broadcast-channel transport for tests and single-process wiring.
///
/// Request/reply is served by handlers registered with [`respond_with`];
/// requests to a subject without a handler fail with `NoResponders`.
///
/// [`respond_with`]: InMemoryTransport::respond_with
pub struct InMemoryTransport {
    channels: DashMap<String, broadcast::Sender<TransportMessage>>,
    responders: DashMap<String, Responder>,
    sequence: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            responders: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a request handler for `subject`, replacing any previous one.
    pub fn respond_with<F>(&self, subject: &str, handler: F)
    where
        F: Fn(Bytes) -> Result<Bytes, TransportError> + Send + Sync + 'static,
    {
        self.responders
            .insert(subject.to_string(), Arc::new(handler));
    }

    /// Number of live receivers on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.channels
            .get(subject)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    #[inline]
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn get_or_create_channel(&self, subject: &str) -> broadcast::Sender<TransportMessage> {
        self.channels
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<TransportMessage>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => TransportError::Closed,
            broadcast::error::RecvError::Lagged(n) => TransportError::Lagged(n),
        })
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.publish_with_headers(subject, payload, HashMap::new())
            .await
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let tx = self.get_or_create_channel(subject);
        let seq = self.next_sequence();
        let msg = TransportMessage {
            subject: subject.to_string(),
            payload,
            headers,
            timestamp: now_millis(),
            sequence: Some(seq),
        };
        // No receivers is not an error for fire-and-forget publish
        let _ = tx.send(msg);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let tx = self.get_or_create_channel(subject);
        let rx = tx.subscribe();
        Ok(Box::new(InMemorySubscription { rx }))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        _timeout: Duration,
    ) -> Result<TransportMessage, TransportError> {
        let handler = self
            .responders
            .get(subject)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| TransportError::NoResponders(subject.to_string()))?;

        let reply = handler(payload)?;
        Ok(TransportMessage {
            subject: subject.to_string(),
            payload: reply,
            headers: HashMap::new(),
            timestamp: now_millis(),
            sequence: Some(self.next_sequence()),
        })
    }
}

use std::collections::HashMap;
use std::time::Duration;

use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::TransportError;
use crate::transport::{now_millis, Subscription, Transport, TransportMessage};

/// NATS subscription wrapper
struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

impl NatsSubscription {
    fn new(subscriber: async_nats::Subscriber) -> Self {
        Self { subscriber }
    }
}

fn copy_headers(map: &async_nats::HeaderMap) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(name, values)| {
            values
                .first()
                .map(|v| (name.to_string(), v.as_str().to_string()))
        })
        .collect()
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<TransportMessage, TransportError> {
        let msg = self.subscriber.next().await.ok_or(TransportError::Closed)?;

        Ok(TransportMessage {
            subject: msg.subject.to_string(),
            headers: msg.headers.as_ref().map(copy_headers).unwrap_or_default(),
            payload: msg.payload,
            timestamp: now_millis(),
            sequence: None,
        })
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), TransportError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }
}

/// Core NATS transport (no JetStream; book frames are ephemeral)
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    /// Create a new NatsTransport from an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to NATS server and create transport
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Flush pending publishes to the server
    pub async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        payload: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError> {
        let mut nats_headers = async_nats::HeaderMap::new();
        for (k, v) in headers {
            nats_headers.insert(k.as_str(), v.as_str());
        }

        self.client
            .publish_with_headers(subject.to_string(), nats_headers, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        Ok(Box::new(NatsSubscription::new(subscriber)))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<TransportMessage, TransportError> {
        let response = tokio::time::timeout(
            timeout,
            self.client.request(subject.to_string(), payload),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| match e.kind() {
            async_nats::client::RequestErrorKind::NoResponders => {
                TransportError::NoResponders(subject.to_string())
            }
            async_nats::client::RequestErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::RequestFailed(e.to_string()),
        })?;

        Ok(TransportMessage {
            subject: response.subject.to_string(),
            headers: response.headers.as_ref().map(copy_headers).unwrap_or_default(),
            payload: response.payload,
            timestamp: now_millis(),
            sequence: None,
        })
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use booksync_middleware::{
    SubjectBuilder, Subscription, Transport, TransportError, EVENT_HEADER,
};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::{AckMessage, ACK_EVENT};
use crate::error::SyncError;
use crate::types::SubscriptionKey;

/// One book channel subscription: raw frames in, acks out.
///
/// Acks are published on the same subject tagged with the `event: ack`
/// header; [`next_payload`](Self::next_payload) skips them.
pub struct ChannelSubscriber {
    key: SubscriptionKey,
    subject: Arc<str>,
    transport: Arc<dyn Transport>,
    subscription: Option<Box<dyn Subscription>>,
}

impl ChannelSubscriber {
    pub async fn open(
        transport: Arc<dyn Transport>,
        subjects: &SubjectBuilder,
        key: SubscriptionKey,
    ) -> Result<Self, TransportError> {
        let subject = subjects.book(&key.market_id, key.granularity);
        let subscription = transport.subscribe(&subject).await?;
        debug!(market = %key.market_id, granularity = key.granularity, subject = %subject, "Subscribed to book channel");

        Ok(Self {
            key,
            subject,
            transport,
            subscription: Some(subscription),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Next frame payload. Fails with `Closed` once unsubscribed.
    pub async fn next_payload(&mut self) -> Result<Bytes, TransportError> {
        let subscription = self.subscription.as_mut().ok_or(TransportError::Closed)?;
        loop {
            let msg = subscription.next().await?;
            if msg.event() == Some(ACK_EVENT) {
                continue;
            }
            return Ok(msg.payload);
        }
    }

    /// Publish an ack for `seq`.
    pub async fn ack(&self, seq: u64) -> Result<(), SyncError> {
        let payload = AckMessage::new(seq).to_bytes()?;
        let headers = HashMap::from([(EVENT_HEADER.to_string(), ACK_EVENT.to_string())]);
        self.transport
            .publish_with_headers(&self.subject, payload, headers)
            .await?;
        Ok(())
    }

    /// Stop delivery. Safe to call more than once.
    pub async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        let Some(subscription) = self.subscription.take() else {
            return Ok(());
        };
        subscription.unsubscribe().await.map_err(|e| {
            warn!(market = %self.key.market_id, granularity = self.key.granularity, error = %e, "Unsubscribe failed");
            e
        })
    }
}

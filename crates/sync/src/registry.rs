use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::error::SyncError;
use crate::session::{BookView, SessionContext, SessionHandle};
use crate::types::SubscriptionKey;

/// All active book subscriptions, at most one session per key.
pub struct BookRegistry {
    ctx: SessionContext,
    sessions: DashMap<SubscriptionKey, Arc<SessionHandle>>,
}

impl BookRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            sessions: DashMap::new(),
        }
    }

    /// Start syncing `key`, or return the session already running for it.
    pub async fn subscribe(&self, key: SubscriptionKey) -> Result<Arc<SessionHandle>, SyncError> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let handle = Arc::new(SessionHandle::spawn(key.clone(), &self.ctx).await?);
        // Another caller may have won the race while we were subscribing
        let winner = match self.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&handle));
                None
            }
        };

        match winner {
            Some(existing) => {
                handle.unsubscribe().await;
                Ok(existing)
            }
            None => {
                info!(market = %key.market_id, granularity = key.granularity, "Subscribed to book");
                Ok(handle)
            }
        }
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<Arc<SessionHandle>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn view(&self, key: &SubscriptionKey) -> Option<BookView> {
        self.sessions.get(key).map(|entry| entry.view())
    }

    /// Stop syncing `key`. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let Some((_, handle)) = self.sessions.remove(key) else {
            return false;
        };
        handle.unsubscribe().await;
        info!(market = %key.market_id, granularity = key.granularity, "Unsubscribed from book");
        true
    }

    /// Subscribed keys, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> =
            self.sessions.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session.
    pub async fn shutdown(&self) {
        for key in self.keys() {
            self.unsubscribe(&key).await;
        }
    }
}

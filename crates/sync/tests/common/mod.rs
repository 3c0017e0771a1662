#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use booksync_lib::codec;
use booksync_lib::{
    BookSnapshot, BookUpdate, BookView, DeltaFrame, LevelChange, PriceLevel, SessionContext,
    SessionHandle, SnapshotError, SnapshotSource, SubscriptionKey, SyncConfig,
};
use booksync_middleware::{InMemoryTransport, SubjectBuilder, Transport};
use bytes::Bytes;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub type SnapshotReply = Result<BookSnapshot, SnapshotError>;

struct Script {
    tx: mpsc::UnboundedSender<SnapshotReply>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SnapshotReply>>>,
}

/// Snapshot source whose replies are queued by the test, per key.
///
/// A fetch with nothing queued waits until the test replies.
#[derive(Default)]
pub struct ScriptedSnapshots {
    scripts: Mutex<HashMap<SubscriptionKey, Script>>,
    calls: AtomicUsize,
    cancelled: AtomicUsize,
}

impl ScriptedSnapshots {
    pub fn reply(&self, key: &SubscriptionKey, reply: SnapshotReply) {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(key.clone()).or_insert_with(new_script);
        script.tx.send(reply).unwrap();
    }

    /// Fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetches dropped before a reply arrived.
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn receiver(
        &self,
        key: SubscriptionKey,
    ) -> Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<SnapshotReply>>> {
        let mut scripts = self.scripts.lock().unwrap();
        Arc::clone(&scripts.entry(key).or_insert_with(new_script).rx)
    }
}

fn new_script() -> Script {
    let (tx, rx) = mpsc::unbounded_channel();
    Script {
        tx,
        rx: Arc::new(tokio::sync::Mutex::new(rx)),
    }
}

struct CancelGuard<'a> {
    done: bool,
    cancelled: &'a AtomicUsize,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshots {
    async fn fetch_snapshot(
        &self,
        market_id: &str,
        granularity: u32,
        _depth: usize,
    ) -> Result<BookSnapshot, SnapshotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rx = self.receiver(SubscriptionKey::new(market_id, granularity));

        let mut guard = CancelGuard {
            done: false,
            cancelled: &self.cancelled,
        };
        let reply = rx.lock().await.recv().await;
        guard.done = true;

        reply.unwrap_or_else(|| Err(SnapshotError::Http("script closed".to_string())))
    }
}

pub struct Harness {
    pub transport: Arc<InMemoryTransport>,
    pub subjects: Arc<SubjectBuilder>,
    pub snapshots: Arc<ScriptedSnapshots>,
    pub ctx: SessionContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        let subjects = Arc::new(SubjectBuilder::new("test", "clob"));
        let snapshots = Arc::new(ScriptedSnapshots::default());
        let ctx = SessionContext {
            config: Arc::new(config),
            transport: transport.clone(),
            subjects: Arc::clone(&subjects),
            snapshots: snapshots.clone(),
        };
        Self {
            transport,
            subjects,
            snapshots,
            ctx,
        }
    }

    pub async fn spawn(&self, key: &SubscriptionKey) -> SessionHandle {
        SessionHandle::spawn(key.clone(), &self.ctx).await.unwrap()
    }

    pub fn subject(&self, key: &SubscriptionKey) -> String {
        self.subjects.book(&key.market_id, key.granularity).to_string()
    }

    pub async fn publish(&self, key: &SubscriptionKey, frame: &DeltaFrame) {
        self.publish_raw(key, codec::encode(frame).unwrap()).await;
    }

    pub async fn publish_raw(&self, key: &SubscriptionKey, payload: Bytes) {
        self.transport
            .publish(&self.subject(key), payload)
            .await
            .unwrap();
    }
}

/// Wait until the session's view satisfies `pred`.
pub async fn wait_for(handle: &SessionHandle, pred: impl FnMut(&BookView) -> bool) -> BookView {
    let mut rx = handle.watch();
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for book view")
        .map(|view| view.clone())
        .expect("session dropped its view")
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn level(price: &str, size: &str) -> PriceLevel {
    PriceLevel::new(dec(price), dec(size), dec(size))
}

pub fn change(price: &str, size: &str) -> LevelChange {
    LevelChange::new(dec(price), dec(size), dec(size))
}

pub fn snapshot(sequence: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> BookSnapshot {
    BookSnapshot {
        sequence,
        bids: bids.iter().map(|(p, s)| level(p, s)).collect(),
        asks: asks.iter().map(|(p, s)| level(p, s)).collect(),
        timestamp: None,
    }
}

pub fn update(sequence: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DeltaFrame {
    DeltaFrame::Update(BookUpdate {
        sequence,
        bids: bids.iter().map(|(p, s)| change(p, s)).collect(),
        asks: asks.iter().map(|(p, s)| change(p, s)).collect(),
        requires_ack: false,
    })
}

pub fn heartbeat(sequence: u64) -> DeltaFrame {
    DeltaFrame::Heartbeat {
        sequence,
        requires_ack: false,
    }
}

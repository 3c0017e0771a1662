//! Per-subscription sync session.
//!
//! Each subscribed `(market, granularity)` runs as one task that owns its book,
//! sequence tracker, watchdog and channel subscription. Callers observe the book
//! through a `watch` channel and stop the task through [`SessionHandle`].
//!
//! Frames that arrive while a snapshot is in flight are buffered and replayed
//! on top of the snapshot once it lands. A failed snapshot, or one older than
//! the last applied frame, leaves the book `Stale`; frames are then dropped and
//! the next liveness timeout retries.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use booksync_middleware::{SubjectBuilder, Transport, TransportError};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::aggregator::Aggregator;
use crate::codec::{DeltaFrame, FrameDecoder};
use crate::config::SyncConfig;
use crate::error::{GapError, LivenessTimeout, SnapshotError, SyncError};
use crate::metrics::SyncMetrics;
use crate::sequence::{Decision, SequenceTracker};
use crate::snapshot::SnapshotSource;
use crate::subscriber::ChannelSubscriber;
use crate::types::{BookSnapshot, BookState, SubscriptionKey};
use crate::watchdog::LivenessWatchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting for a snapshot; frames are buffered
    Syncing,
    /// Book is built from a snapshot plus contiguous deltas
    Live,
    /// Last snapshot failed; book is out of date until the next resync
    Stale,
    /// Unsubscribed or the channel closed
    Closed,
}

/// Point-in-time view of one synchronized book.
#[derive(Debug, Clone, Serialize)]
pub struct BookView {
    pub key: SubscriptionKey,
    pub status: SyncStatus,
    pub book: BookState,
    /// Resyncs after the initial snapshot
    pub resyncs: u64,
}

impl BookView {
    fn initial(key: SubscriptionKey) -> Self {
        Self {
            key,
            status: SyncStatus::Syncing,
            book: BookState::new(),
            resyncs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    Initial,
    Gap(GapError),
    Liveness(LivenessTimeout),
}

impl ResyncReason {
    pub fn label(&self) -> &'static str {
        match self {
            ResyncReason::Initial => "initial",
            ResyncReason::Gap(_) => "gap",
            ResyncReason::Liveness(_) => "liveness",
        }
    }
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncReason::Initial => write!(f, "initial snapshot"),
            ResyncReason::Gap(gap) => write!(f, "{}", gap),
            ResyncReason::Liveness(timeout) => write!(f, "{}", timeout),
        }
    }
}

/// Shared dependencies for every session.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<SyncConfig>,
    pub transport: Arc<dyn Transport>,
    pub subjects: Arc<SubjectBuilder>,
    pub snapshots: Arc<dyn SnapshotSource>,
}

/// Owner's handle to a running session. Dropping it stops the session.
pub struct SessionHandle {
    key: SubscriptionKey,
    view: watch::Receiver<BookView>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    /// Subscribe to the book channel and start syncing.
    ///
    /// The channel subscription is live before the initial snapshot is
    /// requested, so no frame after the snapshot's sequence can be missed.
    pub async fn spawn(key: SubscriptionKey, ctx: &SessionContext) -> Result<Self, SyncError> {
        let subscriber =
            ChannelSubscriber::open(Arc::clone(&ctx.transport), &ctx.subjects, key.clone()).await?;
        let (view_tx, view_rx) = watch::channel(BookView::initial(key.clone()));
        let view_tx = Arc::new(view_tx);
        let shutdown = CancellationToken::new();

        let session = BookSession::new(
            key.clone(),
            ctx,
            subscriber,
            Arc::clone(&view_tx),
            shutdown.clone(),
        );
        let task = tokio::spawn(supervise(key.clone(), tokio::spawn(session.run()), view_tx));

        Ok(Self {
            key,
            view: view_rx,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn view(&self) -> BookView {
        self.view.borrow().clone()
    }

    pub fn book(&self) -> BookState {
        self.view.borrow().book.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.view.borrow().status
    }

    /// Receiver notified on every book change.
    pub fn watch(&self) -> watch::Receiver<BookView> {
        self.view.clone()
    }

    /// Stop the session and wait for it to release its subscription.
    ///
    /// Cancels any in-flight snapshot. Calling it again is a no-op.
    pub async fn unsubscribe(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(market = %self.key.market_id, granularity = self.key.granularity, error = %e, "Book session supervisor failed");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Wait for a session task; if it died without tearing down, mark its book closed.
async fn supervise(
    key: SubscriptionKey,
    task: JoinHandle<()>,
    view_tx: Arc<watch::Sender<BookView>>,
) {
    let Err(e) = task.await else {
        return;
    };
    error!(market = %key.market_id, granularity = key.granularity, error = %e, "Book session panicked");
    SyncMetrics::new(&key).session_stopped();
    view_tx.send_modify(|view| view.status = SyncStatus::Closed);
}

struct InFlight {
    generation: u64,
    reason: ResyncReason,
    task: JoinHandle<()>,
}

struct SnapshotOutcome {
    generation: u64,
    result: Result<BookSnapshot, SnapshotError>,
}

struct BookSession {
    key: SubscriptionKey,
    config: Arc<SyncConfig>,
    decoder: FrameDecoder,
    aggregator: Aggregator,
    book: BookState,
    tracker: SequenceTracker,
    watchdog: LivenessWatchdog,
    subscriber: ChannelSubscriber,
    snapshots: Arc<dyn SnapshotSource>,
    status: SyncStatus,
    resyncs: u64,
    generation: u64,
    in_flight: Option<InFlight>,
    buffered: VecDeque<DeltaFrame>,
    outcome_tx: mpsc::Sender<SnapshotOutcome>,
    outcome_rx: mpsc::Receiver<SnapshotOutcome>,
    view_tx: Arc<watch::Sender<BookView>>,
    shutdown: CancellationToken,
    metrics: SyncMetrics,
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl BookSession {
    fn new(
        key: SubscriptionKey,
        ctx: &SessionContext,
        subscriber: ChannelSubscriber,
        view_tx: Arc<watch::Sender<BookView>>,
        shutdown: CancellationToken,
    ) -> Self {
        let config = Arc::clone(&ctx.config);
        let (outcome_tx, outcome_rx) = mpsc::channel(4);

        Self {
            decoder: FrameDecoder::new(config.max_frame_bytes),
            aggregator: Aggregator::new(key.granularity, config.tick_size, config.depth),
            book: BookState::new(),
            tracker: SequenceTracker::new(),
            watchdog: LivenessWatchdog::new(config.liveness_timeout(), Instant::now()),
            subscriber,
            snapshots: Arc::clone(&ctx.snapshots),
            status: SyncStatus::Syncing,
            resyncs: 0,
            generation: 0,
            in_flight: None,
            buffered: VecDeque::new(),
            outcome_tx,
            outcome_rx,
            view_tx,
            shutdown,
            metrics: SyncMetrics::new(&key),
            key,
            config,
        }
    }

    async fn run(mut self) {
        self.metrics.session_started();
        info!(
            market = %self.key.market_id,
            granularity = self.key.granularity,
            subject = %self.subscriber.subject(),
            "Book session started"
        );
        self.request_resync(ResyncReason::Initial);
        self.publish_view();

        loop {
            let deadline = self.watchdog.deadline();
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!(market = %self.key.market_id, granularity = self.key.granularity, "Book session cancelled");
                    break;
                }

                Some(outcome) = self.outcome_rx.recv() => self.on_snapshot(outcome),

                received = self.subscriber.next_payload() => match received {
                    Ok(payload) => self.on_payload(&payload).await,
                    Err(TransportError::Lagged(skipped)) => {
                        warn!(
                            market = %self.key.market_id,
                            granularity = self.key.granularity,
                            skipped,
                            "Book channel lagged, frames lost"
                        );
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(market = %self.key.market_id, granularity = self.key.granularity, error = %e, "Book channel error");
                    }
                    Err(e) => {
                        error!(market = %self.key.market_id, granularity = self.key.granularity, error = %e, "Book channel closed");
                        break;
                    }
                },

                _ = sleep_until_deadline(deadline) => self.on_deadline(),
            }
        }

        self.teardown().await;
    }

    async fn on_payload(&mut self, payload: &[u8]) {
        let frame = match self.decoder.decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.inc_decode_error();
                debug!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    error = %e,
                    bytes = payload.len(),
                    "Dropping undecodable frame"
                );
                return;
            }
        };
        self.metrics.inc_frame(frame.kind());

        if self.config.send_acks {
            self.send_acks(&frame).await;
        }

        // A stale book keeps its watchdog running so the timeout retries the snapshot
        if self.status != SyncStatus::Stale {
            self.watchdog.reset(Instant::now());
        }

        for frame in frame.into_sequenced() {
            self.on_frame(frame);
        }
        self.publish_view();
    }

    fn on_frame(&mut self, frame: DeltaFrame) {
        match self.status {
            SyncStatus::Live => self.sequence_and_apply(frame),
            SyncStatus::Syncing => self.buffer(frame),
            SyncStatus::Stale | SyncStatus::Closed => {
                trace!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    seq = frame.sequence(),
                    "Dropping frame, book not synced"
                );
            }
        }
    }

    fn buffer(&mut self, frame: DeltaFrame) {
        if self.buffered.len() >= self.config.max_buffered_frames {
            warn!(
                market = %self.key.market_id,
                granularity = self.key.granularity,
                buffered = self.buffered.len(),
                "Frame buffer full during resync, discarding buffered frames"
            );
            self.metrics.inc_buffer_overflow();
            self.buffered.clear();
        }
        self.buffered.push_back(frame);
    }

    fn sequence_and_apply(&mut self, frame: DeltaFrame) {
        let seq = frame.sequence();
        let decision = self.tracker.accept(seq);
        self.metrics.inc_decision(decision.as_str());

        match decision {
            Decision::Accepted => {
                if let DeltaFrame::Update(update) = &frame {
                    self.aggregator.apply(&mut self.book, update);
                }
                self.book.last_sequence = seq;
                self.metrics.set_last_sequence(seq);
                trace!(market = %self.key.market_id, granularity = self.key.granularity, seq, kind = frame.kind(), "Frame applied");
            }
            Decision::Duplicate => {
                debug!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    seq,
                    last_seq = self.tracker.last_sequence(),
                    "Duplicate frame ignored"
                );
            }
            Decision::GapDetected(gap) => {
                warn!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    expected = gap.expected,
                    received = gap.received,
                    missing = gap.missing(),
                    "Sequence gap detected"
                );
                self.request_resync(ResyncReason::Gap(gap));
            }
        }
    }

    fn request_resync(&mut self, reason: ResyncReason) {
        if let Some(in_flight) = &self.in_flight {
            debug!(
                market = %self.key.market_id,
                granularity = self.key.granularity,
                reason = reason.label(),
                generation = in_flight.generation,
                "Resync already in flight"
            );
            return;
        }

        self.generation += 1;
        if reason != ResyncReason::Initial {
            self.resyncs += 1;
        }
        self.status = SyncStatus::Syncing;
        self.metrics.inc_resync(reason.label());
        info!(
            market = %self.key.market_id,
            granularity = self.key.granularity,
            generation = self.generation,
            reason = %reason,
            "Requesting snapshot"
        );

        let generation = self.generation;
        let source = Arc::clone(&self.snapshots);
        let outcome_tx = self.outcome_tx.clone();
        let key = self.key.clone();
        let depth = self.aggregator.depth();
        let timeout = self.config.snapshot_timeout();

        let task = tokio::spawn(async move {
            let fetch = source.fetch_snapshot(&key.market_id, key.granularity, depth);
            let result = match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(SnapshotError::Timeout(timeout.as_millis() as u64)),
            };
            // Receiver gone means the session already stopped
            let _ = outcome_tx.send(SnapshotOutcome { generation, result }).await;
        });

        self.in_flight = Some(InFlight {
            generation,
            reason,
            task,
        });
    }

    fn on_snapshot(&mut self, outcome: SnapshotOutcome) {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.generation == outcome.generation => in_flight,
            other => {
                self.in_flight = other;
                debug!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    generation = outcome.generation,
                    "Ignoring superseded snapshot result"
                );
                return;
            }
        };

        match outcome.result {
            Ok(snapshot) if snapshot.sequence < self.tracker.last_sequence() => {
                warn!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    reason = in_flight.reason.label(),
                    last_seq = self.tracker.last_sequence(),
                    snapshot_seq = snapshot.sequence,
                    "Snapshot is older than the last applied frame, book is stale"
                );
                self.mark_stale();
            }
            Ok(snapshot) => self.install(snapshot, in_flight.reason),
            Err(e) => {
                warn!(
                    market = %self.key.market_id,
                    granularity = self.key.granularity,
                    reason = in_flight.reason.label(),
                    dropped = self.buffered.len(),
                    error = %e,
                    "Snapshot failed, book is stale"
                );
                self.mark_stale();
            }
        }
        self.publish_view();
    }

    /// Keep the current book and baseline; the watchdog retries one timeout from now.
    fn mark_stale(&mut self) {
        self.metrics.inc_snapshot_failure();
        self.buffered.clear();
        self.status = SyncStatus::Stale;
        self.watchdog.reset(Instant::now());
    }

    fn install(&mut self, snapshot: BookSnapshot, reason: ResyncReason) {
        let sequence = snapshot.sequence;
        self.aggregator.install(&mut self.book, snapshot);
        self.tracker.reset_to(sequence);
        self.metrics.set_last_sequence(sequence);
        self.watchdog.reset(Instant::now());
        self.status = SyncStatus::Live;

        info!(
            market = %self.key.market_id,
            granularity = self.key.granularity,
            seq = sequence,
            bids = self.book.bids.len(),
            asks = self.book.asks.len(),
            buffered = self.buffered.len(),
            reason = reason.label(),
            "Snapshot installed"
        );

        // A replayed frame may gap and start another resync; the rest are re-buffered
        for frame in std::mem::take(&mut self.buffered) {
            self.on_frame(frame);
        }
    }

    fn on_deadline(&mut self) {
        if !self.watchdog.poll(Instant::now()) {
            return;
        }

        let timeout = LivenessTimeout {
            timeout_ms: self.watchdog.timeout().as_millis() as u64,
        };
        warn!(
            market = %self.key.market_id,
            granularity = self.key.granularity,
            timeout_ms = timeout.timeout_ms,
            last_seq = self.tracker.last_sequence(),
            status = ?self.status,
            "Liveness timeout, no frames received"
        );
        self.request_resync(ResyncReason::Liveness(timeout));
        self.publish_view();
    }

    async fn send_acks(&self, frame: &DeltaFrame) {
        for seq in frame.ack_sequences() {
            match self.subscriber.ack(seq).await {
                Ok(()) => self.metrics.inc_ack(),
                Err(e) => {
                    warn!(market = %self.key.market_id, granularity = self.key.granularity, seq, error = %e, "Failed to send ack");
                }
            }
        }
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(BookView {
            key: self.key.clone(),
            status: self.status,
            book: self.book.clone(),
            resyncs: self.resyncs,
        });
    }

    async fn teardown(mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            debug!(
                market = %self.key.market_id,
                granularity = self.key.granularity,
                generation = in_flight.generation,
                "Aborted in-flight snapshot"
            );
        }
        self.buffered.clear();
        let _ = self.subscriber.unsubscribe().await;

        self.status = SyncStatus::Closed;
        self.publish_view();
        self.metrics.session_stopped();
        info!(
            market = %self.key.market_id,
            granularity = self.key.granularity,
            resyncs = self.resyncs,
            last_seq = self.tracker.last_sequence(),
            "Book session stopped"
        );
    }
}

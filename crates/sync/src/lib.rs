//! Real-time order book synchronization.
//!
//! Builds a local book from a snapshot, keeps it current from sequenced
//! delta frames on a pub/sub channel, and rebuilds it from a fresh snapshot
//! whenever a sequence gap or a silent channel makes it untrustworthy.

pub mod aggregator;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod sequence;
pub mod session;
pub mod snapshot;
pub mod subscriber;
pub mod types;
pub mod watchdog;

pub use aggregator::{bucket_price, mid_price, Aggregator, PRICE_EPSILON};
pub use codec::{AckMessage, BookUpdate, DeltaFrame, FrameDecoder};
pub use config::SyncConfig;
pub use error::{
    ConfigError, DecodeError, GapError, LivenessTimeout, Result, SnapshotError, SyncError,
};
pub use registry::BookRegistry;
pub use sequence::{Decision, SequenceTracker};
pub use session::{BookView, ResyncReason, SessionContext, SessionHandle, SyncStatus};
pub use snapshot::{HttpSnapshotClient, SnapshotSource, TransportSnapshotClient};
pub use subscriber::ChannelSubscriber;
pub use types::{
    BookSnapshot, BookState, LevelChange, PriceLevel, Side, SnapshotRequest, SubscriptionKey,
};
pub use watchdog::{LivenessWatchdog, WatchdogState};

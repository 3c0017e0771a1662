//! Prometheus metrics for book synchronization.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::types::SubscriptionKey;

static FRAMES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_frames_received_total",
        "Decoded frames by type",
        &["market", "granularity", "kind"]
    )
    .expect("Failed to register frames_received metric")
});

static SEQUENCE_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_sequence_decisions_total",
        "Sequence tracker outcomes",
        &["market", "granularity", "decision"]
    )
    .expect("Failed to register sequence_decisions metric")
});

static DECODE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_decode_errors_total",
        "Frames dropped because they failed to decode",
        &["market", "granularity"]
    )
    .expect("Failed to register decode_errors metric")
});

static RESYNCS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_resyncs_total",
        "Snapshot resyncs started, by reason",
        &["market", "granularity", "reason"]
    )
    .expect("Failed to register resyncs metric")
});

static SNAPSHOT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_snapshot_failures_total",
        "Snapshot fetches that failed or timed out",
        &["market", "granularity"]
    )
    .expect("Failed to register snapshot_failures metric")
});

static BUFFER_OVERFLOWS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_buffer_overflows_total",
        "Frame buffers discarded while a snapshot was in flight",
        &["market", "granularity"]
    )
    .expect("Failed to register buffer_overflows metric")
});

static ACKS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "booksync_acks_sent_total",
        "Acks published back to the book channel",
        &["market", "granularity"]
    )
    .expect("Failed to register acks_sent metric")
});

static LAST_SEQUENCE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "booksync_last_sequence",
        "Last accepted sequence number",
        &["market", "granularity"]
    )
    .expect("Failed to register last_sequence metric")
});

static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("booksync_sessions_active", "Running book sessions")
        .expect("Failed to register sessions_active metric")
});

/// Metrics handle bound to one subscription's labels.
#[derive(Clone)]
pub struct SyncMetrics {
    market: String,
    granularity: String,
    acks: IntCounter,
}

impl SyncMetrics {
    pub fn new(key: &SubscriptionKey) -> Self {
        let granularity = key.granularity.to_string();
        let acks = ACKS_SENT.with_label_values(&[key.market_id.as_str(), granularity.as_str()]);
        Self {
            market: key.market_id.clone(),
            granularity,
            acks,
        }
    }

    fn labels(&self) -> [&str; 2] {
        [self.market.as_str(), self.granularity.as_str()]
    }

    pub fn inc_frame(&self, kind: &str) {
        FRAMES_RECEIVED
            .with_label_values(&[self.market.as_str(), self.granularity.as_str(), kind])
            .inc();
    }

    pub fn inc_decision(&self, decision: &str) {
        SEQUENCE_DECISIONS
            .with_label_values(&[self.market.as_str(), self.granularity.as_str(), decision])
            .inc();
    }

    pub fn inc_decode_error(&self) {
        DECODE_ERRORS.with_label_values(&self.labels()).inc();
    }

    pub fn inc_resync(&self, reason: &str) {
        RESYNCS
            .with_label_values(&[self.market.as_str(), self.granularity.as_str(), reason])
            .inc();
    }

    pub fn inc_snapshot_failure(&self) {
        SNAPSHOT_FAILURES.with_label_values(&self.labels()).inc();
    }

    pub fn inc_buffer_overflow(&self) {
        BUFFER_OVERFLOWS.with_label_values(&self.labels()).inc();
    }

    pub fn inc_ack(&self) {
        self.acks.inc();
    }

    pub fn set_last_sequence(&self, seq: u64) {
        LAST_SEQUENCE
            .with_label_values(&self.labels())
            .set(i64::try_from(seq).unwrap_or(i64::MAX));
    }

    pub fn session_started(&self) {
        SESSIONS_ACTIVE.inc();
    }

    pub fn session_stopped(&self) {
        SESSIONS_ACTIVE.dec();
    }
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recorded_under_labels() {
        let metrics = SyncMetrics::new(&SubscriptionKey::new("METRICS-TEST", 5));
        metrics.inc_frame("update");
        metrics.inc_decision("accepted");
        metrics.inc_resync("gap");
        metrics.inc_ack();
        metrics.set_last_sequence(101);

        assert_eq!(
            LAST_SEQUENCE
                .with_label_values(&["METRICS-TEST", "5"])
                .get(),
            101
        );
        assert_eq!(
            RESYNCS
                .with_label_values(&["METRICS-TEST", "5", "gap"])
                .get(),
            1
        );
    }

    #[test]
    fn test_encode_metrics() {
        let metrics = SyncMetrics::new(&SubscriptionKey::new("ENCODE-TEST", 1));
        metrics.inc_decode_error();

        let output = encode_metrics().unwrap();
        assert!(output.contains("booksync_decode_errors_total"));
        assert!(output.contains("ENCODE-TEST"));
    }
}

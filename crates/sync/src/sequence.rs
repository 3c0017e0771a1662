use crate::error::GapError;

/// Outcome of offering a sequence number to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// At or below the last accepted sequence; ignore
    Duplicate,
    /// Exactly the next sequence (or the first one seen); apply
    Accepted,
    /// Frames were missed; the book must be rebuilt from a snapshot
    GapDetected(GapError),
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Duplicate => "duplicate",
            Decision::Accepted => "accepted",
            Decision::GapDetected(_) => "gap",
        }
    }
}

/// Classifies incoming sequence numbers against the last accepted one.
///
/// A `last_sequence` of zero means nothing has been accepted yet, so the
/// first frame is always accepted and becomes the baseline.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_sequence: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn accept(&mut self, sequence: u64) -> Decision {
        if self.last_sequence != 0 {
            if sequence <= self.last_sequence {
                return Decision::Duplicate;
            }
            let expected = self.last_sequence.saturating_add(1);
            if sequence > expected {
                return Decision::GapDetected(GapError {
                    expected,
                    received: sequence,
                });
            }
        }
        self.last_sequence = sequence;
        Decision::Accepted
    }

    /// Install a snapshot's sequence as the new baseline.
    pub fn reset_to(&mut self, baseline: u64) {
        self.last_sequence = baseline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_accepted() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.accept(42), Decision::Accepted);
        assert_eq!(tracker.last_sequence(), 42);
    }

    #[test]
    fn test_contiguous_accepted() {
        let mut tracker = SequenceTracker::new();
        tracker.reset_to(100);
        assert_eq!(tracker.accept(101), Decision::Accepted);
        assert_eq!(tracker.accept(102), Decision::Accepted);
        assert_eq!(tracker.last_sequence(), 102);
    }

    #[test]
    fn test_duplicates_do_not_move_baseline() {
        let mut tracker = SequenceTracker::new();
        tracker.reset_to(5);
        assert_eq!(tracker.accept(5), Decision::Duplicate);
        assert_eq!(tracker.accept(3), Decision::Duplicate);
        assert_eq!(tracker.last_sequence(), 5);
    }

    #[test]
    fn test_gap_detected() {
        let mut tracker = SequenceTracker::new();
        tracker.reset_to(5);
        assert_eq!(
            tracker.accept(8),
            Decision::GapDetected(GapError {
                expected: 6,
                received: 8
            })
        );
        // the gapped frame is not accepted
        assert_eq!(tracker.last_sequence(), 5);
        assert_eq!(tracker.accept(6), Decision::Accepted);
    }

    #[test]
    fn test_reset_replaces_baseline() {
        let mut tracker = SequenceTracker::new();
        tracker.reset_to(50);
        tracker.reset_to(20);
        assert_eq!(tracker.accept(21), Decision::Accepted);
    }

    #[test]
    fn test_max_sequence_does_not_overflow() {
        let mut tracker = SequenceTracker::new();
        tracker.reset_to(u64::MAX);
        assert_eq!(tracker.accept(u64::MAX), Decision::Duplicate);
    }
}

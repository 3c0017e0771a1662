use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Armed { deadline: Instant },
    /// Timed out; stays here until the next reset so one silence fires once
    Fired { at: Instant },
}

/// Tracks silence on a book channel.
///
/// Pure state machine driven by explicit `now` values; the session owns the
/// actual timer and sleeps until [`deadline`](Self::deadline).
#[derive(Debug)]
pub struct LivenessWatchdog {
    timeout: Duration,
    state: WatchdogState,
    fired: u64,
}

impl LivenessWatchdog {
    /// Create a watchdog armed from `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            state: WatchdogState::Armed {
                deadline: now + timeout,
            },
            fired: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Times the watchdog has fired over its lifetime.
    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    /// Re-arm with a full timeout from `now`.
    pub fn reset(&mut self, now: Instant) {
        self.state = WatchdogState::Armed {
            deadline: now + self.timeout,
        };
    }

    /// Deadline to sleep until, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            WatchdogState::Armed { deadline } => Some(deadline),
            WatchdogState::Fired { .. } => None,
        }
    }

    /// Returns true exactly once per silence: when armed and past the deadline.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            WatchdogState::Armed { deadline } if now >= deadline => {
                self.state = WatchdogState::Fired { at: now };
                self.fired += 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(90);

    #[test]
    fn test_does_not_fire_before_deadline() {
        let t0 = Instant::now();
        let mut watchdog = LivenessWatchdog::new(TIMEOUT, t0);
        assert!(!watchdog.poll(t0 + Duration::from_secs(89)));
        assert_eq!(watchdog.deadline(), Some(t0 + TIMEOUT));
    }

    #[test]
    fn test_fires_once_per_silence() {
        let t0 = Instant::now();
        let mut watchdog = LivenessWatchdog::new(TIMEOUT, t0);

        assert!(watchdog.poll(t0 + TIMEOUT));
        assert!(!watchdog.poll(t0 + TIMEOUT * 2));
        assert!(!watchdog.poll(t0 + TIMEOUT * 10));
        assert_eq!(watchdog.fired_count(), 1);
        assert_eq!(watchdog.deadline(), None);
    }

    #[test]
    fn test_reset_rearms() {
        let t0 = Instant::now();
        let mut watchdog = LivenessWatchdog::new(TIMEOUT, t0);
        assert!(watchdog.poll(t0 + TIMEOUT));

        let t1 = t0 + Duration::from_secs(200);
        watchdog.reset(t1);
        assert!(matches!(watchdog.state(), WatchdogState::Armed { .. }));
        assert!(!watchdog.poll(t1 + Duration::from_secs(1)));
        assert!(watchdog.poll(t1 + TIMEOUT));
        assert_eq!(watchdog.fired_count(), 2);
    }

    #[test]
    fn test_reset_pushes_deadline_forward() {
        let t0 = Instant::now();
        let mut watchdog = LivenessWatchdog::new(TIMEOUT, t0);
        watchdog.reset(t0 + Duration::from_secs(60));
        assert!(!watchdog.poll(t0 + TIMEOUT));
    }
}

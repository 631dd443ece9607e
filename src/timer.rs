//! Retransmission and idle timers.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! acknowledgment arrives within a bounded time.  Each in-flight segment
//! carries its own deadline in the [`crate::window::WindowBuffer`]; this
//! module supplies the pieces around it:
//! - [`RetransmitPolicy`]: the fixed retransmission interval, the polling
//!   interval used for the timed receive, and the per-segment retry budget.
//! - [`IdleTimer`]: bounds the total time the sender waits without forward
//!   progress, so a vanished receiver cannot stall a transfer forever.
//!
//! Deadlines are `tokio::time::Instant`s so tests can run on a paused clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::TransferConfig;

/// Lower bound for the receive polling interval.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Timer parameters derived from a [`TransferConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitPolicy {
    /// Retransmission interval for every segment.
    pub rto: Duration,
    /// How long one timed receive may block before timers are re-checked.
    pub poll_interval: Duration,
    /// Retransmissions allowed per segment without the window advancing.
    pub max_retries: u32,
}

impl RetransmitPolicy {
    pub fn from_config(config: &TransferConfig) -> Self {
        let rto = config.timeout();
        Self {
            rto,
            poll_interval: (rto / 10).max(MIN_POLL),
            max_retries: config.max_retries(),
        }
    }

    /// Deadline for a segment (re)transmitted at `now`.
    pub fn deadline_from(&self, now: Instant) -> Instant {
        now + self.rto
    }
}

/// Tracks time since the last forward progress.
///
/// Only [`touch`](Self::touch) resets it; the sender calls that when its
/// window base advances, never on a stale or duplicate reply.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimer {
    grace: Duration,
    last_progress: Instant,
}

impl IdleTimer {
    pub fn new(grace: Duration, now: Instant) -> Self {
        Self {
            grace,
            last_progress: now,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_progress = now;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_progress)
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.idle_for(now) > self.grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    #[test]
    fn policy_polls_at_a_tenth_of_the_timeout() {
        let config = TransferConfig::new(Mode::SlidingWindow)
            .with_timeout(Duration::from_millis(500))
            .unwrap();
        let policy = RetransmitPolicy::from_config(&config);
        assert_eq!(policy.rto, Duration::from_millis(500));
        assert_eq!(policy.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let config = TransferConfig::new(Mode::StopAndWait)
            .with_timeout(Duration::from_micros(100))
            .unwrap();
        assert_eq!(RetransmitPolicy::from_config(&config).poll_interval, MIN_POLL);
    }

    #[test]
    fn idle_timer_expires_only_after_grace() {
        let start = Instant::now();
        let mut t = IdleTimer::new(Duration::from_millis(100), start);
        assert!(!t.expired(start + Duration::from_millis(100)));
        assert!(t.expired(start + Duration::from_millis(101)));

        t.touch(start + Duration::from_millis(90));
        assert!(!t.expired(start + Duration::from_millis(150)));
        assert_eq!(
            t.idle_for(start + Duration::from_millis(150)),
            Duration::from_millis(60)
        );
    }
}

//! Liveness bookkeeping for one connection.
//!
//! The session sends a probe every second and records acknowledgments here.
//! A separate, slower health check asks this record for a verdict instead
//! of reacting to individual probes, so one delayed tick never kills a
//! healthy link and a genuinely dead one gets several chances first.

use std::time::Duration;
use tokio::time::Instant;

/// What the periodic health check concludes from the ack age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Acks are late enough to warn about, not late enough to act on.
    Degraded(Duration),
    /// The peripheral has stopped responding.
    Failed(Duration),
}

/// Probe/ack timestamps plus a consecutive-miss counter.
///
/// Mutated only by the session task. Times use the tokio clock so the
/// record behaves under test-controlled time.
#[derive(Debug)]
pub struct HeartbeatRecord {
    /// Send time of the oldest probe not yet acknowledged. This is the age
    /// anchor while acks are missing; `last_sent` would reset it on every
    /// probe and a dead link would never look old.
    first_unacked: Option<Instant>,
    last_ack: Option<Instant>,
    missed: u32,
}

impl HeartbeatRecord {
    pub fn new() -> Self {
        Self {
            first_unacked: None,
            last_ack: None,
            missed: 0,
        }
    }

    /// Note a probe going out. A probe sent while the previous one is still
    /// unacknowledged counts as a miss.
    pub fn record_sent(&mut self, now: Instant) {
        match self.first_unacked {
            Some(_) => self.missed += 1,
            None => self.first_unacked = Some(now),
        }
    }

    /// Note an acknowledgment. Duplicates are harmless: the timestamp moves
    /// forward and the miss counter is simply zero again.
    pub fn record_ack(&mut self, now: Instant) {
        self.last_ack = Some(now);
        self.first_unacked = None;
        self.missed = 0;
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.missed
    }

    /// Age of the newest acknowledgment, measured from the first unanswered
    /// probe when nothing has been acknowledged yet.
    pub fn ack_age(&self, now: Instant) -> Option<Duration> {
        self.last_ack
            .or(self.first_unacked)
            .map(|t| now.saturating_duration_since(t))
    }

    /// Evaluate liveness against the soft and hard thresholds.
    pub fn verdict(&self, now: Instant, soft: Duration, hard: Duration) -> HealthVerdict {
        match self.ack_age(now) {
            Some(age) if age > hard => HealthVerdict::Failed(age),
            Some(age) if age >= soft => HealthVerdict::Degraded(age),
            _ => HealthVerdict::Healthy,
        }
    }
}

impl Default for HeartbeatRecord {
    fn default() -> Self {
        Self::new()
    }
}

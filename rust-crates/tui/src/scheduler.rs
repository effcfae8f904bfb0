use crate::transactions::TxKind;
use std::time::Duration;
use tokio::time::{
    self,
    Instant,
    Interval,
    MissedTickBehavior,
};
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    Interval,
    Settlement(TxKind),
    Manual,
}

impl RefreshReason {
    fn priority(self) -> u8 {
        match self {
            RefreshReason::Interval => 0,
            RefreshReason::Manual => 1,
            RefreshReason::Startup => 2,
            RefreshReason::Settlement(_) => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshDecision {
    Dispatch(RefreshReason),
    Deferred,
}

/// Collapses refresh requests into at most one outstanding read plus one
/// deferred follow-up.
#[derive(Debug)]
pub struct RefreshScheduler {
    interval: Duration,
    in_flight: Option<u64>,
    deferred: Option<RefreshReason>,
}

impl RefreshScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            in_flight: None,
            deferred: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll timer; its first tick lands one interval from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    pub fn request(&mut self, reason: RefreshReason) -> RefreshDecision {
        if self.in_flight.is_none() {
            return RefreshDecision::Dispatch(reason);
        }
        let keep = match self.deferred {
            Some(existing) if existing.priority() >= reason.priority() => existing,
            _ => reason,
        };
        debug!(?reason, deferred = ?keep, "refresh deferred behind outstanding read");
        self.deferred = Some(keep);
        RefreshDecision::Deferred
    }

    pub fn begin(&mut self, seq: u64) {
        self.in_flight = Some(seq);
    }

    /// Marks `seq` finished and hands back the deferred request, if any.
    pub fn complete(&mut self, seq: u64) -> Option<RefreshReason> {
        if self.in_flight != Some(seq) {
            return None;
        }
        self.in_flight = None;
        self.deferred.take()
    }

    pub fn outstanding(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

use chrono::{
    DateTime,
    Utc,
};
use std::time::Duration;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ROUND_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Urgency {
    Critical,
    Warning,
    Calm,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountdownDisplay {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub total_ms: u64,
    /// Remaining share of the round window, 0..=100.
    pub progress: f64,
    pub is_open: bool,
    pub urgency: Urgency,
}

impl CountdownDisplay {
    pub fn closed() -> Self {
        Self::from_remaining(0, DEFAULT_ROUND_WINDOW)
    }

    pub fn from_remaining(total_ms: u64, window: Duration) -> Self {
        let window_ms = window.as_millis().max(1) as f64;
        let progress = if total_ms == 0 {
            0.0
        } else {
            (total_ms as f64 / window_ms * 100.0).clamp(0.0, 100.0)
        };
        let urgency = if progress < 25.0 {
            Urgency::Critical
        } else if progress < 50.0 {
            Urgency::Warning
        } else {
            Urgency::Calm
        };
        Self {
            days: total_ms / MS_PER_DAY,
            hours: (total_ms % MS_PER_DAY) / MS_PER_HOUR,
            minutes: (total_ms % MS_PER_HOUR) / MS_PER_MINUTE,
            seconds: (total_ms % MS_PER_MINUTE) / MS_PER_SECOND,
            total_ms,
            progress,
            is_open: total_ms > 0,
            urgency,
        }
    }
}

/// Local one-second countdown towards the contract's end timestamp.
#[derive(Clone, Debug)]
pub struct CountdownClock {
    end_secs: Option<u64>,
    window: Duration,
    finished: bool,
}

impl CountdownClock {
    pub fn new(window: Duration) -> Self {
        Self {
            end_secs: None,
            window,
            finished: false,
        }
    }

    /// Points the clock at a new end time; restarts it if the time changed.
    pub fn set_end(&mut self, end_secs: u64) -> bool {
        if self.end_secs == Some(end_secs) {
            return false;
        }
        self.end_secs = Some(end_secs);
        self.finished = false;
        true
    }

    pub fn is_running(&self) -> bool {
        self.end_secs.is_some() && !self.finished
    }

    /// Advances the clock. Yields the terminal zero state exactly once and
    /// `None` on every later tick until the end time changes.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<CountdownDisplay> {
        if !self.is_running() {
            return None;
        }
        let display = self.display_at(now);
        if !display.is_open {
            self.finished = true;
        }
        Some(display)
    }

    pub fn display_at(&self, now: DateTime<Utc>) -> CountdownDisplay {
        let Some(end_secs) = self.end_secs else {
            return CountdownDisplay::from_remaining(0, self.window);
        };
        let end_ms = i64::try_from(end_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(MS_PER_SECOND as i64);
        let remaining = end_ms.saturating_sub(now.timestamp_millis()).max(0) as u64;
        CountdownDisplay::from_remaining(remaining, self.window)
    }
}

impl Default for CountdownClock {
    fn default() -> Self {
        Self::new(DEFAULT_ROUND_WINDOW)
    }
}

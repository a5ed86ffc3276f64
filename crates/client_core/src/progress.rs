//! Progress bookkeeping for the active story item.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentFill {
    Empty,
    Filled,
    Active { fraction: f64 },
}

impl SegmentFill {
    pub fn width(self) -> f64 {
        match self {
            Self::Empty => 0.0,
            Self::Filled => 1.0,
            Self::Active { fraction } => fraction,
        }
    }
}

/// One segment per item: items before `active` are filled, the active one is
/// partially filled and everything after it is empty.
pub fn segments(count: usize, active: usize, fraction: f64) -> Vec<SegmentFill> {
    (0..count)
        .map(|index| match index.cmp(&active) {
            std::cmp::Ordering::Less => SegmentFill::Filled,
            std::cmp::Ordering::Equal => SegmentFill::Active {
                fraction: fraction.clamp(0.0, 1.0),
            },
            std::cmp::Ordering::Greater => SegmentFill::Empty,
        })
        .collect()
}

/// Tracks how far the active item has played. The clock only advances
/// while running, so a paused item keeps its fill fraction.
#[derive(Debug, Clone, Default)]
pub struct ItemClock {
    duration: Option<Duration>,
    elapsed: Duration,
    running_since: Option<Instant>,
}

impl ItemClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Prepares the clock for a fresh item; `None` means the duration is not
    /// known yet (video awaiting metadata).
    pub fn arm(&mut self, duration: Option<Duration>) {
        self.duration = duration;
        self.elapsed = Duration::ZERO;
        self.running_since = None;
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration = Some(duration);
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn run(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn halt(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.elapsed += now.saturating_duration_since(since);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.running_since {
            Some(since) => self.elapsed + now.saturating_duration_since(since),
            None => self.elapsed,
        }
    }

    pub fn fraction(&self, now: Instant) -> f64 {
        let Some(duration) = self.duration else {
            return 0.0;
        };
        if duration.is_zero() {
            return 1.0;
        }
        (self.elapsed(now).as_secs_f64() / duration.as_secs_f64()).min(1.0)
    }

    /// `total * (1 - fraction)`, the time left before the item completes.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let duration = self.duration?;
        Some(duration.mul_f64(1.0 - self.fraction(now)))
    }
}

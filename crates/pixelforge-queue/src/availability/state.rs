//! Hysteresis bookkeeping for probe results.

use chrono::{DateTime, Utc};

/// Availability as seen through consecutive probe results.
///
/// The flag only flips after `threshold` consecutive results that disagree
/// with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityState {
    /// Current externally visible availability.
    pub is_available: bool,
    /// Successful probes in a row.
    pub consecutive_successes: u32,
    /// Failed probes in a row.
    pub consecutive_failures: u32,
    /// When `is_available` last changed.
    pub last_changed: DateTime<Utc>,
}

impl AvailabilityState {
    /// Start in the given state with empty counters.
    pub fn new(is_available: bool) -> Self {
        Self {
            is_available,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_changed: Utc::now(),
        }
    }

    /// Record one probe result. Returns the new availability when it flips.
    pub fn record(&mut self, success: bool, threshold: u32) -> Option<bool> {
        let threshold = threshold.max(1);

        if success {
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.consecutive_failures = 0;
            if !self.is_available && self.consecutive_successes >= threshold {
                return Some(self.flip(true));
            }
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.consecutive_successes = 0;
            if self.is_available && self.consecutive_failures >= threshold {
                return Some(self.flip(false));
            }
        }

        None
    }

    fn flip(&mut self, available: bool) -> bool {
        self.is_available = available;
        self.last_changed = Utc::now();
        available
    }
}

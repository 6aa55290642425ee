//! # Rate gates
//!
//! The control loops are a single sequential pass over a set of periodic tasks. Each task is
//! guarded by a [`RateGate`] which says whether it is due on the current pass.
//!
//! A gate fires on its first check. After firing, the next deadline is measured from the time it
//! actually fired rather than from the old deadline, so a late pass never causes a burst of
//! catch-up runs.

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fires at most once per period.
#[derive(Debug, Clone)]
pub struct RateGate {
    period_ms: u64,
    next_due_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RateGate {
    /// Create a gate from a frequency in Hertz.
    ///
    /// A non-positive or non-finite frequency gives a gate which fires on every check.
    pub fn from_hz(hz: f64) -> Self {
        let period_ms = if hz.is_finite() && hz > 0.0 {
            (1000.0 / hz).round() as u64
        } else {
            0
        };

        Self::from_period_ms(period_ms)
    }

    /// Create a gate from a period in milliseconds.
    pub fn from_period_ms(period_ms: u64) -> Self {
        Self {
            period_ms,
            next_due_ms: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Returns true if the task is due, in which case the next deadline is set to one period from
    /// `now_ms`.
    pub fn ready(&mut self, now_ms: u64) -> bool {
        let due = match self.next_due_ms {
            None => true,
            Some(t) => now_ms >= t,
        };

        if due {
            self.next_due_ms = Some(now_ms.saturating_add(self.period_ms));
        }

        due
    }

    /// Make the gate fire on its next check.
    pub fn reset(&mut self) {
        self.next_due_ms = None;
    }
}

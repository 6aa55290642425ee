//! # Safety supervisor
//!
//! Watches the command link and brings the plant to a safe rest when it goes stale. The make safe
//! action happens once on entry to each timeout, after which commands are simply not applied
//! until the link recovers. Recovery itself forces nothing: the next fresh command takes over.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can be brought to a safe rest state.
pub trait MakeSafe {
    fn make_safe(&mut self, now_ms: u64);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SafetySupervisor {
    in_timeout: bool,
    num_timeouts: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Transition reported by [`SafetySupervisor::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SafetyEvent {
    /// No change this tick.
    None,

    /// The link just went stale and the plant was made safe.
    EnteredTimeout,

    /// Fresh commands are arriving again.
    Recovered,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SafetySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with the current link staleness, making `plant` safe on entering a timeout.
    pub fn update<M>(&mut self, stale: bool, now_ms: u64, plant: &mut M) -> SafetyEvent
    where
        M: MakeSafe + ?Sized,
    {
        match (self.in_timeout, stale) {
            (false, true) => {
                self.in_timeout = true;
                self.num_timeouts += 1;
                warn!("Command link stale, making safe");
                plant.make_safe(now_ms);
                SafetyEvent::EnteredTimeout
            }
            (true, false) => {
                self.in_timeout = false;
                info!("Command link recovered");
                SafetyEvent::Recovered
            }
            _ => SafetyEvent::None,
        }
    }

    pub fn in_timeout(&self) -> bool {
        self.in_timeout
    }

    /// Number of timeout episodes so far.
    pub fn num_timeouts(&self) -> u64 {
        self.num_timeouts
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct CountingPlant {
        calls: Vec<u64>,
    }

    impl MakeSafe for CountingPlant {
        fn make_safe(&mut self, now_ms: u64) {
            self.calls.push(now_ms);
        }
    }

    #[test]
    fn test_make_safe_once_per_episode() {
        let mut sup = SafetySupervisor::new();
        let mut plant = CountingPlant::default();

        assert_eq!(sup.update(true, 0, &mut plant), SafetyEvent::EnteredTimeout);
        assert_eq!(sup.update(true, 10, &mut plant), SafetyEvent::None);
        assert_eq!(sup.update(true, 20, &mut plant), SafetyEvent::None);
        assert_eq!(plant.calls, vec![0]);

        assert_eq!(sup.update(false, 30, &mut plant), SafetyEvent::Recovered);
        assert!(!sup.in_timeout());
        assert_eq!(sup.update(false, 40, &mut plant), SafetyEvent::None);

        assert_eq!(sup.update(true, 50, &mut plant), SafetyEvent::EnteredTimeout);
        assert_eq!(plant.calls, vec![0, 50]);
        assert_eq!(sup.num_timeouts(), 2);
    }
}

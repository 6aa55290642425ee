//! # Servo sequencer
//!
//! Moves a positional servo towards its commanded target at a limited rate, tracks whether the
//! servo has settled at its target, and releases the servo (stops driving it) once it has been
//! resting at its release position for long enough. Releasing a servo which is held in place by
//! gravity, like a closed lid, stops it buzzing and saves power.
//!
//! The sequencer doesn't own the servo output, it is passed in as a [`ServoOutput`] on every call
//! that may drive it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use serde::Deserialize;
use util::maths::{clamp, step_towards};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// New targets closer than this to the current target are ignored.
///
/// Units: degrees
const TARGET_EPSILON_DEG: f64 = 0.001;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Physical output for a single positional servo.
pub trait ServoOutput {
    /// Drive the servo to the given angle in degrees.
    fn write_deg(&mut self, deg: f64);

    /// Stop driving the servo.
    fn release(&mut self);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sequencer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SeqConfig {
    /// Lowest permitted angle.
    ///
    /// Units: degrees
    pub min_deg: f64,

    /// Highest permitted angle.
    ///
    /// Units: degrees
    pub max_deg: f64,

    /// Slew rate, or zero to jump straight to new targets.
    ///
    /// Units: degrees/second
    pub ramp_dps: f64,

    /// The servo is at its target when within this distance of it.
    ///
    /// Units: degrees
    pub deadband_deg: f64,

    /// Time the servo must rest at its target before it can be released.
    ///
    /// Units: milliseconds
    pub settle_ms: u64,

    /// Release the servo once it has settled at `release_deg`.
    pub auto_release: bool,

    /// Rest position at which the servo may be released.
    ///
    /// Units: degrees
    pub release_deg: f64,
}

/// State of a sequenced servo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoState {
    pub target_deg: f64,

    pub current_deg: f64,

    /// True while the servo is being driven.
    pub attached: bool,

    /// True while `current_deg` is within the deadband of `target_deg`.
    pub at_target: bool,

    /// Time the servo most recently arrived at its target, `None` while not at target.
    pub at_target_since_ms: Option<u64>,

    pub last_update_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServoSeq {
    cfg: SeqConfig,
    state: ServoState,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SeqConfig {
    fn clamp_deg(&self, deg: f64) -> f64 {
        clamp(deg, self.min_deg, self.max_deg)
    }
}

impl ServoSeq {
    /// Create a new sequencer resting at `initial_deg`.
    ///
    /// The servo starts attached and at its target. Nothing is written until the first call to
    /// [`ServoSeq::hold`] or [`ServoSeq::tick`].
    pub fn new(mut cfg: SeqConfig, initial_deg: f64, now_ms: u64) -> Self {
        cfg.ramp_dps = cfg.ramp_dps.max(0.0);
        cfg.deadband_deg = cfg.deadband_deg.max(0.0);
        cfg.release_deg = cfg.clamp_deg(cfg.release_deg);

        let initial = cfg.clamp_deg(initial_deg);

        Self {
            cfg,
            state: ServoState {
                target_deg: initial,
                current_deg: initial,
                attached: true,
                at_target: true,
                at_target_since_ms: Some(now_ms),
                last_update_ms: now_ms,
            },
        }
    }

    pub fn state(&self) -> &ServoState {
        &self.state
    }

    pub fn config(&self) -> &SeqConfig {
        &self.cfg
    }

    /// Write the current position to the output if the servo is attached.
    pub fn hold<O: ServoOutput + ?Sized>(&self, out: &mut O) {
        if self.state.attached {
            out.write_deg(self.state.current_deg);
        }
    }

    /// Command a new target angle.
    ///
    /// Targets are clamped into range. A target equal to the current one is ignored, otherwise the
    /// servo is attached if needed and the settle timer restarts.
    pub fn set_target<O: ServoOutput + ?Sized>(&mut self, deg: f64, now_ms: u64, out: &mut O) {
        if !deg.is_finite() {
            return;
        }

        let new_target = self.cfg.clamp_deg(deg);

        if (new_target - self.state.target_deg).abs() < TARGET_EPSILON_DEG {
            return;
        }

        debug!(
            "Servo target {:.1} -> {:.1} deg",
            self.state.target_deg, new_target
        );

        self.state.target_deg = new_target;
        self.attach(now_ms, out);

        self.state.at_target = false;
        self.state.at_target_since_ms = None;

        if self.cfg.ramp_dps <= 0.0 {
            self.state.current_deg = new_target;
            out.write_deg(new_target);
            self.state.last_update_ms = now_ms;
            self.update_at_target(now_ms);
        }
    }

    /// Advance the servo towards its target.
    pub fn tick<O: ServoOutput + ?Sized>(&mut self, now_ms: u64, out: &mut O) {
        if !self.state.attached {
            return;
        }

        let dt_ms = now_ms.saturating_sub(self.state.last_update_ms);
        if dt_ms == 0 {
            return;
        }
        self.state.last_update_ms = now_ms;

        if self.cfg.ramp_dps > 0.0 {
            let max_step = self.cfg.ramp_dps * (dt_ms as f64 / 1000.0);
            let cur = step_towards(self.state.current_deg, self.state.target_deg, max_step);

            self.state.current_deg = self.cfg.clamp_deg(cur);

            trace!(
                "Servo at {:.2} deg (target {:.2})",
                self.state.current_deg,
                self.state.target_deg
            );
        }

        // Attached servos are rewritten every tick in both modes
        out.write_deg(self.state.current_deg);

        self.update_at_target(now_ms);

        if self.should_release(now_ms) {
            debug!(
                "Servo settled at {:.1} deg, releasing",
                self.state.current_deg
            );
            self.state.attached = false;
            out.release();
        }
    }

    fn attach<O: ServoOutput + ?Sized>(&mut self, now_ms: u64, out: &mut O) {
        if self.state.attached {
            return;
        }

        self.state.attached = true;
        out.write_deg(self.state.current_deg);
        self.state.last_update_ms = now_ms;
    }

    fn update_at_target(&mut self, now_ms: u64) {
        let err = (self.state.target_deg - self.state.current_deg).abs();

        if err <= self.cfg.deadband_deg {
            if !self.state.at_target || self.state.at_target_since_ms.is_none() {
                self.state.at_target_since_ms = Some(now_ms);
            }
            self.state.at_target = true;
        } else {
            self.state.at_target = false;
            self.state.at_target_since_ms = None;
        }
    }

    fn should_release(&self, now_ms: u64) -> bool {
        if !self.cfg.auto_release || !self.state.at_target {
            return false;
        }

        let target_is_rest =
            (self.state.target_deg - self.cfg.release_deg).abs() <= self.cfg.deadband_deg;

        match self.state.at_target_since_ms {
            Some(t) => target_is_rest && now_ms.saturating_sub(t) >= self.cfg.settle_ms,
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum OutEvent {
        Write(f64),
        Release,
    }

    /// Output which records everything written to it.
    #[derive(Debug, Default)]
    pub struct RecordingOutput {
        pub events: Vec<OutEvent>,
    }

    impl ServoOutput for RecordingOutput {
        fn write_deg(&mut self, deg: f64) {
            self.events.push(OutEvent::Write(deg));
        }

        fn release(&mut self) {
            self.events.push(OutEvent::Release);
        }
    }

    pub fn lid_cfg(ramp_dps: f64) -> SeqConfig {
        SeqConfig {
            min_deg: 0.0,
            max_deg: 180.0,
            ramp_dps,
            deadband_deg: 2.0,
            settle_ms: 1000,
            auto_release: true,
            release_deg: 10.0,
        }
    }

    #[test]
    fn test_initial_state() {
        let seq = ServoSeq::new(lid_cfg(25.0), 200.0, 7);
        let s = seq.state();

        assert_eq!(s.current_deg, 180.0);
        assert_eq!(s.target_deg, 180.0);
        assert!(s.attached);
        assert!(s.at_target);
        assert_eq!(s.last_update_ms, 7);
    }

    #[test]
    fn test_ramp_monotonic() {
        let mut out = RecordingOutput::default();
        let mut seq = ServoSeq::new(lid_cfg(25.0), 10.0, 0);

        seq.set_target(95.0, 0, &mut out);
        assert!(!seq.state().at_target);

        let mut last = seq.state().current_deg;
        let mut now = 0;
        let mut arrived_ms = None;

        while now < 5000 {
            now += 20;
            seq.tick(now, &mut out);

            let cur = seq.state().current_deg;
            assert!(cur >= last, "Servo moved backwards");
            assert!(cur - last <= 25.0 * 0.020 + 1e-9, "Servo moved too fast");
            assert!(cur <= 95.0, "Servo overshot");
            last = cur;

            if arrived_ms.is_none() && cur == 95.0 {
                arrived_ms = Some(now);
            }
        }

        // 85 deg at 25 deg/s takes 3400 ms, give or take a tick
        let arrived_ms = arrived_ms.unwrap();
        assert!(
            (3380..=3420).contains(&arrived_ms),
            "Arrived at {} ms",
            arrived_ms
        );

        assert_eq!(seq.state().current_deg, 95.0);
        assert!(seq.state().at_target);

        // Open position is not the release position, so still attached
        assert!(seq.state().attached);
        assert!(!out.events.contains(&OutEvent::Release));
    }

    #[test]
    fn test_ramp_arrival_and_release() {
        let mut out = RecordingOutput::default();
        let mut seq = ServoSeq::new(lid_cfg(50.0), 110.0, 0);

        seq.set_target(10.0, 0, &mut out);

        let mut now = 0;
        let mut arrived_ms = None;
        let mut settled_ms = None;
        let mut released_ms = None;

        while now < 5000 && released_ms.is_none() {
            now += 20;
            seq.tick(now, &mut out);

            if arrived_ms.is_none() && seq.state().current_deg == 10.0 {
                arrived_ms = Some(now);
            }
            if settled_ms.is_none() {
                settled_ms = seq.state().at_target_since_ms;
            }
            if !seq.state().attached {
                released_ms = Some(now);
            }
        }

        // 100 deg at 50 deg/s takes 2000 ms, give or take a tick
        let arrived_ms = arrived_ms.unwrap();
        assert!(
            (1980..=2020).contains(&arrived_ms),
            "Arrived at {} ms",
            arrived_ms
        );

        // Released one settle period after entering the deadband
        assert_eq!(released_ms, Some(settled_ms.unwrap() + 1000));
        assert_eq!(out.events.last(), Some(&OutEvent::Release));
    }

    #[test]
    fn test_snap_when_ramp_disabled() {
        let mut out = RecordingOutput::default();
        let mut seq = ServoSeq::new(lid_cfg(0.0), 90.0, 0);

        seq.set_target(-30.0, 100, &mut out);

        assert_eq!(seq.state().current_deg, 0.0);
        assert_eq!(out.events, vec![OutEvent::Write(0.0)]);
        assert!(seq.state().at_target);
        assert_eq!(seq.state().at_target_since_ms, Some(100));

        // Output is refreshed on every tick
        seq.tick(120, &mut out);
        seq.tick(140, &mut out);
        assert_eq!(
            out.events,
            vec![
                OutEvent::Write(0.0),
                OutEvent::Write(0.0),
                OutEvent::Write(0.0)
            ]
        );
    }

    #[test]
    fn test_auto_release_timing() {
        let mut out = RecordingOutput::default();
        let mut seq = ServoSeq::new(lid_cfg(0.0), 90.0, 0);

        seq.set_target(10.0, 1000, &mut out);

        seq.tick(1999, &mut out);
        assert!(seq.state().attached);

        seq.tick(2000, &mut out);
        assert!(!seq.state().attached);
        assert_eq!(out.events.last(), Some(&OutEvent::Release));

        // Detached servos are left alone
        let n = out.events.len();
        seq.tick(3000, &mut out);
        assert_eq!(out.events.len(), n);
    }

    #[test]
    fn test_retarget_resets_settle() {
        let mut out = RecordingOutput::default();
        let mut seq = ServoSeq::new(lid_cfg(10.0), 10.0, 0);

        seq.set_target(11.0, 0, &mut out);

        // Within the deadband after the first step
        seq.tick(100, &mut out);
        assert_eq!(seq.state().current_deg, 11.0);
        assert_eq!(seq.state().at_target_since_ms, Some(100));

        // Retarget, still inside the release band, before it settles
        seq.tick(1000, &mut out);
        assert!(seq.state().attached);
        seq.set_target(12.0, 1000, &mut out);
        assert_eq!(seq.state().at_target_since_ms, None);

        seq.tick(1100, &mut out);
        assert_eq!(seq.state().at_target_since_ms, Some(1100));

        // Would have released at 1100 on the old settle clock
        seq.tick(2099, &mut out);
        assert!(seq.state().attached);
        seq.tick(2100, &mut out);
        assert!(!seq.state().attached);
    }

    #[test]
    fn test_reattach_on_new_target() {
        let mut out = RecordingOutput::default();
        let mut seq = ServoSeq::new(lid_cfg(0.0), 10.0, 0);

        seq.tick(1000, &mut out);
        assert!(!seq.state().attached);
        out.events.clear();

        // Same target again does nothing
        seq.set_target(10.0, 1500, &mut out);
        assert!(!seq.state().attached);
        assert!(out.events.is_empty());

        seq.set_target(95.0, 2000, &mut out);
        assert!(seq.state().attached);

        // Current position is written on attach, before the snap to the new target
        assert_eq!(
            out.events,
            vec![OutEvent::Write(10.0), OutEvent::Write(95.0)]
        );
    }
}

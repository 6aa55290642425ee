//! # Differential drive
//!
//! Mixes linear and angular speed demands into left and right wheel duties, and converts
//! sampled wheel angles into wheel speeds for telemetry.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::cmd::DriveCmd;
use log::trace;
use serde::Deserialize;
use util::maths::clamp;

use crate::{
    motor::DcMotor,
    servo_ctrl::{PwmDriver, PwmError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    /// Distance between the centres of the two drive wheels.
    ///
    /// Units: feet
    pub track_width_ft: f64,

    /// Wheel ground speed at full duty.
    ///
    /// Units: feet/second
    pub max_linear_ftps: f64,

    /// Limit on the commanded turn rate.
    ///
    /// Units: degrees/second
    pub max_angular_dps: f64,
}

/// Per-side wheel duties, between -1 and +1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveDuty {
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone)]
pub struct DiffDrive {
    cfg: DriveConfig,
    cmd: DriveCmd,
    left: DcMotor,
    right: DcMotor,
}

/// Converts successive wheel angle samples into a speed.
#[derive(Debug, Clone, Default)]
pub struct RpmSampler {
    last: Option<(u64, f64)>,
    rpm: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DiffDrive {
    pub fn new(cfg: DriveConfig, left: DcMotor, right: DcMotor) -> Self {
        Self {
            cfg,
            cmd: DriveCmd::default(),
            left,
            right,
        }
    }

    /// Replace the drive demand. Every command supersedes the last one entirely.
    pub fn set_cmd(&mut self, cmd: DriveCmd) {
        self.cmd = DriveCmd {
            linear_ftps: finite_or_zero(cmd.linear_ftps),
            angular_dps: finite_or_zero(cmd.angular_dps),
        };
    }

    pub fn stop(&mut self) {
        self.cmd = DriveCmd::default();
    }

    pub fn cmd(&self) -> DriveCmd {
        self.cmd
    }

    /// Wheel duties for the current demand.
    ///
    /// If either wheel would need more than full duty both are scaled down together, which keeps
    /// the turn radius and gives up speed.
    pub fn mix(&self) -> DriveDuty {
        if self.cfg.max_linear_ftps <= 0.0 {
            return DriveDuty::default();
        }

        let omega_rads = clamp(
            self.cmd.angular_dps,
            -self.cfg.max_angular_dps,
            self.cfg.max_angular_dps,
        )
        .to_radians();
        let half_track = self.cfg.track_width_ft / 2.0;

        let mut left = (self.cmd.linear_ftps - omega_rads * half_track) / self.cfg.max_linear_ftps;
        let mut right = (self.cmd.linear_ftps + omega_rads * half_track) / self.cfg.max_linear_ftps;

        let peak = left.abs().max(right.abs());
        if peak > 1.0 {
            left /= peak;
            right /= peak;
        }

        DriveDuty { left, right }
    }

    /// Send the current demand to the wheels.
    pub fn update<D>(&mut self, pwm: &mut D) -> Result<DriveDuty, PwmError>
    where
        D: PwmDriver + ?Sized,
    {
        let duty = self.mix();

        trace!("Drive duty L {:.3} R {:.3}", duty.left, duty.right);

        // Always attempt both sides, even if the first fails
        let left = self.left.set_duty(duty.left, pwm);
        let right = self.right.set_duty(duty.right, pwm);
        left.and(right)?;

        Ok(duty)
    }
}

impl RpmSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a wheel angle sample and return the latest speed in revolutions/minute.
    ///
    /// The speed is unknown until two samples with different timestamps have been taken. A missing
    /// sample resets the sampler.
    pub fn sample(&mut self, now_ms: u64, angle_deg: Option<f64>) -> Option<f64> {
        let angle = match angle_deg.filter(|a| a.is_finite()) {
            Some(a) => a,
            None => {
                self.last = None;
                self.rpm = None;
                return None;
            }
        };

        match self.last {
            Some((t0, a0)) => {
                let dt_ms = now_ms.saturating_sub(t0);
                if dt_ms > 0 {
                    self.rpm = Some((angle - a0) / 360.0 * 60_000.0 / dt_ms as f64);
                    self.last = Some((now_ms, angle));
                }
            }
            None => self.last = Some((now_ms, angle)),
        }

        self.rpm
    }

    pub fn rpm(&self) -> Option<f64> {
        self.rpm
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{motor::DcMotorConfig, servo_ctrl::sim::SimPwm};

    fn drive() -> DiffDrive {
        let motor = |dir, pwm| {
            DcMotor::new(DcMotorConfig {
                dir_channel: dir,
                pwm_channel: pwm,
                invert: false,
                pwm_min: 0,
                pwm_max: 255,
            })
        };

        DiffDrive::new(
            DriveConfig {
                track_width_ft: 1.0,
                max_linear_ftps: 3.0,
                max_angular_dps: 180.0,
            },
            motor(8, 9),
            motor(10, 11),
        )
    }

    #[test]
    fn test_mix_straight() {
        let mut drive = drive();

        drive.set_cmd(DriveCmd {
            linear_ftps: 1.5,
            angular_dps: 0.0,
        });

        assert_eq!(drive.mix(), DriveDuty { left: 0.5, right: 0.5 });
    }

    #[test]
    fn test_mix_turn_in_place() {
        let mut drive = drive();

        drive.set_cmd(DriveCmd {
            linear_ftps: 0.0,
            angular_dps: 90.0,
        });
        let duty = drive.mix();

        // Counter-clockwise, right wheel forwards
        assert!(duty.right > 0.0);
        assert!((duty.left + duty.right).abs() < 1e-12);
        assert!((duty.right - std::f64::consts::FRAC_PI_2 * 0.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mix_saturation_keeps_ratio() {
        let mut drive = drive();

        drive.set_cmd(DriveCmd {
            linear_ftps: 6.0,
            angular_dps: 1000.0,
        });
        let duty = drive.mix();
        let unscaled_left = 6.0 - std::f64::consts::PI * 0.5;
        let unscaled_right = 6.0 + std::f64::consts::PI * 0.5;

        assert!((duty.right - 1.0).abs() < 1e-12);
        assert!((duty.left - unscaled_left / unscaled_right).abs() < 1e-12);
    }

    #[test]
    fn test_stop_and_update() {
        let mut pwm = SimPwm::new();
        let mut drive = drive();

        drive.set_cmd(DriveCmd {
            linear_ftps: f64::NAN,
            angular_dps: -30.0,
        });
        assert_eq!(drive.cmd().linear_ftps, 0.0);

        drive.set_cmd(DriveCmd {
            linear_ftps: 3.0,
            angular_dps: 0.0,
        });
        drive.update(&mut pwm).unwrap();
        assert_eq!(pwm.duty(9), Some(1.0));
        assert_eq!(pwm.duty(11), Some(1.0));

        drive.stop();
        assert_eq!(drive.update(&mut pwm).unwrap(), DriveDuty::default());
        assert_eq!(pwm.duty(9), None);
        assert_eq!(pwm.duty(11), None);
    }

    #[test]
    fn test_rpm_sampler() {
        let mut rpm = RpmSampler::new();

        assert_eq!(rpm.sample(0, Some(0.0)), None);
        assert_eq!(rpm.sample(0, Some(10.0)), None);

        // Half a turn in 500 ms
        assert_eq!(rpm.sample(500, Some(180.0)), Some(60.0));
        assert_eq!(rpm.rpm(), Some(60.0));

        // Lost feedback
        assert_eq!(rpm.sample(600, None), None);
        assert_eq!(rpm.sample(700, Some(0.0)), None);
    }
}

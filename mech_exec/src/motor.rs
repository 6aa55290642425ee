//! # DC motors
//!
//! [`DcMotor`] drives a brushed motor through a DRV8871 style H-bridge, using one channel as a
//! direction line and one as the speed PWM:
//!
//! | duty | direction | PWM      |
//! |------|-----------|----------|
//! | > 0  | high      | \|duty\| |
//! | < 0  | low       | \|duty\| |
//! | 0    | low       | 0 (coast)|
//!
//! [`MotorCtrl`] sits on top of a motor and turns mechanism commands into a duty, either passing
//! a duty demand straight through or closing a proportional loop on a position demand.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::cmd::MotorCmd;
use log::trace;
use serde::Deserialize;
use util::maths::clamp;

use crate::servo_ctrl::{PwmDriver, PwmError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Full scale of the 8 bit PWM command.
const PWM_FULL_SCALE: f64 = 255.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DcMotorConfig {
    /// Channel connected to the direction input.
    pub dir_channel: u8,

    /// Channel connected to the speed input.
    pub pwm_channel: u8,

    /// Reverse the motor's direction, for mirrored sides.
    #[serde(default)]
    pub invert: bool,

    /// PWM command at the smallest non-zero duty, overcomes static friction.
    pub pwm_min: u8,

    /// PWM command at full duty.
    pub pwm_max: u8,
}

#[derive(Debug, Clone)]
pub struct DcMotor {
    cfg: DcMotorConfig,
    duty_cmd: f64,
    pwm_cmd: u8,
}

/// Mechanism motor controller parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorCtrlConfig {
    /// Proportional gain of the position loop.
    ///
    /// Units: duty/degree
    pub kp: f64,

    /// Largest duty the position loop may command.
    pub max_duty: f64,

    /// Position errors smaller than this are treated as zero.
    ///
    /// Units: degrees
    pub deadband_deg: f64,
}

#[derive(Debug, Clone)]
pub struct MotorCtrl {
    cfg: MotorCtrlConfig,
    cmd: MotorCmd,
    motor: DcMotor,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DcMotor {
    pub fn new(mut cfg: DcMotorConfig) -> Self {
        if cfg.pwm_max < cfg.pwm_min {
            std::mem::swap(&mut cfg.pwm_max, &mut cfg.pwm_min);
        }

        Self {
            cfg,
            duty_cmd: 0.0,
            pwm_cmd: 0,
        }
    }

    /// Last duty sent to the motor, after inversion.
    pub fn duty(&self) -> f64 {
        self.duty_cmd
    }

    /// Last 8 bit PWM command sent to the motor.
    pub fn pwm_cmd(&self) -> u8 {
        self.pwm_cmd
    }

    /// Drive the motor at the given duty, between -1 and +1. Zero (or NaN) coasts.
    pub fn set_duty<D>(&mut self, duty: f64, pwm: &mut D) -> Result<(), PwmError>
    where
        D: PwmDriver + ?Sized,
    {
        if !duty.is_finite() || duty == 0.0 {
            return self.coast(pwm);
        }

        let mut duty = clamp(duty, -1.0, 1.0);
        if self.cfg.invert {
            duty = -duty;
        }

        let pwm_cmd = self.duty_to_pwm(duty.abs());

        pwm.set_duty_cycle(self.cfg.dir_channel, if duty > 0.0 { 1.0 } else { 0.0 })?;
        pwm.set_duty_cycle(self.cfg.pwm_channel, pwm_cmd as f64 / PWM_FULL_SCALE)?;

        self.duty_cmd = duty;
        self.pwm_cmd = pwm_cmd;

        Ok(())
    }

    /// Let the motor spin freely.
    pub fn coast<D>(&mut self, pwm: &mut D) -> Result<(), PwmError>
    where
        D: PwmDriver + ?Sized,
    {
        self.duty_cmd = 0.0;
        self.pwm_cmd = 0;

        pwm.set_off(self.cfg.dir_channel)?;
        pwm.set_off(self.cfg.pwm_channel)
    }

    fn duty_to_pwm(&self, abs_duty: f64) -> u8 {
        if abs_duty <= 0.0 {
            return 0;
        }

        let span = (self.cfg.pwm_max - self.cfg.pwm_min) as f64;
        let pwm = (self.cfg.pwm_min as f64 + abs_duty * span + 0.5).floor();

        clamp(pwm, 0.0, PWM_FULL_SCALE) as u8
    }
}

impl MotorCtrl {
    pub fn new(cfg: MotorCtrlConfig, motor: DcMotor) -> Self {
        Self {
            cfg,
            cmd: MotorCmd::Unset,
            motor,
        }
    }

    /// Replace the current demand. `Unset` leaves the current demand as it is.
    pub fn set_cmd(&mut self, cmd: MotorCmd) {
        if cmd.is_set() {
            self.cmd = cmd;
        }
    }

    /// Drop the current demand, the motor coasts from the next update.
    pub fn clear(&mut self) {
        self.cmd = MotorCmd::Unset;
    }

    pub fn cmd(&self) -> MotorCmd {
        self.cmd
    }

    pub fn motor(&self) -> &DcMotor {
        &self.motor
    }

    /// Duty needed to meet the current demand, given the measured output angle.
    pub fn demand_duty(&self, measured_deg: Option<f64>) -> f64 {
        match self.cmd {
            MotorCmd::Unset => 0.0,
            MotorCmd::Duty(d) if d.is_finite() => clamp(d, -1.0, 1.0),
            MotorCmd::Duty(_) => 0.0,
            MotorCmd::PosDeg(target) => match measured_deg {
                // Without feedback a position can't be held, so don't try
                None => 0.0,
                Some(m) => {
                    let err = target - m;
                    if !err.is_finite() || err.abs() <= self.cfg.deadband_deg {
                        0.0
                    } else {
                        clamp(self.cfg.kp * err, -self.cfg.max_duty, self.cfg.max_duty)
                    }
                }
            },
        }
    }

    /// Compute and apply the duty for this cycle, returning it.
    pub fn update<D>(&mut self, measured_deg: Option<f64>, pwm: &mut D) -> Result<f64, PwmError>
    where
        D: PwmDriver + ?Sized,
    {
        let duty = self.demand_duty(measured_deg);

        trace!("Motor demand {:?} -> duty {:.3}", self.cmd, duty);

        self.motor.set_duty(duty, pwm)?;

        Ok(duty)
    }
}

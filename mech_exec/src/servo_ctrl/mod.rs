//! # Servo Controller Module
//!
//! This module provides a unified PWM output interface which can abstract over different types
//! of driver boards, and the servo channels built on top of it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`PwmDriver`] implementation for the Adafruit PCA9685 16 channel servo driver board.
pub mod pca9685;

/// In-memory [`PwmDriver`] used when running without hardware.
pub mod sim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::Deserialize;
use util::maths::{clamp, lin_map};

use crate::servo_seq::ServoOutput;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Period of the servo control signal (50 Hz).
///
/// Units: microseconds
pub const SERVO_PERIOD_US: f64 = 20_000.0;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing PWM driver boards.
pub trait PwmDriver {
    /// Set the duty cycle of a channel.
    ///
    /// ## Arguments
    /// - `channel` - The channel to set the duty cycle for
    /// - `duty_cycle` - The duty cycle to set. Must be a value between 0.0 and 1.0. Values outside
    ///   this range will be rejected.
    fn set_duty_cycle(&mut self, channel: u8, duty_cycle: f64) -> Result<(), PwmError>;

    /// Turn the channel fully off.
    fn set_off(&mut self, channel: u8) -> Result<(), PwmError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Mapping between servo angle and pulse width for one channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ServoChannelConfig {
    /// Driver channel the servo is connected to.
    pub channel: u8,

    /// Pulse width at 0 degrees.
    ///
    /// Units: microseconds
    pub min_pulse_us: f64,

    /// Pulse width at `range_deg`.
    ///
    /// Units: microseconds
    pub max_pulse_us: f64,

    /// Full travel of the servo.
    ///
    /// Units: degrees
    pub range_deg: f64,
}

/// A servo on one channel of a [`PwmDriver`], usable as a [`ServoOutput`].
pub struct ServoChannel<'a, D: PwmDriver + ?Sized> {
    driver: &'a mut D,
    cfg: &'a ServoChannelConfig,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum PwmError {
    #[error("An I2C error occured")]
    I2c,

    #[error("Could not open the driver board: {0}")]
    Open(String),

    #[error("Duty cycle must be between 0.0 and 1.0")]
    InvalidDutyCycle,

    #[error("Channel {0} does not exist on this driver")]
    InvalidChannel(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ServoChannelConfig {
    /// Duty cycle which holds the servo at `deg`.
    pub fn duty_for_deg(&self, deg: f64) -> f64 {
        let deg = clamp(deg, 0.0, self.range_deg);
        let pulse_us = lin_map(
            (0.0, self.range_deg),
            (self.min_pulse_us, self.max_pulse_us),
            deg,
        );

        clamp(pulse_us / SERVO_PERIOD_US, 0.0, 1.0)
    }
}

impl<'a, D: PwmDriver + ?Sized> ServoChannel<'a, D> {
    pub fn new(driver: &'a mut D, cfg: &'a ServoChannelConfig) -> Self {
        Self { driver, cfg }
    }
}

impl<'a, D: PwmDriver + ?Sized> ServoOutput for ServoChannel<'a, D> {
    fn write_deg(&mut self, deg: f64) {
        let duty = self.cfg.duty_for_deg(deg);

        if let Err(e) = self.driver.set_duty_cycle(self.cfg.channel, duty) {
            warn!("Could not drive servo on channel {}: {}", self.cfg.channel, e);
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.driver.set_off(self.cfg.channel) {
            warn!("Could not release servo on channel {}: {}", self.cfg.channel, e);
        }
    }
}

//! # Mechanisms Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use thiserror::Error;

use crate::{
    drive::DriveConfig,
    motor::{DcMotorConfig, MotorCtrlConfig},
    ranging::RangingConfig,
    servo_ctrl::ServoChannelConfig,
    servo_seq::SeqConfig,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of channels on the PWM driver board.
const NUM_PWM_CHANNELS: u8 = 16;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MechExecParams {
    // ---- LINK ----
    /// Serial device connected to the host.
    pub serial_device: String,

    pub serial_baud: u32,

    /// Longest command line accepted.
    ///
    /// Units: bytes
    pub rx_buf_size: usize,

    /// Commands older than this are stale and the plant is made safe.
    ///
    /// Units: milliseconds
    pub cmd_timeout_ms: u64,

    // ---- TASK RATES ----
    pub rx_rate_hz: f64,
    pub servo_rate_hz: f64,
    pub drive_rate_hz: f64,
    pub ranging_rate_hz: f64,
    pub tlm_rate_hz: f64,

    // ---- HARDWARE ----
    /// Use simulated actuators and sensors instead of the real ones.
    pub sim_hardware: bool,

    pub i2c_bus: u8,

    pub pca9685_address: u8,

    // ---- SAFE REST TARGETS ----
    /// Lid position on make safe.
    ///
    /// Units: degrees
    pub lid_closed_deg: f64,

    /// Sweep position on make safe.
    ///
    /// Units: degrees
    pub sweep_stow_deg: f64,

    // ---- ACTUATORS ----
    pub lid: ServoParams,
    pub sweep: ServoParams,

    pub motor_rhs: MotorParams,
    pub motor_lhs: MotorParams,

    pub drive: DriveConfig,
    pub drive_left: DcMotorConfig,
    pub drive_right: DcMotorConfig,

    pub ranging: RangingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServoParams {
    /// Position at startup.
    ///
    /// Units: degrees
    pub initial_deg: f64,

    pub seq: SeqConfig,

    pub channel: ServoChannelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorParams {
    pub motor: DcMotorConfig,
    pub ctrl: MotorCtrlConfig,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("The receive buffer size must be greater than zero")]
    ZeroBufferSize,

    #[error("Invalid task rate: {0}")]
    InvalidRate(String),

    #[error("Invalid servo parameters: {0}")]
    InvalidServo(String),

    #[error("Invalid motor parameters: {0}")]
    InvalidMotor(String),

    #[error("PWM channel {0} is used more than once")]
    DuplicateChannel(u8),

    #[error("PWM channel {0} does not exist")]
    InvalidChannel(u8),

    #[error("Invalid drive parameters: {0}")]
    InvalidDrive(String),

    #[error("Invalid ranging parameters: {0}")]
    InvalidRanging(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MechExecParams {
    /// Determines if the parameters are valid.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        if self.rx_buf_size == 0 {
            return Err(ParamsError::ZeroBufferSize);
        }

        for (name, hz) in &[
            ("rx", self.rx_rate_hz),
            ("servo", self.servo_rate_hz),
            ("drive", self.drive_rate_hz),
            ("ranging", self.ranging_rate_hz),
            ("telemetry", self.tlm_rate_hz),
        ] {
            if !hz.is_finite() || *hz <= 0.0 {
                return Err(ParamsError::InvalidRate(format!(
                    "{} rate must be positive, found {}",
                    name, hz
                )));
            }
        }

        self.lid.check("lid", self.lid_closed_deg)?;
        self.sweep.check("sweep", self.sweep_stow_deg)?;

        for (name, m) in &[("motor_RHS", &self.motor_rhs), ("motor_LHS", &self.motor_lhs)] {
            if m.ctrl.max_duty <= 0.0 || m.ctrl.max_duty > 1.0 {
                return Err(ParamsError::InvalidMotor(format!(
                    "{} max duty must be in (0, 1], found {}",
                    name, m.ctrl.max_duty
                )));
            }
            if m.ctrl.deadband_deg < 0.0 {
                return Err(ParamsError::InvalidMotor(format!(
                    "{} deadband must not be negative",
                    name
                )));
            }
        }

        // Every output must have a channel of its own
        let channels = [
            self.lid.channel.channel,
            self.sweep.channel.channel,
            self.motor_rhs.motor.dir_channel,
            self.motor_rhs.motor.pwm_channel,
            self.motor_lhs.motor.dir_channel,
            self.motor_lhs.motor.pwm_channel,
            self.drive_left.dir_channel,
            self.drive_left.pwm_channel,
            self.drive_right.dir_channel,
            self.drive_right.pwm_channel,
        ];

        for (i, ch) in channels.iter().enumerate() {
            if *ch >= NUM_PWM_CHANNELS {
                return Err(ParamsError::InvalidChannel(*ch));
            }
            if channels[i + 1..].contains(ch) {
                return Err(ParamsError::DuplicateChannel(*ch));
            }
        }

        if self.drive.track_width_ft <= 0.0 || self.drive.max_linear_ftps <= 0.0 {
            return Err(ParamsError::InvalidDrive(String::from(
                "track width and max linear speed must be positive",
            )));
        }
        if self.drive.max_angular_dps < 0.0 {
            return Err(ParamsError::InvalidDrive(String::from(
                "max angular speed must not be negative",
            )));
        }

        if self.ranging.min_valid_in >= self.ranging.max_valid_in {
            return Err(ParamsError::InvalidRanging(format!(
                "min valid range ({} in) must be below max valid range ({} in)",
                self.ranging.min_valid_in, self.ranging.max_valid_in
            )));
        }
        if self.ranging.timeout_us == 0 {
            return Err(ParamsError::InvalidRanging(String::from(
                "echo timeout must be greater than zero",
            )));
        }

        Ok(())
    }
}

impl ServoParams {
    fn check(&self, name: &str, safe_deg: f64) -> Result<(), ParamsError> {
        let seq = &self.seq;

        if seq.min_deg >= seq.max_deg {
            return Err(ParamsError::InvalidServo(format!(
                "{} min angle ({}) must be below max angle ({})",
                name, seq.min_deg, seq.max_deg
            )));
        }
        if safe_deg < seq.min_deg || safe_deg > seq.max_deg {
            return Err(ParamsError::InvalidServo(format!(
                "{} safe position ({}) is out of range",
                name, safe_deg
            )));
        }
        if seq.ramp_dps < 0.0 || seq.deadband_deg < 0.0 {
            return Err(ParamsError::InvalidServo(format!(
                "{} ramp rate and deadband must not be negative",
                name
            )));
        }
        if self.channel.range_deg <= 0.0 || self.channel.min_pulse_us >= self.channel.max_pulse_us
        {
            return Err(ParamsError::InvalidServo(format!(
                "{} pulse mapping is invalid",
                name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_params() -> MechExecParams {
    util::params::parse(include_str!("../../params/mech_exec.toml")).unwrap()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sample_params_valid() {
        let params = sample_params();

        params.are_valid().unwrap();
        assert_eq!(params.cmd_timeout_ms, 250);
        assert_eq!(params.lid.seq.release_deg, params.lid_closed_deg);
    }

    #[test]
    fn test_invalid_params() {
        let mut params = sample_params();
        params.motor_lhs.motor.pwm_channel = params.lid.channel.channel;
        assert!(matches!(
            params.are_valid(),
            Err(ParamsError::DuplicateChannel(_))
        ));

        let mut params = sample_params();
        params.tlm_rate_hz = 0.0;
        assert!(matches!(params.are_valid(), Err(ParamsError::InvalidRate(_))));

        let mut params = sample_params();
        params.sweep_stow_deg = 200.0;
        assert!(matches!(params.are_valid(), Err(ParamsError::InvalidServo(_))));

        let mut params = sample_params();
        params.ranging.min_valid_in = 200.0;
        assert!(matches!(params.are_valid(), Err(ParamsError::InvalidRanging(_))));
    }
}

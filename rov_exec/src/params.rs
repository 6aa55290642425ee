//! # Rover Executable Parameters
//!
//! This module provide parameters for the rover executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use thiserror::Error;

use crate::host_link::HostLinkConfig;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RovExecParams {
    /// Rate at which the link thread cycles.
    ///
    /// Units: Hertz
    pub link_rate_hz: f64,

    /// Rate at which the main loop updates the demand.
    ///
    /// Units: Hertz
    pub demand_rate_hz: f64,

    /// Period between link status reports in the log.
    ///
    /// Units: milliseconds
    pub status_period_ms: u64,

    /// Serial link to the device
    pub link: HostLinkConfig,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("The receive buffer size must be greater than zero")]
    ZeroBufferSize,

    #[error("The rate smoothing factor must be in (0, 1], found {0}")]
    InvalidAlpha(f64),

    #[error("No serial device is given and auto detection is disabled")]
    NoDevice,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RovExecParams {
    /// Determines if the parameters are valid.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        for (name, hz) in &[("link", self.link_rate_hz), ("demand", self.demand_rate_hz)] {
            if !hz.is_finite() || *hz <= 0.0 {
                return Err(ParamsError::InvalidRate(format!(
                    "{} rate must be positive, found {}",
                    name, hz
                )));
            }
        }

        if self.link.rx_buf_size == 0 {
            return Err(ParamsError::ZeroBufferSize);
        }

        if !(self.link.hz_alpha > 0.0 && self.link.hz_alpha <= 1.0) {
            return Err(ParamsError::InvalidAlpha(self.link.hz_alpha));
        }

        if self.link.device.is_none() && !self.link.auto_detect {
            return Err(ParamsError::NoDevice);
        }

        Ok(())
    }
}

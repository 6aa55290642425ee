//! Simulated PWM driver
//!
//! Stores the last duty cycle set on each channel so it can be inspected, either by tests or by
//! the simulated plant.

use std::collections::HashMap;

use super::{PwmDriver, PwmError};

/// Number of channels on the simulated board, matching a PCA9685.
const NUM_CHANNELS: u8 = 16;

#[derive(Debug, Default, Clone)]
pub struct SimPwm {
    duties: HashMap<u8, f64>,
}

impl SimPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duty cycle on the channel, `None` if it is off.
    pub fn duty(&self, channel: u8) -> Option<f64> {
        self.duties.get(&channel).copied()
    }
}

impl PwmDriver for SimPwm {
    fn set_duty_cycle(&mut self, channel: u8, duty_cycle: f64) -> Result<(), PwmError> {
        if channel >= NUM_CHANNELS {
            return Err(PwmError::InvalidChannel(channel));
        }
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(PwmError::InvalidDutyCycle);
        }

        if duty_cycle == 0.0 {
            self.duties.remove(&channel);
        } else {
            self.duties.insert(channel, duty_cycle);
        }

        Ok(())
    }

    fn set_off(&mut self, channel: u8) -> Result<(), PwmError> {
        if channel >= NUM_CHANNELS {
            return Err(PwmError::InvalidChannel(channel));
        }

        self.duties.remove(&channel);
        Ok(())
    }
}

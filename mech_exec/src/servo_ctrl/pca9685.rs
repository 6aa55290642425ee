//! [`PwmDriver`] implementation for the PCA9685 driver

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use embedded_hal::blocking::i2c::{Write, WriteRead};
use pwm_pca9685::{Channel, Pca9685};

use super::{PwmDriver, PwmError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of counts in one PWM period.
const MAX_PWM: u16 = 4096;

/// Prescale for a 50 Hz output from the 25 MHz internal oscillator.
pub const PRESCALE_50HZ: u8 = 121;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> PwmDriver for Pca9685<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
{
    fn set_duty_cycle(&mut self, channel: u8, duty_cycle: f64) -> Result<(), PwmError> {
        // If the duty cycle is out of range return an error
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(PwmError::InvalidDutyCycle);
        }

        let channel = to_channel(channel)?;
        let off = (duty_cycle * MAX_PWM as f64).round() as u16;

        let result = if off == 0 {
            self.set_channel_full_off(channel)
        } else if off >= MAX_PWM {
            self.set_channel_full_on(channel, 0)
        } else {
            self.set_channel_on_off(channel, 0, off)
        };

        result.map_err(map_err)
    }

    fn set_off(&mut self, channel: u8) -> Result<(), PwmError> {
        self.set_channel_full_off(to_channel(channel)?)
            .map_err(map_err)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open a PCA9685 on the given I2C bus of a Raspberry Pi and set it up for 50 Hz servo output.
#[cfg(all(target_arch = "arm", target_os = "linux"))]
pub fn open_rpi(bus: u8, address: u8) -> Result<Pca9685<rppal::i2c::I2c>, PwmError> {
    let i2c =
        rppal::i2c::I2c::with_bus(bus).map_err(|e| PwmError::Open(format!("{}", e)))?;

    let mut pwm = Pca9685::new(i2c, pwm_pca9685::Address::from(address))
        .map_err(|_| PwmError::Open(String::from("invalid PCA9685 address")))?;

    pwm.set_prescale(PRESCALE_50HZ).map_err(map_err)?;
    pwm.enable().map_err(map_err)?;

    Ok(pwm)
}

fn to_channel(channel: u8) -> Result<Channel, PwmError> {
    let ch = match channel {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        c => return Err(PwmError::InvalidChannel(c)),
    };

    Ok(ch)
}

fn map_err<E>(e: pwm_pca9685::Error<E>) -> PwmError {
    match e {
        pwm_pca9685::Error::I2C(_) => PwmError::I2c,
        pwm_pca9685::Error::InvalidInputData => PwmError::InvalidDutyCycle,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_mapping() {
        assert!(matches!(to_channel(0), Ok(Channel::C0)));
        assert!(matches!(to_channel(15), Ok(Channel::C15)));
        assert!(matches!(to_channel(16), Err(PwmError::InvalidChannel(16))));
    }
}

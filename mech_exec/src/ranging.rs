//! # Ultrasonic ranging
//!
//! A [`RangeSensor`] takes a single bounded measurement in centimetres. The [`Ranger`] wraps a
//! sensor, converts readings to inches and rejects anything outside the trusted range, so an
//! invalid reading is never reported as a distance.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::tlm::RangeState;
use log::trace;
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Conversion factor from centimetres to inches.
pub const CM_TO_IN: f64 = 0.393_700_787_4;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A distance sensor.
pub trait RangeSensor {
    /// Take one measurement, returning the distance in centimetres or `None` if there was no
    /// echo within the sensor's timeout.
    fn measure(&mut self, now_ms: u64) -> Option<f64>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RangingConfig {
    /// Readings closer than this are rejected.
    ///
    /// Units: inches
    pub min_valid_in: f64,

    /// Readings further than this are rejected.
    ///
    /// Units: inches
    pub max_valid_in: f64,

    /// Longest time to wait for an echo.
    ///
    /// Units: microseconds
    pub timeout_us: u64,

    /// GPIO (BCM numbering) connected to the trigger input.
    pub trig_pin: u8,

    /// GPIO (BCM numbering) connected to the echo output.
    pub echo_pin: u8,
}

/// Validating wrapper around a [`RangeSensor`].
pub struct Ranger<S> {
    sensor: S,
    min_valid_in: f64,
    max_valid_in: f64,
    last: RangeState,
}

/// Sensor returning a scripted sequence of readings, repeating the last one forever.
#[derive(Debug, Clone)]
pub struct SimRanger {
    readings: Vec<Option<f64>>,
    idx: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum RangingError {
    #[error("Could not set up the ranging GPIO: {0}")]
    Gpio(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<S: RangeSensor> Ranger<S> {
    pub fn new(sensor: S, cfg: &RangingConfig) -> Self {
        Self {
            sensor,
            min_valid_in: cfg.min_valid_in,
            max_valid_in: cfg.max_valid_in,
            last: RangeState::invalid(),
        }
    }

    /// Take a new measurement and validate it.
    pub fn update(&mut self, now_ms: u64) -> RangeState {
        let raw_cm = self.sensor.measure(now_ms);

        self.last = match raw_cm {
            Some(cm) if cm.is_finite() && cm > 0.0 => {
                let inches = cm * CM_TO_IN;

                if inches < self.min_valid_in || inches > self.max_valid_in {
                    RangeState::invalid()
                } else {
                    RangeState::valid(inches)
                }
            }
            _ => RangeState::invalid(),
        };

        trace!("Range {:?} cm -> {:?}", raw_cm, self.last);

        self.last
    }

    /// The result of the most recent measurement.
    pub fn last(&self) -> RangeState {
        self.last
    }
}

impl SimRanger {
    pub fn new(readings: Vec<Option<f64>>) -> Self {
        Self { readings, idx: 0 }
    }

    /// A sensor which always reads the same distance in centimetres.
    pub fn fixed(cm: f64) -> Self {
        Self::new(vec![Some(cm)])
    }
}

impl RangeSensor for SimRanger {
    fn measure(&mut self, _now_ms: u64) -> Option<f64> {
        let reading = self.readings.get(self.idx).copied().flatten();

        if self.idx + 1 < self.readings.len() {
            self.idx += 1;
        }

        reading
    }
}

impl<S: RangeSensor + ?Sized> RangeSensor for Box<S> {
    fn measure(&mut self, now_ms: u64) -> Option<f64> {
        (**self).measure(now_ms)
    }
}

// ------------------------------------------------------------------------------------------------
// HC-SR04
// ------------------------------------------------------------------------------------------------

/// HC-SR04 sensor on the Raspberry Pi GPIO header.
#[cfg(all(target_arch = "arm", target_os = "linux"))]
pub mod hcsr04 {
    use std::time::{Duration, Instant};

    use rppal::gpio::{Gpio, InputPin, OutputPin};

    use super::{RangeSensor, RangingConfig, RangingError};

    /// Speed of sound at around 20 C, halved for the round trip.
    ///
    /// Units: centimetres/microsecond
    const HALF_SPEED_OF_SOUND_CM_PER_US: f64 = 0.0343 / 2.0;

    pub struct HcSr04 {
        trig: OutputPin,
        echo: InputPin,
        timeout: Duration,
    }

    impl HcSr04 {
        pub fn new(cfg: &RangingConfig) -> Result<Self, RangingError> {
            let gpio = Gpio::new().map_err(|e| RangingError::Gpio(format!("{}", e)))?;

            let trig = gpio
                .get(cfg.trig_pin)
                .map_err(|e| RangingError::Gpio(format!("{}", e)))?
                .into_output_low();
            let echo = gpio
                .get(cfg.echo_pin)
                .map_err(|e| RangingError::Gpio(format!("{}", e)))?
                .into_input();

            Ok(Self {
                trig,
                echo,
                timeout: Duration::from_micros(cfg.timeout_us),
            })
        }

        /// Spin until the echo line reaches `high`, or the deadline passes.
        fn wait_for(&self, high: bool, deadline: Instant) -> Option<Instant> {
            loop {
                let now = Instant::now();
                if self.echo.is_high() == high {
                    return Some(now);
                }
                if now >= deadline {
                    return None;
                }
            }
        }
    }

    impl RangeSensor for HcSr04 {
        fn measure(&mut self, _now_ms: u64) -> Option<f64> {
            // 10 us trigger pulse
            self.trig.set_low();
            spin(Duration::from_micros(2));
            self.trig.set_high();
            spin(Duration::from_micros(10));
            self.trig.set_low();

            let deadline = Instant::now() + self.timeout;
            let rise = self.wait_for(true, deadline)?;
            let fall = self.wait_for(false, deadline)?;

            let width_us = fall.duration_since(rise).as_secs_f64() * 1e6;

            Some(width_us * HALF_SPEED_OF_SOUND_CM_PER_US)
        }
    }

    fn spin(d: Duration) {
        let start = Instant::now();
        while start.elapsed() < d {}
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg() -> RangingConfig {
        RangingConfig {
            min_valid_in: 0.8,
            max_valid_in: 160.0,
            timeout_us: 30_000,
            trig_pin: 23,
            echo_pin: 24,
        }
    }

    #[test]
    fn test_validation() {
        let sensor = SimRanger::new(vec![
            Some(25.4),
            None,
            Some(0.0),
            Some(-3.0),
            Some(1.0),
            Some(500.0),
            Some(f64::NAN),
        ]);
        let mut ranger = Ranger::new(sensor, &cfg());

        assert_eq!(ranger.last(), RangeState::invalid());

        let r = ranger.update(0);
        assert!(r.valid);
        assert!((r.distance_in.unwrap_or(0.0) - 10.0).abs() < 1e-6);

        // Timeout, zero, negative, too close, too far and garbage are all invalid
        for t in 1..7 {
            assert_eq!(ranger.update(t), RangeState::invalid());
        }
    }

    #[test]
    fn test_sim_ranger_repeats_last() {
        let mut sensor = SimRanger::fixed(100.0);

        assert_eq!(sensor.measure(0), Some(100.0));
        assert_eq!(sensor.measure(1), Some(100.0));

        let mut empty = SimRanger::new(Vec::new());
        assert_eq!(empty.measure(0), None);
    }
}

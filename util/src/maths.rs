//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Limit a value to the range `[min, max]`.
///
/// NaN is passed through unchanged.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    if value > max {
        max
    } else if value < min {
        min
    } else {
        value
    }
}

/// Move `current` towards `target` by at most `max_step`, never passing the target.
pub fn step_towards<T>(current: T, target: T, max_step: T) -> T
where
    T: Float,
{
    let diff = target - current;

    if diff.abs() <= max_step {
        target
    } else {
        current + max_step * diff.signum()
    }
}

/// Exponential moving average update.
///
/// The first sample initialises the average.
pub fn ema<T>(prev: Option<T>, sample: T, alpha: T) -> T
where
    T: Float,
{
    match prev {
        Some(p) => p + alpha * (sample - p),
        None => sample,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0f64, 180f64), (500f64, 2500f64), 90f64), 1500f64);
        assert_eq!(lin_map((0f64, 1f64), (10f64, 255f64), 0f64), 10f64);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(200f64, 0f64, 180f64), 180f64);
        assert_eq!(clamp(-5f64, 0f64, 180f64), 0f64);
        assert_eq!(clamp(45f64, 0f64, 180f64), 45f64);
        assert!(clamp(f64::NAN, 0f64, 1f64).is_nan());
    }

    #[test]
    fn test_step_towards() {
        assert_eq!(step_towards(0f64, 10f64, 3f64), 3f64);
        assert_eq!(step_towards(9f64, 10f64, 3f64), 10f64);
        assert_eq!(step_towards(10f64, 0f64, 4f64), 6f64);
        assert_eq!(step_towards(5f64, 5f64, 0f64), 5f64);
    }

    #[test]
    fn test_ema() {
        assert_eq!(ema(None, 20f64, 0.2), 20f64);
        assert_eq!(ema(Some(20f64), 10f64, 0.5), 15f64);
    }
}

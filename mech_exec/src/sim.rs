//! # Simulated plant
//!
//! Stands in for the physical mechanisms when running with simulated hardware. Motor duties are
//! integrated into output angles so that position demands can close their loop and the wheels
//! report a speed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::mech_ctrl::{Duties, MechFeedback};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Mechanism motor output speed at full duty.
///
/// Units: degrees/second
const MOTOR_FULL_DPS: f64 = 90.0;

/// Wheel speed at full duty.
///
/// Units: revolutions/minute
const WHEEL_FULL_RPM: f64 = 170.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SimPlant {
    motor_rhs_deg: f64,
    motor_lhs_deg: f64,
    wheel_left_deg: f64,
    wheel_right_deg: f64,
    last_ms: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimPlant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the plant to `now_ms`, assuming `duties` were held since the last step.
    pub fn step(&mut self, now_ms: u64, duties: &Duties) {
        let dt_s = match self.last_ms {
            Some(t) => now_ms.saturating_sub(t) as f64 / 1000.0,
            None => 0.0,
        };
        self.last_ms = Some(now_ms);

        let wheel_dps = WHEEL_FULL_RPM * 6.0;

        self.motor_rhs_deg += duties.motor_rhs * MOTOR_FULL_DPS * dt_s;
        self.motor_lhs_deg += duties.motor_lhs * MOTOR_FULL_DPS * dt_s;
        self.wheel_left_deg += duties.drive.left * wheel_dps * dt_s;
        self.wheel_right_deg += duties.drive.right * wheel_dps * dt_s;
    }

    pub fn feedback(&self) -> MechFeedback {
        MechFeedback {
            motor_rhs_deg: Some(self.motor_rhs_deg),
            motor_lhs_deg: Some(self.motor_lhs_deg),
            wheel_left_deg: Some(self.wheel_left_deg),
            wheel_right_deg: Some(self.wheel_right_deg),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{drive::DriveDuty, mech_ctrl::MechCtrl, params::sample_params, servo_ctrl::sim::SimPwm};
    use comms_if::cmd::{CmdFrame, Demand, MechCmd, MotorCmd};

    #[test]
    fn test_integration() {
        let mut plant = SimPlant::new();
        let duties = Duties {
            motor_rhs: 1.0,
            motor_lhs: -0.5,
            drive: DriveDuty {
                left: 0.5,
                right: 0.0,
            },
        };

        // First step only sets the time base
        plant.step(1000, &duties);
        assert_eq!(plant.feedback().motor_rhs_deg, Some(0.0));

        plant.step(2000, &duties);
        let fb = plant.feedback();
        assert_eq!(fb.motor_rhs_deg, Some(90.0));
        assert_eq!(fb.motor_lhs_deg, Some(-45.0));
        assert_eq!(fb.wheel_left_deg, Some(510.0));
        assert_eq!(fb.wheel_right_deg, Some(0.0));
    }

    #[test]
    fn test_position_loop_converges() {
        let mut ctrl = MechCtrl::new(&sample_params(), SimPwm::new(), 0);
        let mut plant = SimPlant::new();

        ctrl.apply(
            &CmdFrame::new(
                1,
                0,
                &Demand {
                    mech: MechCmd {
                        motor_rhs: MotorCmd::PosDeg(45.0),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ),
            0,
        );

        let mut now = 0;
        while now < 20_000 {
            let duties = ctrl.tick_motors(now, plant.feedback());
            plant.step(now, &duties);
            now += 10;
        }

        let rhs = plant.feedback().motor_rhs_deg.unwrap_or(0.0);
        assert!((rhs - 45.0).abs() <= 1.5, "motor_RHS settled at {}", rhs);
        assert_eq!(plant.feedback().motor_lhs_deg, Some(0.0));
    }
}

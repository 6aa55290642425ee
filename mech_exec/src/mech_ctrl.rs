//! # Mechanism controller
//!
//! Owns every actuator on the robot along with the PWM driver they're connected to. Commands from
//! the host are applied here, the periodic tasks advance the servos and recompute the motor and
//! drive outputs, and the telemetry frame is assembled from the resulting state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    cmd::CmdFrame,
    tlm::{MechState, RangeState, TlmFrame, WheelState},
};
use log::{debug, info, warn};

use crate::{
    drive::{DiffDrive, DriveDuty, RpmSampler},
    motor::{DcMotor, MotorCtrl},
    params::MechExecParams,
    safety::MakeSafe,
    servo_ctrl::{PwmDriver, ServoChannel, ServoChannelConfig},
    servo_seq::ServoSeq,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MechCtrl<P: PwmDriver> {
    pwm: P,

    lid: ServoSeq,
    lid_channel: ServoChannelConfig,
    sweep: ServoSeq,
    sweep_channel: ServoChannelConfig,

    motor_rhs: MotorCtrl,
    motor_lhs: MotorCtrl,

    drive: DiffDrive,
    wheel_left: RpmSampler,
    wheel_right: RpmSampler,

    lid_closed_deg: f64,
    sweep_stow_deg: f64,

    last_applied_seq: Option<u64>,
    ack_seq: u64,

    feedback: MechFeedback,
    duties: Duties,
}

/// Measured positions, each one `None` when there is no sensor for it.
///
/// Units: degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MechFeedback {
    pub motor_rhs_deg: Option<f64>,
    pub motor_lhs_deg: Option<f64>,
    pub wheel_left_deg: Option<f64>,
    pub wheel_right_deg: Option<f64>,
}

/// Duties most recently sent to the motors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Duties {
    pub motor_rhs: f64,
    pub motor_lhs: f64,
    pub drive: DriveDuty,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<P: PwmDriver> MechCtrl<P> {
    /// Build the controller from its parameters, taking ownership of the PWM driver.
    ///
    /// The servos are driven to their initial positions straight away and every motor is left
    /// coasting.
    pub fn new(params: &MechExecParams, pwm: P, now_ms: u64) -> Self {
        let mut ctrl = Self {
            pwm,
            lid: ServoSeq::new(params.lid.seq.clone(), params.lid.initial_deg, now_ms),
            lid_channel: params.lid.channel.clone(),
            sweep: ServoSeq::new(params.sweep.seq.clone(), params.sweep.initial_deg, now_ms),
            sweep_channel: params.sweep.channel.clone(),
            motor_rhs: MotorCtrl::new(
                params.motor_rhs.ctrl.clone(),
                DcMotor::new(params.motor_rhs.motor.clone()),
            ),
            motor_lhs: MotorCtrl::new(
                params.motor_lhs.ctrl.clone(),
                DcMotor::new(params.motor_lhs.motor.clone()),
            ),
            drive: DiffDrive::new(
                params.drive.clone(),
                DcMotor::new(params.drive_left.clone()),
                DcMotor::new(params.drive_right.clone()),
            ),
            wheel_left: RpmSampler::new(),
            wheel_right: RpmSampler::new(),
            lid_closed_deg: params.lid_closed_deg,
            sweep_stow_deg: params.sweep_stow_deg,
            last_applied_seq: None,
            ack_seq: 0,
            feedback: MechFeedback::default(),
            duties: Duties::default(),
        };

        ctrl.lid
            .hold(&mut ServoChannel::new(&mut ctrl.pwm, &ctrl.lid_channel));
        ctrl.sweep
            .hold(&mut ServoChannel::new(&mut ctrl.pwm, &ctrl.sweep_channel));
        ctrl.update_motors();

        ctrl
    }

    /// Apply a command.
    ///
    /// A command with the same sequence number as the last one applied is skipped. Absent
    /// mechanism fields leave their actuator's demand untouched, the drive demand is always
    /// replaced. Returns true if the command was applied.
    pub fn apply(&mut self, cmd: &CmdFrame, now_ms: u64) -> bool {
        if self.last_applied_seq == Some(cmd.seq) {
            return false;
        }

        if let Some(deg) = cmd.mech.servo_lid_deg {
            self.lid.set_target(
                deg,
                now_ms,
                &mut ServoChannel::new(&mut self.pwm, &self.lid_channel),
            );
        }
        if let Some(deg) = cmd.mech.servo_sweep_deg {
            self.sweep.set_target(
                deg,
                now_ms,
                &mut ServoChannel::new(&mut self.pwm, &self.sweep_channel),
            );
        }

        self.motor_rhs.set_cmd(cmd.mech.motor_rhs);
        self.motor_lhs.set_cmd(cmd.mech.motor_lhs);

        self.drive.set_cmd(cmd.drive);

        debug!("Applied command {}", cmd.seq);

        self.last_applied_seq = Some(cmd.seq);
        self.ack_seq = cmd.seq;

        true
    }

    /// Advance the servo sequencers.
    pub fn tick_servos(&mut self, now_ms: u64) {
        self.lid
            .tick(now_ms, &mut ServoChannel::new(&mut self.pwm, &self.lid_channel));
        self.sweep
            .tick(now_ms, &mut ServoChannel::new(&mut self.pwm, &self.sweep_channel));
    }

    /// Take in new feedback and recompute the motor and drive outputs.
    pub fn tick_motors(&mut self, now_ms: u64, feedback: MechFeedback) -> Duties {
        self.feedback = feedback;
        self.wheel_left.sample(now_ms, feedback.wheel_left_deg);
        self.wheel_right.sample(now_ms, feedback.wheel_right_deg);

        self.update_motors();

        self.duties
    }

    /// Assemble a telemetry frame from the current state.
    pub fn telemetry(&self, now_ms: u64, range: RangeState, note: Option<&str>) -> TlmFrame {
        TlmFrame {
            device_time_ms: now_ms,
            ack_seq: self.ack_seq,
            wheel: WheelState {
                left_rpm: self.wheel_left.rpm(),
                right_rpm: self.wheel_right.rpm(),
            },
            mech: MechState {
                servo_lid_deg: Some(self.lid.state().current_deg),
                servo_sweep_deg: Some(self.sweep.state().current_deg),
                motor_rhs_deg: self.feedback.motor_rhs_deg,
                motor_lhs_deg: self.feedback.motor_lhs_deg,
            },
            ultrasonic: range,
            note: note.map(String::from),
        }
    }

    /// Sequence number of the last applied command, zero before any.
    pub fn ack_seq(&self) -> u64 {
        self.ack_seq
    }

    pub fn duties(&self) -> Duties {
        self.duties
    }

    pub fn lid(&self) -> &ServoSeq {
        &self.lid
    }

    pub fn sweep(&self) -> &ServoSeq {
        &self.sweep
    }

    pub fn motor_rhs(&self) -> &MotorCtrl {
        &self.motor_rhs
    }

    pub fn motor_lhs(&self) -> &MotorCtrl {
        &self.motor_lhs
    }

    pub fn drive(&self) -> &DiffDrive {
        &self.drive
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    fn update_motors(&mut self) {
        let rhs = self
            .motor_rhs
            .update(self.feedback.motor_rhs_deg, &mut self.pwm);
        let lhs = self
            .motor_lhs
            .update(self.feedback.motor_lhs_deg, &mut self.pwm);
        let drive = self.drive.update(&mut self.pwm);

        self.duties = Duties {
            motor_rhs: rhs.unwrap_or_else(|e| {
                warn!("Could not drive motor_RHS: {}", e);
                0.0
            }),
            motor_lhs: lhs.unwrap_or_else(|e| {
                warn!("Could not drive motor_LHS: {}", e);
                0.0
            }),
            drive: drive.unwrap_or_else(|e| {
                warn!("Could not drive wheels: {}", e);
                DriveDuty::default()
            }),
        };
    }
}

impl<P: PwmDriver> MakeSafe for MechCtrl<P> {
    /// Close the lid, stow the sweep, and stop every motor.
    fn make_safe(&mut self, now_ms: u64) {
        info!(
            "Making safe: lid -> {:.1} deg, sweep -> {:.1} deg, motors coasting",
            self.lid_closed_deg, self.sweep_stow_deg
        );

        self.lid.set_target(
            self.lid_closed_deg,
            now_ms,
            &mut ServoChannel::new(&mut self.pwm, &self.lid_channel),
        );
        self.sweep.set_target(
            self.sweep_stow_deg,
            now_ms,
            &mut ServoChannel::new(&mut self.pwm, &self.sweep_channel),
        );

        self.motor_rhs.clear();
        self.motor_lhs.clear();
        self.drive.stop();
        self.update_motors();

        // The next fresh command is applied whatever its sequence number
        self.last_applied_seq = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{params::sample_params, safety::SafetySupervisor, servo_ctrl::sim::SimPwm};
    use comms_if::cmd::{Demand, DriveCmd, MechCmd, MotorCmd};

    fn ctrl() -> MechCtrl<SimPwm> {
        MechCtrl::new(&sample_params(), SimPwm::new(), 0)
    }

    fn cmd(seq: u64, mech: MechCmd) -> CmdFrame {
        CmdFrame::new(
            seq,
            0,
            &Demand {
                drive: DriveCmd {
                    linear_ftps: 1.5,
                    angular_dps: 0.0,
                },
                mech,
            },
        )
    }

    #[test]
    fn test_absent_fields_leave_targets() {
        let mut ctrl = ctrl();

        assert!(ctrl.apply(
            &cmd(
                5,
                MechCmd {
                    servo_lid_deg: Some(80.0),
                    motor_rhs: MotorCmd::Duty(0.5),
                    ..Default::default()
                }
            ),
            100
        ));
        assert_eq!(ctrl.lid().state().target_deg, 80.0);
        assert_eq!(ctrl.ack_seq(), 5);

        // Everything absent
        assert!(ctrl.apply(&cmd(6, MechCmd::default()), 200));

        assert_eq!(ctrl.lid().state().target_deg, 80.0);
        assert_eq!(ctrl.sweep().state().target_deg, 20.0);
        assert_eq!(ctrl.motor_rhs().cmd(), MotorCmd::Duty(0.5));
        assert_eq!(ctrl.motor_lhs().cmd(), MotorCmd::Unset);
        assert_eq!(ctrl.ack_seq(), 6);
    }

    #[test]
    fn test_duplicate_seq_skipped() {
        let mut ctrl = ctrl();

        assert!(ctrl.apply(&cmd(9, MechCmd::default()), 0));

        let mut repeat = cmd(
            9,
            MechCmd {
                servo_sweep_deg: Some(120.0),
                ..Default::default()
            },
        );
        assert!(!ctrl.apply(&repeat, 10));
        assert_eq!(ctrl.sweep().state().target_deg, 20.0);

        // Older commands are still applied, latest received wins
        repeat.seq = 3;
        assert!(ctrl.apply(&repeat, 20));
        assert_eq!(ctrl.sweep().state().target_deg, 120.0);
        assert_eq!(ctrl.ack_seq(), 3);
    }

    #[test]
    fn test_stale_link_makes_safe() {
        let mut ctrl = ctrl();
        let mut sup = SafetySupervisor::new();

        ctrl.apply(
            &cmd(
                1,
                MechCmd {
                    servo_lid_deg: Some(95.0),
                    servo_sweep_deg: Some(120.0),
                    motor_rhs: MotorCmd::Duty(0.7),
                    motor_lhs: MotorCmd::Duty(-0.7),
                },
            ),
            0,
        );
        ctrl.tick_motors(10, MechFeedback::default());
        assert_ne!(ctrl.duties(), Duties::default());

        // No commands at all is stale from the start
        sup.update(true, 300, &mut ctrl);

        assert_eq!(ctrl.lid().state().target_deg, 10.0);
        assert_eq!(ctrl.sweep().state().target_deg, 20.0);
        assert_eq!(ctrl.motor_rhs().cmd(), MotorCmd::Unset);
        assert_eq!(ctrl.motor_lhs().cmd(), MotorCmd::Unset);
        assert_eq!(ctrl.drive().cmd(), DriveCmd::default());
        assert_eq!(ctrl.duties(), Duties::default());

        // Drive and mechanism PWM outputs are all off
        for ch in 4..12 {
            assert_eq!(ctrl.pwm().duty(ch), None, "channel {} still driven", ch);
        }

        // The same command is applied again after recovery
        assert!(ctrl.apply(&cmd(1, MechCmd::default()), 400));
    }

    #[test]
    fn test_servos_ramp_and_release() {
        let mut ctrl = ctrl();

        ctrl.apply(
            &cmd(
                1,
                MechCmd {
                    servo_lid_deg: Some(95.0),
                    ..Default::default()
                },
            ),
            0,
        );

        let mut now = 0;
        while now < 10_000 {
            now += 10;
            ctrl.tick_servos(now);
        }
        assert_eq!(ctrl.lid().state().current_deg, 95.0);
        assert!(ctrl.lid().state().attached);
        assert!(ctrl.pwm().duty(0).is_some());

        ctrl.make_safe(now);
        while now < 20_000 {
            now += 10;
            ctrl.tick_servos(now);
        }

        // Closed and released
        assert_eq!(ctrl.lid().state().current_deg, 10.0);
        assert!(!ctrl.lid().state().attached);
        assert_eq!(ctrl.pwm().duty(0), None);
    }

    #[test]
    fn test_telemetry() {
        let mut ctrl = ctrl();

        ctrl.apply(&cmd(42, MechCmd::default()), 0);
        ctrl.tick_motors(
            0,
            MechFeedback {
                motor_rhs_deg: Some(33.0),
                wheel_left_deg: Some(0.0),
                ..Default::default()
            },
        );
        ctrl.tick_motors(
            1000,
            MechFeedback {
                motor_rhs_deg: Some(34.0),
                wheel_left_deg: Some(360.0),
                ..Default::default()
            },
        );

        let tlm = ctrl.telemetry(1000, RangeState::valid(12.0), Some("hello"));

        assert_eq!(tlm.device_time_ms, 1000);
        assert_eq!(tlm.ack_seq, 42);
        assert_eq!(tlm.wheel.left_rpm, Some(60.0));
        assert_eq!(tlm.wheel.right_rpm, None);
        assert_eq!(tlm.mech.servo_lid_deg, Some(10.0));
        assert_eq!(tlm.mech.motor_rhs_deg, Some(34.0));
        assert_eq!(tlm.mech.motor_lhs_deg, None);
        assert_eq!(tlm.ultrasonic, RangeState::valid(12.0));
        assert_eq!(tlm.note.as_deref(), Some("hello"));
    }
}

//! # Mechanisms library
//!
//! Device side of the robot link. Commands arrive from the host over the serial line, are
//! sequenced onto the servos, motors and drive, and telemetry is sent back. If the host goes
//! quiet the safety supervisor brings every actuator to rest.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Parameters for the mechanisms executable.
pub mod params;

/// Latest valid command and its arrival time.
pub mod cmd_store;

/// Receive side of the device link - framing, decoding and diagnostic notes.
pub mod cmd_link;

/// Rate limited servo motion with settle detection and auto-release.
pub mod servo_seq;

/// PWM driver boards and servo channels.
pub mod servo_ctrl;

/// DC motor outputs and mechanism motor control.
pub mod motor;

/// Differential drive mixing and wheel speed sampling.
pub mod drive;

/// Ultrasonic ranging.
pub mod ranging;

/// Link timeout supervision.
pub mod safety;

/// Mechanism controller - owns every actuator and applies commands to them.
pub mod mech_ctrl;

/// Simple plant model used when running without hardware.
pub mod sim;

//! # Rover library.
//!
//! Host side of the robot link. This library allows other crates in the workspace to access
//! items defined inside the rover crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Parameters for the rover executable.
pub mod params;

/// Host end of the serial link - port management, command framing and telemetry decoding.
pub mod host_link;

/// Background link thread and the state it shares with the main loop.
pub mod shared;

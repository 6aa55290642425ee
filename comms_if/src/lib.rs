//! # Communications interface crate.
//!
//! Provides the wire protocol shared by the host and the device: command frames sent to the
//! device, telemetry frames sent back to the host, and the line based transport carrying both.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command frame definitions and codec (host -> device)
pub mod cmd;

/// Telemetry frame definitions and codec (device -> host)
pub mod tlm;

/// Line based serial transport
pub mod link;

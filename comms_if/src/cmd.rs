//! # Command frames
//!
//! A command frame is sent by the host to the device, one JSON object per line. Each frame
//! carries a full drive demand and a set of optional mechanism demands. Mechanism fields which
//! are `null` or missing are reported as absent, the consumer must leave the corresponding
//! actuator untouched.
//!
//! Decoding is all or nothing: either a complete [`CmdFrame`] is returned or the line is
//! rejected with a [`CmdParseError`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use serde_json::{json, Map, Value};
use thiserror::Error;

// Internal
use crate::tlm::finite;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Value of the `type` discriminator for command frames.
pub const CMD_TYPE: &str = "cmd";

/// Mode tag for motor position demands.
const MODE_POS_DEG: &str = "POS_DEG";

/// Mode tag for motor duty demands.
const MODE_DUTY: &str = "DUTY";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A complete, validated command frame.
///
/// Only frames which matched the schema are ever constructed by [`CmdFrame::from_json`], so
/// holding one of these means the frame was valid.
#[derive(Debug, Clone, PartialEq)]
pub struct CmdFrame {
    /// Sequence number chosen by the host, echoed back in telemetry as `ack_seq`.
    pub seq: u64,

    /// Host clock at the time of sending. Opaque to the device.
    pub host_time_ms: u64,

    /// Drive demand, supersedes any previous drive demand.
    pub drive: DriveCmd,

    /// Mechanism demands, each one optional.
    pub mech: MechCmd,
}

/// The body of a command without the frame header.
///
/// This is what a command source (autonomy, scripts) produces. The host link wraps it in a
/// [`CmdFrame`] with a fresh sequence number when sending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demand {
    pub drive: DriveCmd,
    pub mech: MechCmd,
}

/// Differential drive demand.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveCmd {
    /// Linear speed.
    ///
    /// Units: feet/second, positive forwards
    pub linear_ftps: f64,

    /// Turn rate.
    ///
    /// Units: degrees/second, positive counter-clockwise
    pub angular_dps: f64,
}

/// Mechanism demands.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MechCmd {
    pub motor_rhs: MotorCmd,
    pub motor_lhs: MotorCmd,

    /// Lid servo target, `None` if absent.
    ///
    /// Units: degrees
    pub servo_lid_deg: Option<f64>,

    /// Sweep servo target, `None` if absent.
    ///
    /// Units: degrees
    pub servo_sweep_deg: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Demand for a mechanism motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCmd {
    /// No demand in this frame, or a mode this software doesn't understand.
    Unset,

    /// Hold the motor output at the given angle in degrees.
    PosDeg(f64),

    /// Drive the motor at the given duty, between -1 and +1.
    Duty(f64),
}

/// Possible command parsing errors.
#[derive(Debug, Error)]
pub enum CmdParseError {
    #[error("Frame contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame has an invalid type ({0})")]
    InvalidType(String),

    #[error("Frame is missing the required \"{0}\" field")]
    MissingField(&'static str),

    #[error("Frame field \"{0}\" has the wrong type")]
    InvalidField(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdFrame {
    /// Build a frame around the given demand.
    pub fn new(seq: u64, host_time_ms: u64, demand: &Demand) -> Self {
        Self {
            seq,
            host_time_ms,
            drive: demand.drive,
            mech: demand.mech,
        }
    }

    /// Parse a command frame from a single JSON line (without the line terminator).
    pub fn from_json(json_str: &str) -> Result<Self, CmdParseError> {
        let val: Value = serde_json::from_str(json_str).map_err(CmdParseError::InvalidJson)?;

        let obj = val.as_object().ok_or(CmdParseError::NotAnObject)?;

        // Must be a command
        match obj.get("type").and_then(Value::as_str) {
            Some(CMD_TYPE) => (),
            Some(t) => {
                return Err(CmdParseError::InvalidType(format!(
                    "{} is not a command frame",
                    t
                )))
            }
            None => {
                return Err(CmdParseError::InvalidType(String::from(
                    "Expected \"type\" to be a string",
                )))
            }
        }

        // All required fields must be present before any of them are interpreted
        let seq = required(obj, "seq")?;
        let host_time_ms = required(obj, "host_time_ms")?;
        let drive = required(obj, "drive")?;
        let mech = required(obj, "mech")?;

        Ok(Self {
            seq: seq.as_u64().ok_or(CmdParseError::InvalidField("seq"))?,
            host_time_ms: host_time_ms
                .as_u64()
                .ok_or(CmdParseError::InvalidField("host_time_ms"))?,
            drive: DriveCmd::from_value(drive)?,
            mech: MechCmd::from_value(mech)?,
        })
    }

    /// Encode the frame as a single JSON line including the trailing `\n`.
    pub fn to_json_line(&self) -> String {
        let mut line = json!({
            "type": CMD_TYPE,
            "seq": self.seq,
            "host_time_ms": self.host_time_ms,
            "drive": self.drive.to_value(),
            "mech": self.mech.to_value(),
        })
        .to_string();

        line.push('\n');
        line
    }

    /// The demand carried by this frame.
    pub fn demand(&self) -> Demand {
        Demand {
            drive: self.drive,
            mech: self.mech,
        }
    }
}

impl Demand {
    /// A demand which stops the drive and leaves every mechanism as it is.
    pub fn stop() -> Self {
        Self::default()
    }

    /// Parse a headerless demand, i.e. a JSON object with `drive` and `mech` members.
    pub fn from_json(json_str: &str) -> Result<Self, CmdParseError> {
        let val: Value = serde_json::from_str(json_str).map_err(CmdParseError::InvalidJson)?;

        let obj = val.as_object().ok_or(CmdParseError::NotAnObject)?;

        Ok(Self {
            drive: DriveCmd::from_value(required(obj, "drive")?)?,
            mech: MechCmd::from_value(required(obj, "mech")?)?,
        })
    }

    /// Lay a later demand over this one.
    ///
    /// The drive demand is always replaced. Mechanism fields present in `later` replace the
    /// current ones, absent fields keep their current value.
    pub fn overlay(&mut self, later: &Demand) {
        self.drive = later.drive;
        self.mech.overlay(&later.mech);
    }
}

impl DriveCmd {
    fn from_value(val: &Value) -> Result<Self, CmdParseError> {
        let obj = val.as_object().ok_or(CmdParseError::InvalidField("drive"))?;

        Ok(Self {
            linear_ftps: obj.get("linear").and_then(Value::as_f64).unwrap_or(0.0),
            angular_dps: obj.get("angular").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }

    fn to_value(&self) -> Value {
        json!({
            "linear": finite(Some(self.linear_ftps)).unwrap_or(0.0),
            "angular": finite(Some(self.angular_dps)).unwrap_or(0.0),
        })
    }
}

impl MechCmd {
    /// Replace every field which is present in `later`.
    pub fn overlay(&mut self, later: &MechCmd) {
        if later.motor_rhs.is_set() {
            self.motor_rhs = later.motor_rhs;
        }
        if later.motor_lhs.is_set() {
            self.motor_lhs = later.motor_lhs;
        }
        if later.servo_lid_deg.is_some() {
            self.servo_lid_deg = later.servo_lid_deg;
        }
        if later.servo_sweep_deg.is_some() {
            self.servo_sweep_deg = later.servo_sweep_deg;
        }
    }

    fn from_value(val: &Value) -> Result<Self, CmdParseError> {
        let obj = val.as_object().ok_or(CmdParseError::InvalidField("mech"))?;

        Ok(Self {
            motor_rhs: MotorCmd::from_value(obj.get("motor_RHS")),
            motor_lhs: MotorCmd::from_value(obj.get("motor_LHS")),
            servo_lid_deg: obj.get("servo_LID_deg").and_then(Value::as_f64),
            servo_sweep_deg: obj.get("servo_SWEEP_deg").and_then(Value::as_f64),
        })
    }

    fn to_value(&self) -> Value {
        json!({
            "motor_RHS": self.motor_rhs.to_value(),
            "motor_LHS": self.motor_lhs.to_value(),
            "servo_LID_deg": finite(self.servo_lid_deg),
            "servo_SWEEP_deg": finite(self.servo_sweep_deg),
        })
    }
}

impl MotorCmd {
    /// True if this demand should replace the motor's current demand.
    pub fn is_set(&self) -> bool {
        !matches!(self, MotorCmd::Unset)
    }

    /// Unknown modes and malformed motor objects decode to `Unset` rather than failing the whole
    /// frame. A known mode with a missing or non-numeric value decodes to a value of zero, so a
    /// bare `DUTY` stops the motor.
    fn from_value(val: Option<&Value>) -> Self {
        let obj = match val.and_then(Value::as_object) {
            Some(o) => o,
            None => return MotorCmd::Unset,
        };

        let value = obj.get("value").and_then(Value::as_f64).unwrap_or(0.0);

        match obj.get("mode").and_then(Value::as_str) {
            Some(MODE_POS_DEG) => MotorCmd::PosDeg(value),
            Some(MODE_DUTY) => MotorCmd::Duty(value),
            _ => MotorCmd::Unset,
        }
    }

    fn to_value(&self) -> Value {
        match *self {
            MotorCmd::Unset => Value::Null,
            MotorCmd::PosDeg(v) => match finite(Some(v)) {
                Some(v) => json!({ "mode": MODE_POS_DEG, "value": v }),
                None => Value::Null,
            },
            MotorCmd::Duty(v) => match finite(Some(v)) {
                Some(v) => json!({ "mode": MODE_DUTY, "value": v }),
                None => Value::Null,
            },
        }
    }
}

impl Default for MotorCmd {
    fn default() -> Self {
        MotorCmd::Unset
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn required<'a>(
    obj: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Value, CmdParseError> {
    obj.get(key).ok_or(CmdParseError::MissingField(key))
}

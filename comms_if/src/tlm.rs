//! # Telemetry frames
//!
//! The device sends one telemetry frame per telemetry tick. Every numeric field is optional, and
//! anything which is unknown or not finite is sent as an explicit `null` so the host can always
//! tell "no data" apart from a zero.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde_json::{json, Map, Value};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Value of the `type` discriminator for telemetry frames.
pub const TLM_TYPE: &str = "telemetry";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single telemetry frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlmFrame {
    /// Device clock when the frame was assembled. Sent as `arduino_time_ms`.
    pub device_time_ms: u64,

    /// Sequence number of the last command that was applied.
    pub ack_seq: u64,

    pub wheel: WheelState,

    pub mech: MechState,

    pub ultrasonic: RangeState,

    /// Short diagnostic message, if one is currently active.
    pub note: Option<String>,
}

/// Measured wheel speeds.
///
/// Units: revolutions/minute
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelState {
    pub left_rpm: Option<f64>,
    pub right_rpm: Option<f64>,
}

/// Measured or commanded mechanism angles.
///
/// Units: degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MechState {
    pub servo_lid_deg: Option<f64>,
    pub servo_sweep_deg: Option<f64>,
    pub motor_rhs_deg: Option<f64>,
    pub motor_lhs_deg: Option<f64>,
}

/// Ultrasonic range reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeState {
    /// Distance to the nearest echo, only meaningful when `valid` is set.
    ///
    /// Units: inches
    pub distance_in: Option<f64>,

    pub valid: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Possible telemetry parsing errors.
#[derive(Debug, Error)]
pub enum TlmParseError {
    #[error("Frame contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame is not a telemetry frame")]
    NotTelemetry,

    #[error("Frame is missing or has an invalid \"{0}\" field")]
    InvalidField(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TlmFrame {
    /// Encode the frame as a single JSON line including the trailing `\n`.
    ///
    /// Never fails. Non-finite values are encoded as `null`, and the range distance is only
    /// encoded when the reading is valid.
    pub fn to_json_line(&self) -> String {
        let range = self.ultrasonic.sanitised();

        let mut line = json!({
            "type": TLM_TYPE,
            "arduino_time_ms": self.device_time_ms,
            "ack_seq": self.ack_seq,
            "wheel": {
                "left_rpm": finite(self.wheel.left_rpm),
                "right_rpm": finite(self.wheel.right_rpm),
            },
            "mech": {
                "servo_LID_deg": finite(self.mech.servo_lid_deg),
                "servo_SWEEP_deg": finite(self.mech.servo_sweep_deg),
                "motor_RHS_deg": finite(self.mech.motor_rhs_deg),
                "motor_LHS_deg": finite(self.mech.motor_lhs_deg),
            },
            "ultrasonic": {
                "distance_in": range.distance_in,
                "valid": range.valid,
            },
            "note": self.note,
        })
        .to_string();

        line.push('\n');
        line
    }

    /// Parse a telemetry frame from a single JSON line.
    ///
    /// Only the header is required, the `wheel`, `mech` and `ultrasonic` objects may be missing
    /// in which case every value in them is reported as unknown.
    pub fn from_json(json_str: &str) -> Result<Self, TlmParseError> {
        let val: Value = serde_json::from_str(json_str).map_err(TlmParseError::InvalidJson)?;

        let obj = val.as_object().ok_or(TlmParseError::NotAnObject)?;

        if obj.get("type").and_then(Value::as_str) != Some(TLM_TYPE) {
            return Err(TlmParseError::NotTelemetry);
        }

        let device_time_ms = obj
            .get("arduino_time_ms")
            .and_then(Value::as_u64)
            .ok_or(TlmParseError::InvalidField("arduino_time_ms"))?;
        let ack_seq = obj
            .get("ack_seq")
            .and_then(Value::as_u64)
            .ok_or(TlmParseError::InvalidField("ack_seq"))?;

        let empty = Map::new();
        let wheel = sub_object(obj, "wheel").unwrap_or(&empty);
        let mech = sub_object(obj, "mech").unwrap_or(&empty);
        let ultrasonic = sub_object(obj, "ultrasonic").unwrap_or(&empty);

        let range = RangeState {
            distance_in: opt_f64(ultrasonic, "distance_in"),
            valid: ultrasonic
                .get("valid")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        Ok(Self {
            device_time_ms,
            ack_seq,
            wheel: WheelState {
                left_rpm: opt_f64(wheel, "left_rpm"),
                right_rpm: opt_f64(wheel, "right_rpm"),
            },
            mech: MechState {
                servo_lid_deg: opt_f64(mech, "servo_LID_deg"),
                servo_sweep_deg: opt_f64(mech, "servo_SWEEP_deg"),
                motor_rhs_deg: opt_f64(mech, "motor_RHS_deg"),
                motor_lhs_deg: opt_f64(mech, "motor_LHS_deg"),
            },
            ultrasonic: range.sanitised(),
            note: obj.get("note").and_then(Value::as_str).map(String::from),
        })
    }
}

impl RangeState {
    /// A reading which failed validation.
    pub fn invalid() -> Self {
        Self {
            distance_in: None,
            valid: false,
        }
    }

    /// A valid reading at the given distance in inches.
    pub fn valid(distance_in: f64) -> Self {
        Self {
            distance_in: Some(distance_in),
            valid: true,
        }
    }

    /// Invalid readings never carry a distance, and a valid flag without a finite distance is
    /// not valid.
    fn sanitised(&self) -> Self {
        match (self.valid, finite(self.distance_in)) {
            (true, Some(d)) => Self::valid(d),
            _ => Self::invalid(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Drop values which can't be represented in JSON.
pub(crate) fn finite(val: Option<f64>) -> Option<f64> {
    val.filter(|v| v.is_finite())
}

fn sub_object<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    obj.get(key).and_then(Value::as_object)
}

fn opt_f64(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_absent_values_are_null() {
        let tlm = TlmFrame {
            device_time_ms: 1200,
            ack_seq: 5,
            mech: MechState {
                servo_lid_deg: Some(80.0),
                ..Default::default()
            },
            ..Default::default()
        };

        let line = tlm.to_json_line();
        let val: Value = serde_json::from_str(line.trim_end()).unwrap();

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(val["type"], "telemetry");
        assert_eq!(val["arduino_time_ms"], 1200);
        assert_eq!(val["ack_seq"], 5);
        assert_eq!(val["mech"]["servo_LID_deg"], 80.0);
        assert!(val["mech"]["servo_SWEEP_deg"].is_null());
        assert!(val["mech"]["motor_RHS_deg"].is_null());
        assert!(val["wheel"]["left_rpm"].is_null());
        assert!(val["note"].is_null());
        assert_eq!(val["ultrasonic"]["valid"], false);
        assert!(val["ultrasonic"]["distance_in"].is_null());
    }

    #[test]
    fn test_invalid_range_never_has_distance() {
        let mut tlm = TlmFrame::default();

        // Distance present but flagged invalid
        tlm.ultrasonic = RangeState {
            distance_in: Some(0.0),
            valid: false,
        };
        let val: Value = serde_json::from_str(tlm.to_json_line().trim_end()).unwrap();
        assert!(val["ultrasonic"]["distance_in"].is_null());

        // Non-finite distance can't be valid
        tlm.ultrasonic = RangeState::valid(f64::INFINITY);
        let val: Value = serde_json::from_str(tlm.to_json_line().trim_end()).unwrap();
        assert!(val["ultrasonic"]["distance_in"].is_null());
        assert_eq!(val["ultrasonic"]["valid"], false);

        tlm.ultrasonic = RangeState::valid(42.5);
        tlm.wheel.left_rpm = Some(f64::NAN);
        tlm.note = Some(String::from("RX OK seq=3 len=120"));
        let val: Value = serde_json::from_str(tlm.to_json_line().trim_end()).unwrap();
        assert_eq!(val["ultrasonic"]["distance_in"], 42.5);
        assert_eq!(val["ultrasonic"]["valid"], true);
        assert!(val["wheel"]["left_rpm"].is_null());
        assert_eq!(val["note"], "RX OK seq=3 len=120");
    }

    #[test]
    fn test_decode_telemetry() {
        let line = r#"{"type":"telemetry","arduino_time_ms":5000,"ack_seq":12,
            "wheel":{"left_rpm":10.5,"right_rpm":null},
            "ultrasonic":{"distance_in":3.0,"valid":false},
            "note":"BOOT RX_BUF_SIZE=512"}"#;

        let tlm = TlmFrame::from_json(line).unwrap();

        assert_eq!(tlm.device_time_ms, 5000);
        assert_eq!(tlm.ack_seq, 12);
        assert_eq!(tlm.wheel.left_rpm, Some(10.5));
        assert_eq!(tlm.wheel.right_rpm, None);
        assert_eq!(tlm.mech, MechState::default());
        assert_eq!(tlm.ultrasonic, RangeState::invalid());
        assert_eq!(tlm.note.as_deref(), Some("BOOT RX_BUF_SIZE=512"));
    }

    #[test]
    fn test_decode_rejects_non_telemetry() {
        assert!(matches!(
            TlmFrame::from_json(r#"{"type":"cmd","arduino_time_ms":1,"ack_seq":1}"#),
            Err(TlmParseError::NotTelemetry)
        ));
        assert!(matches!(
            TlmFrame::from_json(r#"{"type":"telemetry","ack_seq":1}"#),
            Err(TlmParseError::InvalidField("arduino_time_ms"))
        ));
        assert!(matches!(
            TlmFrame::from_json("BOOT"),
            Err(TlmParseError::InvalidJson(_))
        ));
    }
}

//! # Command script interpreter module
//!
//! This module provides an interpreter for command scripts, which let the host drive the robot
//! through a fixed sequence of demands. Each entry in a script is a timestamp in seconds
//! followed by a JSON demand (see [`comms_if::cmd::Demand`]) and terminated by a semicolon:
//!
//! ```text
//! 0.0: {"drive": {"linear": 0.5, "angular": 0.0}, "mech": {"servo_LID_deg": 95}};
//! 2.5: {"drive": {"linear": 0.0, "angular": 0.0}, "mech": {"servo_LID_deg": 10}};
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use comms_if::cmd::{CmdParseError, Demand};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A demand which is scripted to occur at a specific time.
#[derive(Debug, Clone)]
struct ScriptedDemand {
    /// The time the demand is supposed to take effect at
    exec_time_s: f64,

    demand: Demand,
}

/// A script interpreter.
///
/// After loading a script use `.get_pending` to acquire the demands which have become due.
#[derive(Debug)]
pub struct ScriptInterpreter {
    demands: VecDeque<ScriptedDemand>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0}")]
    ScriptNotFound(String),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid demand at {0} s: {1}")]
    InvalidDemand(f64, CmdParseError),

    #[error("Could not build the script pattern: {0}")]
    PatternError(regex::Error),
}

/// Result of checking the script for due demands.
#[derive(Debug)]
pub enum PendingDemands {
    None,
    Some(Vec<Demand>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = script_path.as_ref();

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path.display().to_string()));
        }

        let script = fs::read_to_string(path).map_err(ScriptError::ScriptLoadError)?;

        Self::from_str(&script)
    }

    /// Create a new interpreter from the contents of a script.
    pub fn from_str(script: &str) -> Result<Self, ScriptError> {
        let re = RegexBuilder::new(r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);")
            .multi_line(true)
            .build()
            .map_err(ScriptError::PatternError)?;

        let mut demands = VecDeque::new();

        for cap in re.captures_iter(script) {
            let (time_str, body) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(b)) => (t.as_str(), b.as_str()),
                _ => continue,
            };

            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

            let demand = Demand::from_json(body)
                .map_err(|e| ScriptError::InvalidDemand(exec_time_s, e))?;

            demands.push_back(ScriptedDemand {
                exec_time_s,
                demand,
            });
        }

        if demands.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        Ok(ScriptInterpreter { demands })
    }

    /// Return the demands which have become due by `elapsed_s` seconds into the script.
    pub fn get_pending(&mut self, elapsed_s: f64) -> PendingDemands {
        if self.demands.is_empty() {
            return PendingDemands::EndOfScript;
        }

        let mut due = Vec::new();

        while let Some(d) = self.demands.front() {
            if d.exec_time_s > elapsed_s {
                break;
            }

            if let Some(d) = self.demands.pop_front() {
                due.push(d.demand);
            }
        }

        if due.is_empty() {
            PendingDemands::None
        } else {
            PendingDemands::Some(due)
        }
    }

    /// Get the number of demands left in the script
    pub fn get_num_demands(&self) -> usize {
        self.demands.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.demands.back() {
            Some(d) => d.exec_time_s,
            None => 0f64,
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Merge demands which became due together into a single demand, in script order.
///
/// Later demands take priority, but mechanism fields they leave absent keep the value from the
/// earlier demands. Returns `None` if `demands` is empty.
pub fn merge_due<I: IntoIterator<Item = Demand>>(demands: I) -> Option<Demand> {
    demands.into_iter().fold(None, |merged, d| match merged {
        Some(mut m) => {
            m.overlay(&d);
            Some(m)
        }
        None => Some(d),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = "
        0.0: {\"drive\": {\"linear\": 0.5, \"angular\": 0.0}, \"mech\": {\"servo_LID_deg\": 95}};
        // Stop and close the lid
        2.5: {\"drive\": {}, \"mech\": {\"servo_LID_deg\": 10}};
        2.5: {\"drive\": {\"angular\": 30}, \"mech\": {}};
    ";

    #[test]
    fn test_script_pending() {
        let mut script = ScriptInterpreter::from_str(SCRIPT).unwrap();

        assert_eq!(script.get_num_demands(), 3);
        assert_eq!(script.get_duration(), 2.5);

        match script.get_pending(0.0) {
            PendingDemands::Some(d) => {
                assert_eq!(d.len(), 1);
                assert_eq!(d[0].mech.servo_lid_deg, Some(95.0));
            }
            p => panic!("Expected one demand, got {:?}", p),
        }

        assert!(matches!(script.get_pending(1.0), PendingDemands::None));

        match script.get_pending(3.0) {
            PendingDemands::Some(d) => {
                assert_eq!(d.len(), 2);
                assert_eq!(d[1].drive.angular_dps, 30.0);
            }
            p => panic!("Expected two demands, got {:?}", p),
        }

        assert!(matches!(script.get_pending(4.0), PendingDemands::EndOfScript));
    }

    #[test]
    fn test_merge_coincident_demands() {
        let mut script = ScriptInterpreter::from_str(SCRIPT).unwrap();
        script.get_pending(0.0);

        let merged = match script.get_pending(3.0) {
            PendingDemands::Some(d) => merge_due(d).unwrap(),
            p => panic!("Expected two demands, got {:?}", p),
        };

        // Lid from the first 2.5 s demand, drive from the second
        assert_eq!(merged.mech.servo_lid_deg, Some(10.0));
        assert_eq!(merged.drive.angular_dps, 30.0);
        assert_eq!(merged.drive.linear_ftps, 0.0);

        assert!(merge_due(Vec::new()).is_none());
    }

    #[test]
    fn test_script_errors() {
        assert!(matches!(
            ScriptInterpreter::from_str("nothing to see here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::from_str("1.0: {\"mech\": {}};"),
            Err(ScriptError::InvalidDemand(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::new("/no/such/script.pwcs"),
            Err(ScriptError::ScriptNotFound(_))
        ));
    }
}

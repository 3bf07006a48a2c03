//! Error codes reported by Newport motion controllers through `TB?`.

use crate::error::InstrumentError;
use std::fmt;
use std::time::Duration;

/// Seconds per tick of the controller's servo clock, used for timestamps.
const SERVO_TICK: f64 = 400e-6;

fn controller_message(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "NO ERROR DETECTED",
        1 => "PCI COMMUNICATION TIME-OUT",
        4 => "EMERGENCY STOP ACTIVATED",
        6 => "COMMAND DOES NOT EXIST",
        7 => "PARAMETER OUT OF RANGE",
        8 => "CABLE INTERLOCK ERROR",
        9 => "AXIS NUMBER OUT OF RANGE",
        13 => "GROUP NUMBER MISSING",
        14 => "GROUP NUMBER OUT OF RANGE",
        15 => "GROUP NUMBER NOT ASSIGNED",
        16 => "GROUP NUMBER ALREADY ASSIGNED",
        17 => "GROUP AXIS OUT OF RANGE",
        18 => "GROUP AXIS ALREADY ASSIGNED",
        19 => "GROUP AXIS DUPLICATED",
        20 => "DATA ACQUISITION IS BUSY",
        21 => "DATA ACQUISITION SETUP ERROR",
        22 => "DATA ACQUISITION NOT ENABLED",
        23 => "SERVO CYCLE (400 µS) TICK FAILURE",
        25 => "DOWNLOAD IN PROGRESS",
        26 => "STORED PROGRAM NOT STARTED",
        27 => "COMMAND NOT ALLOWED",
        28 => "STORED PROGRAM FLASH AREA FULL",
        29 => "GROUP PARAMETER MISSING",
        30 => "GROUP PARAMETER OUT OF RANGE",
        31 => "GROUP MAXIMUM VELOCITY EXCEEDED",
        32 => "GROUP MAXIMUM ACCELERATION EXCEEDED",
        33 => "GROUP MAXIMUM DECELERATION EXCEEDED",
        34 => "GROUP MOVE NOT ALLOWED DURING MOTION",
        35 => "PROGRAM NOT FOUND",
        37 => "AXIS NUMBER MISSING",
        38 => "COMMAND PARAMETER MISSING",
        39 => "PROGRAM LABEL NOT FOUND",
        40 => "LAST COMMAND CANNOT BE REPEATED",
        41 => "MAX NUMBER OF LABELS PER PROGRAM EXCEEDED",
        2 | 3 | 5 | 10 | 11 | 12 | 24 | 36 => "Reserved for future use",
        _ => return None,
    })
}

fn axis_message(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "MOTOR TYPE NOT DEFINED",
        1 => "PARAMETER OUT OF RANGE",
        2 => "AMPLIFIER FAULT DETECTED",
        3 => "FOLLOWING ERROR THRESHOLD EXCEEDED",
        4 => "POSITIVE HARDWARE LIMIT DETECTED",
        5 => "NEGATIVE HARDWARE LIMIT DETECTED",
        6 => "POSITIVE SOFTWARE LIMIT DETECTED",
        7 => "NEGATIVE SOFTWARE LIMIT DETECTED",
        8 => "MOTOR / STAGE NOT CONNECTED",
        9 => "FEEDBACK SIGNAL FAULT DETECTED",
        10 => "MAXIMUM VELOCITY EXCEEDED",
        11 => "MAXIMUM ACCELERATION EXCEEDED",
        13 => "MOTOR NOT ENABLED",
        15 => "MAXIMUM JERK EXCEEDED",
        16 => "MAXIMUM DAC OFFSET EXCEEDED",
        17 => "ESP CRITICAL SETTINGS ARE PROTECTED",
        18 => "ESP STAGE DEVICE ERROR",
        19 => "ESP STAGE DATA INVALID",
        20 => "HOMING ABORTED",
        21 => "MOTOR CURRENT NOT DEFINED",
        22 => "UNIDRIVE COMMUNICATIONS ERROR",
        23 => "UNIDRIVE NOT DETECTED",
        24 => "SPEED OUT OF RANGE",
        25 => "INVALID TRAJECTORY MASTER AXIS",
        26 => "PARAMETER CHARGE NOT ALLOWED",
        27 => "INVALID TRAJECTORY MODE FOR HOMING",
        28 => "INVALID ENCODER STEP RATIO",
        29 => "DIGITAL I/O INTERLOCK DETECTED",
        30 => "COMMAND NOT ALLOWED DURING HOMING",
        31 => "COMMAND NOT ALLOWED DUE TO GROUP",
        32 => "INVALID TRAJECTORY MODE FOR MOVING",
        12 | 14 => "Reserved for future use",
        _ => return None,
    })
}

/// An error read back from a Newport controller's error buffer.
///
/// Codes of 100 and above belong to an axis: `AXX` is error `XX` on axis `A`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewportError {
    code: i64,
    axis: Option<i64>,
    timestamp: Option<Duration>,
}

impl NewportError {
    pub fn new(raw_code: i64) -> Self {
        let axis = raw_code / 100;
        if axis == 0 {
            Self {
                code: raw_code,
                axis: None,
                timestamp: None,
            }
        } else {
            Self {
                code: raw_code % 100,
                axis: Some(axis),
                timestamp: None,
            }
        }
    }

    /// Attaches the controller timestamp, given in servo ticks.
    pub fn with_ticks(mut self, ticks: f64) -> Self {
        if ticks.is_finite() && ticks >= 0.0 {
            self.timestamp = Some(Duration::from_secs_f64(ticks * SERVO_TICK));
        }
        self
    }

    /// Error number, with the axis digits removed.
    pub fn errcode(&self) -> i64 {
        self.code
    }

    pub fn axis(&self) -> Option<i64> {
        self.axis
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    pub fn message(&self) -> &'static str {
        let known = match self.axis {
            None => controller_message(self.code),
            Some(_) => axis_message(self.code),
        };
        known.unwrap_or("Error code not recognised")
    }
}

impl fmt::Display for NewportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Newport Error: {}.", self.code)?;
        if let Some(axis) = self.axis {
            write!(f, " Axis: {axis}.")?;
        }
        write!(f, " Error Message: {}.", self.message())?;
        if let Some(ts) = self.timestamp {
            write!(f, " At time : {:.4}s", ts.as_secs_f64())?;
        }
        Ok(())
    }
}

impl From<NewportError> for InstrumentError {
    fn from(err: NewportError) -> Self {
        let code = match err.axis {
            Some(axis) => axis * 100 + err.code,
            None => err.code,
        };
        InstrumentError::Device {
            code,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_error() {
        let err = NewportError::new(7);
        assert_eq!(err.axis(), None);
        assert_eq!(err.errcode(), 7);
        assert_eq!(err.message(), "PARAMETER OUT OF RANGE");
        assert_eq!(
            err.to_string(),
            "Newport Error: 7. Error Message: PARAMETER OUT OF RANGE."
        );
    }

    #[test]
    fn test_axis_error() {
        let err = NewportError::new(204);
        assert_eq!(err.axis(), Some(2));
        assert_eq!(err.errcode(), 4);
        assert_eq!(err.message(), "POSITIVE HARDWARE LIMIT DETECTED");
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(NewportError::new(99).message(), "Error code not recognised");
    }

    #[test]
    fn test_timestamp_and_conversion() {
        let err = NewportError::new(113).with_ticks(2500.0);
        let ts = err.timestamp().unwrap().as_secs_f64();
        assert!((ts - 1.0).abs() < 1e-6);
        match InstrumentError::from(err) {
            InstrumentError::Device { code, message } => {
                assert_eq!(code, 113);
                assert!(message.contains("MOTOR NOT ENABLED"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

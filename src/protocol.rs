//! Wire protocol shared by both sides of the bridge.
//!
//! One command verb (`ROTATE`) travels from the control side to the executor
//! as a comma-separated ASCII line; exactly one reply line comes back. Replies
//! are correlated to requests purely by ordering: at most one request is in
//! flight per connection.

use std::fmt;
use thiserror::Error;

/// A motor driver HAT, addressed independently on the shared I2C bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatId {
    Hat1,
    Hat2,
}

impl HatId {
    /// Construct from the 1-based id used on the wire and at the prompt.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(HatId::Hat1),
            2 => Some(HatId::Hat2),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            HatId::Hat1 => 1,
            HatId::Hat2 => 2,
        }
    }
}

impl fmt::Display for HatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// One of the two stepper outputs on a HAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorId {
    Motor1,
    Motor2,
}

impl MotorId {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(MotorId::Motor1),
            2 => Some(MotorId::Motor2),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            MotorId::Motor1 => 1,
            MotorId::Motor2 => 2,
        }
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Rotation direction. Only the exact strings `cw` and `ccw` are accepted;
/// anything else is a parse error rather than an implicit counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Cw,
    Ccw,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cw" => Some(Direction::Cw),
            "ccw" => Some(Direction::Ccw),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Cw => write!(f, "cw"),
            Direction::Ccw => write!(f, "ccw"),
        }
    }
}

/// Why a command line failed to parse.
///
/// `Unrecognized` covers verb and field-count mismatches and maps to the fixed
/// `Invalid command` reply; the field errors map to `Error: <message>`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unrecognized command")]
    Unrecognized,
    #[error("invalid hat id '{0}': must be 1 or 2")]
    BadHat(String),
    #[error("invalid motor id '{0}': must be 1 or 2")]
    BadMotor(String),
    #[error("invalid step count '{0}': must be a non-negative integer")]
    BadSteps(String),
    #[error("invalid direction '{0}': must be cw or ccw")]
    BadDirection(String),
}

/// A decoded request. `ROTATE` is the only verb the protocol defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Rotate {
        hat: HatId,
        motor: MotorId,
        steps: u32,
        direction: Direction,
    },
}

impl Command {
    /// Serialize to the wire form, without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Command::Rotate {
                hat,
                motor,
                steps,
                direction,
            } => format!("ROTATE,{},{},{},{}", hat, motor, steps, direction),
        }
    }

    /// Decode one command line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();

        if fields[0] != "ROTATE" || fields.len() != 5 {
            return Err(ParseError::Unrecognized);
        }

        let hat = fields[1]
            .parse::<u8>()
            .ok()
            .and_then(HatId::from_number)
            .ok_or_else(|| ParseError::BadHat(fields[1].to_string()))?;
        let motor = fields[2]
            .parse::<u8>()
            .ok()
            .and_then(MotorId::from_number)
            .ok_or_else(|| ParseError::BadMotor(fields[2].to_string()))?;
        let steps = fields[3]
            .parse::<u32>()
            .map_err(|_| ParseError::BadSteps(fields[3].to_string()))?;
        let direction = Direction::parse(fields[4])
            .ok_or_else(|| ParseError::BadDirection(fields[4].to_string()))?;

        Ok(Command::Rotate {
            hat,
            motor,
            steps,
            direction,
        })
    }
}

/// The executor's one-line answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Invalid,
    Error(String),
}

impl Reply {
    /// Classify a reply line received over the wire. Returns `None` for lines
    /// that do not match any known reply form.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        match line {
            "OK" => Some(Reply::Ok),
            "Invalid command" => Some(Reply::Invalid),
            _ => line
                .strip_prefix("Error: ")
                .map(|msg| Reply::Error(msg.to_string())),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Invalid => write!(f, "Invalid command"),
            Reply::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let cmd = Command::Rotate {
            hat: HatId::Hat1,
            motor: MotorId::Motor2,
            steps: 100,
            direction: Direction::Cw,
        };
        assert_eq!(cmd.encode(), "ROTATE,1,2,100,cw");
    }

    #[test]
    fn test_round_trip() {
        for hat in [HatId::Hat1, HatId::Hat2] {
            for motor in [MotorId::Motor1, MotorId::Motor2] {
                for steps in [0u32, 1, 200, 4096] {
                    for direction in [Direction::Cw, Direction::Ccw] {
                        let cmd = Command::Rotate {
                            hat,
                            motor,
                            steps,
                            direction,
                        };
                        assert_eq!(Command::parse(&cmd.encode()), Ok(cmd));
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        assert_eq!(
            Command::parse("ROTATE, 1, 2, 50, ccw\r"),
            Ok(Command::Rotate {
                hat: HatId::Hat1,
                motor: MotorId::Motor2,
                steps: 50,
                direction: Direction::Ccw,
            })
        );
    }

    #[test]
    fn test_unknown_verb_is_unrecognized() {
        assert_eq!(Command::parse("FOO,1,2,3"), Err(ParseError::Unrecognized));
        assert_eq!(Command::parse(""), Err(ParseError::Unrecognized));
    }

    #[test]
    fn test_wrong_field_count_is_unrecognized() {
        assert_eq!(Command::parse("ROTATE,1,2,3"), Err(ParseError::Unrecognized));
        assert_eq!(
            Command::parse("ROTATE,1,2,3,cw,extra"),
            Err(ParseError::Unrecognized)
        );
    }

    #[test]
    fn test_field_errors() {
        assert_eq!(
            Command::parse("ROTATE,3,1,10,cw"),
            Err(ParseError::BadHat("3".to_string()))
        );
        assert_eq!(
            Command::parse("ROTATE,1,0,10,cw"),
            Err(ParseError::BadMotor("0".to_string()))
        );
        assert_eq!(
            Command::parse("ROTATE,1,1,-5,cw"),
            Err(ParseError::BadSteps("-5".to_string()))
        );
        assert_eq!(
            Command::parse("ROTATE,1,1,10,xx"),
            Err(ParseError::BadDirection("xx".to_string()))
        );
    }

    #[test]
    fn test_reply_display() {
        assert_eq!(Reply::Ok.to_string(), "OK");
        assert_eq!(Reply::Invalid.to_string(), "Invalid command");
        assert_eq!(
            Reply::Error("boom".to_string()).to_string(),
            "Error: boom"
        );
    }

    #[test]
    fn test_reply_parse() {
        assert_eq!(Reply::parse("OK"), Some(Reply::Ok));
        assert_eq!(Reply::parse("Invalid command"), Some(Reply::Invalid));
        assert_eq!(
            Reply::parse("Error: no such motor"),
            Some(Reply::Error("no such motor".to_string()))
        );
        assert_eq!(Reply::parse("garbage"), None);
    }
}

//! Typed codec for the `<NAME[:arg]*>` frame grammar.
//!
//! Outbound frames are built only from [`Command`] values, so argument ranges
//! and spelling are fixed by the type.  Inbound frames decode into a closed
//! [`Reply`] set; anything else is a [`FrameError`] rather than being
//! silently dropped.
//!
//! | Reply | Wire form |
//! |---|---|
//! | [`Reply::Ack`] | `<ACK:NAME_OK>` |
//! | [`Reply::Error`] | `<ERROR:reason>` |
//! | [`Reply::Data`] | `<DATA:SENSORS:key:value[,key:value]*>` |
//! | [`Reply::Ready`] | `<READY>` (boot banner, any case) |

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The pipe servo sweeps out and back before acknowledging.
const PIPE_EXTEND_ALLOWANCE: Duration = Duration::from_millis(3000);

/// What the sensing endpoint's status LED/buzzer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indication {
    Working,
    Success,
    Error,
}

impl Indication {
    fn as_str(&self) -> &'static str {
        match self {
            Indication::Working => "working",
            Indication::Success => "success",
            Indication::Error => "error",
        }
    }
}

/// Every command either endpoint understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ── Motion / actuation endpoint ─────────────────────────────────────────
    /// Signed per-side wheel speed, `-255..=255`.
    Move { left: i16, right: i16 },
    /// Endpoint-timed spray from one tank.
    Spray { tank: u8, duration_ms: u64 },
    /// Open (`true`) or close a tank relay.
    Pump { tank: u8, on: bool },
    Stop,
    ResetEncoder,

    // ── Sensing / indication endpoint ───────────────────────────────────────
    Pan(u8),
    Tilt(u8),
    Pipe(u8),
    /// Extend-then-retract the treatment pipe.
    PipeExtend,
    Indicate(Indication),
    BuzzerOn,
    StopNano,

    // ── Both ────────────────────────────────────────────────────────────────
    /// Poll for a `DATA:SENSORS` report.
    GetData,
}

impl Command {
    /// The bare command name, which is also the prefix of its acknowledgement.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Move { .. } => "MOVE",
            Command::Spray { .. } => "SPRAY",
            Command::Pump { .. } => "PUMP",
            Command::Stop => "STOP",
            Command::ResetEncoder => "RESET_ENCODER",
            Command::Pan(_) => "PAN",
            Command::Tilt(_) => "TILT",
            Command::Pipe(_) => "PIPE",
            Command::PipeExtend => "PIPE_EXTEND",
            Command::Indicate(_) => "INDICATE",
            Command::BuzzerOn => "BUZZER_ON",
            Command::StopNano => "STOP_NANO",
            Command::GetData => "get_data",
        }
    }

    /// `true` for commands that can set the robot or its relays in motion.
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            Command::Move { .. }
                | Command::Spray { .. }
                | Command::Pump { on: true, .. }
                | Command::PipeExtend
        )
    }

    /// Extra acknowledgement wait for commands the endpoint acknowledges only
    /// after finishing them.
    pub fn ack_allowance(&self) -> Duration {
        match self {
            Command::Spray { duration_ms, .. } => Duration::from_millis(*duration_ms),
            Command::PipeExtend => PIPE_EXTEND_ALLOWANCE,
            _ => Duration::ZERO,
        }
    }

    /// Render the full wire frame, including the angle brackets.
    pub fn encode(&self) -> String {
        format!("<{self}>")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Command::Move { left, right } => write!(f, "{name}:{left}:{right}"),
            Command::Spray { tank, duration_ms } => write!(f, "{name}:{tank}:{duration_ms}"),
            Command::Pump { tank, on } => write!(f, "{name}:{tank}:{}", u8::from(*on)),
            Command::Pan(a) | Command::Tilt(a) | Command::Pipe(a) => write!(f, "{name}:{a}"),
            Command::Indicate(i) => write!(f, "{name}:{}", i.as_str()),
            _ => f.write_str(name),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledgement; carries the command name with the `_OK` suffix removed.
    Ack(String),
    Error(String),
    /// Sensor report as raw `key → value` text.
    Data(BTreeMap<String, String>),
    Ready,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not enclosed in '<' '>': {0:?}")]
    Unframed(String),

    #[error("unrecognised frame tag '{0}'")]
    UnknownTag(String),

    #[error("malformed {tag} frame: {details}")]
    Malformed { tag: &'static str, details: String },
}

/// Decode one inbound frame.  Leading line noise before the first `<` is
/// discarded.
pub fn decode(raw: &str) -> Result<Reply, FrameError> {
    let trimmed = raw.trim();
    let start = trimmed
        .find('<')
        .ok_or_else(|| FrameError::Unframed(trimmed.to_string()))?;
    let frame = &trimmed[start..];
    let content = frame
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| FrameError::Unframed(frame.to_string()))?;

    let (tag, rest) = match content.split_once(':') {
        Some((tag, rest)) => (tag, Some(rest)),
        None => (content, None),
    };

    match (tag, rest) {
        ("ACK", Some(body)) => body
            .strip_suffix("_OK")
            .filter(|name| !name.is_empty())
            .map(|name| Reply::Ack(name.to_string()))
            .ok_or_else(|| FrameError::Malformed {
                tag: "ACK",
                details: format!("expected NAME_OK, got {body:?}"),
            }),
        ("ERROR", Some(reason)) => Ok(Reply::Error(reason.to_string())),
        ("ERROR", None) => Ok(Reply::Error(String::new())),
        ("DATA", Some(body)) => decode_sensors(body).map(Reply::Data),
        (tag, None) if tag.eq_ignore_ascii_case("READY") => Ok(Reply::Ready),
        (tag, _) => Err(FrameError::UnknownTag(tag.to_string())),
    }
}

fn decode_sensors(body: &str) -> Result<BTreeMap<String, String>, FrameError> {
    let pairs = body.strip_prefix("SENSORS:").ok_or_else(|| FrameError::Malformed {
        tag: "DATA",
        details: format!("expected SENSORS payload, got {body:?}"),
    })?;
    let mut map = BTreeMap::new();
    for item in pairs.split(',').filter(|s| !s.is_empty()) {
        let (key, value) = item.split_once(':').ok_or_else(|| FrameError::Malformed {
            tag: "DATA",
            details: format!("expected key:value, got {item:?}"),
        })?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_commands_bit_exact() {
        assert_eq!(Command::Move { left: -120, right: 255 }.encode(), "<MOVE:-120:255>");
        assert_eq!(Command::Spray { tank: 2, duration_ms: 1500 }.encode(), "<SPRAY:2:1500>");
        assert_eq!(Command::Pump { tank: 3, on: true }.encode(), "<PUMP:3:1>");
        assert_eq!(Command::Pump { tank: 3, on: false }.encode(), "<PUMP:3:0>");
        assert_eq!(Command::Tilt(75).encode(), "<TILT:75>");
        assert_eq!(Command::Indicate(Indication::Working).encode(), "<INDICATE:working>");
        assert_eq!(Command::StopNano.encode(), "<STOP_NANO>");
        assert_eq!(Command::GetData.encode(), "<get_data>");
        assert_eq!(Command::ResetEncoder.encode(), "<RESET_ENCODER>");
    }

    #[test]
    fn decodes_ack_and_error() {
        assert_eq!(decode("<ACK:MOVE_OK>"), Ok(Reply::Ack("MOVE".into())));
        assert_eq!(decode("<ACK:STOP_NANO_OK>"), Ok(Reply::Ack("STOP_NANO".into())));
        assert_eq!(decode("<ERROR:bad_tank>"), Ok(Reply::Error("bad_tank".into())));
    }

    #[test]
    fn decodes_sensor_report() {
        let Reply::Data(map) = decode("<DATA:SENSORS:F:42.5,S:18,E:120>").unwrap() else {
            panic!("expected data");
        };
        assert_eq!(map["F"], "42.5");
        assert_eq!(map["S"], "18");
        assert_eq!(map["E"], "120");
    }

    #[test]
    fn discards_leading_noise_and_accepts_banner() {
        assert_eq!(decode("\r\n\x00<ACK:PAN_OK>"), Ok(Reply::Ack("PAN".into())));
        assert_eq!(decode("<READY>"), Ok(Reply::Ready));
        assert_eq!(decode("<ready>"), Ok(Reply::Ready));
    }

    #[test]
    fn fails_closed_on_unknown_or_malformed() {
        assert_eq!(decode("<HELLO:1>"), Err(FrameError::UnknownTag("HELLO".into())));
        assert!(matches!(decode("<ACK:MOVE>"), Err(FrameError::Malformed { tag: "ACK", .. })));
        assert!(matches!(decode("<DATA:OTHER:1>"), Err(FrameError::Malformed { .. })));
        assert!(matches!(decode("<DATA:SENSORS:F>"), Err(FrameError::Malformed { .. })));
        assert!(matches!(decode("ACK:MOVE_OK"), Err(FrameError::Unframed(_))));
        assert!(matches!(decode("<ACK:MOVE_OK"), Err(FrameError::Unframed(_))));
    }

    #[test]
    fn endpoint_timed_commands_get_longer_ack_window() {
        assert_eq!(
            Command::Spray { tank: 1, duration_ms: 4000 }.ack_allowance(),
            Duration::from_millis(4000)
        );
        assert_eq!(Command::Stop.ack_allowance(), Duration::ZERO);
    }

    #[test]
    fn motion_classification() {
        assert!(Command::Move { left: 0, right: 0 }.is_motion());
        assert!(Command::Pump { tank: 1, on: true }.is_motion());
        assert!(!Command::Pump { tank: 1, on: false }.is_motion());
        assert!(!Command::Stop.is_motion());
        assert!(!Command::Tilt(90).is_motion());
    }
}

pub mod classifier;
pub mod payload;

pub use classifier::{LineEvent, Markers, classify};
pub use payload::{DecodeError, DevAddr, decode_identity};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SERIAL_PREFIX: &str = "SERIAL [";
pub const MQTT_PREFIX: &str = "MQTT [";

const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Which half of the capture process wrote a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Device-local clock (serial console).
    Serial,
    /// Network-local clock (message bus).
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LineError {
    #[error("unknown line prefix")]
    UnknownPrefix,
    #[error("missing closing bracket after timestamp")]
    UnterminatedBracket,
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Splits `SERIAL [ts] ...` / `MQTT [ts] ...` into its channel and timestamp.
pub fn parse_prefix(line: &str) -> Result<(Channel, NaiveDateTime), LineError> {
    let (channel, rest) = if let Some(rest) = line.strip_prefix(SERIAL_PREFIX) {
        (Channel::Serial, rest)
    } else if let Some(rest) = line.strip_prefix(MQTT_PREFIX) {
        (Channel::Mqtt, rest)
    } else {
        return Err(LineError::UnknownPrefix);
    };

    let end = rest.find(']').ok_or(LineError::UnterminatedBracket)?;
    let raw = rest[..end].trim();

    let timestamp = parse_timestamp(raw)
        .ok_or_else(|| LineError::InvalidTimestamp(raw.to_string()))?;

    Ok((channel, timestamp))
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_PARSE_FORMAT).ok()
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_DISPLAY_FORMAT).to_string()
}

/// Signed elapsed time from `start` to `end` in milliseconds.
pub fn elapsed_millis(start: &NaiveDateTime, end: &NaiveDateTime) -> i64 {
    (*end - *start).num_milliseconds()
}

/// Serde adapter writing timestamps the way the capture log prints them.
pub mod timestamp_format {
    use super::{format_timestamp, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub mod option {
        use super::super::{format_timestamp, parse_timestamp};
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<NaiveDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_str(&format_timestamp(ts)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            // The legacy analysis dumps wrote the literal string "null"
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(raw) if raw == "null" => Ok(None),
                Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp '{}'", raw))
                }),
            }
        }
    }
}

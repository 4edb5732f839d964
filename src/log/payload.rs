use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Byte range of the device address inside a downlink PHY payload (after the MHDR byte).
const DEV_ADDR_RANGE: std::ops::Range<usize> = 1..5;

/// Device address as it appears on the air: four raw bytes, no endianness applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevAddr([u8; 4]);

impl DevAddr {
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device address must be 8 hex digits, got '{0}'")]
pub struct InvalidDevAddr(String);

impl FromStr for DevAddr {
    type Err = InvalidDevAddr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| InvalidDevAddr(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for DevAddr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DevAddr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("malformed JSON body: {0}")]
    Json(String),
    #[error("missing field {0}")]
    MissingField(String),
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("payload too short for device address ({len} bytes)")]
    TooShort { len: usize },
}

/// Pulls the device address out of a downlink message body shaped like
/// `{"items":[{"phyPayload":"<base64>"}]}`.
pub fn decode_identity(body: &str) -> Result<DevAddr, DecodeError> {
    let json: Value = serde_json::from_str(body).map_err(|e| DecodeError::Json(e.to_string()))?;

    let encoded = json
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("phyPayload"))
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::MissingField("items[0].phyPayload".to_string()))?;

    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let slice = raw
        .get(DEV_ADDR_RANGE)
        .ok_or(DecodeError::TooShort { len: raw.len() })?;

    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(slice);
    Ok(DevAddr(bytes))
}

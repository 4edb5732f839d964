use super::{LineError, parse_prefix};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Fixed strings that identify the interesting lines of a capture log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    /// Written by the device once its MAC configuration is applied.
    pub session: String,
    /// Device-side uplink transmission; the label follows the marker.
    pub uplink_send: String,
    /// Uplink event topic of the tracked device on the message bus.
    pub gateway_topic: String,
    /// Downlink command publication; the JSON body follows the marker.
    pub downlink: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            session: "MAC scheme set to".to_string(),
            uplink_send: "[LoRaWAN] Sending uplink packet ||".to_string(),
            gateway_topic:
                "application/46f95f5e-fb72-4178-9652-e5976b974ea2/device/70b3d57ed005e1a1/event/up"
                    .to_string(),
            downlink: "command/down || MESSAGE:".to_string(),
        }
    }
}

impl Markers {
    pub fn is_session_marker(&self, line: &str) -> bool {
        line.contains(&self.session)
    }

    pub fn is_uplink_send(&self, line: &str) -> bool {
        line.contains(&self.uplink_send)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent<'a> {
    SessionMarker,
    UplinkSend {
        timestamp: NaiveDateTime,
        message: &'a str,
    },
    GatewayReceive {
        timestamp: NaiveDateTime,
    },
    Downlink {
        timestamp: NaiveDateTime,
        body: &'a str,
    },
    /// Anything else. `note` is set when a marker matched but the prefix could not be read.
    Unclassified {
        note: Option<LineError>,
    },
}

impl LineEvent<'_> {
    pub fn is_uplink_send(&self) -> bool {
        matches!(self, LineEvent::UplinkSend { .. })
    }
}

pub fn classify<'a>(line: &'a str, markers: &Markers) -> LineEvent<'a> {
    if markers.is_session_marker(line) {
        return LineEvent::SessionMarker;
    }

    if let Some(pos) = line.find(&markers.uplink_send) {
        let rest = &line[pos + markers.uplink_send.len()..];
        let message = rest.split("||").next().unwrap_or_default().trim();
        return match parse_prefix(line) {
            Ok((_, timestamp)) => LineEvent::UplinkSend { timestamp, message },
            Err(e) => LineEvent::Unclassified { note: Some(e) },
        };
    }

    if let Some(pos) = line.find(&markers.downlink) {
        let body = line[pos + markers.downlink.len()..].trim();
        return match parse_prefix(line) {
            Ok((_, timestamp)) => LineEvent::Downlink { timestamp, body },
            Err(e) => LineEvent::Unclassified { note: Some(e) },
        };
    }

    if line.contains(&markers.gateway_topic) {
        return match parse_prefix(line) {
            Ok((_, timestamp)) => LineEvent::GatewayReceive { timestamp },
            Err(e) => LineEvent::Unclassified { note: Some(e) },
        };
    }

    LineEvent::Unclassified { note: None }
}

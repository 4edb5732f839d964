use crate::log::{LineError, DecodeError, elapsed_millis, timestamp_format};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One uplink transmission and whatever the network side observed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketRecord {
    pub message: String,
    #[serde(with = "timestamp_format")]
    pub send_timestamp: NaiveDateTime,
    #[serde(default, with = "timestamp_format::option")]
    pub gateway_timestamp: Option<NaiveDateTime>,
    #[serde(default, with = "timestamp_format::option")]
    pub ack_timestamp: Option<NaiveDateTime>,
}

impl PacketRecord {
    pub fn new(message: impl Into<String>, send_timestamp: NaiveDateTime) -> Self {
        Self {
            message: message.into(),
            send_timestamp,
            gateway_timestamp: None,
            ack_timestamp: None,
        }
    }

    pub fn reached_gateway(&self) -> bool {
        self.gateway_timestamp.is_some()
    }

    pub fn is_acked(&self) -> bool {
        self.gateway_timestamp.is_some() && self.ack_timestamp.is_some()
    }

    /// Round trip from device transmission to the matching downlink.
    pub fn ack_delay_millis(&self) -> Option<i64> {
        self.gateway_timestamp?;
        let ack = self.ack_timestamp?;
        Some(elapsed_millis(&self.send_timestamp, &ack))
    }

    pub fn uplink_delay_millis(&self) -> Option<i64> {
        let gw = self.gateway_timestamp?;
        Some(elapsed_millis(&self.send_timestamp, &gw))
    }

    pub fn downlink_delay_millis(&self) -> Option<i64> {
        let gw = self.gateway_timestamp?;
        let ack = self.ack_timestamp?;
        Some(elapsed_millis(&gw, &ack))
    }

    /// Checks `send <= gateway <= ack` over whichever timestamps are present.
    pub fn causality_violation(&self) -> Option<CausalityViolation> {
        if let Some(ms) = self.uplink_delay_millis().filter(|ms| *ms < 0) {
            return Some(CausalityViolation::GatewayBeforeSend { by_ms: -ms });
        }
        if let Some(ms) = self.downlink_delay_millis().filter(|ms| *ms < 0) {
            return Some(CausalityViolation::AckBeforeGateway { by_ms: -ms });
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalityViolation {
    GatewayBeforeSend { by_ms: i64 },
    AckBeforeGateway { by_ms: i64 },
}

/// Non-fatal finding attached to a 1-based line of the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: usize,
    pub kind: DiagnosticKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedLine(LineError),
    PayloadDecode(DecodeError),
    Causality {
        message: String,
        violation: CausalityViolation,
    },
    /// A downlink for the target arrived inside a window before the uplink reached the gateway.
    UnattributedAck {
        message: String,
    },
}

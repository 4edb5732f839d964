use super::record::{Diagnostic, DiagnosticKind, PacketRecord};
use crate::log::{DecodeError, DevAddr, LineEvent, Markers, classify, decode_identity};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Counters for lines the correlator saw but did not attribute to a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub lines_scanned: usize,
    /// Gateway arrivals after the first one in the same window.
    pub duplicate_gateway: usize,
    /// Matching downlinks after the first one in the same window.
    pub duplicate_acks: usize,
    /// Downlinks addressed to some other device.
    pub foreign_downlinks: usize,
    /// Downlinks seen before the window's uplink reached the network. Ones addressed
    /// to the target also produce an `UnattributedAck` diagnostic.
    pub early_downlinks: usize,
}

#[derive(Debug)]
enum ScanState {
    SeekingSend,
    InPacketWindow {
        record: PacketRecord,
        opened_at: usize,
    },
}

/// Groups lines into per-packet windows. Feed lines in file order, then call `finish`.
#[derive(Debug)]
pub struct Correlator<'m> {
    markers: &'m Markers,
    target: DevAddr,
    state: ScanState,
    records: Vec<PacketRecord>,
    diagnostics: Vec<Diagnostic>,
    stats: ScanStats,
}

impl<'m> Correlator<'m> {
    pub fn new(markers: &'m Markers, target: DevAddr) -> Self {
        Self {
            markers,
            target,
            state: ScanState::SeekingSend,
            records: Vec::new(),
            diagnostics: Vec::new(),
            stats: ScanStats::default(),
        }
    }

    /// `line_no` is 1-based and only used for diagnostics.
    pub fn feed(&mut self, line_no: usize, line: &str) {
        self.stats.lines_scanned += 1;

        let event = classify(line, self.markers);
        if let LineEvent::Unclassified { note: Some(err) } = &event {
            debug!("line {}: unreadable marker line: {}", line_no, err);
            self.diagnostics.push(Diagnostic {
                line: line_no,
                kind: DiagnosticKind::MalformedLine(err.clone()),
            });
        }

        let state = std::mem::replace(&mut self.state, ScanState::SeekingSend);
        self.state = self.transition(state, line_no, event);
    }

    pub fn finish(mut self) -> (Vec<PacketRecord>, Vec<Diagnostic>, ScanStats) {
        if let ScanState::InPacketWindow { record, opened_at } =
            std::mem::replace(&mut self.state, ScanState::SeekingSend)
        {
            self.close(record, opened_at);
        }
        (self.records, self.diagnostics, self.stats)
    }

    fn transition(&mut self, state: ScanState, line_no: usize, event: LineEvent<'_>) -> ScanState {
        match (state, event) {
            (ScanState::SeekingSend, LineEvent::UplinkSend { timestamp, message }) => {
                ScanState::InPacketWindow {
                    record: PacketRecord::new(message, timestamp),
                    opened_at: line_no,
                }
            }
            (ScanState::SeekingSend, _) => ScanState::SeekingSend,

            // The next send closes this window and opens its own from the same line
            (ScanState::InPacketWindow { record, opened_at }, event) if event.is_uplink_send() => {
                self.close(record, opened_at);
                self.transition(ScanState::SeekingSend, line_no, event)
            }
            (ScanState::InPacketWindow { mut record, opened_at }, event) => {
                self.observe(&mut record, line_no, event);
                ScanState::InPacketWindow { record, opened_at }
            }
        }
    }

    fn observe(&mut self, record: &mut PacketRecord, line_no: usize, event: LineEvent<'_>) {
        match event {
            LineEvent::GatewayReceive { timestamp } => {
                if record.gateway_timestamp.is_none() {
                    record.gateway_timestamp = Some(timestamp);
                } else {
                    debug!("line {}: duplicate gateway arrival for '{}'", line_no, record.message);
                    self.stats.duplicate_gateway += 1;
                }
            }
            LineEvent::Downlink { timestamp, body } => {
                let identity = decode_identity(body);

                if record.gateway_timestamp.is_none() {
                    self.stats.early_downlinks += 1;
                    match identity {
                        Ok(addr) if addr == self.target => {
                            debug!("line {}: ACK for '{}' before any gateway arrival", line_no, record.message);
                            self.diagnostics.push(Diagnostic {
                                line: line_no,
                                kind: DiagnosticKind::UnattributedAck {
                                    message: record.message.clone(),
                                },
                            });
                        }
                        Ok(_) => {}
                        Err(e) => self.decode_failed(line_no, e),
                    }
                    return;
                }

                match identity {
                    Ok(addr) if addr == self.target => {
                        if record.ack_timestamp.is_none() {
                            record.ack_timestamp = Some(timestamp);
                        } else {
                            debug!("line {}: duplicate ACK for '{}'", line_no, record.message);
                            self.stats.duplicate_acks += 1;
                        }
                    }
                    Ok(addr) => {
                        debug!("line {}: downlink for {} ignored", line_no, addr);
                        self.stats.foreign_downlinks += 1;
                    }
                    Err(e) => self.decode_failed(line_no, e),
                }
            }
            _ => {}
        }
    }

    fn decode_failed(&mut self, line_no: usize, err: DecodeError) {
        warn!("line {}: error processing downlink payload: {}", line_no, err);
        self.diagnostics.push(Diagnostic {
            line: line_no,
            kind: DiagnosticKind::PayloadDecode(err),
        });
    }

    fn close(&mut self, record: PacketRecord, opened_at: usize) {
        if let Some(violation) = record.causality_violation() {
            warn!(
                "line {}: packet '{}' breaks send <= gateway <= ack ({:?})",
                opened_at, record.message, violation
            );
            self.diagnostics.push(Diagnostic {
                line: opened_at,
                kind: DiagnosticKind::Causality {
                    message: record.message.clone(),
                    violation,
                },
            });
        }
        self.records.push(record);
    }
}

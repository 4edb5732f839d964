use super::{DelayStats, Histogram, HistogramConfig, collect_samples};
use crate::correlation::{Correlation, DiagnosticKind, PacketRecord, ScanStats};
use crate::log::DevAddr;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub source: String,
    pub target: DevAddr,
    pub total_packets: usize,
    pub reached_gateway: usize,
    pub acked: usize,
    /// Share of packets never seen on the uplink topic.
    pub uplink_loss_rate: f64,
    /// Share of packets without an attributed ACK.
    pub ack_loss_rate: f64,
    pub ack_delay: Option<DelayStats>,
    pub uplink_delay: Option<DelayStats>,
    pub downlink_delay: Option<DelayStats>,
    pub histogram: Histogram,
    pub causality_violations: usize,
    pub decode_failures: usize,
    pub malformed_lines: usize,
    #[serde(default)]
    pub unattributed_acks: usize,
    pub scan: ScanStats,
}

pub fn analyze(
    source: &str,
    target: DevAddr,
    correlation: &Correlation,
    histogram: &HistogramConfig,
) -> AnalysisReport {
    let records = &correlation.records;
    let total = records.len();
    let reached = records.iter().filter(|r| r.reached_gateway()).count();
    let acked = records.iter().filter(|r| r.is_acked()).count();

    let samples = collect_samples(records);
    let ack_millis: Vec<i64> = samples.iter().map(|s| s.millis).collect();

    let (mut causality, mut decode, mut malformed, mut unattributed) = (0, 0, 0, 0);
    for diag in &correlation.diagnostics {
        match diag.kind {
            DiagnosticKind::Causality { .. } => causality += 1,
            DiagnosticKind::PayloadDecode(_) => decode += 1,
            DiagnosticKind::MalformedLine(_) => malformed += 1,
            DiagnosticKind::UnattributedAck { .. } => unattributed += 1,
        }
    }

    AnalysisReport {
        source: source.to_string(),
        target,
        total_packets: total,
        reached_gateway: reached,
        acked,
        uplink_loss_rate: loss_rate(total, reached),
        ack_loss_rate: loss_rate(total, acked),
        ack_delay: DelayStats::from_millis(&ack_millis),
        uplink_delay: leg_stats(records, PacketRecord::uplink_delay_millis),
        downlink_delay: leg_stats(records, PacketRecord::downlink_delay_millis),
        histogram: Histogram::build(&samples, histogram),
        causality_violations: causality,
        decode_failures: decode,
        malformed_lines: malformed,
        unattributed_acks: unattributed,
        scan: correlation.stats.clone(),
    }
}

fn loss_rate(total: usize, delivered: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (total - delivered) as f64 / total as f64
    }
}

fn leg_stats(records: &[PacketRecord], leg: fn(&PacketRecord) -> Option<i64>) -> Option<DelayStats> {
    let millis: Vec<i64> = records.iter().filter_map(leg).collect();
    DelayStats::from_millis(&millis)
}

pub fn save_report(report: &AnalysisReport, path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

pub fn save_records(records: &[PacketRecord], path: impl AsRef<Path>) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(records)?)?;
    Ok(())
}

pub fn load_reports(path: impl AsRef<Path>) -> Result<Vec<AnalysisReport>> {
    let content = std::fs::read_to_string(path)?;
    if content.trim_start().starts_with('[') {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(vec![serde_json::from_str(&content)?])
    }
}

/// Files written by `Analysis::save_results` and `compare`.
pub fn is_saved_report(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("_analysis.json") || (n.starts_with("comparison_") && n.ends_with(".json")))
}

/// Loads every saved report in `dir`, in file name order. Files that fail to parse are skipped.
pub fn load_saved_reports(dir: impl AsRef<Path>) -> Result<Vec<AnalysisReport>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_saved_report(path))
        .collect();
    files.sort();

    let mut reports = Vec::new();
    for file in files {
        match load_reports(&file) {
            Ok(loaded) => {
                debug!("{}: {} reports", file.display(), loaded.len());
                reports.extend(loaded);
            }
            Err(e) => warn!("Skipping {}: {:#}", file.display(), e),
        }
    }
    Ok(reports)
}

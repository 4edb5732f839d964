pub mod correlator;
pub mod record;
pub mod session;

pub use correlator::{Correlator, ScanStats};
pub use record::{CausalityViolation, Diagnostic, DiagnosticKind, PacketRecord};
pub use session::locate_session_start;

use crate::log::{DevAddr, Markers};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of one engine run over a closed log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    /// 0-based index of the first line after the last session marker.
    pub session_start: Option<usize>,
    pub records: Vec<PacketRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ScanStats,
}

impl Correlation {
    pub fn has_session(&self) -> bool {
        self.session_start.is_some()
    }
}

pub fn correlate_lines<S: AsRef<str>>(lines: &[S], markers: &Markers, target: DevAddr) -> Correlation {
    let Some(start) = locate_session_start(lines, markers) else {
        warn!("No '{}' line found, nothing to correlate", markers.session);
        return Correlation::default();
    };
    debug!("Session starts at line {}", start + 1);

    let mut correlator = Correlator::new(markers, target);
    for (idx, line) in lines.iter().enumerate().skip(start) {
        correlator.feed(idx + 1, line.as_ref());
    }

    let (records, diagnostics, stats) = correlator.finish();
    Correlation {
        session_start: Some(start),
        records,
        diagnostics,
        stats,
    }
}

pub fn correlate_str(text: &str, markers: &Markers, target: DevAddr) -> Correlation {
    let lines: Vec<&str> = text.lines().collect();
    correlate_lines(&lines, markers, target)
}

/// Reads the whole capture log and correlates it. Only an unreadable file is an error.
pub fn correlate_file(path: impl AsRef<Path>, markers: &Markers, target: DevAddr) -> Result<Correlation> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read log file {}", path.display()))?;

    // The bus half of the capture decodes with errors ignored, so stray bytes are expected
    let text = String::from_utf8_lossy(&bytes);

    let correlation = correlate_str(&text, markers, target);
    info!(
        "{}: {} packets, {} diagnostics",
        path.display(),
        correlation.records.len(),
        correlation.diagnostics.len()
    );
    Ok(correlation)
}

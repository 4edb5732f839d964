pub mod config;
pub use config::{AnalysisConfig, ConfigError};

use crate::correlation::{Correlation, correlate_file};
use crate::log::DevAddr;
use crate::metrics::analyzer::{self, AnalysisReport};
use crate::metrics::logger::{RecordLogger, export_histogram};
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct AnalysisOutcome {
    pub correlation: Correlation,
    pub report: AnalysisReport,
}

/// One configured engine, reusable across any number of log files.
pub struct Analysis {
    config: AnalysisConfig,
    target: DevAddr,
}

impl Analysis {
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        let target = config.validate()?;
        Ok(Self { config, target })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn target(&self) -> DevAddr {
        self.target
    }

    pub fn run(&self, log: &Path) -> Result<AnalysisOutcome> {
        info!("Analyzing {} for device {}", log.display(), self.target);

        let correlation = correlate_file(log, &self.config.markers, self.target)?;
        let report = analyzer::analyze(
            &log.display().to_string(),
            self.target,
            &correlation,
            &self.config.histogram,
        );

        Ok(AnalysisOutcome { correlation, report })
    }

    /// Writes records (JSON + CSV), the histogram CSV and the report JSON.
    /// Returns the paths written.
    pub fn save_results(&self, log: &Path, outcome: &AnalysisOutcome) -> Result<Vec<PathBuf>> {
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir)?;

        let base = claim_base(dir, log)?;
        let path = |suffix: &str| PathBuf::from(format!("{}_{}", base.display(), suffix));

        let records_json = path("records.json");
        analyzer::save_records(&outcome.correlation.records, &records_json)?;
        info!("Records saved to: {}", records_json.display());

        let records_csv = path("records.csv");
        let mut logger = RecordLogger::new(&records_csv)?;
        logger.log_batch(&outcome.correlation.records)?;
        info!("Records CSV saved to: {}", records_csv.display());

        let histogram_csv = path("histogram.csv");
        export_histogram(&outcome.report.histogram, &histogram_csv)?;
        info!("Histogram saved to: {}", histogram_csv.display());

        let report_json = path("analysis.json");
        analyzer::save_report(&outcome.report, &report_json)?;
        info!("Analysis saved to: {}", report_json.display());

        Ok(vec![records_json, records_csv, histogram_csv, report_json])
    }
}

// Same-named logs from sibling folders are common, so the parent folder is part of the name
fn output_stem(log: &Path) -> String {
    let stem = log
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    match log.parent().and_then(|p| p.file_name()) {
        Some(parent) => format!("{}-{}", parent.to_string_lossy(), stem),
        None => stem,
    }
}

/// Picks `<dir>/<stem>_<timestamp>` and reserves it by creating its `_analysis.json`.
/// A name already taken, by an earlier run or a parallel one, gets `_2`, `_3`, ... appended.
fn claim_base(dir: &Path, log: &Path) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let name = format!("{}_{}", output_stem(log), timestamp);

    let mut attempt = 1;
    loop {
        let base = if attempt == 1 {
            dir.join(&name)
        } else {
            dir.join(format!("{}_{}", name, attempt))
        };
        let marker = PathBuf::from(format!("{}_analysis.json", base.display()));
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => return Ok(base),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} exists, trying the next suffix", marker.display());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", marker.display()));
            }
        }
        attempt += 1;
    }
}

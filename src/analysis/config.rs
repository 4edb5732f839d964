use crate::log::{DevAddr, Markers};
use crate::metrics::HistogramConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_HISTOGRAM_BUCKETS: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no target device address given (use --dev-addr or `target` in the config file)")]
    MissingTarget,
    #[error("invalid histogram settings: {0}")]
    InvalidHistogram(String),
    #[error("marker `{0}` must not be empty")]
    EmptyMarker(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub target: Option<DevAddr>,
    pub markers: Markers,
    pub histogram: HistogramConfig,
    pub output_dir: PathBuf,
    /// Write records/report files next to the terminal summary.
    pub export: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target: None,
            markers: Markers::default(),
            histogram: HistogramConfig::default(),
            output_dir: PathBuf::from("results"),
            export: true,
        }
    }
}

impl AnalysisConfig {
    /// Reads a TOML file; keys that are left out keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn with_target(mut self, target: DevAddr) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_markers(mut self, markers: Markers) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_bucket_width(mut self, seconds: f64) -> Self {
        self.histogram.bucket_width = seconds;
        self
    }

    pub fn with_range_end(mut self, seconds: f64) -> Self {
        self.histogram.range_end = seconds;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Checks the settings and returns the target the engine will match against.
    pub fn validate(&self) -> Result<DevAddr, ConfigError> {
        let target = self.target.ok_or(ConfigError::MissingTarget)?;

        let h = &self.histogram;
        for (name, value) in [
            ("bucket width", h.bucket_width),
            ("range start", h.range_start),
            ("range end", h.range_end),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidHistogram(format!("{} must be finite, got {}", name, value)));
            }
        }
        if !(h.bucket_width >= 0.001) {
            return Err(ConfigError::InvalidHistogram(format!(
                "bucket width must be at least 0.001 s, got {}",
                h.bucket_width
            )));
        }
        if !(h.range_end > h.range_start) {
            return Err(ConfigError::InvalidHistogram(format!(
                "range end {} must be above range start {}",
                h.range_end, h.range_start
            )));
        }
        let buckets = h.bucket_count();
        if buckets == 0 || buckets > MAX_HISTOGRAM_BUCKETS {
            return Err(ConfigError::InvalidHistogram(format!(
                "range yields {} buckets, expected 1 to {}",
                buckets, MAX_HISTOGRAM_BUCKETS
            )));
        }

        let m = &self.markers;
        for (name, value) in [
            ("session", &m.session),
            ("uplink_send", &m.uplink_send),
            ("gateway_topic", &m.gateway_topic),
            ("downlink", &m.downlink),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyMarker(name));
            }
        }

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acktrace.toml");
        std::fs::write(
            &path,
            r#"
target = "C2674523"

[markers]
gateway_topic = "application/x/device/70b3d57ed005e1a2/event/up"

[histogram]
range_end = 2.0
"#,
        )
        .unwrap();

        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config.target.unwrap().to_string(), "c2674523");
        assert_eq!(config.markers.gateway_topic, "application/x/device/70b3d57ed005e1a2/event/up");
        assert_eq!(config.markers.session, Markers::default().session);
        assert_eq!(config.histogram.range_end, 2.0);
        assert_eq!(config.histogram.bucket_width, 0.1);
        assert!(config.export);
    }

    #[test]
    fn test_validate() {
        let config = AnalysisConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::MissingTarget));

        let target: DevAddr = "c2674523".parse().unwrap();
        let config = AnalysisConfig::default().with_target(target);
        assert_eq!(config.validate(), Ok(target));

        let bad = config.clone().with_bucket_width(0.0);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidHistogram(_))));

        let bad = config.clone().with_range_end(-1.0);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidHistogram(_))));

        let bad = config.clone().with_bucket_width(0.001).with_range_end(1e13);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidHistogram(_))));

        let bad = config.clone().with_range_end(f64::INFINITY);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidHistogram(_))));

        let bad = config.clone().with_bucket_width(f64::NAN);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidHistogram(_))));

        let bad = config.clone().with_bucket_width(1e-300);
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidHistogram(_))));

        // 1 ms buckets over 100 s is right at the limit
        let edge = config.clone().with_bucket_width(0.001).with_range_end(100.0);
        assert_eq!(edge.validate(), Ok(target));

        let mut markers = Markers::default();
        markers.downlink = "  ".into();
        let bad = config.with_markers(markers);
        assert_eq!(bad.validate(), Err(ConfigError::EmptyMarker("downlink")));
    }
}

pub mod analyzer;
pub mod logger;

use crate::correlation::PacketRecord;
use serde::{Deserialize, Serialize};

/// ACK round trip of one fully matched packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaySample {
    pub message: String,
    pub millis: i64,
}

impl DelaySample {
    pub fn seconds(&self) -> f64 {
        self.millis as f64 / 1000.0
    }
}

/// Samples for records carrying both a gateway and an ACK timestamp, in record order.
pub fn collect_samples(records: &[PacketRecord]) -> Vec<DelaySample> {
    records
        .iter()
        .filter_map(|r| {
            r.ack_delay_millis().map(|millis| DelaySample {
                message: r.message.clone(),
                millis,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// Seconds per bucket.
    pub bucket_width: f64,
    pub range_start: f64,
    pub range_end: f64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bucket_width: 0.1,
            range_start: 0.0,
            range_end: 3.0,
        }
    }
}

impl HistogramConfig {
    /// Buckets `Histogram::build` will allocate for this range.
    pub fn bucket_count(&self) -> u64 {
        let (width, start, end) = self.millis();
        (end.saturating_sub(start) as u64).div_ceil(width as u64)
    }

    // Samples have millisecond resolution, so bucketing is done on integer millis
    fn millis(&self) -> (i64, i64, i64) {
        let width = ((self.bucket_width * 1000.0).round() as i64).max(1);
        let start = (self.range_start * 1000.0).round() as i64;
        let end = (self.range_end * 1000.0).round() as i64;
        (width, start, end.max(start.saturating_add(width)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Fixed-width frequency view of the delay samples.
///
/// Samples outside `[range_start, range_end]` are not clipped into the edge buckets;
/// they are counted in `below_range` / `above_range` and in `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub buckets: Vec<Bucket>,
    pub below_range: usize,
    pub above_range: usize,
    pub total: usize,
}

impl Histogram {
    pub fn build(samples: &[DelaySample], config: &HistogramConfig) -> Self {
        let (width, start, end) = config.millis();
        let n = config.bucket_count() as i64;

        let mut buckets: Vec<Bucket> = (0..n)
            .map(|i| Bucket {
                lower: (start + i * width) as f64 / 1000.0,
                upper: (start + (i + 1) * width).min(end) as f64 / 1000.0,
                count: 0,
            })
            .collect();

        let mut below_range = 0;
        let mut above_range = 0;

        for sample in samples {
            let ms = sample.millis;
            if ms < start {
                below_range += 1;
            } else if ms > end {
                above_range += 1;
            } else {
                // The range end itself belongs to the last bucket
                let idx = (((ms - start) / width) as usize).min(buckets.len() - 1);
                buckets[idx].count += 1;
            }
        }

        Self {
            buckets,
            below_range,
            above_range,
            total: samples.len(),
        }
    }

    pub fn in_range(&self) -> usize {
        self.total - self.below_range - self.above_range
    }

    pub fn peak(&self) -> usize {
        self.buckets.iter().map(|b| b.count).max().unwrap_or(0)
    }
}

/// Order statistics of a set of delays, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    /// Population standard deviation.
    pub jitter: f64,
}

impl DelayStats {
    pub fn from_millis(values: &[i64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_unstable();

        let secs = |ms: i64| ms as f64 / 1000.0;
        let n = sorted.len() as f64;
        let mean = sorted.iter().map(|&ms| secs(ms)).sum::<f64>() / n;
        let variance = sorted
            .iter()
            .map(|&ms| (secs(ms) - mean).powi(2))
            .sum::<f64>()
            / n;

        Some(Self {
            count: sorted.len(),
            min: secs(sorted[0]),
            max: secs(sorted[sorted.len() - 1]),
            mean,
            median: percentile(&sorted, 0.5),
            p95: percentile(&sorted, 0.95),
            jitter: variance.sqrt(),
        })
    }
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn percentile(sorted: &[i64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    (sorted[lo] as f64 + (sorted[hi] - sorted[lo]) as f64 * frac) / 1000.0
}

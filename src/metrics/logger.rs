use super::Histogram;
use crate::correlation::PacketRecord;
use anyhow::Result;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Writes packet records as CSV; absent timestamps become empty cells.
pub struct RecordLogger {
    writer: Writer<File>,
}

impl RecordLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::from_path(path)?;
        Ok(Self { writer })
    }

    pub fn log_batch(&mut self, records: &[PacketRecord]) -> Result<()> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct BucketRow {
    lower_s: f64,
    upper_s: f64,
    count: usize,
}

pub fn export_histogram(histogram: &Histogram, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    for bucket in &histogram.buckets {
        writer.serialize(BucketRow {
            lower_s: bucket.lower,
            upper_s: bucket.upper,
            count: bucket.count,
        })?;
    }
    writer.flush()?;
    Ok(())
}

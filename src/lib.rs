pub mod log;
pub mod correlation;
pub mod metrics;
pub mod analysis;

pub use analysis::{Analysis, AnalysisConfig};
pub use correlation::{Correlation, PacketRecord, correlate_file, correlate_lines};
pub use log::DevAddr;

pub mod prelude {
    pub use crate::analysis::{Analysis, AnalysisConfig, AnalysisOutcome};
    pub use crate::correlation::{Correlation, Diagnostic, PacketRecord, correlate_file, correlate_lines, correlate_str};
    pub use crate::log::{DevAddr, Markers};
    pub use crate::metrics::{DelaySample, Histogram, HistogramConfig, collect_samples};
    pub use crate::metrics::analyzer::AnalysisReport;
}

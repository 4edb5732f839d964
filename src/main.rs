//  acktrace: ACK round-trip latency from merged serial + MQTT capture logs.

// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use acktrace::prelude::*;
use acktrace::correlation::DiagnosticKind;
use acktrace::metrics::analyzer;

use clap::{Args, Parser, Subcommand};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const HISTOGRAM_BAR_WIDTH: usize = 40;
const LOG_COLUMN_WIDTH: usize = 26;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Device address to match in downlink payloads (8 hex digits)
    #[arg(short = 'a', long)]
    dev_addr: Option<DevAddr>,
    /// TOML file with markers, target and histogram settings
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Histogram bucket width in seconds
    #[arg(long)]
    bucket_width: Option<f64>,
    /// Upper bound of the histogram in seconds
    #[arg(long)]
    range_max: Option<f64>,
    #[arg(long)]
    no_export: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Correlate one capture log and summarise its ACK delays
    Analyze {
        log: PathBuf,
        #[command(flatten)]
        opts: ConfigArgs,
        /// Print every diagnostic instead of a count
        #[arg(long)]
        diagnostics: bool,
    },

    /// Analyse several capture logs in parallel and compare them
    Compare {
        #[arg(required = true)]
        logs: Vec<PathBuf>,
        #[command(flatten)]
        opts: ConfigArgs,
    },

    /// Print a comparison table from saved analysis/comparison JSON files
    Report {
        #[arg(default_value = "results")]
        path: PathBuf,
    },

    /// Show the effective line markers
    Markers {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Analyze { log, opts, diagnostics } => {
            analyze_log(&log, &opts, diagnostics)?;
        }

        Commands::Compare { logs, opts } => {
            compare_logs(&logs, &opts)?;
        }

        Commands::Report { path } => {
            show_saved(&path)?;
        }

        Commands::Markers { config } => {
            let config = match config {
                Some(path) => AnalysisConfig::load(path)?,
                None => AnalysisConfig::default(),
            };
            let m = &config.markers;
            println!("\nLine markers");
            println!("  session       : {}", m.session);
            println!("  uplink send   : {}", m.uplink_send);
            println!("  gateway topic : {}", m.gateway_topic);
            println!("  downlink      : {}", m.downlink);
            match config.target {
                Some(target) => println!("  target        : {}\n", target),
                None => println!("  target        : (not set)\n"),
            }
        }
    }

    info!("Total runtime: {:.2}s", program_start.elapsed().as_secs_f64());

    Ok(())
}

fn build_config(opts: &ConfigArgs) -> Result<AnalysisConfig> {
    let mut config = match &opts.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };

    if let Some(target) = opts.dev_addr {
        config = config.with_target(target);
    }
    if let Some(dir) = &opts.out {
        config = config.with_output_dir(dir);
    }
    if let Some(width) = opts.bucket_width {
        config = config.with_bucket_width(width);
    }
    if let Some(max) = opts.range_max {
        config = config.with_range_end(max);
    }
    if opts.no_export {
        config.export = false;
    }

    Ok(config)
}

fn analyze_log(log: &Path, opts: &ConfigArgs, show_diagnostics: bool) -> Result<()> {
    let analysis = Analysis::new(build_config(opts)?)?;
    let outcome = analysis.run(log)?;

    if !outcome.correlation.has_session() {
        warn!("{}: no completed configuration found, no session to analyse", log.display());
    }

    print_report(&outcome.report);
    print_histogram(&outcome.report.histogram);

    if show_diagnostics {
        print_diagnostics(&outcome.correlation.diagnostics);
    }

    if analysis.config().export {
        analysis.save_results(log, &outcome)?;
    }

    Ok(())
}

fn compare_logs(logs: &[PathBuf], opts: &ConfigArgs) -> Result<()> {
    let analysis = Analysis::new(build_config(opts)?)?;

    info!("acktrace: Comparison of {} logs", logs.len());

    let pb = ProgressBar::new(logs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len} logs {msg}")?
            .progress_chars("█▓░")
    );

    // Every file is an independent engine run
    let results: Vec<(&PathBuf, Result<AnalysisReport>)> = logs
        .par_iter()
        .map(|log| {
            let result = analysis.run(log).and_then(|outcome| {
                if analysis.config().export {
                    analysis.save_results(log, &outcome)?;
                }
                Ok(outcome.report)
            });
            pb.inc(1);
            (log, result)
        })
        .collect();

    pb.finish_with_message("done");

    let mut reports = Vec::new();
    for (log, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => error!("{}: {:#}", log.display(), e),
        }
    }

    if reports.is_empty() {
        anyhow::bail!("None of the logs could be analysed");
    }

    comparison_table(&reports);

    if analysis.config().export {
        let dir = &analysis.config().output_dir;
        std::fs::create_dir_all(dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let comparison_path = dir.join(format!("comparison_{}.json", timestamp));
        std::fs::write(&comparison_path, serde_json::to_string_pretty(&reports)?)?;
        info!("Comparison saved to: {}", comparison_path.display());
    }

    Ok(())
}

fn fmt_secs(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

fn print_report(report: &AnalysisReport) {
    println!("\n{}  (device {})", report.source, report.target);
    println!("  Packets sent       : {}", report.total_packets);
    println!(
        "  Reached gateway    : {} ({:.2}% uplink loss)",
        report.reached_gateway,
        report.uplink_loss_rate * 100.0
    );
    println!(
        "  ACKed              : {} ({:.2}% ACK loss)",
        report.acked,
        report.ack_loss_rate * 100.0
    );

    let ack = report.ack_delay.as_ref();
    println!(
        "  ACK delay (s)      : min {} | mean {} | median {} | p95 {} | max {} | jitter {}",
        fmt_secs(ack.map(|s| s.min)),
        fmt_secs(ack.map(|s| s.mean)),
        fmt_secs(ack.map(|s| s.median)),
        fmt_secs(ack.map(|s| s.p95)),
        fmt_secs(ack.map(|s| s.max)),
        fmt_secs(ack.map(|s| s.jitter)),
    );
    println!(
        "  Uplink / downlink  : mean {} s / mean {} s",
        fmt_secs(report.uplink_delay.as_ref().map(|s| s.mean)),
        fmt_secs(report.downlink_delay.as_ref().map(|s| s.mean)),
    );

    let scan = &report.scan;
    println!(
        "  Ignored            : {} duplicate gateway, {} duplicate ACK, {} foreign, {} early downlinks",
        scan.duplicate_gateway, scan.duplicate_acks, scan.foreign_downlinks, scan.early_downlinks
    );
    println!(
        "  Diagnostics        : {} causality, {} decode, {} malformed, {} unattributed ACK",
        report.causality_violations, report.decode_failures, report.malformed_lines, report.unattributed_acks
    );
}

fn print_histogram(histogram: &Histogram) {
    println!("\nACK delay histogram ({} samples)", histogram.total);

    let peak = histogram.peak().max(1);
    for bucket in &histogram.buckets {
        let len = bucket.count * HISTOGRAM_BAR_WIDTH / peak;
        println!(
            "  {:>5.2}-{:<5.2} | {:<width$} {}",
            bucket.lower,
            bucket.upper,
            "█".repeat(len),
            bucket.count,
            width = HISTOGRAM_BAR_WIDTH
        );
    }

    if histogram.below_range > 0 || histogram.above_range > 0 {
        println!(
            "  outside range: {} below, {} above",
            histogram.below_range, histogram.above_range
        );
    }
    println!();
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        println!("No diagnostics.\n");
        return;
    }

    println!("Diagnostics");
    for diag in diagnostics {
        let text = match &diag.kind {
            DiagnosticKind::MalformedLine(e) => format!("malformed line: {}", e),
            DiagnosticKind::PayloadDecode(e) => format!("payload: {}", e),
            DiagnosticKind::Causality { message, violation } => {
                format!("causality ({}): {:?}", message, violation)
            }
            DiagnosticKind::UnattributedAck { message } => {
                format!("ACK before gateway arrival ({})", message)
            }
        };
        println!("  line {:>6}: {}", diag.line, text);
    }
    println!();
}

fn comparison_table(reports: &[AnalysisReport]) {
    println!("\n╔════════════════════════════╦═════════╦══════════╦══════════╦══════════╦══════════╦══════════╗");
    println!("║ Log                        ║ Packets ║ GW seen  ║ ACKed    ║ Mean     ║ P95      ║ Jitter   ║");
    println!("║                            ║         ║ (%)      ║ (%)      ║ (s)      ║ (s)      ║ (s)      ║");
    println!("╠════════════════════════════╬═════════╬══════════╬══════════╬══════════╬══════════╬══════════╣");

    for report in reports {
        let name = log_label(&report.source);
        let ack = report.ack_delay.as_ref();
        println!(
            "║ {:<26.26} ║ {:>7} ║ {:>7.2}% ║ {:>7.2}% ║ {:>8} ║ {:>8} ║ {:>8} ║",
            name,
            report.total_packets,
            (1.0 - report.uplink_loss_rate) * 100.0,
            (1.0 - report.ack_loss_rate) * 100.0,
            fmt_secs(ack.map(|s| s.mean)),
            fmt_secs(ack.map(|s| s.p95)),
            fmt_secs(ack.map(|s| s.jitter)),
        );
    }

    println!("╚════════════════════════════╩═════════╩══════════╩══════════╩══════════╩══════════╩══════════╝\n");

    if let Some(best) = reports
        .iter()
        .filter(|r| r.ack_delay.is_some())
        .min_by(|a, b| mean_delay(a).total_cmp(&mean_delay(b)))
    {
        println!("Lowest mean ACK delay: {} ({:.3} s)", best.source, mean_delay(best));
    }

    if let Some(best) = reports
        .iter()
        .min_by(|a, b| a.ack_loss_rate.total_cmp(&b.ack_loss_rate))
    {
        println!("Lowest ACK loss: {} ({:.2}%)", best.source, best.ack_loss_rate * 100.0);
    }

    println!();
}

// Parent folder plus file name, keeping the tail when it is too wide for the column
fn log_label(source: &str) -> String {
    let path = Path::new(source);
    let label = match (path.parent().and_then(|p| p.file_name()), path.file_name()) {
        (Some(parent), Some(name)) => format!("{}/{}", parent.to_string_lossy(), name.to_string_lossy()),
        (None, Some(name)) => name.to_string_lossy().into_owned(),
        _ => source.to_string(),
    };

    let chars: Vec<char> = label.chars().collect();
    if chars.len() > LOG_COLUMN_WIDTH {
        let tail: String = chars[chars.len() - (LOG_COLUMN_WIDTH - 1)..].iter().collect();
        format!("…{}", tail)
    } else {
        label
    }
}

fn mean_delay(report: &AnalysisReport) -> f64 {
    report.ack_delay.as_ref().map(|s| s.mean).unwrap_or(f64::INFINITY)
}

fn show_saved(path: &Path) -> Result<()> {
    info!("Loading saved reports from: {}", path.display());

    let reports = if path.is_dir() {
        analyzer::load_saved_reports(path)?
    } else {
        analyzer::load_reports(path)?
    };

    if reports.is_empty() {
        info!("No analysis files found.");
        return Ok(());
    }

    comparison_table(&reports);

    Ok(())
}

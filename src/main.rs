//! StripeGuard Scrub Simulator
//!
//! Builds a synthetic RAID-6 strip, injects faults, runs one evaluation and
//! prints what the engine did.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     StripeGuard Simulator                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Synthetic   │───▶│    Fault     │───▶│  Raid6       │       │
//! │  │  Strip       │    │  Injection   │    │  Evaluator   │       │
//! │  └──────────────┘    └──────────────┘    └──────┬───────┘       │
//! │                                                 ▼               │
//! │                                  JSON report + metrics text     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use prometheus::Registry;
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stripeguard::diagnostics::{TraceRecord, TraceRing};
use stripeguard::metrics::{encode_text, EvaluationMetrics};
use stripeguard::raid6::{
    Eboard, EvaluationReport, EvaluatorConfig, InvariantSeverity, OptionFlags, Raid6Evaluator,
    SyntheticStrip,
};
use stripeguard::raid6::position::positions;

// =============================================================================
// CLI Arguments
// =============================================================================

/// StripeGuard - evaluate a synthetic RAID-6 strip with injected faults
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of positions in the strip (data + 2 parity)
    #[arg(long, env = "STRIPEGUARD_WIDTH", default_value = "8")]
    width: usize,

    /// Strip LBA
    #[arg(long, env = "STRIPEGUARD_LBA", default_value = "4096")]
    lba: u64,

    /// Time stamp of the full-strip write that produced the strip
    #[arg(long, default_value = "33")]
    time_stamp: u16,

    /// Positions handed over for rebuild (at most two)
    #[arg(long, value_delimiter = ',')]
    dead: Vec<usize>,

    /// Silently corrupt the payload of these positions (checksum kept valid)
    #[arg(long, value_delimiter = ',')]
    corrupt_data: Vec<usize>,

    /// Flip stored checksum bits on these positions
    #[arg(long, value_delimiter = ',')]
    flip_crc: Vec<usize>,

    /// Positions that returned a hard media error
    #[arg(long, value_delimiter = ',')]
    media: Vec<usize>,

    /// Positions that returned a retryable error
    #[arg(long, value_delimiter = ',')]
    retry: Vec<usize>,

    /// No further retry will follow this evaluation
    #[arg(long, env = "STRIPEGUARD_FINAL_ATTEMPT")]
    final_attempt: bool,

    /// Check data sector LBA stamps
    #[arg(long, env = "STRIPEGUARD_CHECK_LBA_STAMPS")]
    check_lba_stamps: bool,

    /// Emit per-sector traces
    #[arg(long, env = "STRIPEGUARD_TRACE_SECTORS")]
    trace_sectors: bool,

    /// Panic instead of returning an error when a consistency check fails
    #[arg(long, env = "STRIPEGUARD_PANIC_ON_INVARIANT")]
    panic_on_invariant: bool,

    /// Print Prometheus metrics after the report
    #[arg(long)]
    print_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// What the simulator prints
#[derive(Debug, Serialize)]
struct SimulationReport {
    width: usize,
    lba: u64,
    invalid_bitmask: String,
    report: EvaluationReport,
    eboard: Eboard,
    /// Dead positions hold their original content again
    restored: bool,
    /// Every position holds its original content again
    strip_restored: bool,
    events: Vec<TraceRecord>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting StripeGuard simulation");
    info!("  Width: {}", args.width);
    info!("  LBA: {:#x}", args.lba);
    info!("  Final attempt: {}", args.final_attempt);

    let mut strip = SyntheticStrip::new(args.width, args.lba, args.time_stamp)
        .context("failed to build synthetic strip")?;
    if args.dead.len() > 2 {
        bail!("at most two rebuild positions, got {}", args.dead.len());
    }
    let all = args
        .dead
        .iter()
        .chain(&args.corrupt_data)
        .chain(&args.flip_crc)
        .chain(&args.media)
        .chain(&args.retry);
    for pos in all {
        if *pos >= args.width {
            bail!("position {} outside width {}", pos, args.width);
        }
    }

    let original = strip.sectors.clone();
    let mut options = OptionFlags::empty();
    options.set(OptionFlags::CHECK_LBA_STAMP, args.check_lba_stamps);
    options.set(OptionFlags::TRACE_SECTORS, args.trace_sectors);
    strip.option_flags = options;
    strip.final_recovery_attempt = args.final_attempt;

    // Fault injection
    let lost = to_bitmap(&args.dead) | to_bitmap(&args.media) | to_bitmap(&args.retry);
    for (slot, pos) in args.dead.iter().enumerate() {
        strip.rebuild_pos[slot] = *pos as u16;
    }
    for pos in positions(lost) {
        strip.kill(pos);
    }
    for pos in &args.corrupt_data {
        let sector = &mut strip.sectors[*pos];
        sector.data[7] ^= 0x0040_0000;
        sector.stamp_crc();
    }
    for pos in &args.flip_crc {
        strip.sectors[*pos].crc ^= 0x0101;
    }

    let config = EvaluatorConfig {
        invariant_severity: if args.panic_on_invariant {
            InvariantSeverity::Panic
        } else {
            InvariantSeverity::ReturnError
        },
        ..Default::default()
    };
    config.validate().context("invalid evaluator configuration")?;

    let registry = Registry::new();
    let metrics = EvaluationMetrics::new(&registry).context("failed to register metrics")?;
    let ring = Arc::new(TraceRing::default());
    let evaluator = Raid6Evaluator::new(config)?
        .with_sink(ring.clone())
        .with_metrics(metrics);

    let mut eboard = Eboard::new(to_bitmap(&args.media), to_bitmap(&args.retry));
    let report = evaluator
        .evaluate_with_report(&mut eboard, strip.unit())
        .context("strip evaluation failed")?;

    let restored = positions(lost).all(|pos| strip.sectors[pos] == original[pos]);
    let strip_restored = strip.sectors == original;
    if !restored {
        warn!(lost = format_args!("{:#06x}", lost), "Lost positions not restored");
    }
    info!(
        outcome = report.outcome.as_str(),
        passes = report.passes,
        "Evaluation finished"
    );

    let output = SimulationReport {
        width: args.width,
        lba: args.lba,
        invalid_bitmask: format!("{:#06x}", report.invalid_bitmask),
        report,
        eboard,
        restored,
        strip_restored,
        events: ring.records(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.print_metrics {
        print!("{}", encode_text(&registry)?);
    }
    Ok(())
}

fn to_bitmap(positions: &[usize]) -> u16 {
    positions.iter().fold(0, |mask, pos| mask | (1 << pos))
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so the JSON report on stdout stays parseable.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

//! Metrics module
//!
//! Prometheus counters describing what the engine did to the strips it saw.
//! Counters live in a caller-supplied `Registry` so several evaluators (or
//! tests) never collide on the process-wide default registry.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::raid6::{Eboard, EvaluationReport};

/// Counters for strip evaluations
#[derive(Debug, Clone)]
pub struct EvaluationMetrics {
    strips_evaluated: IntCounter,
    reconstructions: IntCounterVec,
    sectors_invalidated: IntCounter,
    fatal_algorithm_errors: IntCounter,
}

impl EvaluationMetrics {
    /// Create the counters and register them in `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let strips_evaluated = IntCounter::new(
            "stripeguard_strips_evaluated_total",
            "Total number of strips evaluated",
        )?;
        let reconstructions = IntCounterVec::new(
            Opts::new(
                "stripeguard_reconstructions_total",
                "Total number of strip reconstructions by state and outcome",
            ),
            &["state", "outcome"],
        )?;
        let sectors_invalidated = IntCounter::new(
            "stripeguard_sectors_invalidated_total",
            "Total number of sectors invalidated as unrecoverable",
        )?;
        let fatal_algorithm_errors = IntCounter::new(
            "stripeguard_fatal_algorithm_errors_total",
            "Total number of evaluations aborted by an internal consistency failure",
        )?;

        registry.register(Box::new(strips_evaluated.clone()))?;
        registry.register(Box::new(reconstructions.clone()))?;
        registry.register(Box::new(sectors_invalidated.clone()))?;
        registry.register(Box::new(fatal_algorithm_errors.clone()))?;

        Ok(Self {
            strips_evaluated,
            reconstructions,
            sectors_invalidated,
            fatal_algorithm_errors,
        })
    }

    /// Account for a finished evaluation.
    pub fn record(&self, report: &EvaluationReport, eboard: &Eboard) {
        self.strips_evaluated.inc();
        if let Some(state) = report.reconstruction() {
            self.reconstructions
                .with_label_values(&[state, report.outcome.as_str()])
                .inc();
        }
        self.sectors_invalidated
            .inc_by(u64::from(eboard.invalidated_bitmap.count_ones()));
    }

    /// Account for an evaluation that returned an error.
    pub fn record_failure(&self, err: &Error) {
        self.strips_evaluated.inc();
        if err.is_fatal_algorithm() {
            self.fatal_algorithm_errors.inc();
        }
    }

    pub fn strips_evaluated(&self) -> u64 {
        self.strips_evaluated.get()
    }

    pub fn sectors_invalidated(&self) -> u64 {
        self.sectors_invalidated.get()
    }

    pub fn fatal_algorithm_errors(&self) -> u64 {
        self.fatal_algorithm_errors.get()
    }

    pub fn reconstructions(&self, state: &str, outcome: &str) -> u64 {
        self.reconstructions.with_label_values(&[state, outcome]).get()
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Config(format!("metrics output is not UTF-8: {}", e)))
}

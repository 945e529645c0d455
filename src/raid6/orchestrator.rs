//! Strip Orchestrator
//!
//! Entry point of the engine. Drives the state machine over one strip for at
//! most `MAX_PASSES` passes, then runs the end-of-evaluation fix-ups and
//! consistency checks.
//!
//! ```text
//!  init scratch ──▶ zeroed strip? ──yes──▶ return dead positions
//!                        │no
//!                        ▼
//!  ┌──▶ select state ──None──▶ invalidate & repair ──┐
//!  │         │                                       │
//!  │    evaluate data, then parity                   │
//!  │         │                                       │
//!  └─new fatal position     finish step ──Done──────▶┤
//!                                                    ▼
//!                       report invalidated, strip retries, check
//!                       invariants, demote ambiguous coherency
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::diagnostics::{DiagnosticSink, TraceCategory, TraceLevel, TracingSink};
use crate::error::{Error, Result};
use crate::metrics::EvaluationMetrics;

use super::config::{EvaluatorConfig, InvariantSeverity, OptionFlags};
use super::constants::RaidSixConstants;
use super::context::StripContext;
use super::eboard::{Eboard, ErrorCategory};
use super::parity::compute_parity;
use super::position::{positions, StripGeometry, DIAG_PARITY, INVALID_POSITION, ROW_PARITY};
use super::scratch::{rebuild_bitmap, reset_rebuild_positions, FatalCount, Scratch, ScratchState};
use super::sector::Sector;

/// One strip handed to the engine. Every buffer stays owned by the caller.
#[derive(Debug)]
pub struct ParityUnit<'a> {
    /// Sectors of the strip, one per position
    pub sectors: &'a mut [Sector],
    /// Bit of each position
    pub bitkey: &'a [u16],
    /// Row and diagonal parity positions
    pub parity_pos: [u16; 2],
    /// Positions to rebuild; restored before returning
    pub rebuild_pos: &'a mut [u16; 2],
    /// Strip LBA
    pub seed: u64,
    /// Offset of this strip within its parity unit
    pub offset: u64,
    /// No further retries will follow this evaluation
    pub final_recovery_attempt: bool,
    /// Physical position -> logical data column
    pub data_position: &'a [u16],
    pub option_flags: OptionFlags,
    /// RAID group, for diagnostics only
    pub group_id: u32,
}

/// How a strip evaluation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StripOutcome {
    /// Never-written strip, nothing evaluated
    ZeroedStrip,
    /// Consistent, nothing written
    Verified,
    /// Rebuilt or corrected, buffers to write back
    Repaired,
    /// At least one sector invalidated
    Invalidated,
    /// Dead positions left for a retry or rebuild
    Deferred,
}

impl StripOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StripOutcome::ZeroedStrip => "zeroed",
            StripOutcome::Verified => "verified",
            StripOutcome::Repaired => "repaired",
            StripOutcome::Invalidated => "invalidated",
            StripOutcome::Deferred => "deferred",
        }
    }
}

/// Result of one evaluation with the route it took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub invalid_bitmask: u16,
    pub passes: usize,
    /// State selected on each pass
    pub path: Vec<ScratchState>,
    /// The strip had more dead positions than EVENODD can solve
    pub unreconstructible: bool,
    pub outcome: StripOutcome,
}

impl EvaluationReport {
    /// Label of the reconstruction that settled the strip, if any.
    pub fn reconstruction(&self) -> Option<&'static str> {
        if self.unreconstructible {
            return Some("unreconstructible");
        }
        self.path
            .last()
            .filter(|state| **state != ScratchState::Verify)
            .map(|state| state.as_str())
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Evaluate one strip and return the positions that are dead or invalidated.
pub fn evaluate_parity_unit_r6(
    eboard: &mut Eboard,
    unit: ParityUnit<'_>,
    constants: &RaidSixConstants,
    sink: &dyn DiagnosticSink,
    config: &EvaluatorConfig,
) -> Result<u16> {
    evaluate_with_report(eboard, unit, constants, sink, config).map(|report| report.invalid_bitmask)
}

/// Same as [`evaluate_parity_unit_r6`], with the route taken.
#[instrument(skip_all, fields(seed = unit.seed, offset = unit.offset, width = unit.sectors.len()))]
pub fn evaluate_with_report(
    eboard: &mut Eboard,
    unit: ParityUnit<'_>,
    constants: &RaidSixConstants,
    sink: &dyn DiagnosticSink,
    config: &EvaluatorConfig,
) -> Result<EvaluationReport> {
    config.validate()?;
    let ParityUnit {
        sectors,
        bitkey,
        parity_pos,
        rebuild_pos,
        seed,
        offset,
        final_recovery_attempt,
        data_position,
        option_flags,
        group_id,
    } = unit;

    // Step 1: geometry and initial fatal set
    if sectors.len() != bitkey.len() {
        return Err(Error::InvalidGeometry(format!(
            "{} sectors for {} bitkeys",
            sectors.len(),
            bitkey.len()
        )));
    }
    let geometry = StripGeometry::new(bitkey, parity_pos, data_position)?;
    for pos in rebuild_pos.iter() {
        if *pos != INVALID_POSITION && usize::from(*pos) >= geometry.width() {
            return Err(Error::InvalidGeometry(format!(
                "rebuild position {} outside width {}",
                pos,
                geometry.width()
            )));
        }
    }

    let original_rebuild_pos = *rebuild_pos;
    let rebuild_mask = rebuild_bitmap(rebuild_pos);
    let media = eboard.hard_media_err_bitmap & geometry.all_bitmap();
    let retry = eboard.retry_err_bitmap & geometry.all_bitmap();
    let fatal_key = rebuild_mask | media | retry;

    // Step 2: never-written strip
    if is_zeroed_strip(sectors, &geometry, fatal_key, constants) {
        debug!(fatal_key = format_args!("{:#06x}", fatal_key), "Zeroed strip, nothing to evaluate");
        return Ok(EvaluationReport {
            invalid_bitmask: fatal_key,
            passes: 0,
            path: Vec::new(),
            unreconstructible: false,
            outcome: StripOutcome::ZeroedStrip,
        });
    }

    // Step 3
    *rebuild_pos = reset_rebuild_positions(rebuild_mask, geometry.parity_bitmap());

    let mut ctx = StripContext {
        scratch: Scratch::new(fatal_key, geometry.parity_bitmap(), media, retry),
        geometry,
        sectors,
        eboard,
        sink,
        constants,
        options: option_flags | config.default_options,
        seed,
        offset,
        group_id,
        final_attempt: final_recovery_attempt,
        rebuild_bitmap: rebuild_mask,
        parity_settled: false,
    };

    let mut path = Vec::with_capacity(config.max_passes);
    let mut unreconstructible = false;
    let result = run_passes(&mut ctx, rebuild_pos, config.max_passes, &mut path, &mut unreconstructible)
        .and_then(|passes| finalize(&mut ctx, config.invariant_severity).map(|mask| (passes, mask)));

    // Step 10
    *rebuild_pos = original_rebuild_pos;
    let (passes, invalid_bitmask) = result?;

    let outcome = if ctx.eboard.invalidated_bitmap != 0 {
        StripOutcome::Invalidated
    } else if ctx.scratch.fatal_key != 0 {
        StripOutcome::Deferred
    } else if ctx.eboard.modified_bitmap != 0 {
        StripOutcome::Repaired
    } else {
        StripOutcome::Verified
    };
    debug!(
        passes,
        invalid_bitmask = format_args!("{:#06x}", invalid_bitmask),
        outcome = outcome.as_str(),
        "Strip evaluated"
    );

    Ok(EvaluationReport {
        invalid_bitmask,
        passes,
        path,
        unreconstructible,
        outcome,
    })
}

/// Every live position holds the never-written image and parity carries the
/// zeroed parity of checksums.
fn is_zeroed_strip(sectors: &[Sector], geometry: &StripGeometry, fatal_key: u16, constants: &RaidSixConstants) -> bool {
    let Some(poc) = constants.zeroed_poc(geometry.width()) else {
        return false;
    };
    if FatalCount::of(fatal_key) > FatalCount::Two {
        return false;
    }
    let live = geometry.all_bitmap() & !fatal_key;
    let data_zeroed = positions(live & geometry.data_bitmap())
        .all(|pos| sectors[pos].is_zeroed_image() && sectors[pos].lba_stamp == 0);
    let parity_zeroed = [(ROW_PARITY, poc.row), (DIAG_PARITY, poc.diag)]
        .into_iter()
        .map(|(which, expected)| (geometry.parity_position(which), expected))
        .filter(|(pos, _)| live & geometry.bitkey(*pos) != 0)
        .all(|(pos, expected)| sectors[pos].is_zeroed_image() && sectors[pos].lba_stamp == expected);
    data_zeroed && parity_zeroed
}

/// Step 4 and 5: bounded pass loop.
fn run_passes(
    ctx: &mut StripContext<'_>,
    rebuild_pos: &mut [u16; 2],
    max_passes: usize,
    path: &mut Vec<ScratchState>,
    unreconstructible: &mut bool,
) -> Result<usize> {
    let parity_bitmap = ctx.geometry.parity_bitmap();
    for pass in 1..=max_passes {
        *rebuild_pos = reset_rebuild_positions(ctx.rebuild_bitmap & ctx.scratch.fatal_key, parity_bitmap);

        let Some(state) = ScratchState::select(ctx.scratch.fatal_cnt, ctx.scratch.fatal_key, parity_bitmap) else {
            info!(
                pass,
                fatal_key = format_args!("{:#06x}", ctx.scratch.fatal_key),
                "Strip not reconstructible"
            );
            *unreconstructible = true;
            ctx.invalidate_and_repair();
            return Ok(pass);
        };

        debug!(pass, state = state.as_str(), fatal_blk = ?ctx.scratch.fatal_blk, "Starting pass");
        ctx.set_state(state);
        path.push(state);
        ctx.scratch.begin_pass();
        ctx.evaluate_strip();
        if ctx.scratch.new_errors {
            continue;
        }

        ctx.finish_pass()?;
        if ctx.scratch.state == ScratchState::Done {
            return Ok(pass);
        }
    }

    Err(Error::StateMachineIncomplete { passes: max_passes })
}

/// Steps 6 to 9, returning the final invalid bitmask.
fn finalize(ctx: &mut StripContext<'_>, severity: InvariantSeverity) -> Result<u16> {
    // Step 6: sectors invalidated before this call stay reported
    let previously_invalidated = ctx.eboard.u_raid_crc_bitmap | ctx.eboard.u_corrupt_crc_bitmap;

    // Step 7: retryable errors are never persisted as corrections
    let retry = ctx.scratch.retry_err_bitmap;
    ctx.eboard.modified_bitmap &= !retry;
    ctx.eboard.c_crc_bitmap &= !retry;

    // Step 8
    if let Err(err) = check_invariants(ctx) {
        error!(%err, "Strip consistency check failed");
        ctx.sink
            .report_error(&err.to_string(), TraceLevel::Critical, TraceCategory::Consistency);
        match severity {
            InvariantSeverity::Panic => panic!("{}", err),
            InvariantSeverity::ReturnError => return Err(err),
        }
    }

    // Step 9: coherency "fixed" on both parity positions names no culprit
    let parity_bitmap = ctx.geometry.parity_bitmap();
    if ctx.eboard.c_coh_bitmap & parity_bitmap == parity_bitmap {
        let survivors = ctx.geometry.data_bitmap() & !ctx.scratch.fatal_key & !ctx.eboard.invalidated_bitmap;
        ctx.eboard.clear_errors(ErrorCategory::Coh, parity_bitmap);
        ctx.eboard.merge_error(ErrorCategory::CohUnk, survivors, false);
        info!(
            survivors = format_args!("{:#06x}", survivors),
            "Ambiguous coherency error reported on data positions"
        );
    }

    Ok(ctx.scratch.fatal_key | ctx.eboard.invalidated_bitmap | previously_invalidated)
}

fn check_invariants(ctx: &StripContext<'_>) -> Result<()> {
    let parity_bitmap = ctx.geometry.parity_bitmap();

    let parity_u = ctx.eboard.u_bitmap() & parity_bitmap;
    if parity_u != 0 {
        return Err(Error::invariant(
            "parity uncorrectable",
            format!("uncorrectable bits {:#06x} on parity positions", parity_u),
        ));
    }
    if let Some((category, mask)) = ctx.eboard.overlap() {
        return Err(Error::invariant(
            "error board overlap",
            format!("{} both correctable and uncorrectable on {:#06x}", category, mask),
        ));
    }
    if !ctx.parity_settled {
        return Ok(());
    }

    let row = &ctx.sectors[ctx.geometry.parity_position(ROW_PARITY)];
    let diag = &ctx.sectors[ctx.geometry.parity_position(DIAG_PARITY)];
    if row.time_stamp != diag.time_stamp || row.write_stamp != diag.write_stamp {
        return Err(Error::invariant(
            "parity stamps",
            format!(
                "row ts {:#06x} ws {:#06x}, diagonal ts {:#06x} ws {:#06x}",
                row.time_stamp, row.write_stamp, diag.time_stamp, diag.write_stamp
            ),
        ));
    }

    if ctx.scratch.fatal_key & ctx.geometry.data_bitmap() == 0 {
        let [row_image, diag_image] = compute_parity(&*ctx.sectors, &ctx.geometry, ctx.constants);
        if row.lba_stamp != row_image.poc || diag.lba_stamp != diag_image.poc {
            return Err(Error::invariant(
                "parity of checksums",
                format!(
                    "stored {:#06x}/{:#06x}, data gives {:#06x}/{:#06x}",
                    row.lba_stamp, diag.lba_stamp, row_image.poc, diag_image.poc
                ),
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Raid6Evaluator
// =============================================================================

/// Evaluator that owns its configuration, sink, constant table and metrics
#[derive(Clone)]
pub struct Raid6Evaluator {
    config: EvaluatorConfig,
    constants: Arc<RaidSixConstants>,
    sink: Arc<dyn DiagnosticSink>,
    metrics: Option<EvaluationMetrics>,
}

impl Raid6Evaluator {
    pub fn new(config: EvaluatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            constants: RaidSixConstants::shared(),
            sink: Arc::new(TracingSink),
            metrics: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: EvaluationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_constants(mut self, constants: Arc<RaidSixConstants>) -> Self {
        self.constants = constants;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn constants(&self) -> &RaidSixConstants {
        &self.constants
    }

    pub fn evaluate(&self, eboard: &mut Eboard, unit: ParityUnit<'_>) -> Result<u16> {
        self.evaluate_with_report(eboard, unit)
            .map(|report| report.invalid_bitmask)
    }

    pub fn evaluate_with_report(&self, eboard: &mut Eboard, unit: ParityUnit<'_>) -> Result<EvaluationReport> {
        let result = evaluate_with_report(eboard, unit, &self.constants, self.sink.as_ref(), &self.config);
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(report) => metrics.record(report, eboard),
                Err(err) => metrics.record_failure(err),
            }
        }
        result
    }
}

impl std::fmt::Debug for Raid6Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raid6Evaluator")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

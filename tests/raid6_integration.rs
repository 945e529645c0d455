//! RAID-6 Integration Tests
//!
//! End-to-end strip evaluations through the public API: verify, rebuild,
//! invalidation and the bookkeeping the caller relies on afterwards.

use std::sync::Arc;

use assert_matches::assert_matches;
use prometheus::Registry;

use stripeguard::diagnostics::{NoopSink, TraceCategory, TraceRing};
use stripeguard::metrics::{encode_text, EvaluationMetrics};
use stripeguard::raid6::{
    evaluate_parity_unit_r6, evaluate_with_report, Eboard, EvaluationReport, EvaluatorConfig,
    InvalidationReason, OptionFlags, Raid6Evaluator, RaidSixConstants, ScratchState, StripOutcome,
    SyntheticStrip, INVALID_POSITION,
};
use stripeguard::DiagnosticSink;

const LBA: u64 = 0x0012_3400;
const TS: u16 = 0x21;

const ROW: usize = 4;
const DIAG: usize = 5;
const PARITY: u16 = 0b11_0000;

fn strip() -> SyntheticStrip {
    SyntheticStrip::new(6, LBA, TS).expect("Failed to build strip")
}

fn evaluate(strip: &mut SyntheticStrip, eboard: &mut Eboard) -> EvaluationReport {
    evaluate_on(strip, eboard, &NoopSink)
}

fn evaluate_on(strip: &mut SyntheticStrip, eboard: &mut Eboard, sink: &dyn DiagnosticSink) -> EvaluationReport {
    evaluate_with_report(
        eboard,
        strip.unit(),
        RaidSixConstants::global(),
        sink,
        &EvaluatorConfig::default(),
    )
    .expect("Evaluation failed")
}

/// A second evaluation of an already settled strip only verifies.
fn assert_settled(strip: &mut SyntheticStrip, expected_invalid: u16) {
    strip.rebuild_pos = [INVALID_POSITION; 2];
    let mut eboard = Eboard::default();
    let report = evaluate(strip, &mut eboard);
    assert_eq!(report.path, vec![ScratchState::Verify]);
    assert_eq!(report.invalid_bitmask, expected_invalid);
    assert_eq!(eboard.modified_bitmap, 0);
    assert_eq!(eboard.c_bitmap(), 0);
}

// =============================================================================
// Verify
// =============================================================================

#[test]
fn test_clean_strip_verifies() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    let mut eboard = Eboard::default();

    let invalid = evaluate_parity_unit_r6(
        &mut eboard,
        strip.unit(),
        RaidSixConstants::global(),
        &NoopSink,
        &EvaluatorConfig::default(),
    )
    .expect("Evaluation failed");

    assert_eq!(invalid, 0);
    assert!(eboard.is_clean());
    assert_eq!(eboard.modified_bitmap, 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_zeroed_strip_skips_evaluation() {
    let mut strip = SyntheticStrip::zeroed(6, LBA).expect("Failed to build strip");
    strip.rebuild_pos = [1, INVALID_POSITION];
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.outcome, StripOutcome::ZeroedStrip);
    assert_eq!(report.passes, 0);
    assert_eq!(report.invalid_bitmask, 0b10);
    assert!(eboard.is_clean());
}

#[test]
fn test_rotated_parity_layout_verifies() {
    let mut strip = SyntheticStrip::with_layout([0, 3], &[0, 2, 0, 0, 1, 3], LBA, TS)
        .expect("Failed to build strip");
    let original = strip.sectors.clone();
    strip.kill(4);
    strip.rebuild_pos = [4, INVALID_POSITION];
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(strip.sectors, original);
}

// =============================================================================
// Checksum Faults
// =============================================================================

#[test]
fn test_sector_written_with_bad_checksum_is_invalidated() {
    let mut strip = strip();
    strip.sectors[1].crc ^= 0x0101;
    strip.reencode().expect("Failed to re-encode");
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0b10);
    assert_eq!(report.outcome, StripOutcome::Invalidated);
    assert_eq!(eboard.u_crc_bitmap, 0b10);
    assert_eq!(eboard.u_raid_crc_bitmap, 0b10);
    assert_eq!(eboard.invalidated_bitmap, 0b10);
    assert_eq!(eboard.u_bitmap() & PARITY, 0);
    assert_eq!(
        strip.sectors[1].invalidation_reason(),
        Some(InvalidationReason::RaidCrc)
    );
    assert_eq!(strip.sectors[1].time_stamp, TS);

    // Parity now covers the invalidated block.
    assert_settled(&mut strip, 0b10);
}

#[test]
fn test_checksum_flipped_after_encoding_is_repaired() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[1].crc ^= 0x0101;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(report.outcome, StripOutcome::Repaired);
    assert_eq!(eboard.c_crc_bitmap, 0b10);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(eboard.modified_bitmap & 0b10, 0b10);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_parity_checksum_fault_is_regenerated() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[DIAG].crc ^= 0x0800;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::ReconstructParity]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(eboard.c_crc_bitmap, 1 << DIAG);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_previously_invalidated_sector_stays_reported() {
    let mut strip = strip();
    strip.sectors[2].invalidate(InvalidationReason::CorruptCrc, LBA, TS);
    strip.reencode().expect("Failed to re-encode");
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify]);
    assert_eq!(report.invalid_bitmask, 0b100);
    assert_eq!(report.outcome, StripOutcome::Verified);
    assert_eq!(eboard.u_corrupt_crc_bitmap, 0b100);
    assert_eq!(eboard.u_crc_bitmap, 0);
    assert_eq!(eboard.invalidated_bitmap, 0);
}

// =============================================================================
// Coherency Faults
// =============================================================================

#[test]
fn test_stale_data_located_and_rebuilt() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[2].data[7] ^= 0x0040_0000;
    strip.sectors[2].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(eboard.c_coh_bitmap, 0b100);
    assert_eq!(eboard.c_poc_coh_bitmap, 0b100);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_row_parity_payload_fault_regenerated() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[ROW].data[40] ^= 0x8000_0001;
    strip.sectors[ROW].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::ReconstructParity]);
    assert_eq!(eboard.c_coh_bitmap, 1 << ROW);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(eboard.u_coh_unk_bitmap, 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_parity_of_checksums_fault_regenerated() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[DIAG].lba_stamp ^= 0x0004;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::ReconstructParity]);
    assert_eq!(eboard.c_poc_coh_bitmap, 1 << DIAG);
    assert_eq!(eboard.c_coh_bitmap, 0);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_ambiguous_coherency_reported_on_data() {
    let mut strip = strip();
    strip.sectors[0].data[0] ^= 1;
    strip.sectors[0].stamp_crc();
    strip.sectors[1].data[16] ^= 1;
    strip.sectors[1].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(report.outcome, StripOutcome::Repaired);
    assert_eq!(eboard.u_coh_unk_bitmap, 0b1111);
    assert_eq!(eboard.c_coh_bitmap & PARITY, 0);
    assert_eq!(eboard.modified_bitmap & PARITY, PARITY);
    assert_eq!(eboard.u_bitmap() & PARITY, 0);

    // Parity now agrees with the data as it stands.
    assert_settled(&mut strip, 0);
}

#[test]
fn test_surviving_parity_disagreement_regenerated() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[ROW].crc ^= 0x0101;
    strip.sectors[DIAG].data[40] ^= 0x0000_0100;
    strip.sectors[DIAG].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::ReconstructParity]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(report.outcome, StripOutcome::Repaired);
    assert_eq!(eboard.c_crc_bitmap, 1 << ROW);
    assert_eq!(eboard.c_coh_bitmap, 1 << DIAG);
    assert_eq!(eboard.u_coh_unk_bitmap, 0);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(eboard.modified_bitmap & PARITY, PARITY);
    assert_eq!(strip.sectors, original);

    assert_settled(&mut strip, 0);
}

// =============================================================================
// Rebuild
// =============================================================================

#[test]
fn test_single_data_loss_rebuilt() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(2);
    strip.rebuild_pos = [2, INVALID_POSITION];
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(report.outcome, StripOutcome::Repaired);
    assert_eq!(strip.sectors[2], original[2]);
    assert_eq!(strip.rebuild_pos, [2, INVALID_POSITION]);
    assert_eq!(eboard.modified_bitmap, 0b100);
}

#[test]
fn test_data_and_row_parity_loss_rebuilt_from_diagonal() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(1);
    strip.kill(ROW);
    strip.rebuild_pos = [ROW as u16, 1];
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(strip.sectors, original);
    assert_eq!(eboard.modified_bitmap, 0b10 | (1 << ROW));
}

#[test]
fn test_single_loss_with_stale_row_parity_rebuilt_from_diagonal() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(2);
    strip.rebuild_pos = [2, INVALID_POSITION];
    strip.sectors[ROW].data[40] ^= 0x0000_0100;
    strip.sectors[ROW].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(report.outcome, StripOutcome::Repaired);
    assert_eq!(eboard.c_coh_bitmap, 1 << ROW);
    assert_eq!(eboard.c_poc_coh_bitmap, 0);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(eboard.invalidated_bitmap, 0);
    assert_eq!(eboard.modified_bitmap, 0b100 | (1 << ROW));
    assert_eq!(strip.sectors, original);

    assert_settled(&mut strip, 0);
}

#[test]
fn test_single_loss_with_stale_diagonal_parity_rebuilt_from_row() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(2);
    strip.rebuild_pos = [2, INVALID_POSITION];
    strip.sectors[DIAG].data[40] ^= 0x0000_0100;
    strip.sectors[DIAG].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(report.outcome, StripOutcome::Repaired);
    assert_eq!(eboard.c_coh_bitmap, 1 << DIAG);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(strip.sectors, original);

    assert_settled(&mut strip, 0);
}

#[test]
fn test_single_loss_with_stale_diagonal_checksums_rebuilt_from_row() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(3);
    strip.rebuild_pos = [3, INVALID_POSITION];
    strip.sectors[DIAG].lba_stamp ^= 0x0004;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(eboard.c_poc_coh_bitmap, 1 << DIAG);
    assert_eq!(eboard.c_coh_bitmap, 0);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_single_loss_with_stale_surviving_data_not_repaired() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(2);
    strip.rebuild_pos = [2, INVALID_POSITION];
    strip.sectors[1].data[7] ^= 0x0000_0040;
    strip.sectors[1].stamp_crc();
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0b100);
    assert_eq!(report.outcome, StripOutcome::Invalidated);
    assert_eq!(eboard.u_coh_unk_bitmap, 0b1011);
    assert_eq!(eboard.c_coh_bitmap, 0);
    assert_eq!(eboard.c_poc_coh_bitmap, 0);
    assert_eq!(eboard.u_bitmap() & PARITY, 0);
    assert_eq!(
        strip.sectors[2].invalidation_reason(),
        Some(InvalidationReason::RaidCrc)
    );

    // Parity keeps what it was written with while survivors are in doubt.
    assert_eq!(eboard.modified_bitmap & PARITY, 0);
    assert_eq!(strip.sectors[ROW], original[ROW]);
    assert_eq!(strip.sectors[DIAG], original[DIAG]);
}

#[test]
fn test_double_data_loss_rebuilt() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(0);
    strip.kill(3);
    strip.rebuild_pos = [3, 0];
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct2]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(strip.sectors, original);
    assert_eq!(strip.rebuild_pos, [3, 0]);
}

#[test]
fn test_double_loss_with_bad_parity_invalidates_both() {
    let mut strip = strip();
    strip.kill(2);
    strip.kill(3);
    strip.rebuild_pos = [2, 3];
    strip.sectors[ROW].lba_stamp ^= 0x0001;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct2]);
    assert_eq!(report.invalid_bitmask, 0b1100);
    assert_eq!(report.outcome, StripOutcome::Invalidated);
    assert_eq!(eboard.invalidated_bitmap, 0b1100);
    assert_eq!(eboard.u_raid_crc_bitmap, 0b1100);
    assert_eq!(eboard.modified_bitmap & PARITY, PARITY);
    for pos in [2, 3] {
        assert_eq!(
            strip.sectors[pos].invalidation_reason(),
            Some(InvalidationReason::RaidCrc)
        );
    }

    assert_settled(&mut strip, 0b1100);
}

#[test]
fn test_three_losses_invalidate_without_reconstruction() {
    let mut strip = strip();
    strip.kill(1);
    strip.kill(2);
    strip.rebuild_pos = [1, 2];
    strip.sectors[3].crc ^= 0x0101;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct2]);
    assert_eq!(report.passes, 2);
    assert!(report.unreconstructible);
    assert_eq!(report.reconstruction(), Some("unreconstructible"));
    assert_eq!(report.invalid_bitmask, 0b1110);
    assert_eq!(eboard.invalidated_bitmap, 0b1110);
    assert_eq!(eboard.u_bitmap() & PARITY, 0);

    assert_settled(&mut strip, 0b1110);
}

#[test]
fn test_lba_stamp_mismatch_rebuilt_when_checked() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.sectors[0].lba_stamp ^= 0x0100;
    strip.option_flags = OptionFlags::CHECK_LBA_STAMP;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify, ScratchState::Reconstruct1]);
    assert_eq!(eboard.c_lba_stamp_bitmap, 0b1);
    assert_eq!(eboard.u_bitmap(), 0);
    assert_eq!(strip.sectors, original);
}

#[test]
fn test_lba_stamp_ignored_without_option() {
    let mut strip = strip();
    strip.sectors[0].lba_stamp ^= 0x0100;
    let mut eboard = Eboard::default();

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Verify]);
    assert!(eboard.is_clean());
}

// =============================================================================
// Media and Retry
// =============================================================================

#[test]
fn test_media_error_rebuilt_and_reported_correctable() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(1);
    let mut eboard = Eboard::new(0b10, 0);

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.path, vec![ScratchState::Reconstruct1]);
    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(eboard.c_media_bitmap, 0b10);
    assert_eq!(strip.sectors[1], original[1]);
}

#[test]
fn test_media_errors_never_invalidated() {
    let mut strip = strip();
    for pos in 1..4 {
        strip.kill(pos);
    }
    let mut eboard = Eboard::new(0b1110, 0);

    let report = evaluate(&mut strip, &mut eboard);

    assert!(report.unreconstructible);
    assert_eq!(report.outcome, StripOutcome::Deferred);
    assert_eq!(report.invalid_bitmask, 0b1110);
    assert_eq!(eboard.invalidated_bitmap, 0);
    assert_eq!(eboard.u_media_bitmap, 0b1110);
    assert_eq!(eboard.modified_bitmap, 0);
    assert!(strip.sectors[1].invalidation_reason().is_none());
}

#[test]
fn test_retry_positions_deferred_until_final_attempt() {
    let mut strip = strip();
    for pos in 1..4 {
        strip.kill(pos);
    }
    let mut eboard = Eboard::new(0, 0b1110);

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.outcome, StripOutcome::Deferred);
    assert_eq!(report.invalid_bitmask, 0b1110);
    assert_eq!(eboard.invalidated_bitmap, 0);
    assert_eq!(eboard.modified_bitmap & 0b1110, 0);
}

#[test]
fn test_retry_positions_invalidated_on_final_attempt() {
    let mut strip = strip();
    for pos in 1..4 {
        strip.kill(pos);
    }
    strip.final_recovery_attempt = true;
    let mut eboard = Eboard::new(0, 0b1110);

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.outcome, StripOutcome::Invalidated);
    assert_eq!(report.invalid_bitmask, 0b1110);
    assert_eq!(eboard.invalidated_bitmap, 0b1110);
    // Retryable positions are never reported as written.
    assert_eq!(eboard.modified_bitmap & 0b1110, 0);
    assert_eq!(eboard.modified_bitmap & PARITY, PARITY);
}

#[test]
fn test_retry_rebuild_not_reported_modified() {
    let mut strip = strip();
    let original = strip.sectors.clone();
    strip.kill(0);
    let mut eboard = Eboard::new(0, 0b1);

    let report = evaluate(&mut strip, &mut eboard);

    assert_eq!(report.invalid_bitmask, 0);
    assert_eq!(eboard.modified_bitmap, 0);
    assert_eq!(eboard.c_crc_bitmap, 0);
    assert_eq!(strip.sectors, original);
}

// =============================================================================
// Diagnostics and Metrics
// =============================================================================

#[test]
fn test_trace_ring_records_invalidation() {
    let ring = TraceRing::new(64);
    let mut strip = strip();
    strip.sectors[1].crc ^= 0x0101;
    strip.reencode().expect("Failed to re-encode");
    let mut eboard = Eboard::default();

    evaluate_on(&mut strip, &mut eboard, &ring);

    assert_eq!(ring.count(TraceCategory::Invalidation), 1);
    assert!(ring.count(TraceCategory::Checksum) >= 1);
    assert!(ring.records().iter().all(|record| record.sector.is_none()));
}

#[test]
fn test_trace_sectors_option_snapshots_sectors() {
    let ring = TraceRing::new(64);
    let mut strip = strip();
    strip.sectors[1].crc ^= 0x0101;
    strip.option_flags = OptionFlags::TRACE_SECTORS;
    let mut eboard = Eboard::default();

    evaluate_on(&mut strip, &mut eboard, &ring);

    let snapshots: Vec<_> = ring
        .records()
        .into_iter()
        .filter_map(|record| record.sector)
        .collect();
    assert!(!snapshots.is_empty());
    assert!(snapshots.iter().all(|s| s.lba == LBA));
    assert!(snapshots.iter().any(|s| s.position_bitmask == 0b10));
}

#[test]
fn test_trace_sectors_option_snapshots_invalidated_sector() {
    let ring = TraceRing::new(64);
    let mut strip = strip();
    strip.sectors[1].crc ^= 0x0101;
    strip.reencode().expect("Failed to re-encode");
    strip.option_flags = OptionFlags::TRACE_SECTORS;
    let mut eboard = Eboard::default();

    evaluate_on(&mut strip, &mut eboard, &ring);

    assert_eq!(eboard.invalidated_bitmap, 0b10);
    let invalidated: Vec<_> = ring
        .records()
        .into_iter()
        .filter(|record| record.category == TraceCategory::Checksum)
        .filter_map(|record| record.sector)
        .filter(|snapshot| snapshot.position_bitmask == 0b10 && snapshot.crc == strip.sectors[1].crc)
        .collect();
    assert!(!invalidated.is_empty());
}

#[test]
fn test_evaluator_records_metrics() {
    let registry = Registry::new();
    let metrics = EvaluationMetrics::new(&registry).expect("Failed to register metrics");
    let ring = Arc::new(TraceRing::default());
    let evaluator = Raid6Evaluator::new(EvaluatorConfig::default())
        .expect("Failed to create evaluator")
        .with_sink(ring.clone())
        .with_metrics(metrics.clone());

    let mut clean = strip();
    evaluator
        .evaluate(&mut Eboard::default(), clean.unit())
        .expect("Evaluation failed");

    let mut degraded = strip();
    degraded.kill(2);
    degraded.rebuild_pos = [2, INVALID_POSITION];
    evaluator
        .evaluate(&mut Eboard::default(), degraded.unit())
        .expect("Evaluation failed");

    assert_eq!(metrics.strips_evaluated(), 2);
    assert_eq!(metrics.reconstructions("reconstruct_1", "repaired"), 1);
    assert_eq!(metrics.sectors_invalidated(), 0);

    let text = encode_text(&registry).expect("Failed to encode metrics");
    assert!(text.contains("stripeguard_reconstructions_total"));
}

#[test]
fn test_evaluator_rejects_invalid_config() {
    let config = EvaluatorConfig {
        max_passes: 0,
        ..Default::default()
    };
    assert_matches!(
        Raid6Evaluator::new(config),
        Err(stripeguard::Error::Config(_))
    );
}

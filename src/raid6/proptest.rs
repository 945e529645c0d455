//! Property-Based Tests for the RAID-6 Engine
//!
//! Uses proptest to drive whole-strip evaluations over random widths,
//! payloads and loss patterns.
//!
//! # Test Properties
//!
//! 1. **Verify Idempotence**: a clean strip is left untouched, every time
//! 2. **Single Loss**: one dead data position is rebuilt bit for bit
//! 3. **Double Loss**: any two dead data positions are rebuilt bit for bit
//! 4. **Stale Parity**: one dead data position next to a stale parity
//!    column is rebuilt from the other parity
//! 5. **Parity Never Uncorrectable**: no uncorrectable bit lands on parity
//! 6. **Bounded Passes**: at most two losses always settle within the bound
//! 7. **Retry Exclusion**: retryable positions are never reported written

#![cfg(test)]

use proptest::prelude::*;

use crate::diagnostics::NoopSink;

use super::config::{EvaluatorConfig, MAX_PASSES};
use super::constants::RaidSixConstants;
use super::eboard::Eboard;
use super::orchestrator::{evaluate_with_report, EvaluationReport};
use super::position::{DIAG_PARITY, INVALID_POSITION, MAX_WIDTH, MIN_WIDTH, ROW_PARITY};
use super::scratch::ScratchState;
use super::sector::WORDS_PER_BLOCK;
use super::synthetic::SyntheticStrip;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for strip widths the engine accepts.
fn width_strategy() -> impl Strategy<Value = usize> {
    MIN_WIDTH..=MAX_WIDTH
}

/// Strategy for time stamps that identify a real full-strip write.
fn time_stamp_strategy() -> impl Strategy<Value = u16> {
    1u16..0x7FFE
}

/// Strategy for a strip built from random payloads.
fn strip_strategy() -> impl Strategy<Value = SyntheticStrip> {
    (width_strategy(), any::<u64>(), time_stamp_strategy()).prop_flat_map(|(width, lba, ts)| {
        prop::collection::vec(prop::array::uniform32(any::<u32>()), width - 2).prop_map(move |seeds| {
            let payloads: Vec<[u32; WORDS_PER_BLOCK]> = seeds
                .iter()
                .map(|seed| {
                    let mut data = [0u32; WORDS_PER_BLOCK];
                    for (i, word) in data.iter_mut().enumerate() {
                        *word = seed[i % 32].rotate_left((i / 32) as u32);
                    }
                    data
                })
                .collect();
            SyntheticStrip::with_payloads(lba, ts, &payloads).unwrap()
        })
    })
}

/// Strategy for a strip plus two distinct positions below `limit(width)`.
fn strip_with_pair<F>(limit: F) -> impl Strategy<Value = (SyntheticStrip, usize, usize)>
where
    F: Fn(usize) -> usize + Clone + 'static,
{
    strip_strategy().prop_flat_map(move |strip| {
        let bound = limit(strip.width());
        (Just(strip), 0..bound, 0..bound)
            .prop_filter("distinct positions", |(_, a, b)| a != b)
    })
}

fn run(strip: &mut SyntheticStrip, eboard: &mut Eboard) -> EvaluationReport {
    evaluate_with_report(
        eboard,
        strip.unit(),
        RaidSixConstants::global(),
        &NoopSink,
        &EvaluatorConfig::default(),
    )
    .unwrap()
}

// =============================================================================
// Verify Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: verifying a clean strip twice changes nothing and reports nothing.
    #[test]
    fn prop_verify_is_idempotent(mut strip in strip_strategy()) {
        let original = strip.sectors.clone();
        for _ in 0..2 {
            let mut eboard = Eboard::default();
            let report = run(&mut strip, &mut eboard);
            prop_assert_eq!(&report.path, &vec![ScratchState::Verify]);
            prop_assert!(eboard.is_clean());
            prop_assert_eq!(eboard.modified_bitmap, 0);
            prop_assert_eq!(&strip.sectors, &original);
        }
    }
}

// =============================================================================
// Recovery Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: one dead data position is restored exactly.
    #[test]
    fn prop_single_loss_recovered(
        (mut strip, dead) in strip_strategy().prop_flat_map(|strip| {
            let columns = strip.width() - 2;
            (Just(strip), 0..columns)
        }),
    ) {
        let original = strip.sectors.clone();
        strip.kill(dead);
        strip.rebuild_pos = [dead as u16, INVALID_POSITION];

        let mut eboard = Eboard::default();
        let report = run(&mut strip, &mut eboard);
        prop_assert_eq!(report.invalid_bitmask, 0);
        prop_assert_eq!(&report.path, &vec![ScratchState::Reconstruct1]);
        prop_assert_eq!(&strip.sectors, &original);
        prop_assert_eq!(eboard.u_bitmap(), 0);
    }

    /// Property: any two dead data positions are restored exactly.
    #[test]
    fn prop_double_loss_recovered(
        (mut strip, first, second) in strip_with_pair(|width| width - 2),
    ) {
        let original = strip.sectors.clone();
        strip.kill(first);
        strip.kill(second);
        strip.rebuild_pos = [first as u16, second as u16];

        let mut eboard = Eboard::default();
        let report = run(&mut strip, &mut eboard);
        prop_assert_eq!(report.invalid_bitmask, 0);
        prop_assert_eq!(&report.path, &vec![ScratchState::Reconstruct2]);
        prop_assert_eq!(&strip.sectors, &original);
        prop_assert_eq!(eboard.invalidated_bitmap, 0);
    }

    /// Property: a dead data position beside a silently stale parity column
    /// is rebuilt from the intact parity, and the stale column is rewritten.
    #[test]
    fn prop_single_loss_with_stale_parity_recovered(
        (mut strip, dead) in strip_strategy().prop_flat_map(|strip| {
            let columns = strip.width() - 2;
            (Just(strip), 0..columns)
        }),
        stale_diag in any::<bool>(),
        word in 0usize..WORDS_PER_BLOCK,
        bit in 0u32..32,
    ) {
        let original = strip.sectors.clone();
        let which = if stale_diag { DIAG_PARITY } else { ROW_PARITY };
        let stale = strip.geometry().unwrap().parity_position(which);
        strip.kill(dead);
        strip.rebuild_pos = [dead as u16, INVALID_POSITION];
        strip.sectors[stale].data[word] ^= 1 << bit;
        strip.sectors[stale].stamp_crc();

        let mut eboard = Eboard::default();
        let report = run(&mut strip, &mut eboard);
        prop_assert_eq!(report.invalid_bitmask, 0);
        prop_assert_eq!(&report.path, &vec![ScratchState::Reconstruct1]);
        prop_assert_eq!(eboard.c_coh_bitmap, 1u16 << stale);
        prop_assert_eq!(eboard.u_bitmap(), 0);
        prop_assert_eq!(&strip.sectors, &original);
    }

    /// Property: at most two dead positions of any kind settle within the
    /// pass bound and leave nothing fatal behind.
    #[test]
    fn prop_bounded_passes(
        (mut strip, first, second) in strip_with_pair(|width| width),
    ) {
        let original = strip.sectors.clone();
        strip.kill(first);
        strip.kill(second);
        strip.rebuild_pos = [first as u16, second as u16];

        let mut eboard = Eboard::default();
        let report = run(&mut strip, &mut eboard);
        prop_assert!(report.passes <= MAX_PASSES);
        prop_assert_eq!(report.invalid_bitmask, 0);
        prop_assert_eq!(&strip.sectors, &original);
    }
}

// =============================================================================
// Error Board Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: whatever mix of losses and corruption, parity positions never
    /// carry an uncorrectable bit.
    #[test]
    fn prop_parity_never_uncorrectable(
        (mut strip, first, second) in strip_with_pair(|width| width),
        corrupt in prop::option::of((0usize..MAX_WIDTH, 0usize..WORDS_PER_BLOCK, 0u32..32)),
        media in 0usize..MAX_WIDTH,
        use_media in any::<bool>(),
        final_attempt in any::<bool>(),
    ) {
        let width = strip.width();
        strip.kill(first);
        strip.kill(second);
        strip.rebuild_pos = [first as u16, second as u16];
        strip.final_recovery_attempt = final_attempt;
        if let Some((pos, word, bit)) = corrupt {
            strip.sectors[pos % width].data[word] ^= 1 << bit;
        }

        let mut eboard = Eboard::default();
        if use_media {
            eboard.hard_media_err_bitmap = 1 << (media % width);
        }
        let report = run(&mut strip, &mut eboard);
        let parity = strip.geometry().unwrap().parity_bitmap();

        prop_assert!(report.passes <= MAX_PASSES);
        prop_assert_eq!(eboard.u_crc_bitmap & parity, 0);
        prop_assert_eq!(eboard.u_bitmap() & parity, 0);
        prop_assert!(eboard.overlap().is_none());
    }

    /// Property: retryable positions never show up as written or corrected.
    #[test]
    fn prop_retry_positions_excluded(
        (mut strip, first, second) in strip_with_pair(|width| width),
        both in any::<bool>(),
    ) {
        let retry = if both { (1u16 << first) | (1 << second) } else { 1u16 << first };
        let mut eboard = Eboard::new(0, retry);
        let report = run(&mut strip, &mut eboard);

        prop_assert_eq!(eboard.modified_bitmap & retry, 0);
        prop_assert_eq!(eboard.c_crc_bitmap & retry, 0);
        prop_assert_eq!(report.invalid_bitmask & !retry, 0);
    }
}

//! Strip Evaluation Context
//!
//! Everything one evaluation call borrows or builds, shared by the evaluator,
//! the finish steps, the stamp engine and the invalidation path.

use crate::diagnostics::{DiagnosticSink, SectorTrace, TraceCategory, TraceLevel};

use super::config::OptionFlags;
use super::constants::RaidSixConstants;
use super::eboard::{Eboard, ErrorCategory};
use super::position::{positions, StripGeometry};
use super::scratch::{Scratch, ScratchState};
use super::sector::Sector;

pub(crate) struct StripContext<'a> {
    pub geometry: StripGeometry,
    pub sectors: &'a mut [Sector],
    pub eboard: &'a mut Eboard,
    pub scratch: Scratch,
    pub sink: &'a dyn DiagnosticSink,
    pub constants: &'a RaidSixConstants,
    pub options: OptionFlags,
    pub seed: u64,
    pub offset: u64,
    pub group_id: u32,
    pub final_attempt: bool,
    /// Positions the caller asked to rebuild
    pub rebuild_bitmap: u16,
    /// Both parity sectors were rewritten or verified against the data
    pub parity_settled: bool,
}

impl<'a> StripContext<'a> {
    /// LBA of the strip's data sectors.
    pub fn lba(&self) -> u64 {
        self.seed.wrapping_add(self.offset)
    }

    pub fn key(&self, pos: usize) -> u16 {
        self.geometry.bitkey(pos)
    }

    pub fn set_state(&mut self, state: ScratchState) {
        self.scratch.state = state;
    }

    pub fn mark_modified(&mut self, mask: u16) {
        self.eboard.modified_bitmap |= mask;
    }

    /// Every data sector holds the never-written image.
    pub fn all_data_zeroed(&self) -> bool {
        self.geometry
            .data_positions()
            .all(|pos| self.sectors[pos].is_zeroed_image() && self.sectors[pos].lba_stamp == 0)
    }

    /// Record an error on the board and tell the sink about it.
    pub fn record_error(&mut self, category: ErrorCategory, mask: u16, correctable: bool, message: &str) {
        if mask == 0 {
            return;
        }
        self.eboard.merge_error(category, mask, correctable);

        let level = if correctable {
            TraceLevel::Info
        } else {
            TraceLevel::Warning
        };
        let trace_category = trace_category(category);
        self.sink.report_error(message, level, trace_category);

        if self.options.contains(OptionFlags::TRACE_SECTORS) {
            for pos in positions(mask) {
                self.sink.trace_sector(&SectorTrace {
                    lba: self.seed.wrapping_add(self.offset),
                    position_bitmask: self.geometry.bitkey(pos),
                    bits_diff: 0,
                    group_id: self.group_id,
                    group_offset: self.offset,
                    sector: &self.sectors[pos],
                    label: message,
                    level,
                    category: trace_category,
                });
            }
        }
    }
}

fn trace_category(category: ErrorCategory) -> TraceCategory {
    match category {
        ErrorCategory::Crc | ErrorCategory::RaidCrc | ErrorCategory::CorruptCrc => TraceCategory::Checksum,
        ErrorCategory::Coh | ErrorCategory::PocCoh | ErrorCategory::NPocCoh | ErrorCategory::CohUnk => {
            TraceCategory::Coherency
        }
        ErrorCategory::Ts | ErrorCategory::Ws | ErrorCategory::LbaStamp => TraceCategory::Stamp,
        ErrorCategory::Media => TraceCategory::Reconstruction,
    }
}

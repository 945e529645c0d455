//! Error Board
//!
//! Per-evaluation accumulator of error bitmaps. Every category keeps a
//! correctable (`c_`) and an uncorrectable (`u_`) bitmap over strip positions.
//! The caller zeroes the board, seeds the two input bitmaps, and reads the
//! whole board back afterwards to decide what to write, retry or report.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Error class tracked on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Stored checksum does not match the payload
    Crc,
    /// Payload disagrees with parity
    Coh,
    /// Checksum disagrees with the parity of checksums
    PocCoh,
    /// Parity of checksums inconsistent with no single culprit
    NPocCoh,
    /// Coherency error whose position cannot be trusted
    CohUnk,
    /// Time stamp
    Ts,
    /// Write stamp
    Ws,
    /// LBA stamp
    LbaStamp,
    /// Media error on read
    Media,
    /// Previously invalidated by this engine
    RaidCrc,
    /// Previously invalidated by a corrupt-crc request
    CorruptCrc,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::Crc,
        ErrorCategory::Coh,
        ErrorCategory::PocCoh,
        ErrorCategory::NPocCoh,
        ErrorCategory::CohUnk,
        ErrorCategory::Ts,
        ErrorCategory::Ws,
        ErrorCategory::LbaStamp,
        ErrorCategory::Media,
        ErrorCategory::RaidCrc,
        ErrorCategory::CorruptCrc,
    ];

    /// Categories that report a prior invalidation rather than a fresh error.
    pub fn is_invalidation_report(&self) -> bool {
        matches!(self, ErrorCategory::RaidCrc | ErrorCategory::CorruptCrc)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Crc => "crc",
            ErrorCategory::Coh => "coh",
            ErrorCategory::PocCoh => "poc_coh",
            ErrorCategory::NPocCoh => "n_poc_coh",
            ErrorCategory::CohUnk => "coh_unk",
            ErrorCategory::Ts => "ts",
            ErrorCategory::Ws => "ws",
            ErrorCategory::LbaStamp => "lba_stamp",
            ErrorCategory::Media => "media",
            ErrorCategory::RaidCrc => "raid_crc",
            ErrorCategory::CorruptCrc => "corrupt_crc",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Eboard
// =============================================================================

/// Error board for one strip evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eboard {
    // Inputs, seeded by the caller
    pub hard_media_err_bitmap: u16,
    pub retry_err_bitmap: u16,

    pub c_crc_bitmap: u16,
    pub u_crc_bitmap: u16,
    pub c_coh_bitmap: u16,
    pub u_coh_bitmap: u16,
    pub c_poc_coh_bitmap: u16,
    pub u_poc_coh_bitmap: u16,
    pub c_n_poc_coh_bitmap: u16,
    pub u_n_poc_coh_bitmap: u16,
    pub c_coh_unk_bitmap: u16,
    pub u_coh_unk_bitmap: u16,
    pub c_ts_bitmap: u16,
    pub u_ts_bitmap: u16,
    pub c_ws_bitmap: u16,
    pub u_ws_bitmap: u16,
    pub c_lba_stamp_bitmap: u16,
    pub u_lba_stamp_bitmap: u16,
    pub c_media_bitmap: u16,
    pub u_media_bitmap: u16,
    pub c_raid_crc_bitmap: u16,
    pub u_raid_crc_bitmap: u16,
    pub c_corrupt_crc_bitmap: u16,
    pub u_corrupt_crc_bitmap: u16,

    /// Positions invalidated by this evaluation
    pub invalidated_bitmap: u16,
    /// Buffers the caller must write back
    pub modified_bitmap: u16,
}

impl Eboard {
    /// A zeroed board seeded with the read results.
    pub fn new(hard_media_err_bitmap: u16, retry_err_bitmap: u16) -> Self {
        Self {
            hard_media_err_bitmap,
            retry_err_bitmap,
            ..Default::default()
        }
    }

    /// Correctable and uncorrectable bitmaps of one category.
    pub fn bitmaps(&self, category: ErrorCategory) -> (u16, u16) {
        match category {
            ErrorCategory::Crc => (self.c_crc_bitmap, self.u_crc_bitmap),
            ErrorCategory::Coh => (self.c_coh_bitmap, self.u_coh_bitmap),
            ErrorCategory::PocCoh => (self.c_poc_coh_bitmap, self.u_poc_coh_bitmap),
            ErrorCategory::NPocCoh => (self.c_n_poc_coh_bitmap, self.u_n_poc_coh_bitmap),
            ErrorCategory::CohUnk => (self.c_coh_unk_bitmap, self.u_coh_unk_bitmap),
            ErrorCategory::Ts => (self.c_ts_bitmap, self.u_ts_bitmap),
            ErrorCategory::Ws => (self.c_ws_bitmap, self.u_ws_bitmap),
            ErrorCategory::LbaStamp => (self.c_lba_stamp_bitmap, self.u_lba_stamp_bitmap),
            ErrorCategory::Media => (self.c_media_bitmap, self.u_media_bitmap),
            ErrorCategory::RaidCrc => (self.c_raid_crc_bitmap, self.u_raid_crc_bitmap),
            ErrorCategory::CorruptCrc => (self.c_corrupt_crc_bitmap, self.u_corrupt_crc_bitmap),
        }
    }

    fn bitmaps_mut(&mut self, category: ErrorCategory) -> (&mut u16, &mut u16) {
        match category {
            ErrorCategory::Crc => (&mut self.c_crc_bitmap, &mut self.u_crc_bitmap),
            ErrorCategory::Coh => (&mut self.c_coh_bitmap, &mut self.u_coh_bitmap),
            ErrorCategory::PocCoh => (&mut self.c_poc_coh_bitmap, &mut self.u_poc_coh_bitmap),
            ErrorCategory::NPocCoh => (&mut self.c_n_poc_coh_bitmap, &mut self.u_n_poc_coh_bitmap),
            ErrorCategory::CohUnk => (&mut self.c_coh_unk_bitmap, &mut self.u_coh_unk_bitmap),
            ErrorCategory::Ts => (&mut self.c_ts_bitmap, &mut self.u_ts_bitmap),
            ErrorCategory::Ws => (&mut self.c_ws_bitmap, &mut self.u_ws_bitmap),
            ErrorCategory::LbaStamp => (&mut self.c_lba_stamp_bitmap, &mut self.u_lba_stamp_bitmap),
            ErrorCategory::Media => (&mut self.c_media_bitmap, &mut self.u_media_bitmap),
            ErrorCategory::RaidCrc => (&mut self.c_raid_crc_bitmap, &mut self.u_raid_crc_bitmap),
            ErrorCategory::CorruptCrc => {
                (&mut self.c_corrupt_crc_bitmap, &mut self.u_corrupt_crc_bitmap)
            }
        }
    }

    /// OR `mask` into the correctable or uncorrectable bitmap of `category`.
    pub fn merge_error(&mut self, category: ErrorCategory, mask: u16, correctable: bool) {
        if mask == 0 {
            return;
        }
        let (c, u) = self.bitmaps_mut(category);
        if correctable {
            *c |= mask;
        } else {
            *u |= mask;
        }
        trace!(
            category = category.as_str(),
            mask = format_args!("{:#06x}", mask),
            correctable,
            "Eboard merge"
        );
    }

    /// Drop both bitmaps of `category` for the positions in `mask`.
    pub fn clear_errors(&mut self, category: ErrorCategory, mask: u16) {
        let (c, u) = self.bitmaps_mut(category);
        *c &= !mask;
        *u &= !mask;
    }

    /// Move uncorrectable bits of repaired positions to correctable.
    /// Invalidation reports are left alone.
    pub fn mark_corrected(&mut self, mask: u16) {
        for category in ErrorCategory::ALL {
            if category.is_invalidation_report() {
                continue;
            }
            let (c, u) = self.bitmaps_mut(category);
            let moved = *u & mask;
            *u &= !moved;
            *c |= moved;
        }
    }

    /// Every position with a correctable bit in any category.
    pub fn c_bitmap(&self) -> u16 {
        ErrorCategory::ALL
            .iter()
            .fold(0, |acc, category| acc | self.bitmaps(*category).0)
    }

    /// Every position with an uncorrectable bit in any category.
    pub fn u_bitmap(&self) -> u16 {
        ErrorCategory::ALL
            .iter()
            .fold(0, |acc, category| acc | self.bitmaps(*category).1)
    }

    /// Uncorrectable positions, not counting invalidation reports.
    pub fn u_error_bitmap(&self) -> u16 {
        ErrorCategory::ALL
            .iter()
            .filter(|category| !category.is_invalidation_report())
            .fold(0, |acc, category| acc | self.bitmaps(*category).1)
    }

    /// First category with a position both correctable and uncorrectable.
    pub fn overlap(&self) -> Option<(ErrorCategory, u16)> {
        ErrorCategory::ALL.iter().find_map(|category| {
            let (c, u) = self.bitmaps(*category);
            (c & u != 0).then_some((*category, c & u))
        })
    }

    /// No error recorded and nothing to write back.
    pub fn is_clean(&self) -> bool {
        self.c_bitmap() == 0
            && self.u_bitmap() == 0
            && self.invalidated_bitmap == 0
            && self.modified_bitmap == 0
    }
}

//! Sector Format
//!
//! The fixed-size block every strip position holds: a 512-byte payload plus
//! the checksum and the three metadata stamps.
//!
//! ```text
//! ┌──────────────────────────────┬───────┬───────────┬────────────┬─────────────┐
//! │ data: 128 x u32 (512 bytes)  │  crc  │ lba_stamp │ time_stamp │ write_stamp │
//! └──────────────────────────────┴───────┴───────────┴────────────┴─────────────┘
//! ```
//!
//! On parity sectors the `lba_stamp` field carries the parity-of-checksums
//! for that parity column instead of an LBA stamp.

use serde::{Deserialize, Serialize};

/// 32-bit words in one sector payload
pub const WORDS_PER_BLOCK: usize = 128;

/// Seed folded into every raw checksum
pub const SECTOR_CHECKSUM_SEED: u32 = 0x0000_AF76;

/// Cooked checksum of an all-zero payload
pub const ZEROED_CRC: u16 = cook_checksum(SECTOR_CHECKSUM_SEED);

/// Time stamp of a sector that has never been written since bind
pub const INITIAL_TSTAMP: u16 = 0x0000;

/// Time stamp carried by sectors written through a partial (468) write
pub const INVALID_TSTAMP: u16 = 0x7FFF;

/// Parity-only flag: every data position carries this time stamp
pub const ALL_TSTAMPS: u16 = 0x8000;

/// First payload word of a block invalidated on purpose
pub const INVALIDATED_MAGIC: u32 = 0xBAD0_DA7A;

// =============================================================================
// Checksums and Stamps
// =============================================================================

/// Raw (uncooked) checksum of a payload.
pub fn calculate_checksum(data: &[u32]) -> u32 {
    data.iter().fold(SECTOR_CHECKSUM_SEED, |acc, word| acc ^ word)
}

/// Fold a raw checksum down to the 16 bits stored in the sector.
pub const fn cook_checksum(raw: u32) -> u16 {
    let folded = ((raw >> 16) ^ raw) as u16;
    folded.rotate_left(1)
}

/// LBA stamp expected on a data sector at `lba`.
pub fn lba_stamp_for(lba: u64) -> u16 {
    (lba ^ (lba >> 16) ^ (lba >> 32) ^ (lba >> 48)) as u16
}

/// True for time stamps that identify an actual write.
pub fn is_real_time_stamp(time_stamp: u16) -> bool {
    let stamp = time_stamp & !ALL_TSTAMPS;
    stamp != INITIAL_TSTAMP && stamp != INVALID_TSTAMP
}

// =============================================================================
// Invalidated Blocks
// =============================================================================

/// Why a sector's payload was deliberately destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Invalidated by this engine after an unrecoverable strip
    RaidCrc,
    /// Invalidated on request (corrupt-crc command)
    CorruptCrc,
}

impl InvalidationReason {
    const ALL: [InvalidationReason; 2] = [InvalidationReason::RaidCrc, InvalidationReason::CorruptCrc];

    /// Code stored in payload word 1
    pub fn code(&self) -> u32 {
        match self {
            InvalidationReason::RaidCrc => 1,
            InvalidationReason::CorruptCrc => 2,
        }
    }

    /// Pattern XORed into the good checksum so the block always reads back bad
    pub fn crc_flip(&self) -> u16 {
        match self {
            InvalidationReason::RaidCrc => 0x5A5A,
            InvalidationReason::CorruptCrc => 0xC3C3,
        }
    }
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::RaidCrc => write!(f, "raid-crc"),
            InvalidationReason::CorruptCrc => write!(f, "corrupt-crc"),
        }
    }
}

// =============================================================================
// Sector
// =============================================================================

/// One strip position's block
#[derive(Clone, PartialEq, Eq)]
pub struct Sector {
    /// Payload words
    pub data: [u32; WORDS_PER_BLOCK],
    /// Cooked checksum of `data`
    pub crc: u16,
    /// LBA stamp (data) or parity-of-checksums (parity)
    pub lba_stamp: u16,
    /// Time stamp
    pub time_stamp: u16,
    /// Write stamp
    pub write_stamp: u16,
}

impl Default for Sector {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl std::fmt::Debug for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sector")
            .field("crc", &format_args!("{:#06x}", self.crc))
            .field("lba_stamp", &format_args!("{:#06x}", self.lba_stamp))
            .field("time_stamp", &format_args!("{:#06x}", self.time_stamp))
            .field("write_stamp", &format_args!("{:#06x}", self.write_stamp))
            .field("data[0..4]", &&self.data[..4])
            .finish()
    }
}

impl Sector {
    /// The image of a freshly bound, never written sector.
    pub fn zeroed() -> Self {
        Self {
            data: [0; WORDS_PER_BLOCK],
            crc: ZEROED_CRC,
            lba_stamp: 0,
            time_stamp: INITIAL_TSTAMP,
            write_stamp: 0,
        }
    }

    /// A data sector with a valid checksum and the given stamps.
    pub fn with_data(data: [u32; WORDS_PER_BLOCK], lba_stamp: u16, time_stamp: u16, write_stamp: u16) -> Self {
        let mut sector = Self {
            data,
            crc: 0,
            lba_stamp,
            time_stamp,
            write_stamp,
        };
        sector.stamp_crc();
        sector
    }

    /// Checksum the payload would have if it were written correctly.
    pub fn computed_crc(&self) -> u16 {
        cook_checksum(calculate_checksum(&self.data))
    }

    pub fn has_valid_crc(&self) -> bool {
        self.crc == self.computed_crc()
    }

    /// Recompute and store the checksum.
    pub fn stamp_crc(&mut self) {
        self.crc = self.computed_crc();
    }

    pub fn has_zero_payload(&self) -> bool {
        self.data.iter().all(|w| *w == 0)
    }

    /// Zeroed payload with the zeroed checksum and initial stamps. The
    /// `lba_stamp` field is not inspected (parity sectors keep a POC there).
    pub fn is_zeroed_image(&self) -> bool {
        self.crc == ZEROED_CRC
            && self.time_stamp == INITIAL_TSTAMP
            && self.write_stamp == 0
            && self.has_zero_payload()
    }

    /// Reason this block was deliberately invalidated, if it was.
    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        if self.data[0] != INVALIDATED_MAGIC {
            return None;
        }
        let flip = self.crc ^ self.computed_crc();
        InvalidationReason::ALL
            .into_iter()
            .find(|reason| reason.code() == self.data[1] && reason.crc_flip() == flip)
    }

    /// Destroy the payload, leaving a recognizable invalidated block.
    pub fn invalidate(&mut self, reason: InvalidationReason, lba: u64, time_stamp: u16) {
        self.data = [0; WORDS_PER_BLOCK];
        self.data[0] = INVALIDATED_MAGIC;
        self.data[1] = reason.code();
        self.data[2] = lba as u32;
        self.data[3] = (lba >> 32) as u32;
        self.crc = self.computed_crc() ^ reason.crc_flip();
        self.lba_stamp = lba_stamp_for(lba);
        self.time_stamp = time_stamp & !ALL_TSTAMPS;
        self.write_stamp = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Precomputed RAID-6 Constants
//!
//! A freshly bound strip holds zeroed sectors everywhere, so its parity of
//! checksums depends only on the strip width. The table is computed once by a
//! pure function and shared read-only between evaluations.

use std::sync::Arc;

use once_cell::sync::Lazy;

use super::evenodd::{checksum_column, checksum_from_column, Syndrome};
use super::position::{MAX_WIDTH, MIN_WIDTH};
use super::sector::ZEROED_CRC;

static GLOBAL: Lazy<Arc<RaidSixConstants>> = Lazy::new(|| Arc::new(RaidSixConstants::compute()));

/// Parity-of-checksums pair carried by the parity sectors of a zeroed strip
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZeroedPoc {
    /// Stored on the row parity sector
    pub row: u16,
    /// Stored on the diagonal parity sector
    pub diag: u16,
}

/// Width-indexed constant table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidSixConstants {
    zeroed_poc: [ZeroedPoc; MAX_WIDTH + 1],
}

impl RaidSixConstants {
    pub fn compute() -> Self {
        let mut zeroed_poc = [ZeroedPoc::default(); MAX_WIDTH + 1];
        for (width, entry) in zeroed_poc.iter_mut().enumerate().skip(MIN_WIDTH) {
            let mut syndrome: Syndrome<u8> = Syndrome::default();
            let zeroed = checksum_column(ZEROED_CRC);
            for column in 0..width - 2 {
                syndrome.fold_data(column, &zeroed);
            }
            let (row, diag) = syndrome.parity_columns();
            *entry = ZeroedPoc {
                row: checksum_from_column(&row),
                diag: checksum_from_column(&diag),
            };
        }
        Self { zeroed_poc }
    }

    /// Process-wide table, built on first use.
    pub fn global() -> &'static Self {
        &**GLOBAL
    }

    /// Handle on the process-wide table for owners that keep it around.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    pub fn zeroed_poc(&self, width: usize) -> Option<ZeroedPoc> {
        if (MIN_WIDTH..=MAX_WIDTH).contains(&width) {
            Some(self.zeroed_poc[width])
        } else {
            None
        }
    }
}

impl Default for RaidSixConstants {
    fn default() -> Self {
        Self::compute()
    }
}

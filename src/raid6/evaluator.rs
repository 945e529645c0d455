//! Sector Evaluator
//!
//! Per-sector checks of one pass. A sector that passes is folded into the
//! running payload and checksum syndromes at its logical column; a sector
//! that fails on a data position becomes fatal and ends the pass early.

use tracing::trace;

use super::config::OptionFlags;
use super::context::StripContext;
use super::eboard::ErrorCategory;
use super::evenodd::{checksum_column, payload_column};
use super::position::{positions, DIAG_PARITY, ROW_PARITY};
use super::sector::{lba_stamp_for, InvalidationReason, ALL_TSTAMPS, INVALID_TSTAMP};

impl<'a> StripContext<'a> {
    /// Evaluate every non-fatal data sector, then every non-fatal parity
    /// sector.
    pub fn evaluate_strip(&mut self) {
        for pos in positions(self.geometry.data_bitmap()) {
            if !self.scratch.is_fatal(self.key(pos)) {
                self.evaluate_data_sector(pos);
            }
        }
        for pos in self.geometry.parity_positions() {
            if !self.scratch.is_fatal(self.key(pos)) {
                self.evaluate_parity_sector(pos);
            }
        }
    }

    pub fn evaluate_data_sector(&mut self, pos: usize) {
        let key = self.key(pos);
        let column = self.geometry.logical(pos);
        let mut fatal = false;

        let invalidated = if self.sectors[pos].has_valid_crc() {
            None
        } else {
            match self.sectors[pos].invalidation_reason() {
                Some(reason) => {
                    let category = match reason {
                        InvalidationReason::RaidCrc => ErrorCategory::RaidCrc,
                        InvalidationReason::CorruptCrc => ErrorCategory::CorruptCrc,
                    };
                    self.record_error(
                        category,
                        key,
                        false,
                        &format!("position {} holds an invalidated block ({})", pos, reason),
                    );
                    Some(reason)
                }
                None => {
                    let stored = self.sectors[pos].crc;
                    let computed = self.sectors[pos].computed_crc();
                    self.record_error(
                        ErrorCategory::Crc,
                        key,
                        false,
                        &format!(
                            "checksum mismatch on position {}: stored {:#06x}, computed {:#06x}",
                            pos, stored, computed
                        ),
                    );
                    fatal = true;
                    None
                }
            }
        };

        if self.options.contains(OptionFlags::CHECK_LBA_STAMP) && invalidated.is_none() {
            let stamp = self.sectors[pos].lba_stamp;
            let expected = lba_stamp_for(self.lba());
            if stamp != 0 && stamp != expected {
                self.record_error(
                    ErrorCategory::LbaStamp,
                    key,
                    false,
                    &format!("lba stamp {:#06x} on position {}, expected {:#06x}", stamp, pos, expected),
                );
                fatal = true;
            }
        }

        let time_stamp = self.sectors[pos].time_stamp;
        let write_stamp = self.sectors[pos].write_stamp;
        if time_stamp & ALL_TSTAMPS != 0 {
            self.record_error(
                ErrorCategory::Ts,
                key,
                false,
                &format!("all-stamps flag on data position {}", pos),
            );
            fatal = true;
        }
        if write_stamp != 0 && write_stamp != key {
            self.record_error(
                ErrorCategory::Ws,
                key,
                false,
                &format!("write stamp {:#06x} on position {} is not its own bit", write_stamp, pos),
            );
            fatal = true;
        } else if write_stamp != 0 && time_stamp != INVALID_TSTAMP {
            self.record_error(
                ErrorCategory::Ts,
                key,
                false,
                &format!("partial write on position {} carries time stamp {:#06x}", pos, time_stamp),
            );
            fatal = true;
        }

        if fatal {
            self.scratch.add_error(key);
            return;
        }

        let sector = &self.sectors[pos];
        self.scratch.data.fold_data(column, &payload_column(&sector.data));
        self.scratch.poc.fold_data(column, &checksum_column(sector.crc));
        trace!(pos, column, "Folded data sector");
    }

    pub fn evaluate_parity_sector(&mut self, pos: usize) {
        let key = self.key(pos);

        if !self.sectors[pos].has_valid_crc() {
            let stored = self.sectors[pos].crc;
            let computed = self.sectors[pos].computed_crc();
            self.record_error(
                ErrorCategory::Crc,
                key,
                false,
                &format!(
                    "checksum mismatch on parity position {}: stored {:#06x}, computed {:#06x}",
                    pos, stored, computed
                ),
            );
            self.scratch.add_error(key);
            return;
        }

        // Stamp problems on parity never stop reconstruction; the stamps are
        // rewritten once the strip settles.
        let time_stamp = self.sectors[pos].time_stamp;
        let write_stamp = self.sectors[pos].write_stamp;
        if write_stamp & !self.geometry.data_bitmap() != 0 {
            self.record_error(
                ErrorCategory::Ws,
                key,
                true,
                &format!(
                    "parity position {} write stamp {:#06x} names non-data positions",
                    pos, write_stamp
                ),
            );
        }
        if time_stamp & ALL_TSTAMPS != 0 && write_stamp != 0 {
            self.record_error(
                ErrorCategory::Ts,
                key,
                true,
                &format!(
                    "parity position {} claims all stamps with write stamp {:#06x}",
                    pos, write_stamp
                ),
            );
        }

        let sector = &self.sectors[pos];
        let payload = payload_column(&sector.data);
        let poc = checksum_column(sector.lba_stamp);
        if pos == self.geometry.parity_position(ROW_PARITY) {
            self.scratch.data.fold_row_parity(&payload);
            self.scratch.poc.fold_row_parity(&poc);
        } else if pos == self.geometry.parity_position(DIAG_PARITY) {
            self.scratch.data.fold_diag_parity(&payload);
            self.scratch.poc.fold_diag_parity(&poc);
        }
        trace!(pos, "Folded parity sector");
    }
}

//! Reconstruction Finish Steps
//!
//! Once every surviving sector of a pass has been folded, the finish step of
//! the selected state solves for what is missing:
//!
//! | State               | Dead positions                | Solve                         |
//! |---------------------|-------------------------------|-------------------------------|
//! | `Verify`            | none                          | classify the syndromes        |
//! | `Reconstruct1`      | one data (+ at most 1 parity) | row and diagonal, compared    |
//! | `Reconstruct2`      | two data                      | zig-zag over both parities    |
//! | `ReconstructParity` | one or two parity             | regenerate from data          |
//!
//! Payload and checksum are solved the same way; a rebuilt column is only
//! accepted when its payload hashes to the checksum rebuilt next to it.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::context::StripContext;
use super::eboard::ErrorCategory;
use super::evenodd::{checksum_from_column, write_payload_column, Column, Symbol, SyndromeFault};
use super::position::{positions, DIAG_PARITY, ROW_PARITY};
use super::scratch::ScratchState;
use super::sector::{
    is_real_time_stamp, lba_stamp_for, Sector, ALL_TSTAMPS, INVALID_TSTAMP, WORDS_PER_BLOCK,
};
use super::stamps::canonical_stamps;

impl<'a> StripContext<'a> {
    /// Run the finish step of the current state.
    pub fn finish_pass(&mut self) -> Result<()> {
        match self.scratch.state {
            ScratchState::Verify => self.finish_verify(),
            ScratchState::Reconstruct1 => self.finish_reconstruct_1()?,
            ScratchState::Reconstruct2 => self.finish_reconstruct_2()?,
            ScratchState::ReconstructParity => self.finish_reconstruct_p(),
            state @ (ScratchState::NotSet | ScratchState::Done) => {
                return Err(Error::UnexpectedState {
                    state: state.to_string(),
                })
            }
        }
        Ok(())
    }

    fn row_parity_key(&self) -> u16 {
        self.key(self.geometry.parity_position(ROW_PARITY))
    }

    fn diag_parity_key(&self) -> u16 {
        self.key(self.geometry.parity_position(DIAG_PARITY))
    }

    fn fault_position(&self, fault: SyndromeFault) -> Option<usize> {
        match fault {
            SyndromeFault::RowParity => Some(self.geometry.parity_position(ROW_PARITY)),
            SyndromeFault::DiagParity => Some(self.geometry.parity_position(DIAG_PARITY)),
            SyndromeFault::Data(column) => Some(self.geometry.physical(column)),
            SyndromeFault::Clean | SyndromeFault::Unknown => None,
        }
    }

    // =========================================================================
    // Verify
    // =========================================================================

    fn finish_verify(&mut self) {
        let columns = self.geometry.data_columns();
        let payload = self.scratch.data.classify(columns);
        let checksums = self.scratch.poc.classify(columns);

        if payload == SyndromeFault::Clean && checksums == SyndromeFault::Clean {
            self.rbld_parity_stamps(0);
            self.set_state(ScratchState::Done);
            return;
        }

        if payload == SyndromeFault::Unknown || checksums == SyndromeFault::Unknown {
            // No single culprit: trust the checksum-verified data and rewrite
            // both parity columns from it.
            let parity = self.geometry.parity_bitmap();
            if payload == SyndromeFault::Unknown {
                self.record_error(
                    ErrorCategory::Coh,
                    parity,
                    true,
                    "coherency error with no single culprit, parity regenerated",
                );
            }
            if checksums == SyndromeFault::Unknown {
                self.record_error(
                    ErrorCategory::NPocCoh,
                    parity,
                    true,
                    "parity of checksums inconsistent with no single culprit, regenerated",
                );
            }
            self.regenerate_parity(parity);
            self.rbld_parity_stamps(0);
            self.set_state(ScratchState::Done);
            return;
        }

        for (fault, category) in [(payload, ErrorCategory::Coh), (checksums, ErrorCategory::PocCoh)] {
            if let Some(pos) = self.fault_position(fault) {
                let key = self.key(pos);
                self.record_error(
                    category,
                    key,
                    false,
                    &format!("{} located on position {}", category, pos),
                );
                self.scratch.add_error(key);
            }
        }
        debug!(?payload, ?checksums, "Coherency fault located, reselecting");
    }

    // =========================================================================
    // Reconstruct
    // =========================================================================

    /// Turn solved columns into a sector, or `None` when the payload does not
    /// hash to the solved checksum.
    fn rebuilt_sector(&self, pos: usize, payload: &Column<Symbol>, checksum: &Column<u8>) -> Option<Sector> {
        let mut data = [0u32; WORDS_PER_BLOCK];
        write_payload_column(payload, &mut data);
        let mut sector = Sector {
            data,
            crc: checksum_from_column(checksum),
            ..Sector::zeroed()
        };
        if !sector.has_valid_crc() && sector.invalidation_reason().is_none() {
            warn!(
                pos,
                solved = format_args!("{:#06x}", sector.crc),
                computed = format_args!("{:#06x}", sector.computed_crc()),
                "Rebuilt payload does not match rebuilt checksum"
            );
            return None;
        }

        let key = self.key(pos);
        let parity = if self.scratch.is_fatal(self.row_parity_key()) {
            &self.sectors[self.geometry.parity_position(DIAG_PARITY)]
        } else {
            &self.sectors[self.geometry.parity_position(ROW_PARITY)]
        };
        sector.write_stamp = parity.write_stamp & key;
        sector.time_stamp = if sector.write_stamp != 0 {
            INVALID_TSTAMP
        } else {
            let authoritative = self.geometry.data_bitmap() & !self.scratch.fatal_key;
            let survivors = canonical_stamps(&*self.sectors, &self.geometry, authoritative);
            if is_real_time_stamp(survivors.time_stamp) {
                survivors.time_stamp
            } else {
                parity.time_stamp & !ALL_TSTAMPS
            }
        };
        sector.lba_stamp = lba_stamp_for(self.lba());
        Some(sector)
    }

    fn finish_reconstruct_1(&mut self) -> Result<()> {
        let dead_data = self.scratch.fatal_key & self.geometry.data_bitmap();
        let pos = positions(dead_data).next().ok_or_else(|| Error::UnexpectedState {
            state: format!("{} without a dead data position", self.scratch.state),
        })?;
        let column = self.geometry.logical(pos);
        let dead_parity = self.scratch.fatal_key & self.geometry.parity_bitmap();

        let rebuilt = if dead_parity == 0 {
            self.rebuild_one_cross_checked(pos, column)
        } else if !self.scratch.is_fatal(self.row_parity_key()) {
            let payload = self.scratch.data.rebuild_one_from_row();
            let checksum = self.scratch.poc.rebuild_one_from_row();
            self.rebuilt_sector(pos, &payload, &checksum).map(|sector| (sector, 0))
        } else {
            let payload = self.scratch.data.rebuild_one_from_diag(column);
            let checksum = self.scratch.poc.rebuild_one_from_diag(column);
            self.rebuilt_sector(pos, &payload, &checksum).map(|sector| (sector, 0))
        };
        let Some((sector, stale_parity)) = rebuilt else {
            self.invalidate_and_repair();
            return Ok(());
        };

        self.sectors[pos] = sector;
        info!(pos, column, stale_parity, "Rebuilt data position");
        let regenerate = dead_parity | stale_parity;
        if regenerate != 0 {
            self.regenerate_parity(regenerate);
        }
        self.finish_rebuild(dead_data | dead_parity);
        Ok(())
    }

    /// Solve one dead data column from each parity column. With a single
    /// dead column the two solves must agree; a disagreement is only pinned on
    /// a parity column when the evidence points at that column alone.
    ///
    /// Returns the rebuilt sector and the parity position to regenerate.
    fn rebuild_one_cross_checked(&mut self, pos: usize, column: usize) -> Option<(Sector, u16)> {
        let row_payload = self.scratch.data.rebuild_one_from_row();
        let row_checksum = self.scratch.poc.rebuild_one_from_row();
        let diag_payload = self.scratch.data.rebuild_one_from_diag(column);
        let diag_checksum = self.scratch.poc.rebuild_one_from_diag(column);
        let payload_agrees = row_payload == diag_payload;
        let checksums_agree = row_checksum == diag_checksum;

        let from_row = self.rebuilt_sector(pos, &row_payload, &row_checksum);
        if payload_agrees && checksums_agree {
            return from_row.map(|sector| (sector, 0));
        }
        let from_diag = self.rebuilt_sector(pos, &diag_payload, &diag_checksum);

        // The checksum is linear, so a stale surviving column still lets the
        // row solve hash correctly. Only a row solve that fails its checksum,
        // or a disagreement confined to one plane, names a parity column.
        let (sector, stale) = match (from_row, from_diag) {
            (Some(sector), _) if payload_agrees || checksums_agree => (sector, self.diag_parity_key()),
            (None, Some(sector)) => (sector, self.row_parity_key()),
            (None, None) => return None,
            (Some(_), _) => {
                let survivors = self.geometry.data_bitmap() & !self.scratch.fatal_key;
                warn!(
                    pos,
                    survivors = format_args!("{:#06x}", survivors),
                    "Row and diagonal rebuilds disagree"
                );
                self.record_error(
                    ErrorCategory::CohUnk,
                    survivors,
                    false,
                    "row and diagonal rebuilds disagree with no single culprit",
                );
                return None;
            }
        };

        if !payload_agrees {
            self.record_error(
                ErrorCategory::Coh,
                stale,
                true,
                "parity disagrees with the data rebuilt from the other parity",
            );
        }
        if !checksums_agree {
            self.record_error(
                ErrorCategory::PocCoh,
                stale,
                true,
                "parity of checksums disagrees with the data rebuilt from the other parity",
            );
        }
        Some((sector, stale))
    }

    fn finish_reconstruct_2(&mut self) -> Result<()> {
        let dead_data = self.scratch.fatal_key & self.geometry.data_bitmap();
        let mut dead = positions(dead_data);
        let (Some(first), Some(second)) = (dead.next(), dead.next()) else {
            return Err(Error::UnexpectedState {
                state: format!("{} without two dead data positions", self.scratch.state),
            });
        };

        let (left_pos, right_pos) = if self.geometry.logical(first) < self.geometry.logical(second) {
            (first, second)
        } else {
            (second, first)
        };
        let left = self.geometry.logical(left_pos);
        let right = self.geometry.logical(right_pos);
        let (left_payload, right_payload) = self.scratch.data.rebuild_two(left, right);
        let (left_checksum, right_checksum) = self.scratch.poc.rebuild_two(left, right);

        let rebuilt = (
            self.rebuilt_sector(left_pos, &left_payload, &left_checksum),
            self.rebuilt_sector(right_pos, &right_payload, &right_checksum),
        );
        match rebuilt {
            (Some(left_sector), Some(right_sector)) => {
                self.sectors[left_pos] = left_sector;
                self.sectors[right_pos] = right_sector;
                info!(left_pos, right_pos, "Rebuilt two data positions");
                self.finish_rebuild(dead_data);
            }
            _ => {
                warn!(left_pos, right_pos, "Double reconstruction failed");
                self.invalidate_and_repair();
            }
        }
        Ok(())
    }

    fn finish_reconstruct_p(&mut self) {
        let dead_parity = self.scratch.fatal_key & self.geometry.parity_bitmap();
        let row_key = self.row_parity_key();
        let diag_key = self.diag_parity_key();
        let mut regenerate = dead_parity;

        // A surviving parity column is checked against the data before the
        // strip is declared settled.
        let (survivor, payload_ok, checksums_ok) = if dead_parity == row_key {
            (
                diag_key,
                self.scratch.data.diag_consistent(),
                self.scratch.poc.diag_consistent(),
            )
        } else if dead_parity == diag_key {
            (
                row_key,
                self.scratch.data.row_consistent(),
                self.scratch.poc.row_consistent(),
            )
        } else {
            (0, true, true)
        };
        if !payload_ok {
            self.record_error(
                ErrorCategory::Coh,
                survivor,
                true,
                "surviving parity disagrees with data, regenerated",
            );
            regenerate |= survivor;
        }
        if !checksums_ok {
            self.record_error(
                ErrorCategory::PocCoh,
                survivor,
                true,
                "surviving parity of checksums disagrees with data, regenerated",
            );
            regenerate |= survivor;
        }

        self.regenerate_parity(regenerate);
        self.finish_rebuild(dead_parity);
    }

    /// Bookkeeping once `resolved` positions hold good content again.
    fn finish_rebuild(&mut self, resolved: u16) {
        self.eboard.mark_corrected(resolved);
        let media = resolved & self.scratch.media_err_bitmap;
        self.record_error(
            ErrorCategory::Media,
            media,
            true,
            "media error positions rebuilt",
        );
        self.mark_modified(resolved);
        self.scratch.resolve(resolved);
        self.rbld_parity_stamps(resolved);
        self.set_state(ScratchState::Done);
    }
}

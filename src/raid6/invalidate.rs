//! Invalidation & Parity Repair
//!
//! Last resort when the dead positions cannot be solved. Unrecoverable data
//! sectors are overwritten with a recognizable invalidated block so that the
//! strip stays consistent, then parity is regenerated when that is safe.
//!
//! Media and (non-final) retryable positions are never invalidated: their
//! buffers hold nothing, and another path owns their recovery.

use tracing::{debug, warn};

use crate::diagnostics::{TraceCategory, TraceLevel};

use super::context::StripContext;
use super::eboard::ErrorCategory;
use super::position::positions;
use super::scratch::ScratchState;
use super::sector::InvalidationReason;
use super::stamps::canonical_stamps;

impl<'a> StripContext<'a> {
    pub fn invalidate_and_repair(&mut self) {
        let data_bitmap = self.geometry.data_bitmap();
        let parity_bitmap = self.geometry.parity_bitmap();
        let dead_data = self.scratch.fatal_key & data_bitmap;

        let media = dead_data & self.scratch.media_err_bitmap;
        let retry = if self.final_attempt {
            0
        } else {
            dead_data & self.scratch.retry_err_bitmap & !media
        };
        let must_invalidate = dead_data & !media & !retry;

        self.record_error(
            ErrorCategory::Media,
            media,
            false,
            "media error positions left for the rebuild path",
        );

        let stamps = canonical_stamps(&*self.sectors, &self.geometry, data_bitmap & !self.scratch.fatal_key);
        let lba = self.lba();
        for pos in positions(must_invalidate) {
            self.sectors[pos].invalidate(InvalidationReason::RaidCrc, lba, stamps.time_stamp);
            warn!(pos, lba, "Invalidated unrecoverable sector");
            self.sink.report_error(
                &format!("position {} invalidated at lba {:#x}", pos, lba),
                TraceLevel::Error,
                TraceCategory::Invalidation,
            );
        }
        self.eboard.invalidated_bitmap |= must_invalidate;
        self.record_error(
            ErrorCategory::RaidCrc,
            must_invalidate,
            false,
            "unrecoverable sector invalidated",
        );
        self.mark_modified(must_invalidate);
        self.scratch.resolve(must_invalidate);

        // Unread data would poison parity; otherwise regenerate on the final
        // attempt or when nothing else is still in doubt.
        let unread = dead_data & !must_invalidate;
        let outstanding = self.eboard.u_error_bitmap() & !parity_bitmap & !must_invalidate;
        let regenerate = (self.final_attempt || outstanding == 0) && unread == 0;

        let dead_parity = self.scratch.fatal_key & parity_bitmap;
        if regenerate {
            self.regenerate_parity(parity_bitmap);
            self.scratch.resolve(dead_parity);
            self.rbld_parity_stamps(must_invalidate | dead_parity);
        } else {
            debug!(
                unread = format_args!("{:#06x}", unread),
                outstanding = format_args!("{:#06x}", outstanding),
                "Parity left untouched for a later retry"
            );
        }
        // Parity is always reconstructible, never reported uncorrectable.
        self.eboard.mark_corrected(parity_bitmap);
        self.eboard.clear_errors(ErrorCategory::Crc, self.rebuild_bitmap);
        self.set_state(ScratchState::Done);
    }
}

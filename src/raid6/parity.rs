//! Parity Generation
//!
//! Row and diagonal parity images computed straight from the data sectors.
//! Used to regenerate parity during repair and to build consistent strips.

use tracing::debug;

use super::constants::RaidSixConstants;
use super::context::StripContext;
use super::evenodd::{
    checksum_column, checksum_from_column, payload_column, write_payload_column, Symbol, Syndrome,
};
use super::position::{positions, StripGeometry, DIAG_PARITY, ROW_PARITY};
use super::sector::{Sector, WORDS_PER_BLOCK};
use super::stamps::canonical_stamps;

/// Payload and parity-of-checksums of one parity sector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityImage {
    pub data: [u32; WORDS_PER_BLOCK],
    pub poc: u16,
}

/// Compute `[row, diagonal]` parity images from every data sector.
pub fn compute_parity(
    sectors: &[Sector],
    geometry: &StripGeometry,
    constants: &RaidSixConstants,
) -> [ParityImage; 2] {
    let mut data: Syndrome<Symbol> = Syndrome::default();
    let mut poc: Syndrome<u8> = Syndrome::default();
    let mut zeroed = true;
    for pos in geometry.data_positions() {
        let sector = &sectors[pos];
        let column = geometry.logical(pos);
        data.fold_data(column, &payload_column(&sector.data));
        poc.fold_data(column, &checksum_column(sector.crc));
        zeroed &= sector.is_zeroed_image();
    }

    let (row, diag) = data.parity_columns();
    let (row_poc, diag_poc) = poc.parity_columns();
    let mut row_poc = checksum_from_column(&row_poc);
    let mut diag_poc = checksum_from_column(&diag_poc);
    if zeroed {
        if let Some(table) = constants.zeroed_poc(geometry.width()) {
            row_poc = table.row;
            diag_poc = table.diag;
        }
    }

    let mut row_image = ParityImage {
        data: [0; WORDS_PER_BLOCK],
        poc: row_poc,
    };
    write_payload_column(&row, &mut row_image.data);
    let mut diag_image = ParityImage {
        data: [0; WORDS_PER_BLOCK],
        poc: diag_poc,
    };
    write_payload_column(&diag, &mut diag_image.data);
    [row_image, diag_image]
}

/// Write both parity sectors (payload, checksum, POC and stamps) so the strip
/// is fully consistent with its data sectors.
pub fn encode_parity(sectors: &mut [Sector], geometry: &StripGeometry, constants: &RaidSixConstants) {
    let images = compute_parity(sectors, geometry, constants);
    let stamps = canonical_stamps(sectors, geometry, geometry.data_bitmap());
    for (which, image) in [ROW_PARITY, DIAG_PARITY].into_iter().zip(images) {
        let sector = &mut sectors[geometry.parity_position(which)];
        sector.data = image.data;
        sector.stamp_crc();
        sector.lba_stamp = image.poc;
        sector.time_stamp = stamps.parity_time_stamp();
        sector.write_stamp = stamps.write_stamp;
    }
}

impl<'a> StripContext<'a> {
    /// Recompute the payload and POC of the parity positions in `mask` from
    /// the data sectors. Stamps are left to `rbld_parity_stamps`.
    pub fn regenerate_parity(&mut self, mask: u16) {
        let images = compute_parity(&*self.sectors, &self.geometry, self.constants);
        for (which, image) in [ROW_PARITY, DIAG_PARITY].into_iter().zip(images) {
            let pos = self.geometry.parity_position(which);
            let key = self.key(pos);
            if mask & key == 0 {
                continue;
            }
            let sector = &mut self.sectors[pos];
            sector.data = image.data;
            sector.stamp_crc();
            sector.lba_stamp = image.poc;
            self.mark_modified(key);
        }
        debug!(
            parity = ?positions(mask & self.geometry.parity_bitmap()).collect::<Vec<_>>(),
            "Parity regenerated"
        );
    }
}

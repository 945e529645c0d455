//! Synthetic Strips
//!
//! Builds fully consistent strips with deterministic payloads so faults can
//! be injected on top. Used by the scrub simulator and the test suites.

use crate::error::Result;

use super::config::OptionFlags;
use super::constants::RaidSixConstants;
use super::orchestrator::ParityUnit;
use super::parity::encode_parity;
use super::position::{build_bitkeys, StripGeometry, INVALID_POSITION};
use super::sector::{lba_stamp_for, Sector, WORDS_PER_BLOCK};

/// Payload of a data position at `lba`, reproducible across runs.
pub fn pattern_payload(lba: u64, pos: usize) -> [u32; WORDS_PER_BLOCK] {
    let mut data = [0u32; WORDS_PER_BLOCK];
    for (i, word) in data.iter_mut().enumerate() {
        let mut x = lba ^ ((pos as u64) << 40) ^ ((i as u64) << 20) ^ 0x9E37_79B9_7F4A_7C15;
        x ^= x >> 33;
        x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        x ^= x >> 33;
        x = x.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
        x ^= x >> 33;
        *word = x as u32;
    }
    data
}

/// An owned strip plus everything needed to build a [`ParityUnit`]
#[derive(Debug, Clone)]
pub struct SyntheticStrip {
    pub sectors: Vec<Sector>,
    pub bitkey: Vec<u16>,
    pub parity_pos: [u16; 2],
    pub rebuild_pos: [u16; 2],
    pub data_position: Vec<u16>,
    pub seed: u64,
    pub offset: u64,
    pub final_recovery_attempt: bool,
    pub option_flags: OptionFlags,
    pub group_id: u32,
}

impl SyntheticStrip {
    /// Standard layout (data first, row then diagonal parity last), every
    /// data position written by one full-strip write at `time_stamp`.
    pub fn new(width: usize, lba: u64, time_stamp: u16) -> Result<Self> {
        let geometry = StripGeometry::standard(width)?;
        let payloads: Vec<_> = (0..width - 2).map(|pos| pattern_payload(lba, pos)).collect();
        Self::build(&geometry, lba, time_stamp, &payloads)
    }

    /// Standard layout with caller-chosen payloads, one per data column.
    pub fn with_payloads(lba: u64, time_stamp: u16, payloads: &[[u32; WORDS_PER_BLOCK]]) -> Result<Self> {
        let geometry = StripGeometry::standard(payloads.len() + 2)?;
        Self::build(&geometry, lba, time_stamp, payloads)
    }

    /// Arbitrary layout with pattern payloads.
    pub fn with_layout(parity_pos: [u16; 2], data_position: &[u16], lba: u64, time_stamp: u16) -> Result<Self> {
        let width = data_position.len();
        let bitkey = build_bitkeys(width.min(16));
        let geometry = StripGeometry::new(&bitkey[..width.min(16)], parity_pos, data_position)?;
        let payloads: Vec<_> = (0..geometry.data_columns())
            .map(|column| pattern_payload(lba, column))
            .collect();
        Self::build(&geometry, lba, time_stamp, &payloads)
    }

    fn build(
        geometry: &StripGeometry,
        lba: u64,
        time_stamp: u16,
        payloads: &[[u32; WORDS_PER_BLOCK]],
    ) -> Result<Self> {
        let width = geometry.width();
        let mut sectors = vec![Sector::zeroed(); width];
        for pos in geometry.data_positions() {
            sectors[pos] = Sector::with_data(payloads[geometry.logical(pos)], lba_stamp_for(lba), time_stamp, 0);
        }
        encode_parity(&mut sectors, geometry, RaidSixConstants::global());

        let mut data_position = vec![0u16; width];
        for pos in geometry.data_positions() {
            data_position[pos] = geometry.logical(pos) as u16;
        }
        let [row, diag] = geometry.parity_positions();
        Ok(Self {
            sectors,
            bitkey: (0..width).map(|pos| geometry.bitkey(pos)).collect(),
            parity_pos: [row as u16, diag as u16],
            rebuild_pos: [INVALID_POSITION; 2],
            data_position,
            seed: lba,
            offset: 0,
            final_recovery_attempt: false,
            option_flags: OptionFlags::empty(),
            group_id: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.sectors.len()
    }

    pub fn geometry(&self) -> Result<StripGeometry> {
        StripGeometry::new(&self.bitkey, self.parity_pos, &self.data_position)
    }

    /// Borrow the strip as an engine request.
    pub fn unit(&mut self) -> ParityUnit<'_> {
        ParityUnit {
            sectors: &mut self.sectors,
            bitkey: &self.bitkey,
            parity_pos: self.parity_pos,
            rebuild_pos: &mut self.rebuild_pos,
            seed: self.seed,
            offset: self.offset,
            final_recovery_attempt: self.final_recovery_attempt,
            data_position: &self.data_position,
            option_flags: self.option_flags,
            group_id: self.group_id,
        }
    }

    /// Replace a position with garbage, as a dead drive's buffer would be.
    pub fn kill(&mut self, pos: usize) {
        let sector = &mut self.sectors[pos];
        sector.data = [0xDEAD_DEAD; WORDS_PER_BLOCK];
        sector.crc = 0;
        sector.lba_stamp = 0;
        sector.time_stamp = 0;
        sector.write_stamp = 0;
    }

    /// Rewrite both parity sectors from the current data sectors.
    pub fn reencode(&mut self) -> Result<()> {
        let geometry = self.geometry()?;
        encode_parity(&mut self.sectors, &geometry, RaidSixConstants::global());
        Ok(())
    }

    /// A never-written strip of `width` positions.
    pub fn zeroed(width: usize, lba: u64) -> Result<Self> {
        let geometry = StripGeometry::standard(width)?;
        let mut strip = Self::build(&geometry, lba, 0, &vec![[0; WORDS_PER_BLOCK]; width - 2])?;
        for pos in geometry.data_positions() {
            strip.sectors[pos] = Sector::zeroed();
        }
        strip.reencode()?;
        Ok(strip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raid6::sector::{ALL_TSTAMPS, ZEROED_CRC};

    #[test]
    fn test_pattern_is_deterministic_and_distinct() {
        assert_eq!(pattern_payload(7, 1), pattern_payload(7, 1));
        assert_ne!(pattern_payload(7, 1), pattern_payload(7, 2));
        assert_ne!(pattern_payload(7, 1), pattern_payload(8, 1));
    }

    #[test]
    fn test_new_strip_is_consistent() {
        let strip = SyntheticStrip::new(8, 0x4000, 0x33).unwrap();
        assert_eq!(strip.width(), 8);
        assert!(strip.sectors.iter().all(|s| s.has_valid_crc()));
        assert_eq!(strip.sectors[6].time_stamp, 0x33 | ALL_TSTAMPS);
        assert_eq!(strip.sectors[7].time_stamp, 0x33 | ALL_TSTAMPS);
        assert_eq!(strip.sectors[0].lba_stamp, lba_stamp_for(0x4000));
    }

    #[test]
    fn test_rotated_layout() {
        let strip = SyntheticStrip::with_layout([0, 3], &[0, 2, 0, 0, 1], 0x10, 0x5).unwrap();
        let geometry = strip.geometry().unwrap();
        assert_eq!(geometry.parity_positions(), [0, 3]);
        assert_eq!(strip.sectors[1].data, pattern_payload(0x10, 2));
    }

    #[test]
    fn test_zeroed_strip() {
        let strip = SyntheticStrip::zeroed(6, 0x10).unwrap();
        assert!(strip.sectors.iter().all(|s| s.crc == ZEROED_CRC && s.time_stamp == 0));
        let poc = RaidSixConstants::global().zeroed_poc(6).unwrap();
        assert_eq!(strip.sectors[4].lba_stamp, poc.row);
        assert_eq!(strip.sectors[5].lba_stamp, poc.diag);
    }
}

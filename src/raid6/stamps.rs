//! Stamp Consistency Engine
//!
//! EVENODD restores payload bytes only. Once a strip settles, the time and
//! write stamps of every position are re-derived from the authoritative data
//! sectors and both parity sectors are forced to agree with them.
//!
//! - canonical time stamp: first authoritative data position (physical order)
//!   with a zero write stamp and a real time stamp, else `INITIAL_TSTAMP` if
//!   some full write never happened, else `INVALID_TSTAMP`
//! - canonical write stamp: OR of every data position's own write stamp bit
//! - parity time stamp: canonical, plus `ALL_TSTAMPS` when it is real and no
//!   partial write is outstanding

use tracing::debug;

use super::context::StripContext;
use super::eboard::ErrorCategory;
use super::position::{positions, StripGeometry};
use super::sector::{is_real_time_stamp, Sector, ALL_TSTAMPS, INITIAL_TSTAMP, INVALID_TSTAMP};

/// Stamps every position of a settled strip agrees on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripStamps {
    pub time_stamp: u16,
    pub write_stamp: u16,
}

impl StripStamps {
    /// Time stamp carried by both parity sectors.
    pub fn parity_time_stamp(&self) -> u16 {
        if is_real_time_stamp(self.time_stamp) && self.write_stamp == 0 {
            self.time_stamp | ALL_TSTAMPS
        } else {
            self.time_stamp
        }
    }
}

/// Derive the canonical stamps from the data positions in `authoritative`.
pub fn canonical_stamps(sectors: &[Sector], geometry: &StripGeometry, authoritative: u16) -> StripStamps {
    let mut time_stamp = None;
    let mut saw_initial = false;
    let mut write_stamp = 0;

    for pos in positions(authoritative & geometry.data_bitmap()) {
        let sector = &sectors[pos];
        write_stamp |= sector.write_stamp & geometry.bitkey(pos);
        if sector.write_stamp != 0 {
            continue;
        }
        if time_stamp.is_none() && is_real_time_stamp(sector.time_stamp) {
            time_stamp = Some(sector.time_stamp & !ALL_TSTAMPS);
        } else if sector.time_stamp == INITIAL_TSTAMP {
            saw_initial = true;
        }
    }

    let time_stamp = time_stamp.unwrap_or(if saw_initial {
        INITIAL_TSTAMP
    } else {
        INVALID_TSTAMP
    });
    StripStamps {
        time_stamp,
        write_stamp,
    }
}

impl<'a> StripContext<'a> {
    /// Rewrite the stamps of a settled strip. Positions in `rewritten` were
    /// just rebuilt or regenerated and are updated without being reported.
    pub fn rbld_parity_stamps(&mut self, rewritten: u16) {
        let authoritative = self.geometry.data_bitmap() & !self.scratch.fatal_key;
        let stamps = canonical_stamps(&*self.sectors, &self.geometry, authoritative);
        // A never-written strip is exempt from "corrected" reports.
        let zeroed = self.all_data_zeroed();

        if is_real_time_stamp(stamps.time_stamp) {
            for pos in positions(authoritative) {
                let key = self.key(pos);
                let sector = &self.sectors[pos];
                if sector.write_stamp != 0
                    || sector.time_stamp == stamps.time_stamp
                    || sector.invalidation_reason().is_some()
                {
                    continue;
                }
                let previous = sector.time_stamp;
                self.sectors[pos].time_stamp = stamps.time_stamp;
                self.mark_modified(key);
                if rewritten & key == 0 && !zeroed {
                    self.record_error(
                        ErrorCategory::Ts,
                        key,
                        true,
                        &format!(
                            "time stamp {:#06x} on position {} corrected to {:#06x}",
                            previous, pos, stamps.time_stamp
                        ),
                    );
                }
            }
        }

        let parity_time_stamp = stamps.parity_time_stamp();
        for pos in self.geometry.parity_positions() {
            let key = self.key(pos);
            let sector = &mut self.sectors[pos];
            let ts_differs = sector.time_stamp != parity_time_stamp;
            let ws_differs = sector.write_stamp != stamps.write_stamp;
            if !ts_differs && !ws_differs {
                continue;
            }
            sector.time_stamp = parity_time_stamp;
            sector.write_stamp = stamps.write_stamp;
            self.mark_modified(key);

            if rewritten & key != 0 || self.scratch.is_fatal(key) || zeroed {
                continue;
            }
            if ts_differs {
                self.record_error(
                    ErrorCategory::Ts,
                    key,
                    true,
                    &format!("parity position {} time stamp rewritten", pos),
                );
            }
            if ws_differs {
                self.record_error(
                    ErrorCategory::Ws,
                    key,
                    true,
                    &format!("parity position {} write stamp rewritten", pos),
                );
            }
        }

        debug!(
            time_stamp = format_args!("{:#06x}", stamps.time_stamp),
            write_stamp = format_args!("{:#06x}", stamps.write_stamp),
            "Parity stamps settled"
        );
        self.parity_settled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raid6::sector::WORDS_PER_BLOCK;

    fn strip(stamps: &[(u16, u16)]) -> Vec<Sector> {
        let mut sectors: Vec<Sector> = stamps
            .iter()
            .map(|(ts, ws)| Sector::with_data([1; WORDS_PER_BLOCK], 0, *ts, *ws))
            .collect();
        sectors.push(Sector::zeroed());
        sectors.push(Sector::zeroed());
        sectors
    }

    #[test]
    fn test_first_real_stamp_wins() {
        let sectors = strip(&[(INITIAL_TSTAMP, 0), (0x20, 0), (0x30, 0), (0x20, 0)]);
        let geometry = StripGeometry::standard(6).unwrap();
        let stamps = canonical_stamps(&sectors, &geometry, 0b1111);
        assert_eq!(stamps.time_stamp, 0x20);
        assert_eq!(stamps.write_stamp, 0);
        assert_eq!(stamps.parity_time_stamp(), 0x20 | ALL_TSTAMPS);
    }

    #[test]
    fn test_partial_writes_accumulate_write_stamp() {
        let sectors = strip(&[(0x20, 0), (INVALID_TSTAMP, 0b10), (0x20, 0), (INVALID_TSTAMP, 0b1000)]);
        let geometry = StripGeometry::standard(6).unwrap();
        let stamps = canonical_stamps(&sectors, &geometry, 0b1111);
        assert_eq!(stamps.time_stamp, 0x20);
        assert_eq!(stamps.write_stamp, 0b1010);
        assert_eq!(stamps.parity_time_stamp(), 0x20);
    }

    #[test]
    fn test_fallback_stamps() {
        let geometry = StripGeometry::standard(6).unwrap();

        let sectors = strip(&[(INITIAL_TSTAMP, 0); 4]);
        assert_eq!(canonical_stamps(&sectors, &geometry, 0b1111).time_stamp, INITIAL_TSTAMP);

        let sectors = strip(&[
            (INVALID_TSTAMP, 0b1),
            (INVALID_TSTAMP, 0b10),
            (INVALID_TSTAMP, 0b100),
            (INVALID_TSTAMP, 0b1000),
        ]);
        let stamps = canonical_stamps(&sectors, &geometry, 0b1111);
        assert_eq!(stamps.time_stamp, INVALID_TSTAMP);
        assert_eq!(stamps.parity_time_stamp(), INVALID_TSTAMP);
    }

    #[test]
    fn test_non_authoritative_positions_ignored() {
        let sectors = strip(&[(0x99, 0), (0x20, 0), (0x20, 0), (0x20, 0)]);
        let geometry = StripGeometry::standard(6).unwrap();
        let stamps = canonical_stamps(&sectors, &geometry, 0b1110);
        assert_eq!(stamps.time_stamp, 0x20);
    }
}

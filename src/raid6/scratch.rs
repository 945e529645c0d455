//! Scratch / State Machine
//!
//! Working state of one strip evaluation: which positions are currently
//! treated as dead, the running syndromes of the current pass, and the
//! algorithm state picked for that pass.
//!
//! ```text
//!            ┌──────────────┐
//!            │   NotSet     │
//!            └──────┬───────┘
//!        select(fatal_cnt, fatal_key, parity_bitmap)
//!     ┌──────────┬──┴────────┬───────────────────┐
//!     ▼          ▼           ▼                   ▼
//!  Verify  Reconstruct1  Reconstruct2  ReconstructParity     (None: invalidate)
//!     └──────────┴─────┬─────┴───────────────────┘
//!                      ▼
//!                    Done
//! ```

use serde::{Deserialize, Serialize};

use super::evenodd::{Symbol, Syndrome};
use super::position::{count, positions, INVALID_POSITION};

/// Algorithm state of the current pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScratchState {
    NotSet,
    Verify,
    Reconstruct1,
    Reconstruct2,
    ReconstructParity,
    Done,
}

impl ScratchState {
    /// Pick the algorithm for the current fatal set.
    ///
    /// Returns `None` when the strip cannot be reconstructed and must go
    /// straight to invalidation.
    pub fn select(fatal_cnt: FatalCount, fatal_key: u16, parity_bitmap: u16) -> Option<ScratchState> {
        let dead_data = count(fatal_key & !parity_bitmap);
        match fatal_cnt {
            FatalCount::Zero => Some(ScratchState::Verify),
            FatalCount::More => None,
            FatalCount::One | FatalCount::Two => match dead_data {
                0 => Some(ScratchState::ReconstructParity),
                1 => Some(ScratchState::Reconstruct1),
                _ => Some(ScratchState::Reconstruct2),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScratchState::NotSet => "not_set",
            ScratchState::Verify => "verify",
            ScratchState::Reconstruct1 => "reconstruct_1",
            ScratchState::Reconstruct2 => "reconstruct_2",
            ScratchState::ReconstructParity => "reconstruct_p",
            ScratchState::Done => "done",
        }
    }
}

impl std::fmt::Display for ScratchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Number of dead positions, saturating past what EVENODD can repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FatalCount {
    Zero,
    One,
    Two,
    More,
}

impl FatalCount {
    pub fn of(fatal_key: u16) -> Self {
        match count(fatal_key) {
            0 => FatalCount::Zero,
            1 => FatalCount::One,
            2 => FatalCount::Two,
            _ => FatalCount::More,
        }
    }
}

/// Order a fatal set into two rebuild slots: data positions first, then
/// parity, each ascending. More than two positions are not tracked.
pub fn reset_rebuild_positions(fatal_key: u16, parity_bitmap: u16) -> [u16; 2] {
    let mut slots = [INVALID_POSITION; 2];
    if count(fatal_key) > 2 {
        return slots;
    }
    let ordered = positions(fatal_key & !parity_bitmap).chain(positions(fatal_key & parity_bitmap));
    for (slot, pos) in slots.iter_mut().zip(ordered) {
        *slot = pos as u16;
    }
    slots
}

/// Bitmap of the valid entries in a rebuild vector.
pub fn rebuild_bitmap(rebuild_pos: &[u16; 2]) -> u16 {
    rebuild_pos
        .iter()
        .filter(|pos| **pos != INVALID_POSITION)
        .fold(0, |acc, pos| acc | (1 << *pos))
}

// =============================================================================
// Scratch
// =============================================================================

#[derive(Debug, Clone)]
pub struct Scratch {
    pub fatal_key: u16,
    pub fatal_cnt: FatalCount,
    pub fatal_blk: [u16; 2],
    pub state: ScratchState,
    pub media_err_bitmap: u16,
    pub retry_err_bitmap: u16,
    /// A sector of the current pass became fatal
    pub new_errors: bool,
    /// Payload syndrome of the current pass
    pub data: Syndrome<Symbol>,
    /// Parity-of-checksums syndrome of the current pass
    pub poc: Syndrome<u8>,
    parity_bitmap: u16,
}

impl Scratch {
    pub fn new(fatal_key: u16, parity_bitmap: u16, media_err_bitmap: u16, retry_err_bitmap: u16) -> Self {
        let mut scratch = Self {
            fatal_key,
            fatal_cnt: FatalCount::Zero,
            fatal_blk: [INVALID_POSITION; 2],
            state: ScratchState::NotSet,
            media_err_bitmap,
            retry_err_bitmap,
            new_errors: false,
            data: Syndrome::default(),
            poc: Syndrome::default(),
            parity_bitmap,
        };
        scratch.recount();
        scratch
    }

    fn recount(&mut self) {
        self.fatal_cnt = FatalCount::of(self.fatal_key);
        self.fatal_blk = reset_rebuild_positions(self.fatal_key, self.parity_bitmap);
    }

    pub fn is_fatal(&self, key: u16) -> bool {
        self.fatal_key & key != 0
    }

    /// A sector turned out unusable during this pass.
    pub fn add_error(&mut self, key: u16) {
        self.fatal_key |= key;
        self.new_errors = true;
        self.recount();
    }

    /// Positions that were rebuilt or rewritten and can be trusted again.
    pub fn resolve(&mut self, mask: u16) {
        self.fatal_key &= !mask;
        self.recount();
    }

    /// Clear the per-pass accumulators.
    pub fn begin_pass(&mut self) {
        self.data = Syndrome::default();
        self.poc = Syndrome::default();
        self.new_errors = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARITY: u16 = 0b11_0000;

    #[test]
    fn test_select_state() {
        assert_eq!(
            ScratchState::select(FatalCount::Zero, 0, PARITY),
            Some(ScratchState::Verify)
        );
        assert_eq!(
            ScratchState::select(FatalCount::One, 0b0100, PARITY),
            Some(ScratchState::Reconstruct1)
        );
        assert_eq!(
            ScratchState::select(FatalCount::Two, 0b01_0100, PARITY),
            Some(ScratchState::Reconstruct1)
        );
        assert_eq!(
            ScratchState::select(FatalCount::Two, 0b1100, PARITY),
            Some(ScratchState::Reconstruct2)
        );
        assert_eq!(
            ScratchState::select(FatalCount::One, 0b10_0000, PARITY),
            Some(ScratchState::ReconstructParity)
        );
        assert_eq!(
            ScratchState::select(FatalCount::Two, PARITY, PARITY),
            Some(ScratchState::ReconstructParity)
        );
        assert_eq!(ScratchState::select(FatalCount::More, 0b0111, PARITY), None);
    }

    #[test]
    fn test_reset_rebuild_positions_orders_data_first() {
        assert_eq!(reset_rebuild_positions(0b01_0100, PARITY), [2, 4]);
        assert_eq!(reset_rebuild_positions(0b1100, PARITY), [2, 3]);
        assert_eq!(reset_rebuild_positions(0b10_0000, PARITY), [5, INVALID_POSITION]);
        assert_eq!(reset_rebuild_positions(0, PARITY), [INVALID_POSITION; 2]);
        assert_eq!(reset_rebuild_positions(0b0111, PARITY), [INVALID_POSITION; 2]);
    }

    #[test]
    fn test_rebuild_bitmap() {
        assert_eq!(rebuild_bitmap(&[2, INVALID_POSITION]), 0b100);
        assert_eq!(rebuild_bitmap(&[INVALID_POSITION, 5]), 0b10_0000);
        assert_eq!(rebuild_bitmap(&[INVALID_POSITION; 2]), 0);
    }

    #[test]
    fn test_add_error_and_resolve() {
        let mut scratch = Scratch::new(0b100, PARITY, 0, 0);
        assert_eq!(scratch.fatal_cnt, FatalCount::One);
        assert_eq!(scratch.fatal_blk, [2, INVALID_POSITION]);

        scratch.add_error(0b1);
        assert!(scratch.new_errors);
        assert_eq!(scratch.fatal_cnt, FatalCount::Two);
        assert_eq!(scratch.fatal_blk, [0, 2]);

        scratch.resolve(0b101);
        assert_eq!(scratch.fatal_cnt, FatalCount::Zero);

        scratch.begin_pass();
        assert!(!scratch.new_errors);
    }
}

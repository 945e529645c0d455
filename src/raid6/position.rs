//! Position / Bitmap Model
//!
//! Every physical position of a strip owns one bit; the rest of the engine
//! talks about positions only through `u16` bitmaps over that space.

use crate::error::{Error, Result};

use super::evenodd::MAX_DATA_COLUMNS;

/// Smallest RAID-6 strip: two data and two parity positions
pub const MIN_WIDTH: usize = 4;

/// Largest strip a `u16` bitmap can describe
pub const MAX_WIDTH: usize = 16;

/// Sentinel for an unused rebuild/fatal slot
pub const INVALID_POSITION: u16 = 0xFFFF;

/// Index of the row parity in `parity_pos`
pub const ROW_PARITY: usize = 0;

/// Index of the diagonal parity in `parity_pos`
pub const DIAG_PARITY: usize = 1;

/// Bit of each position: `bitkey[i] = 1 << i`.
pub fn build_bitkeys(width: usize) -> [u16; MAX_WIDTH] {
    let mut bitkey = [0u16; MAX_WIDTH];
    for (pos, key) in bitkey.iter_mut().enumerate().take(width) {
        *key = 1 << pos;
    }
    bitkey
}

/// Iterate the positions set in a bitmap, lowest first.
pub fn positions(mask: u16) -> impl Iterator<Item = usize> {
    (0..MAX_WIDTH).filter(move |pos| mask & (1 << pos) != 0)
}

/// Number of positions in a bitmap.
pub fn count(mask: u16) -> usize {
    mask.count_ones() as usize
}

// =============================================================================
// Strip Geometry
// =============================================================================

/// Validated layout of one strip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripGeometry {
    width: usize,
    parity_pos: [usize; 2],
    bitkey: [u16; MAX_WIDTH],
    /// physical -> logical data column (parity entries unused)
    logical: [usize; MAX_WIDTH],
    /// logical data column -> physical
    physical: [usize; MAX_WIDTH],
    parity_bitmap: u16,
    data_bitmap: u16,
}

impl StripGeometry {
    /// Validate a caller-supplied layout.
    ///
    /// # Arguments
    /// * `bitkey` - Bit of each position, length = width
    /// * `parity_pos` - Physical index of the row and diagonal parity
    /// * `data_position` - Physical index -> logical data column, length = width
    pub fn new(bitkey: &[u16], parity_pos: [u16; 2], data_position: &[u16]) -> Result<Self> {
        let width = bitkey.len();
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
            return Err(Error::InvalidGeometry(format!(
                "width {} outside {}..={}",
                width, MIN_WIDTH, MAX_WIDTH
            )));
        }
        if width - 2 > MAX_DATA_COLUMNS {
            return Err(Error::InvalidGeometry(format!(
                "{} data columns exceed the EVENODD limit of {}",
                width - 2,
                MAX_DATA_COLUMNS
            )));
        }
        if data_position.len() != width {
            return Err(Error::InvalidGeometry(format!(
                "data_position has {} entries, expected {}",
                data_position.len(),
                width
            )));
        }
        for (pos, key) in bitkey.iter().enumerate() {
            if *key != 1 << pos {
                return Err(Error::InvalidGeometry(format!(
                    "bitkey[{}] is {:#06x}, expected {:#06x}",
                    pos,
                    key,
                    1u16 << pos
                )));
            }
        }

        let [row, diag] = parity_pos.map(usize::from);
        if row >= width || diag >= width || row == diag {
            return Err(Error::InvalidGeometry(format!(
                "parity positions {:?} invalid for width {}",
                parity_pos, width
            )));
        }

        let mut bitkeys = [0u16; MAX_WIDTH];
        bitkeys[..width].copy_from_slice(bitkey);
        let parity_bitmap = bitkeys[row] | bitkeys[diag];
        let all_bitmap = if width == MAX_WIDTH {
            u16::MAX
        } else {
            (1u16 << width) - 1
        };
        let data_bitmap = all_bitmap & !parity_bitmap;

        let data_columns = width - 2;
        let mut logical = [usize::MAX; MAX_WIDTH];
        let mut physical = [usize::MAX; MAX_WIDTH];
        for pos in positions(data_bitmap) {
            let column = data_position[pos] as usize;
            if column >= data_columns || physical[column] != usize::MAX {
                return Err(Error::InvalidGeometry(format!(
                    "data_position[{}] = {} is out of range or duplicated",
                    pos, column
                )));
            }
            logical[pos] = column;
            physical[column] = pos;
        }

        Ok(Self {
            width,
            parity_pos: [row, diag],
            bitkey: bitkeys,
            logical,
            physical,
            parity_bitmap,
            data_bitmap,
        })
    }

    /// Data on the leading positions, row parity then diagonal parity last.
    pub fn standard(width: usize) -> Result<Self> {
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
            return Err(Error::InvalidGeometry(format!(
                "width {} outside {}..={}",
                width, MIN_WIDTH, MAX_WIDTH
            )));
        }
        let bitkey = build_bitkeys(width);
        let mut data_position = [0u16; MAX_WIDTH];
        for (pos, column) in data_position.iter_mut().enumerate().take(width - 2) {
            *column = pos as u16;
        }
        let parity_pos = [(width - 2) as u16, (width - 1) as u16];
        Self::new(&bitkey[..width], parity_pos, &data_position[..width])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data_columns(&self) -> usize {
        self.width - 2
    }

    /// Physical position of the row (`ROW_PARITY`) or diagonal parity.
    pub fn parity_position(&self, which: usize) -> usize {
        self.parity_pos[which]
    }

    pub fn parity_positions(&self) -> [usize; 2] {
        self.parity_pos
    }

    pub fn bitkey(&self, pos: usize) -> u16 {
        self.bitkey[pos]
    }

    pub fn parity_bitmap(&self) -> u16 {
        self.parity_bitmap
    }

    pub fn data_bitmap(&self) -> u16 {
        self.data_bitmap
    }

    pub fn all_bitmap(&self) -> u16 {
        self.parity_bitmap | self.data_bitmap
    }

    pub fn is_parity(&self, pos: usize) -> bool {
        self.bitkey[pos] & self.parity_bitmap != 0
    }

    /// Logical data column of a data position.
    pub fn logical(&self, pos: usize) -> usize {
        self.logical[pos]
    }

    /// Physical position of a logical data column.
    pub fn physical(&self, column: usize) -> usize {
        self.physical[column]
    }

    /// Data positions in physical order.
    pub fn data_positions(&self) -> impl Iterator<Item = usize> {
        positions(self.data_bitmap)
    }
}

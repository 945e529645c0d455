//! EVENODD Arithmetic
//!
//! Dual-parity erasure code over columns of `SYMBOLS_PER_COLUMN` symbols with
//! prime `EVENODD_M`. Data column `j`, symbol row `i`:
//!
//! ```text
//! row parity       P[i] = ⊕_j a[i][j]
//! S value          S    = ⊕_{j>=1} a[M-1-j][j]
//! diagonal parity  Q[d] = S ⊕ ⊕_j a[<d-j>][j]        (a[M-1][*] = 0)
//! ```
//!
//! The same code protects two things: sector payloads (symbol = 8 words) and
//! sector checksums (symbol = one bit of the 16-bit checksum), the latter
//! being the parity-of-checksums carried by the parity sectors.
//!
//! All reconstruction works from a running [`Syndrome`]: every surviving
//! column is folded in as it is evaluated, and the finish step solves for the
//! missing columns from what is left.

use std::ops::{BitXor, BitXorAssign};

use super::sector::WORDS_PER_BLOCK;

/// EVENODD prime
pub const EVENODD_M: usize = 17;

/// Symbols in one column (the imaginary row `M-1` is always zero)
pub const SYMBOLS_PER_COLUMN: usize = EVENODD_M - 1;

/// Payload words per symbol
pub const WORDS_PER_SYMBOL: usize = WORDS_PER_BLOCK / SYMBOLS_PER_COLUMN;

/// Data columns the code can protect
pub const MAX_DATA_COLUMNS: usize = EVENODD_M;

/// Index of the diagonal holding the S value
const S_DIAGONAL: usize = EVENODD_M - 1;

// =============================================================================
// Symbols
// =============================================================================

/// Anything the code can be computed over.
pub trait EvenOddSymbol: Copy + Default + PartialEq + BitXor<Output = Self> + BitXorAssign {
    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// One payload symbol: a 32-byte stride of the sector payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Symbol(pub [u32; WORDS_PER_SYMBOL]);

impl BitXorAssign for Symbol {
    fn bitxor_assign(&mut self, rhs: Self) {
        for (word, other) in self.0.iter_mut().zip(rhs.0) {
            *word ^= other;
        }
    }
}

impl BitXor for Symbol {
    type Output = Symbol;

    fn bitxor(mut self, rhs: Self) -> Self::Output {
        self ^= rhs;
        self
    }
}

impl EvenOddSymbol for Symbol {}

/// Checksum bits are carried one per `u8` (0 or 1).
impl EvenOddSymbol for u8 {}

/// One column of symbols
pub type Column<S> = [S; SYMBOLS_PER_COLUMN];

/// Diagonal a symbol of `column` at `row` belongs to.
pub fn diagonal_of(row: usize, column: usize) -> usize {
    (row + column) % EVENODD_M
}

/// Row at which `column` crosses `diagonal` (`EVENODD_M - 1` is imaginary).
pub fn row_on_diagonal(diagonal: usize, column: usize) -> usize {
    (diagonal + EVENODD_M - column % EVENODD_M) % EVENODD_M
}

pub fn payload_column(data: &[u32; WORDS_PER_BLOCK]) -> Column<Symbol> {
    let mut column = [Symbol::default(); SYMBOLS_PER_COLUMN];
    for (symbol, chunk) in column.iter_mut().zip(data.chunks_exact(WORDS_PER_SYMBOL)) {
        symbol.0.copy_from_slice(chunk);
    }
    column
}

pub fn write_payload_column(column: &Column<Symbol>, data: &mut [u32; WORDS_PER_BLOCK]) {
    for (symbol, chunk) in column.iter().zip(data.chunks_exact_mut(WORDS_PER_SYMBOL)) {
        chunk.copy_from_slice(&symbol.0);
    }
}

pub fn checksum_column(crc: u16) -> Column<u8> {
    let mut column = [0u8; SYMBOLS_PER_COLUMN];
    for (bit, symbol) in column.iter_mut().enumerate() {
        *symbol = ((crc >> bit) & 1) as u8;
    }
    column
}

pub fn checksum_from_column(column: &Column<u8>) -> u16 {
    column
        .iter()
        .enumerate()
        .fold(0u16, |crc, (bit, symbol)| crc | (u16::from(*symbol & 1) << bit))
}

// =============================================================================
// Syndrome
// =============================================================================

/// Outcome of classifying a fully folded syndrome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyndromeFault {
    /// Data and both parity columns agree
    Clean,
    /// Only the row parity column disagrees
    RowParity,
    /// Only the diagonal parity column disagrees
    DiagParity,
    /// Exactly one data column (logical index) disagrees
    Data(usize),
    /// Disagreement that no single column explains
    Unknown,
}

/// Running row/diagonal accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Syndrome<S> {
    /// XOR of row `i` across every folded column
    pub row: [S; SYMBOLS_PER_COLUMN],
    /// XOR of diagonal `d` across every folded column
    pub diag: [S; EVENODD_M],
    /// XOR of every folded row parity symbol
    pub row_total: S,
    /// XOR of every folded diagonal parity symbol
    pub diag_total: S,
}

impl<S: EvenOddSymbol> Default for Syndrome<S> {
    fn default() -> Self {
        Self {
            row: [S::default(); SYMBOLS_PER_COLUMN],
            diag: [S::default(); EVENODD_M],
            row_total: S::default(),
            diag_total: S::default(),
        }
    }
}

impl<S: EvenOddSymbol> Syndrome<S> {
    /// Fold data column `column` (logical index).
    pub fn fold_data(&mut self, column: usize, symbols: &Column<S>) {
        for (row, symbol) in symbols.iter().enumerate() {
            self.row[row] ^= *symbol;
            self.diag[diagonal_of(row, column)] ^= *symbol;
        }
    }

    pub fn fold_row_parity(&mut self, symbols: &Column<S>) {
        for (row, symbol) in symbols.iter().enumerate() {
            self.row[row] ^= *symbol;
            self.row_total ^= *symbol;
        }
    }

    pub fn fold_diag_parity(&mut self, symbols: &Column<S>) {
        for (diagonal, symbol) in symbols.iter().enumerate() {
            self.diag[diagonal] ^= *symbol;
            self.diag_total ^= *symbol;
        }
    }

    /// S recovered from the two parity columns (`⊕P ⊕ ⊕Q`).
    pub fn s_value(&self) -> S {
        self.row_total ^ self.diag_total
    }

    fn extended_row(&self, row: usize) -> S {
        if row < SYMBOLS_PER_COLUMN {
            self.row[row]
        } else {
            S::default()
        }
    }

    /// Row syndrome is zero. Valid whenever the row parity was folded.
    pub fn row_consistent(&self) -> bool {
        self.row.iter().all(|s| s.is_zero())
    }

    /// Every diagonal carries the same S. Valid when all data and the
    /// diagonal parity, but not the row parity, were folded.
    pub fn diag_consistent(&self) -> bool {
        let s = self.diag[S_DIAGONAL];
        self.diag.iter().all(|d| *d == s)
    }

    /// Classify a syndrome with every data and both parity columns folded.
    pub fn classify(&self, data_columns: usize) -> SyndromeFault {
        let s = self.s_value();
        let mut normalized = self.diag;
        for d in normalized.iter_mut() {
            *d ^= s;
        }

        let row_clean = self.row_consistent();
        let diag_clean = normalized.iter().all(|d| d.is_zero());
        if row_clean && diag_clean {
            return SyndromeFault::Clean;
        }
        if row_clean {
            return SyndromeFault::DiagParity;
        }

        // A bad row parity shifts S by the XOR of its error and leaves every
        // diagonal off by exactly that amount.
        let row_sum = self.row.iter().fold(S::default(), |acc, s| acc ^ *s);
        if normalized.iter().all(|d| *d == row_sum) {
            return SyndromeFault::RowParity;
        }

        // A bad data column shows up on the diagonals as its row error
        // rotated by the column index.
        (0..data_columns)
            .find(|column| {
                (0..EVENODD_M).all(|d| normalized[d] == self.extended_row(row_on_diagonal(d, *column)))
            })
            .map_or(SyndromeFault::Unknown, SyndromeFault::Data)
    }

    /// Row and diagonal parity of the data folded so far. Valid when no
    /// parity column has been folded.
    pub fn parity_columns(&self) -> (Column<S>, Column<S>) {
        let s = self.diag[S_DIAGONAL];
        let mut diag = [S::default(); SYMBOLS_PER_COLUMN];
        for (d, symbol) in diag.iter_mut().enumerate() {
            *symbol = self.diag[d] ^ s;
        }
        (self.row, diag)
    }

    /// Missing data column when every other data column and the row parity
    /// were folded.
    pub fn rebuild_one_from_row(&self) -> Column<S> {
        self.row
    }

    /// Missing data column `column` when every other data column and the
    /// diagonal parity were folded (row parity unavailable).
    pub fn rebuild_one_from_diag(&self, column: usize) -> Column<S> {
        // The diagonal that crosses the missing column at its imaginary row
        // only sees survivors, so it yields S directly.
        let s = self.diag[(column + EVENODD_M - 1) % EVENODD_M];
        let mut rebuilt = [S::default(); SYMBOLS_PER_COLUMN];
        for (row, symbol) in rebuilt.iter_mut().enumerate() {
            *symbol = self.diag[diagonal_of(row, column)] ^ s;
        }
        rebuilt
    }

    /// Missing data columns `left < right` when every other data column and
    /// both parity columns were folded.
    pub fn rebuild_two(&self, left: usize, right: usize) -> (Column<S>, Column<S>) {
        debug_assert!(left < right && right < EVENODD_M);
        let s = self.s_value();
        let delta = right - left;
        let mut left_col = [S::default(); SYMBOLS_PER_COLUMN];
        let mut right_col = [S::default(); SYMBOLS_PER_COLUMN];

        // Zig-zag: each diagonal through the right column also crosses a left
        // symbol solved on the previous step; the chain starts where that
        // left symbol is the imaginary row and visits every row once.
        let mut row = (2 * EVENODD_M - delta - 1) % EVENODD_M;
        while row != EVENODD_M - 1 {
            let previous = (row + delta) % EVENODD_M;
            let left_known = if previous == EVENODD_M - 1 {
                S::default()
            } else {
                left_col[previous]
            };
            right_col[row] = self.diag[diagonal_of(row, right)] ^ s ^ left_known;
            left_col[row] = self.row[row] ^ right_col[row];
            row = (row + EVENODD_M - delta) % EVENODD_M;
        }
        (left_col, right_col)
    }
}

// =============================================================================
// Tests
// =============================================================================

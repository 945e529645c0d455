//! RAID-6 Stripe Consistency Engine
//!
//! Verifies a RAID-6 strip protected by EVENODD parity and, when positions
//! are dead or a coherency fault is located, rebuilds them. What cannot be
//! rebuilt is invalidated so the strip stays internally consistent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          RAID-6 Engine                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   ParityUnit + Eboard ──▶ Orchestrator ──▶ invalid bitmask              │
//! │                               │                                         │
//! │            ┌──────────────────┼──────────────────┐                      │
//! │            ▼                  ▼                  ▼                      │
//! │   ┌──────────────┐   ┌────────────────┐   ┌──────────────┐              │
//! │   │  Evaluator   │   │ Finish steps   │   │ Invalidation │              │
//! │   │ (per sector) │   │ verify/rebuild │   │   & repair   │              │
//! │   └──────┬───────┘   └───────┬────────┘   └──────┬───────┘              │
//! │          │                   │                   │                      │
//! │          ▼                   ▼                   ▼                      │
//! │   ┌──────────────┐   ┌────────────────┐   ┌──────────────┐              │
//! │   │  Syndromes   │   │    Parity      │   │    Stamps    │              │
//! │   │  (EVENODD)   │   │  generation    │   │   engine     │              │
//! │   └──────────────┘   └────────────────┘   └──────────────┘              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Sector** (`sector.rs`): sector image, checksum, stamps, invalidation
//! - **Geometry** (`position.rs`): validated physical/logical layout
//! - **EVENODD** (`evenodd.rs`): symbol arithmetic, syndromes, solvers
//! - **Eboard** (`eboard.rs`): correctable/uncorrectable error bitmaps
//! - **Scratch** (`scratch.rs`): state machine and fatal position tracking
//! - **Orchestrator** (`orchestrator.rs`): bounded pass loop and fix-ups
//!
//! # Usage
//!
//! ```rust,ignore
//! use stripeguard::raid6::{Eboard, EvaluatorConfig, Raid6Evaluator, SyntheticStrip};
//!
//! let evaluator = Raid6Evaluator::new(EvaluatorConfig::default())?;
//! let mut strip = SyntheticStrip::new(8, 0x1000, 0x21)?;
//! strip.kill(2);
//! strip.rebuild_pos = [2, 0xFFFF];
//!
//! let mut eboard = Eboard::default();
//! let invalid = evaluator.evaluate(&mut eboard, strip.unit())?;
//! assert_eq!(invalid, 0);
//! ```

pub mod config;
pub mod constants;
pub mod eboard;
pub mod evenodd;
pub mod orchestrator;
pub mod parity;
pub mod position;
pub mod scratch;
pub mod sector;
pub mod stamps;
pub mod synthetic;

pub(crate) mod algorithms;
pub(crate) mod context;
pub(crate) mod evaluator;
pub(crate) mod invalidate;

mod proptest;

pub use config::{EvaluatorConfig, InvariantSeverity, OptionFlags, MAX_PASSES};
pub use constants::{RaidSixConstants, ZeroedPoc};
pub use eboard::{Eboard, ErrorCategory};
pub use orchestrator::{
    evaluate_parity_unit_r6, evaluate_with_report, EvaluationReport, ParityUnit, Raid6Evaluator,
    StripOutcome,
};
pub use parity::{compute_parity, encode_parity, ParityImage};
pub use position::{StripGeometry, INVALID_POSITION, MAX_WIDTH, MIN_WIDTH};
pub use scratch::{FatalCount, ScratchState};
pub use sector::{InvalidationReason, Sector, WORDS_PER_BLOCK};
pub use stamps::{canonical_stamps, StripStamps};
pub use synthetic::{pattern_payload, SyntheticStrip};

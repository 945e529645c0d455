//! StripeGuard - RAID-6 Stripe Consistency and Reconstruction
//!
//! Verifies RAID-6 strips protected by EVENODD row and diagonal parity,
//! rebuilds up to two lost positions and invalidates what cannot be rebuilt.
//!
//! # Architecture
//!
//! ```text
//! Eboard + ParityUnit → Orchestrator (state machine) → repaired buffers + invalid mask
//! ```
//!
//! Every buffer is owned by the caller; the engine mutates the sectors in
//! place and reports what it did on the error board.
//!
//! # Modules
//!
//! - [`raid6`] - EVENODD syndromes, sector evaluation and the strip state machine
//! - [`diagnostics`] - Diagnostic sinks for per-sector traces
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics integration

pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod raid6;

// Re-export commonly used types
pub use diagnostics::{DiagnosticSink, NoopSink, TraceRing, TracingSink};
pub use error::{Error, Result};
pub use raid6::{
    evaluate_parity_unit_r6, Eboard, EvaluationReport, EvaluatorConfig, ParityUnit, Raid6Evaluator,
    Sector, StripOutcome,
};

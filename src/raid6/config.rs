//! Evaluator Configuration

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Passes the orchestrator may spend on one strip
pub const MAX_PASSES: usize = 3;

bitflags! {
    /// Per-request evaluation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OptionFlags: u32 {
        /// Validate data sector LBA stamps against the strip LBA.
        const CHECK_LBA_STAMP = 0x0001;
        /// Emit a sector trace for every position an error is recorded on.
        const TRACE_SECTORS = 0x0002;
    }
}

impl OptionFlags {
    /// Parse raw option bits, rejecting unknown ones.
    pub fn from_raw(bits: u32) -> Result<Self> {
        Self::from_bits(bits).ok_or_else(|| Error::Config(format!("unknown option bits {:#x}", bits)))
    }
}

/// What happens when an end-of-evaluation consistency check fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InvariantSeverity {
    /// Return `Error::InvariantViolation`
    #[default]
    ReturnError,
    /// Abort the process
    Panic,
}

/// Configuration for the strip evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub invariant_severity: InvariantSeverity,

    /// Options OR'ed into every request
    pub default_options: OptionFlags,

    /// Pass bound; lower than `MAX_PASSES` only to exercise incomplete runs
    pub max_passes: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            invariant_severity: InvariantSeverity::ReturnError,
            default_options: OptionFlags::empty(),
            max_passes: MAX_PASSES,
        }
    }
}

impl EvaluatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_PASSES).contains(&self.max_passes) {
            return Err(Error::Config(format!(
                "max_passes {} outside 1..={}",
                self.max_passes, MAX_PASSES
            )));
        }
        Ok(())
    }
}

//! Diagnostic Sink
//!
//! The engine reports what it finds through a [`DiagnosticSink`] and never
//! depends on it to make progress. Three implementations ship with the crate:
//!
//! - [`NoopSink`]: discards everything
//! - [`TracingSink`]: forwards to `tracing`
//! - [`TraceRing`]: bounded in-memory history, safe to share across threads

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::raid6::sector::Sector;

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TraceLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// What kind of finding an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceCategory {
    Checksum,
    Stamp,
    Coherency,
    Invalidation,
    Reconstruction,
    Consistency,
}

/// One sector snapshot handed to [`DiagnosticSink::trace_sector`]
#[derive(Debug, Clone, Copy)]
pub struct SectorTrace<'a> {
    pub lba: u64,
    pub position_bitmask: u16,
    /// Bits that differ from what was expected, if known
    pub bits_diff: u16,
    pub group_id: u32,
    pub group_offset: u64,
    pub sector: &'a Sector,
    pub label: &'a str,
    pub level: TraceLevel,
    pub category: TraceCategory,
}

/// Receiver of engine diagnostics
pub trait DiagnosticSink: Send + Sync {
    fn report_error(&self, message: &str, level: TraceLevel, category: TraceCategory);

    fn trace_sector(&self, trace: &SectorTrace<'_>);
}

// =============================================================================
// Noop / Tracing Sinks
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn report_error(&self, _message: &str, _level: TraceLevel, _category: TraceCategory) {}

    fn trace_sector(&self, _trace: &SectorTrace<'_>) {}
}

/// Forwards events to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report_error(&self, message: &str, level: TraceLevel, category: TraceCategory) {
        match level {
            TraceLevel::Debug => debug!(?category, "{}", message),
            TraceLevel::Info => info!(?category, "{}", message),
            TraceLevel::Warning => warn!(?category, "{}", message),
            TraceLevel::Error | TraceLevel::Critical => error!(?category, "{}", message),
        }
    }

    fn trace_sector(&self, trace: &SectorTrace<'_>) {
        debug!(
            lba = trace.lba,
            position = format_args!("{:#06x}", trace.position_bitmask),
            bits_diff = format_args!("{:#06x}", trace.bits_diff),
            group_id = trace.group_id,
            group_offset = trace.group_offset,
            crc = format_args!("{:#06x}", trace.sector.crc),
            lba_stamp = format_args!("{:#06x}", trace.sector.lba_stamp),
            time_stamp = format_args!("{:#06x}", trace.sector.time_stamp),
            write_stamp = format_args!("{:#06x}", trace.sector.write_stamp),
            category = ?trace.category,
            "{}",
            trace.label
        );
    }
}

// =============================================================================
// Trace Ring
// =============================================================================

/// Owned copy of one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub at: DateTime<Utc>,
    pub level: TraceLevel,
    pub category: TraceCategory,
    pub message: String,
    /// Present for sector traces
    pub sector: Option<SectorSnapshot>,
}

/// Metadata of a traced sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorSnapshot {
    pub lba: u64,
    pub position_bitmask: u16,
    pub bits_diff: u16,
    pub group_id: u32,
    pub group_offset: u64,
    pub crc: u16,
    pub lba_stamp: u16,
    pub time_stamp: u16,
    pub write_stamp: u16,
}

/// Bounded history of the most recent events
#[derive(Debug)]
pub struct TraceRing {
    capacity: usize,
    records: Mutex<VecDeque<TraceRecord>>,
}

impl TraceRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    fn push(&self, record: TraceRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Copy of the retained events, oldest first.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn count(&self, category: TraceCategory) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.category == category)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Default for TraceRing {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DiagnosticSink for TraceRing {
    fn report_error(&self, message: &str, level: TraceLevel, category: TraceCategory) {
        self.push(TraceRecord {
            at: Utc::now(),
            level,
            category,
            message: message.to_string(),
            sector: None,
        });
    }

    fn trace_sector(&self, trace: &SectorTrace<'_>) {
        self.push(TraceRecord {
            at: Utc::now(),
            level: trace.level,
            category: trace.category,
            message: trace.label.to_string(),
            sector: Some(SectorSnapshot {
                lba: trace.lba,
                position_bitmask: trace.position_bitmask,
                bits_diff: trace.bits_diff,
                group_id: trace.group_id,
                group_offset: trace.group_offset,
                crc: trace.sector.crc,
                lba_stamp: trace.sector.lba_stamp,
                time_stamp: trace.sector.time_stamp,
                write_stamp: trace.sector.write_stamp,
            }),
        });
    }
}

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::parser::Fragment;

/// Accumulation state for one `(source, report index)` pair.
///
/// `chunks` never holds more entries than the declared total: the table
/// flushes and drops the report the moment the count is reached.
#[derive(Debug, Default)]
struct PendingReport {
    chunks: BTreeMap<u64, String>,
    declared_total: u64,
}

/// A fully reassembled report, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedReport {
    pub source_id: String,
    pub report_index: u64,
    pub payload: String,
}

/// Per-file reassembly state, keyed by `(source_id, report_index)`.
///
/// One tailed file may interleave fragments from several devices logging
/// through the same relay; each device's reports accumulate independently and
/// never merge. The table is owned exclusively by the tailer task that feeds
/// it, so it needs no locking.
///
/// Completion is judged purely by count: a report is flushed once it holds as
/// many distinct chunk ids as its declared total, and assembly concatenates
/// whatever chunk ids are present in ascending order. Report indices are
/// reused by devices over time; because a completed report is removed
/// immediately, a later fragment with the same index starts a fresh
/// accumulation.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    pending: HashMap<(String, u64), PendingReport>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment, returning the completed report when this fragment
    /// supplied the last missing chunk.
    pub fn ingest(&mut self, fragment: Fragment) -> Option<CompletedReport> {
        let Fragment {
            timestamp,
            source_id,
            report_index,
            chunk_total,
            chunk_id,
            payload,
        } = fragment;

        let key = (source_id, report_index);
        let pending = self.pending.entry(key.clone()).or_default();
        // Duplicate chunk ids overwrite: last write wins, no double count.
        pending.chunks.insert(chunk_id, payload);
        pending.declared_total = chunk_total;

        debug!(
            source = %key.0,
            report_index,
            chunk_id,
            received = pending.chunks.len(),
            declared_total = pending.declared_total,
            timestamp = %timestamp,
            "fragment recorded"
        );

        if pending.chunks.len() as u64 >= pending.declared_total {
            let pending = self.pending.remove(&key)?;
            let (source_id, report_index) = key;
            let payload: String = pending.chunks.into_values().collect();
            return Some(CompletedReport {
                source_id,
                report_index,
                payload,
            });
        }

        None
    }

    /// Number of reports still accumulating chunks.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

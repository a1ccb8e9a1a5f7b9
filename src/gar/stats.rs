//! Import statistics tracking.
//!
//! Tracks batches, rows and elapsed time per entity kind for one run.

use crate::gar::kind::EntityKind;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::time::Duration;

/// Counters for a single entity kind.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindStats {
    pub kind: EntityKind,
    /// Number of batches handed to the writer
    pub batches: usize,
    /// Rows the writer reported as persisted
    pub rows: u64,
    /// Wall-clock time spent draining this kind, in milliseconds
    pub elapsed_ms: u64,
}

impl KindStats {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            batches: 0,
            rows: 0,
            elapsed_ms: 0,
        }
    }

    pub fn record_batch(&mut self, rows: u64) {
        self.batches += 1;
        self.rows += rows;
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed_ms = elapsed.as_millis() as u64;
    }
}

/// Outcome of a completed import run, one entry per kind in import order.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub kinds: Vec<KindStats>,
    pub elapsed_ms: u64,
}

impl ImportReport {
    pub fn push(&mut self, stats: KindStats) {
        self.kinds.push(stats);
    }

    pub fn total_rows(&self) -> u64 {
        self.kinds.iter().map(|k| k.rows).sum()
    }

    pub fn rows_for(&self, kind: EntityKind) -> u64 {
        self.kinds
            .iter()
            .filter(|k| k.kind == kind)
            .map(|k| k.rows)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_sums_rows_across_kinds() {
        let mut addresses = KindStats::new(EntityKind::Addresses);
        addresses.record_batch(3);
        addresses.record_batch(3);
        let mut rooms = KindStats::new(EntityKind::Rooms);
        rooms.record_batch(1);

        let mut report = ImportReport::default();
        report.push(addresses);
        report.push(rooms);

        assert_eq!(report.total_rows(), 7);
        assert_eq!(report.kinds[0].batches, 2);
        assert_eq!(report.rows_for(EntityKind::Addresses), 6);
        assert_eq!(report.rows_for(EntityKind::Steads), 0);
    }
}

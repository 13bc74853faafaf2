//! Union of freshly fetched and persisted candles, keyed by timestamp.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::candle::CandleRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    /// Ascending, one record per timestamp.
    pub records: Vec<CandleRecord>,
    /// Fresh timestamps that were not persisted before.
    pub added: u64,
    /// Persisted records overwritten by a fresh record with different values.
    pub replaced: u64,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.replaced > 0
    }
}

/// Fresh records win ties; duplicates inside either input collapse to the
/// last occurrence before anything is counted.
pub fn merge_records(fresh: &[CandleRecord], persisted: &[CandleRecord]) -> MergeReport {
    let mut by_ts: BTreeMap<i64, CandleRecord> = persisted
        .iter()
        .map(|record| (record.timestamp_ms, record.clone()))
        .collect();
    let fresh_by_ts: BTreeMap<i64, &CandleRecord> = fresh
        .iter()
        .map(|record| (record.timestamp_ms, record))
        .collect();

    let mut added = 0u64;
    let mut replaced = 0u64;
    for (ts, record) in fresh_by_ts {
        match by_ts.entry(ts) {
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                added += 1;
            }
            Entry::Occupied(mut slot) => {
                if slot.get() != record {
                    slot.insert(record.clone());
                    replaced += 1;
                }
            }
        }
    }

    MergeReport {
        records: by_ts.into_values().collect(),
        added,
        replaced,
    }
}

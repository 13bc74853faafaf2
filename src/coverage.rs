//! Gap audit over a candle series at a fixed bar step.

use serde::{Deserialize, Serialize};

use crate::candle::{BarInterval, CandleRecord};

const MAX_REPORTED_GAP_RANGES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub first_ts_ms: Option<i64>,
    pub last_ts_ms: Option<i64>,
    pub expected_points: u64,
    pub actual_points: u64,
    pub missing_points: u64,
    /// Rows that did not advance the series (duplicates or out of order).
    pub unordered_points: u64,
    /// Rows not aligned to the bar step relative to the first row.
    pub misaligned_points: u64,
    pub total_gap_ranges: u64,
    /// Inclusive (first missing bar, last missing bar), capped at 256 entries.
    pub gap_ranges: Vec<(i64, i64)>,
}

impl CoverageReport {
    pub fn is_contiguous(&self) -> bool {
        self.missing_points == 0 && self.unordered_points == 0 && self.misaligned_points == 0
    }
}

/// Audits `records` between their first and last timestamp.
pub fn audit_coverage(records: &[CandleRecord], interval: BarInterval) -> CoverageReport {
    let step = interval.step_ms();
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return CoverageReport {
            first_ts_ms: None,
            last_ts_ms: None,
            expected_points: 0,
            actual_points: 0,
            missing_points: 0,
            unordered_points: 0,
            misaligned_points: 0,
            total_gap_ranges: 0,
            gap_ranges: Vec::new(),
        };
    };

    let start = first.timestamp_ms;
    let mut full = Vec::new();
    let mut cursor = start;
    let mut unordered_points = 0u64;
    let mut misaligned_points = 0u64;

    for record in records {
        let ts = record.timestamp_ms;
        if ts < cursor {
            unordered_points += 1;
            continue;
        }
        if (ts - start) % step != 0 {
            misaligned_points += 1;
            continue;
        }
        if ts > cursor {
            full.push((cursor, ts - step));
        }
        cursor = ts.saturating_add(step);
    }

    let expected_points = if last.timestamp_ms >= start {
        ((last.timestamp_ms - start) / step + 1) as u64
    } else {
        1
    };
    let missing_points = full
        .iter()
        .map(|(gap_start, gap_end)| ((gap_end - gap_start) / step + 1) as u64)
        .sum();
    let total_gap_ranges = full.len() as u64;

    CoverageReport {
        first_ts_ms: Some(start),
        last_ts_ms: Some(last.timestamp_ms),
        expected_points,
        actual_points: records.len() as u64,
        missing_points,
        unordered_points,
        misaligned_points,
        total_gap_ranges,
        gap_ranges: full.into_iter().take(MAX_REPORTED_GAP_RANGES).collect(),
    }
}

//! Input windows for an external forecasting model.
//!
//! The model itself lives outside this crate. It consumes `lookback` rows of
//! history with their timestamps plus `pred_len` future timestamps, and
//! answers with the same number of predicted rows.

use serde::Serialize;

use crate::candle::{BarInterval, CandleRecord};
use crate::coverage::{audit_coverage, CoverageReport};
use crate::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindowConfig {
    pub lookback: usize,
    pub pred_len: usize,
}

impl Default for ForecastWindowConfig {
    fn default() -> Self {
        Self {
            lookback: 400,
            pred_len: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastWindow {
    pub history: Vec<CandleRecord>,
    pub history_timestamps: Vec<i64>,
    pub future_timestamps: Vec<i64>,
    pub step_ms: i64,
    /// Gap audit of `history`; a consumer decides whether gaps are acceptable.
    pub coverage: CoverageReport,
}

/// Takes the most recent `lookback` rows of an ascending series.
pub fn prepare_forecast_window(
    records: &[CandleRecord],
    interval: BarInterval,
    cfg: &ForecastWindowConfig,
) -> Result<ForecastWindow, IngestError> {
    if cfg.lookback == 0 || records.len() < cfg.lookback {
        return Err(IngestError::InsufficientHistory {
            required: cfg.lookback.max(1),
            available: records.len(),
        });
    }

    let history = records[records.len() - cfg.lookback..].to_vec();
    let history_timestamps: Vec<i64> = history.iter().map(|r| r.timestamp_ms).collect();

    // Step follows the last two bars of the whole series, falling back to the
    // nominal bar size.
    let step_ms = match records {
        [.., prev, last] if last.timestamp_ms > prev.timestamp_ms => {
            last.timestamp_ms - prev.timestamp_ms
        }
        _ => interval.step_ms(),
    };
    let last_ts = history_timestamps.last().copied().unwrap_or_default();
    let future_timestamps = (1..=cfg.pred_len as i64)
        .map(|i| last_ts.saturating_add(step_ms.saturating_mul(i)))
        .collect();

    let coverage = audit_coverage(&history, interval);

    Ok(ForecastWindow {
        history,
        history_timestamps,
        future_timestamps,
        step_ms,
        coverage,
    })
}

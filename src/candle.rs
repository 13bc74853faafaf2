//! Candle records, bar intervals and dataset keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::IngestError;

/// One OHLC(V) bar keyed by its open time.
///
/// `volume` and `amount` are `None` when the upstream source does not report
/// traded quantity (mark-price candles, for example).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub amount: Option<f64>,
}

impl CandleRecord {
    pub fn ohlc(timestamp_ms: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp_ms,
            open,
            high,
            low,
            close,
            volume: None,
            amount: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarInterval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
}

pub const ALL_INTERVALS: [BarInterval; 12] = [
    BarInterval::M1,
    BarInterval::M3,
    BarInterval::M5,
    BarInterval::M15,
    BarInterval::M30,
    BarInterval::H1,
    BarInterval::H2,
    BarInterval::H4,
    BarInterval::H6,
    BarInterval::H12,
    BarInterval::D1,
    BarInterval::W1,
];

const MINUTE_MS: i64 = 60_000;

impl BarInterval {
    /// Canonical label, also the OKX `bar` parameter.
    pub fn label(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1H",
            Self::H2 => "2H",
            Self::H4 => "4H",
            Self::H6 => "6H",
            Self::H12 => "12H",
            Self::D1 => "1D",
            Self::W1 => "1W",
        }
    }

    pub fn binance_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    pub fn step_ms(self) -> i64 {
        let minutes = match self {
            Self::M1 => 1,
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H2 => 2 * 60,
            Self::H4 => 4 * 60,
            Self::H6 => 6 * 60,
            Self::H12 => 12 * 60,
            Self::D1 => 24 * 60,
            Self::W1 => 7 * 24 * 60,
        };
        minutes * MINUTE_MS
    }
}

impl fmt::Display for BarInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BarInterval {
    type Err = IngestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if !trimmed.is_ascii() {
            return Err(IngestError::InvalidRequest(format!(
                "unsupported bar interval: {raw}"
            )));
        }
        let (count, unit) = trimmed.split_at(trimmed.len().saturating_sub(1));
        // Minutes stay case-sensitive so `1M` (month) is never read as `1m`.
        let unit = match unit {
            "m" => "m",
            "h" | "H" => "H",
            "d" | "D" => "D",
            "w" | "W" => "W",
            _ => "",
        };

        ALL_INTERVALS
            .iter()
            .copied()
            .find(|interval| {
                let label = interval.label();
                label.len() == count.len() + 1
                    && label.starts_with(count)
                    && label.ends_with(unit)
                    && !unit.is_empty()
            })
            .ok_or_else(|| IngestError::InvalidRequest(format!("unsupported bar interval: {raw}")))
    }
}

/// (instrument, bar interval): one persisted dataset per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub inst_id: String,
    pub interval: BarInterval,
}

impl DatasetKey {
    pub fn new(inst_id: impl Into<String>, interval: BarInterval) -> Result<Self, IngestError> {
        let inst_id = inst_id.into();
        validate_inst_id(&inst_id)?;
        Ok(Self { inst_id, interval })
    }

    /// File-name stem with `-` normalized to `_`. Instrument ids never
    /// contain `_`, so distinct ids keep distinct stems.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.inst_id.replace('-', "_"), self.interval.label())
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.inst_id, self.interval)
    }
}

pub fn validate_inst_id(inst_id: &str) -> Result<(), IngestError> {
    if inst_id.is_empty() {
        return Err(IngestError::InvalidRequest(
            "instrument id must not be empty".to_string(),
        ));
    }
    if let Some(bad) = inst_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
    {
        return Err(IngestError::InvalidRequest(format!(
            "instrument id '{inst_id}' contains unsupported character '{bad}'"
        )));
    }
    Ok(())
}

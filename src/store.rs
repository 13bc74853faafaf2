//! CSV-backed dataset store, one file per (instrument, interval).
//!
//! Layout: header `timestamps,open,high,low,close,volume,amount`, timestamps
//! in UTC as `YYYY-MM-DD HH:MM:SS` (with a `.mmm` suffix only when the bar is
//! not second-aligned), prices as plain decimal text, and empty `volume` /
//! `amount` cells when the source does not report them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeZone, Utc};
use csv::StringRecord;
use tracing::{debug, info};

use crate::candle::{CandleRecord, DatasetKey};
use crate::IngestError;

pub const CSV_HEADER: [&str; 7] = [
    "timestamps",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "amount",
];

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TS_FORMAT_MILLIS: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub data_root: PathBuf,
    /// Appended to the file stem, e.g. `mark` for mark-price datasets.
    pub file_suffix: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            file_suffix: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetStore {
    cfg: StoreConfig,
}

impl DatasetStore {
    pub fn new(cfg: StoreConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    pub fn path_for(&self, key: &DatasetKey) -> PathBuf {
        let file_name = match &self.cfg.file_suffix {
            Some(suffix) if !suffix.is_empty() => format!("{}_{}.csv", key.file_stem(), suffix),
            _ => format!("{}.csv", key.file_stem()),
        };
        self.cfg.data_root.join(file_name)
    }

    /// Empty when the dataset has never been written.
    pub fn load(&self, key: &DatasetKey) -> Result<Vec<CandleRecord>, IngestError> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(
                component = "store",
                event = "store.load.absent",
                path = %path.display()
            );
            return Ok(Vec::new());
        }

        let records = read_dataset(&path)?;
        debug!(
            component = "store",
            event = "store.load.finish",
            path = %path.display(),
            rows = records.len()
        );
        Ok(records)
    }

    pub fn oldest_timestamp(&self, key: &DatasetKey) -> Result<Option<i64>, IngestError> {
        Ok(self.load(key)?.first().map(|record| record.timestamp_ms))
    }

    /// Replaces the dataset with `records`, which must be strictly ascending.
    pub fn save(&self, key: &DatasetKey, records: &[CandleRecord]) -> Result<PathBuf, IngestError> {
        let path = self.path_for(key);
        if let Some(pair) = records
            .windows(2)
            .find(|pair| pair[0].timestamp_ms >= pair[1].timestamp_ms)
        {
            return Err(IngestError::InvalidRequest(format!(
                "records must be strictly ascending: {} then {}",
                pair[0].timestamp_ms, pair[1].timestamp_ms
            )));
        }

        let bytes = encode_dataset(records).map_err(|message| IngestError::WriteFailed {
            path: path.clone(),
            message,
        })?;
        write_atomic(&path, &bytes).map_err(|err| IngestError::WriteFailed {
            path: path.clone(),
            message: err.to_string(),
        })?;

        info!(
            component = "store",
            event = "store.save.finish",
            path = %path.display(),
            rows = records.len(),
            bytes = bytes.len()
        );
        Ok(path)
    }
}

pub fn read_dataset(path: &Path) -> Result<Vec<CandleRecord>, IngestError> {
    let file = fs::File::open(path).map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let corrupt = |line: u64, reason: String| IngestError::CorruptRecord {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|err| corrupt(1, err.to_string()))?
        .clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    if found != CSV_HEADER {
        return Err(corrupt(1, format!("unexpected header: {}", found.join(","))));
    }

    let mut records: Vec<CandleRecord> = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| {
            let line = err.position().map(|pos| pos.line()).unwrap_or_default();
            corrupt(line, err.to_string())
        })?;
        let line = row.position().map(|pos| pos.line()).unwrap_or_default();
        let record = parse_row(&row).map_err(|reason| corrupt(line, reason))?;

        if let Some(prev) = records.last() {
            if record.timestamp_ms <= prev.timestamp_ms {
                return Err(corrupt(
                    line,
                    format!(
                        "timestamp {} is not after previous row {}",
                        format_timestamp_utc(record.timestamp_ms),
                        format_timestamp_utc(prev.timestamp_ms)
                    ),
                ));
            }
        }
        records.push(record);
    }

    Ok(records)
}

fn parse_row(row: &StringRecord) -> Result<CandleRecord, String> {
    if row.len() != CSV_HEADER.len() {
        return Err(format!(
            "row has {} columns, expected {}",
            row.len(),
            CSV_HEADER.len()
        ));
    }

    let ts_raw = row.get(0).unwrap_or_default();
    let timestamp_ms = parse_timestamp_utc(ts_raw)
        .ok_or_else(|| format!("failed to parse field timestamps value '{ts_raw}'"))?;

    Ok(CandleRecord {
        timestamp_ms,
        open: parse_price(row, 1, "open")?,
        high: parse_price(row, 2, "high")?,
        low: parse_price(row, 3, "low")?,
        close: parse_price(row, 4, "close")?,
        volume: parse_optional(row, 5, "volume")?,
        amount: parse_optional(row, 6, "amount")?,
    })
}

fn parse_price(row: &StringRecord, idx: usize, field: &str) -> Result<f64, String> {
    parse_optional(row, idx, field)?.ok_or_else(|| format!("field {field} is empty"))
}

fn parse_optional(row: &StringRecord, idx: usize, field: &str) -> Result<Option<f64>, String> {
    let raw = row.get(idx).unwrap_or_default().trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(Some)
        .ok_or_else(|| format!("failed to parse field {field} value '{raw}'"))
}

fn encode_dataset(records: &[CandleRecord]) -> Result<Vec<u8>, String> {
    let mut writer = csv::Writer::from_writer(Vec::with_capacity(records.len() * 64));
    writer
        .write_record(CSV_HEADER)
        .map_err(|err| err.to_string())?;
    for record in records {
        writer
            .write_record([
                format_timestamp_utc(record.timestamp_ms),
                record.open.to_string(),
                record.high.to_string(),
                record.low.to_string(),
                record.close.to_string(),
                optional_cell(record.volume),
                optional_cell(record.amount),
            ])
            .map_err(|err| err.to_string())?;
    }
    writer.into_inner().map_err(|err| err.to_string())
}

fn optional_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn format_timestamp_utc(ts_ms: i64) -> String {
    match Utc.timestamp_millis_opt(ts_ms).single() {
        Some(dt) if ts_ms.rem_euclid(1_000) == 0 => dt.format(TS_FORMAT).to_string(),
        Some(dt) => dt.format(TS_FORMAT_MILLIS).to_string(),
        None => ts_ms.to_string(),
    }
}

pub fn parse_timestamp_utc(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let format = if raw.contains('.') {
        TS_FORMAT_MILLIS
    } else {
        TS_FORMAT
    };
    NaiveDateTime::parse_from_str(raw, format)
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset.csv".to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let written = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}

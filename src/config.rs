//! Sync configuration assembled from `CANDLE_*` environment variables.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::candle::{BarInterval, DatasetKey};
use crate::fetcher::{
    BinanceKlinesFetcher, FetcherConfig, OkxMarkPriceFetcher, PageFetcher, ProxyConfig,
    MAX_PAGE_LIMIT,
};
use crate::forecast::ForecastWindowConfig;
use crate::ingest::IngestMode;
use crate::pager::PagerConfig;
use crate::store::StoreConfig;
use crate::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    OkxMark,
    Binance,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OkxMark => "okx-mark",
            Self::Binance => "binance",
        }
    }

    /// Mark-price datasets are kept apart from traded-price ones.
    pub fn file_suffix(self) -> Option<&'static str> {
        match self {
            Self::OkxMark => Some("mark"),
            Self::Binance => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub source: SourceKind,
    pub inst_ids: Vec<String>,
    pub interval: BarInterval,
    pub mode: IngestMode,
    pub store: StoreConfig,
    pub fetcher: FetcherConfig,
    pub pager: PagerConfig,
    pub forecast: ForecastWindowConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let source = SourceKind::OkxMark;
        Self {
            source,
            inst_ids: vec!["BTC-USD-SWAP".to_string()],
            interval: BarInterval::M5,
            mode: IngestMode::Incremental,
            store: StoreConfig {
                file_suffix: source.file_suffix().map(str::to_string),
                ..StoreConfig::default()
            },
            fetcher: FetcherConfig::default(),
            pager: PagerConfig::default(),
            forecast: ForecastWindowConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let get = |var: &str| {
            lookup(var)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(raw) = get("CANDLE_SOURCE") {
            cfg.source = parse_source(&raw)
                .ok_or_else(|| invalid("CANDLE_SOURCE", &raw, "expected okx-mark or binance"))?;
            cfg.store.file_suffix = cfg.source.file_suffix().map(str::to_string);
        }
        if let Some(raw) = get("CANDLE_INST_IDS") {
            let ids: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            if ids.is_empty() {
                return Err(invalid("CANDLE_INST_IDS", &raw, "no instrument ids"));
            }
            cfg.inst_ids = ids;
        }
        if let Some(raw) = get("CANDLE_BAR") {
            cfg.interval = raw
                .parse()
                .map_err(|_| invalid("CANDLE_BAR", &raw, "unsupported bar interval"))?;
        }
        if let Some(raw) = get("CANDLE_MODE") {
            cfg.mode = parse_mode(&raw)
                .ok_or_else(|| invalid("CANDLE_MODE", &raw, "expected update or cold"))?;
        }
        if let Some(raw) = get("CANDLE_DATA_ROOT") {
            cfg.store.data_root = PathBuf::from(raw);
        }
        if let Some(raw) = get("CANDLE_PROXY") {
            cfg.fetcher.proxy = Some(ProxyConfig { url: raw });
        }
        if let Some(raw) = get("CANDLE_HTTP_TIMEOUT_MS") {
            cfg.fetcher.http_timeout_ms = parse_number("CANDLE_HTTP_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("CANDLE_PAGES") {
            cfg.pager.page_budget = parse_number("CANDLE_PAGES", &raw)?;
        }
        if let Some(raw) = get("CANDLE_LIMIT") {
            let limit: u32 = parse_number("CANDLE_LIMIT", &raw)?;
            if limit == 0 || limit > MAX_PAGE_LIMIT {
                return Err(invalid(
                    "CANDLE_LIMIT",
                    &raw,
                    &format!("must be within 1..={MAX_PAGE_LIMIT}"),
                ));
            }
            cfg.pager.page_limit = limit;
        }
        if let Some(raw) = get("CANDLE_REQUEST_DELAY_MS") {
            cfg.pager.request_delay_ms = parse_number("CANDLE_REQUEST_DELAY_MS", &raw)?;
        }
        if let Some(raw) = get("CANDLE_MAX_RETRIES") {
            cfg.pager.max_retries = parse_number("CANDLE_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("CANDLE_LOOKBACK") {
            cfg.forecast.lookback = parse_number("CANDLE_LOOKBACK", &raw)?;
        }
        if let Some(raw) = get("CANDLE_PRED_LEN") {
            cfg.forecast.pred_len = parse_number("CANDLE_PRED_LEN", &raw)?;
        }

        Ok(cfg)
    }

    pub fn dataset_keys(&self) -> Result<Vec<DatasetKey>, IngestError> {
        self.inst_ids
            .iter()
            .map(|inst_id| DatasetKey::new(inst_id.clone(), self.interval))
            .collect()
    }

    pub fn build_fetcher(&self) -> Result<Box<dyn PageFetcher>, IngestError> {
        Ok(match self.source {
            SourceKind::OkxMark => Box::new(OkxMarkPriceFetcher::new(&self.fetcher)?),
            SourceKind::Binance => Box::new(BinanceKlinesFetcher::new(&self.fetcher)?),
        })
    }
}

fn parse_source(raw: &str) -> Option<SourceKind> {
    match raw.to_ascii_lowercase().as_str() {
        "okx-mark" | "okx" => Some(SourceKind::OkxMark),
        "binance" => Some(SourceKind::Binance),
        _ => None,
    }
}

fn parse_mode(raw: &str) -> Option<IngestMode> {
    match raw.to_ascii_lowercase().as_str() {
        "update" | "incremental" => Some(IngestMode::Incremental),
        "cold" | "fetch" => Some(IngestMode::Cold),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| invalid(var, raw, "expected a non-negative integer"))
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

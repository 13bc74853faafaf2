//! Single-page candle requests against upstream REST endpoints.
//!
//! A fetcher performs exactly one request per call and never retries; the
//! backward pager owns retry and pacing. Proxy settings travel with the
//! fetcher's own HTTP client, nothing is installed process-wide.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::candle::{validate_inst_id, BarInterval, CandleRecord};
use crate::error::{FetchCause, IngestError};

pub const OKX_BASE_URL: &str = "https://www.okx.com";
pub const BINANCE_BASE_URL: &str = "https://api.binance.com";
pub const MAX_PAGE_LIMIT: u32 = 300;

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Candles strictly older than `cursor_ms`, at most `limit` of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub inst_id: &'a str,
    pub interval: BarInterval,
    pub cursor_ms: i64,
    pub limit: u32,
}

impl PageRequest<'_> {
    pub fn validate(&self) -> Result<(), IngestError> {
        validate_inst_id(self.inst_id)?;
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(IngestError::InvalidRequest(format!(
                "page limit must be within 1..={MAX_PAGE_LIMIT}, got {}",
                self.limit
            )));
        }
        if self.cursor_ms < 0 {
            return Err(IngestError::InvalidRequest(format!(
                "cursor must be a non-negative millisecond timestamp, got {}",
                self.cursor_ms
            )));
        }
        Ok(())
    }

    fn failed(&self, cause: FetchCause) -> IngestError {
        IngestError::FetchFailed {
            inst_id: self.inst_id.to_string(),
            bar: self.interval.label().to_string(),
            cause,
        }
    }
}

pub trait PageFetcher {
    fn source_name(&self) -> &'static str;

    /// Returns bars in upstream order; an empty page means no older history.
    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    pub http_timeout_ms: u64,
    pub proxy: Option<ProxyConfig>,
    pub base_url: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: 10_000,
            proxy: None,
            base_url: None,
        }
    }
}

pub trait HttpTransport {
    fn get_text(&self, url: &str) -> Result<String, FetchCause>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(cfg: &FetcherConfig) -> Result<Self, IngestError> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms));
        if let Some(proxy) = &cfg.proxy {
            let proxy = reqwest::Proxy::all(&proxy.url).map_err(|err| {
                IngestError::InvalidRequest(format!("invalid proxy url '{}': {err}", proxy.url))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|err| {
            IngestError::InvalidRequest(format!("HTTP client build error: {err}"))
        })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get_text(&self, url: &str) -> Result<String, FetchCause> {
        let response = self.client.get(url).send().map_err(reqwest_cause)?;

        let status = response.status();
        let body = response.text().map_err(reqwest_cause)?;
        if !status.is_success() {
            return Err(FetchCause::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            });
        }
        Ok(body)
    }
}

fn reqwest_cause(err: reqwest::Error) -> FetchCause {
    if err.is_timeout() {
        FetchCause::Timeout(err.to_string())
    } else {
        FetchCause::Transport(err.to_string())
    }
}

/// OKX mark-price candlesticks. These carry no traded volume.
pub struct OkxMarkPriceFetcher<T = ReqwestTransport> {
    transport: T,
    base_url: String,
}

impl OkxMarkPriceFetcher<ReqwestTransport> {
    pub fn new(cfg: &FetcherConfig) -> Result<Self, IngestError> {
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| OKX_BASE_URL.to_string());
        Ok(Self::with_transport(ReqwestTransport::new(cfg)?, base_url))
    }
}

impl<T: HttpTransport> OkxMarkPriceFetcher<T> {
    pub fn with_transport(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    pub fn page_url(&self, req: &PageRequest<'_>) -> String {
        format!(
            "{}/api/v5/market/mark-price-candles?instId={}&bar={}&after={}&limit={}",
            self.base_url.trim_end_matches('/'),
            req.inst_id,
            req.interval.label(),
            req.cursor_ms,
            req.limit
        )
    }
}

#[derive(Debug, Deserialize)]
struct OkxEnvelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl<T: HttpTransport> PageFetcher for OkxMarkPriceFetcher<T> {
    fn source_name(&self) -> &'static str {
        "okx-mark"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError> {
        req.validate()?;
        let url = self.page_url(req);
        debug!(
            component = "fetcher",
            event = "fetcher.request",
            source = self.source_name(),
            url = %url
        );

        let body = self.transport.get_text(&url).map_err(|cause| req.failed(cause))?;
        parse_okx_page(&body).map_err(|cause| req.failed(cause))
    }
}

fn parse_okx_page(body: &str) -> Result<Vec<CandleRecord>, FetchCause> {
    let envelope: OkxEnvelope = serde_json::from_str(body).map_err(|err| {
        FetchCause::Malformed(format!(
            "{err} (body: {})",
            truncate(body, MAX_ERROR_BODY_CHARS)
        ))
    })?;

    if envelope.code != "0" {
        return Err(FetchCause::Upstream {
            code: envelope.code,
            message: envelope.msg,
        });
    }

    envelope
        .data
        .iter()
        .map(|row| parse_ohlc_row(row, 5))
        .collect()
}

/// Binance spot klines; volume and quote volume are real.
pub struct BinanceKlinesFetcher<T = ReqwestTransport> {
    transport: T,
    base_url: String,
}

impl BinanceKlinesFetcher<ReqwestTransport> {
    pub fn new(cfg: &FetcherConfig) -> Result<Self, IngestError> {
        let base_url = cfg
            .base_url
            .clone()
            .unwrap_or_else(|| BINANCE_BASE_URL.to_string());
        Ok(Self::with_transport(ReqwestTransport::new(cfg)?, base_url))
    }
}

impl<T: HttpTransport> BinanceKlinesFetcher<T> {
    pub fn with_transport(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    /// `endTime` is inclusive upstream, so the exclusive cursor becomes `cursor - 1`.
    pub fn page_url(&self, req: &PageRequest<'_>) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&endTime={}&limit={}",
            self.base_url.trim_end_matches('/'),
            req.inst_id.to_ascii_uppercase(),
            req.interval.binance_str(),
            req.cursor_ms.saturating_sub(1),
            req.limit
        )
    }
}

impl<T: HttpTransport> PageFetcher for BinanceKlinesFetcher<T> {
    fn source_name(&self) -> &'static str {
        "binance"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError> {
        req.validate()?;
        let url = self.page_url(req);
        debug!(
            component = "fetcher",
            event = "fetcher.request",
            source = self.source_name(),
            url = %url
        );

        let body = self.transport.get_text(&url).map_err(|cause| req.failed(cause))?;
        parse_binance_page(&body).map_err(|cause| req.failed(cause))
    }
}

fn parse_binance_page(body: &str) -> Result<Vec<CandleRecord>, FetchCause> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|err| {
        FetchCause::Malformed(format!(
            "{err} (body: {})",
            truncate(body, MAX_ERROR_BODY_CHARS)
        ))
    })?;

    rows.iter()
        .map(|row| -> Result<CandleRecord, FetchCause> {
            let mut record = parse_ohlc_row(row, 8)?;
            record.volume = Some(json_f64(&row[5], "volume")?);
            record.amount = Some(json_f64(&row[7], "quote_volume")?);
            Ok(record)
        })
        .collect()
}

fn parse_ohlc_row(row: &[Value], min_len: usize) -> Result<CandleRecord, FetchCause> {
    if row.len() < min_len {
        return Err(FetchCause::Malformed(format!(
            "candle row has {} fields, expected at least {min_len}",
            row.len()
        )));
    }

    Ok(CandleRecord::ohlc(
        json_i64(&row[0], "timestamp")?,
        json_f64(&row[1], "open")?,
        json_f64(&row[2], "high")?,
        json_f64(&row[3], "low")?,
        json_f64(&row[4], "close")?,
    ))
}

// Upstream APIs send numbers either as JSON numbers or as decimal strings.
fn json_i64(value: &Value, field: &str) -> Result<i64, FetchCause> {
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    value
        .as_str()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| FetchCause::Malformed(format!("field {field} is not an integer: {value}")))
}

fn json_f64(value: &Value, field: &str) -> Result<f64, FetchCause> {
    let parsed = match value.as_f64() {
        Some(v) => Some(v),
        None => value.as_str().and_then(|text| text.parse::<f64>().ok()),
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| FetchCause::Malformed(format!("field {field} is not a number: {value}")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

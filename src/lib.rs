//! Candle ingestion core crate.
//!
//! Keeps a local CSV history of OHLC candles per (instrument, bar interval)
//! and extends it backward in time from a paginated exchange endpoint:
//! - page fetchers for OKX mark-price candles and Binance klines
//! - a backward pager with dedup, page budget, retry and cancellation
//! - a merge step where freshly fetched rows win timestamp ties
//! - atomic CSV persistence, gap audits and forecast window preparation

mod candle;
mod config;
mod coverage;
mod error;
mod fetcher;
mod forecast;
mod ingest;
mod merge;
mod observability;
mod pager;
mod store;

pub use candle::{validate_inst_id, BarInterval, CandleRecord, DatasetKey, ALL_INTERVALS};
pub use config::{ConfigError, SourceKind, SyncConfig};
pub use coverage::{audit_coverage, CoverageReport};
pub use error::{FetchCause, IngestError};
pub use fetcher::{
    BinanceKlinesFetcher, FetcherConfig, HttpTransport, OkxMarkPriceFetcher, PageFetcher,
    PageRequest, ProxyConfig, ReqwestTransport, BINANCE_BASE_URL, MAX_PAGE_LIMIT, OKX_BASE_URL,
};
pub use forecast::{prepare_forecast_window, ForecastWindow, ForecastWindowConfig};
pub use ingest::{IngestMode, IngestReport, Ingestor};
pub use merge::{merge_records, MergeReport};
pub use observability::{
    init_logging, log_app_start, log_ingest_summary, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pager::{
    BackwardPager, CancelToken, PagerConfig, PagerOutcome, StartCursor, StopReason,
};
pub use store::{
    format_timestamp_utc, parse_timestamp_utc, read_dataset, DatasetStore, StoreConfig,
    CSV_HEADER,
};

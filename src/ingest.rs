//! Ingestion runs: page backward, reconcile with the stored dataset, save.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::candle::DatasetKey;
use crate::fetcher::PageFetcher;
use crate::merge::merge_records;
use crate::pager::{BackwardPager, CancelToken, PagerConfig, StartCursor, StopReason};
use crate::store::DatasetStore;
use crate::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestMode {
    /// Start paging from now.
    Cold,
    /// Start paging from the oldest stored bar; cold when nothing is stored.
    Incremental,
}

impl IngestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub inst_id: String,
    pub bar: String,
    pub requested_mode: IngestMode,
    pub effective_mode: IngestMode,
    pub success: bool,
    /// Rows in the dataset after the run (the previous count when nothing was written).
    pub rows: usize,
    pub fetched: usize,
    pub added: u64,
    pub replaced: u64,
    pub pages_fetched: u32,
    pub stop_reason: Option<StopReason>,
    /// False when paging was cut short by an error or cancellation.
    pub complete: bool,
    pub saved: bool,
    pub path: PathBuf,
    pub error: Option<String>,
}

pub struct Ingestor<'a> {
    fetcher: &'a dyn PageFetcher,
    store: &'a DatasetStore,
    pager_cfg: &'a PagerConfig,
    cancel: CancelToken,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        store: &'a DatasetStore,
        pager_cfg: &'a PagerConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            pager_cfg,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Never fails: every outcome, including load and write errors, is
    /// folded into the returned report.
    pub fn run(&self, key: &DatasetKey, mode: IngestMode) -> IngestReport {
        let mut report = IngestReport {
            inst_id: key.inst_id.clone(),
            bar: key.interval.label().to_string(),
            requested_mode: mode,
            effective_mode: mode,
            success: false,
            rows: 0,
            fetched: 0,
            added: 0,
            replaced: 0,
            pages_fetched: 0,
            stop_reason: None,
            complete: false,
            saved: false,
            path: self.store.path_for(key),
            error: None,
        };

        info!(
            component = "ingest",
            event = "ingest.run.start",
            source = self.fetcher.source_name(),
            inst_id = %key.inst_id,
            bar = key.interval.label(),
            mode = mode.as_str(),
            path = %report.path.display()
        );

        let outcome = self.run_inner(key, mode, &mut report);
        if let Err(err) = outcome {
            report.error = Some(err.to_string());
        }
        report.success = report.error.is_none();

        if report.success {
            info!(
                component = "ingest",
                event = "ingest.run.finish",
                inst_id = %key.inst_id,
                bar = key.interval.label(),
                mode = report.effective_mode.as_str(),
                rows = report.rows,
                fetched = report.fetched,
                added = report.added,
                replaced = report.replaced,
                pages_fetched = report.pages_fetched,
                saved = report.saved
            );
        } else {
            error!(
                component = "ingest",
                event = "ingest.run.error",
                inst_id = %key.inst_id,
                bar = key.interval.label(),
                rows = report.rows,
                saved = report.saved,
                error = report.error.as_deref().unwrap_or_default()
            );
        }

        report
    }

    fn run_inner(
        &self,
        key: &DatasetKey,
        mode: IngestMode,
        report: &mut IngestReport,
    ) -> Result<(), IngestError> {
        let persisted = self.store.load(key)?;
        report.rows = persisted.len();

        let start = match (mode, persisted.first()) {
            (IngestMode::Incremental, Some(oldest)) => StartCursor::Before(oldest.timestamp_ms),
            (IngestMode::Incremental, None) => {
                info!(
                    component = "ingest",
                    event = "ingest.mode.fallback_cold",
                    inst_id = %key.inst_id,
                    bar = key.interval.label()
                );
                report.effective_mode = IngestMode::Cold;
                StartCursor::Now
            }
            (IngestMode::Cold, _) => StartCursor::Now,
        };

        let outcome = BackwardPager::new(self.fetcher, self.pager_cfg, &self.cancel).run(key, start);
        report.fetched = outcome.records.len();
        report.pages_fetched = outcome.pages_fetched;
        report.stop_reason = Some(outcome.stop);
        report.complete = outcome.stop.is_complete();

        let merged = merge_records(&outcome.records, &persisted);
        report.added = merged.added;
        report.replaced = merged.replaced;

        if merged.changed() || (!report.path.exists() && !merged.records.is_empty()) {
            self.store.save(key, &merged.records)?;
            report.saved = true;
            report.rows = merged.records.len();
        }

        match (outcome.stop, outcome.error) {
            (_, Some(err)) => {
                warn!(
                    component = "ingest",
                    event = "ingest.run.partial",
                    inst_id = %key.inst_id,
                    bar = key.interval.label(),
                    fetched = report.fetched,
                    saved = report.saved
                );
                Err(err)
            }
            (StopReason::Cancelled, None) => Err(IngestError::Cancelled {
                pages_fetched: report.pages_fetched,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::{BarInterval, CandleRecord};
    use crate::fetcher::PageRequest;
    use crate::store::StoreConfig;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct QueueFetcher {
        pages: RefCell<VecDeque<Vec<CandleRecord>>>,
    }

    impl QueueFetcher {
        fn new(pages: Vec<Vec<CandleRecord>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
            }
        }
    }

    impl PageFetcher for QueueFetcher {
        fn source_name(&self) -> &'static str {
            "queue"
        }

        fn fetch_page(&self, _req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError> {
            Ok(self.pages.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    fn bars(timestamps: &[i64]) -> Vec<CandleRecord> {
        timestamps
            .iter()
            .map(|ts| CandleRecord::ohlc(*ts, 1.0, 1.0, 1.0, 1.0))
            .collect()
    }

    #[test]
    fn incremental_on_empty_store_falls_back_to_cold() {
        let temp = tempdir().unwrap();
        let store = DatasetStore::new(StoreConfig {
            data_root: temp.path().to_path_buf(),
            file_suffix: None,
        });
        let fetcher = QueueFetcher::new(vec![bars(&[2_000, 1_000])]);
        let cfg = PagerConfig::default();
        let key = DatasetKey::new("BTCUSDT", BarInterval::M1).unwrap();

        let report = Ingestor::new(&fetcher, &store, &cfg).run(&key, IngestMode::Incremental);

        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.requested_mode, IngestMode::Incremental);
        assert_eq!(report.effective_mode, IngestMode::Cold);
        assert_eq!(report.rows, 2);
        assert!(report.saved);
    }

    #[test]
    fn nothing_fetched_and_nothing_stored_writes_no_file() {
        let temp = tempdir().unwrap();
        let store = DatasetStore::new(StoreConfig {
            data_root: temp.path().to_path_buf(),
            file_suffix: None,
        });
        let fetcher = QueueFetcher::new(Vec::new());
        let cfg = PagerConfig::default();
        let key = DatasetKey::new("BTCUSDT", BarInterval::M1).unwrap();

        let report = Ingestor::new(&fetcher, &store, &cfg).run(&key, IngestMode::Cold);

        assert!(report.success);
        assert_eq!(report.rows, 0);
        assert!(!report.saved);
        assert!(!report.path.exists());
        assert_eq!(report.stop_reason, Some(StopReason::EmptyPage));
    }

    #[test]
    fn cancelled_run_reports_failure() {
        let temp = tempdir().unwrap();
        let store = DatasetStore::new(StoreConfig {
            data_root: temp.path().to_path_buf(),
            file_suffix: None,
        });
        let cancel = CancelToken::new();
        cancel.cancel();
        let fetcher = QueueFetcher::new(vec![bars(&[1_000])]);
        let cfg = PagerConfig::default();
        let key = DatasetKey::new("BTCUSDT", BarInterval::M1).unwrap();

        let report = Ingestor::new(&fetcher, &store, &cfg)
            .with_cancel(cancel)
            .run(&key, IngestMode::Cold);

        assert!(!report.success);
        assert!(!report.complete);
        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
        assert!(report.error.unwrap().contains("cancelled"));
    }
}

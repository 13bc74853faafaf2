use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use candle_ingest::{
    log_app_start, log_ingest_summary, BarInterval, CandleRecord, DatasetKey, DatasetStore,
    FetchCause, IngestError, IngestMode, Ingestor, LoggingConfig, PageFetcher, PageRequest,
    PagerConfig, StoreConfig, SyncConfig,
};
use tempfile::tempdir;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

/// Serves one page, then fails every request after it.
struct FlakyUpstream;

impl PageFetcher for FlakyUpstream {
    fn source_name(&self) -> &'static str {
        "flaky"
    }

    fn fetch_page(&self, req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError> {
        if req.cursor_ms > 10_000 {
            return Ok(vec![CandleRecord::ohlc(9_000, 1.0, 1.0, 1.0, 1.0)]);
        }
        Err(IngestError::FetchFailed {
            inst_id: req.inst_id.to_string(),
            bar: req.interval.label().to_string(),
            cause: FetchCause::Transport("connection reset".to_string()),
        })
    }
}

fn key() -> DatasetKey {
    DatasetKey::new("BTC-USD-SWAP", BarInterval::M1).expect("valid key")
}

#[test]
fn failed_run_logs_page_error_and_partial_save() {
    let temp = tempdir().expect("tempdir should be created");
    let store = DatasetStore::new(StoreConfig {
        data_root: temp.path().to_path_buf(),
        file_suffix: None,
    });
    let cfg = PagerConfig {
        max_retries: 1,
        retry_backoff_ms: 1,
        ..PagerConfig::default()
    };

    let logs = capture_logs(Level::INFO, || {
        let report = Ingestor::new(&FlakyUpstream, &store, &cfg).run(&key(), IngestMode::Cold);
        assert!(!report.success);
        assert!(report.saved);
    });

    assert!(logs.contains("\"event\":\"ingest.run.start\""));
    assert!(logs.contains("\"event\":\"pager.page.error\""));
    assert!(logs.contains("\"event\":\"ingest.run.partial\""));
    assert!(logs.contains("\"event\":\"ingest.run.error\""));
    assert!(logs.contains("\"event\":\"store.save.finish\""));
    assert!(!logs.contains("\"event\":\"pager.page.retry\""));
}

#[test]
fn page_progress_and_retries_are_logged_at_debug() {
    let temp = tempdir().expect("tempdir should be created");
    let store = DatasetStore::new(StoreConfig {
        data_root: temp.path().to_path_buf(),
        file_suffix: None,
    });
    let cfg = PagerConfig {
        max_retries: 1,
        retry_backoff_ms: 1,
        ..PagerConfig::default()
    };

    let logs = capture_logs(Level::DEBUG, || {
        Ingestor::new(&FlakyUpstream, &store, &cfg).run(&key(), IngestMode::Cold);
    });

    assert!(logs.contains("\"event\":\"pager.page.fetched\""));
    assert!(logs.contains("\"event\":\"pager.page.retry\""));
    assert!(logs.contains("\"event\":\"pager.stop\""));
    assert!(logs.contains("\"reason\":\"fetch_failed\""));
}

#[test]
fn app_helpers_emit_baseline_events() {
    let temp = tempdir().expect("tempdir should be created");
    let store = DatasetStore::new(StoreConfig {
        data_root: temp.path().to_path_buf(),
        file_suffix: None,
    });
    let cfg = PagerConfig::default();

    let logs = capture_logs(Level::INFO, || {
        log_app_start("candle_sync", &LoggingConfig::default(), &SyncConfig::default());
        let report = Ingestor::new(&FlakyUpstream, &store, &cfg).run(&key(), IngestMode::Cold);
        log_ingest_summary("candle_sync", &report);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"source\":\"okx-mark\""));
    assert!(logs.contains("\"event\":\"dataset.summary\""));
}

//! Backward pagination over a page fetcher.
//!
//! Pages are requested strictly one after another: each request's cursor is
//! the minimum timestamp accumulated so far, so upstream pages that arrive
//! out of order cannot make the walk skip or repeat history.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::candle::{CandleRecord, DatasetKey};
use crate::fetcher::{PageFetcher, PageRequest};
use crate::IngestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerConfig {
    pub page_budget: u32,
    pub page_limit: u32,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_budget: 20,
            page_limit: 100,
            request_delay_ms: 0,
            max_retries: 0,
            retry_backoff_ms: 200,
        }
    }
}

/// Shared flag checked before every page request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCursor {
    Now,
    Before(i64),
}

impl StartCursor {
    pub fn resolve(self) -> i64 {
        match self {
            Self::Now => Utc::now().timestamp_millis(),
            Self::Before(ts_ms) => ts_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    BudgetExhausted,
    EmptyPage,
    NoNewRecords,
    Cancelled,
    FetchFailed,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BudgetExhausted => "budget_exhausted",
            Self::EmptyPage => "empty_page",
            Self::NoNewRecords => "no_new_records",
            Self::Cancelled => "cancelled",
            Self::FetchFailed => "fetch_failed",
        }
    }

    /// True when the walk ended on its own terms rather than being cut short.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            Self::BudgetExhausted | Self::EmptyPage | Self::NoNewRecords
        )
    }
}

#[derive(Debug)]
pub struct PagerOutcome {
    /// Unique records in the order they were first seen.
    pub records: Vec<CandleRecord>,
    pub pages_fetched: u32,
    pub final_cursor_ms: i64,
    pub rejected_records: u64,
    pub stop: StopReason,
    pub error: Option<IngestError>,
}

enum PageAttempt {
    Page(Vec<CandleRecord>),
    Failed(IngestError),
    /// Cancelled while waiting to retry; the pending error is dropped.
    Cancelled,
}

pub struct BackwardPager<'a> {
    fetcher: &'a dyn PageFetcher,
    cfg: &'a PagerConfig,
    cancel: &'a CancelToken,
}

impl<'a> BackwardPager<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, cfg: &'a PagerConfig, cancel: &'a CancelToken) -> Self {
        Self {
            fetcher,
            cfg,
            cancel,
        }
    }

    pub fn run(&self, key: &DatasetKey, start: StartCursor) -> PagerOutcome {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut cursor = start.resolve();
        let mut pages_fetched = 0u32;
        let mut rejected_records = 0u64;
        let mut error = None;

        info!(
            component = "pager",
            event = "pager.start",
            source = self.fetcher.source_name(),
            inst_id = %key.inst_id,
            bar = key.interval.label(),
            cursor_ms = cursor,
            page_budget = self.cfg.page_budget,
            page_limit = self.cfg.page_limit
        );

        let stop = loop {
            if pages_fetched >= self.cfg.page_budget {
                break StopReason::BudgetExhausted;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if pages_fetched > 0 && self.cfg.request_delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.cfg.request_delay_ms));
                if self.cancel.is_cancelled() {
                    break StopReason::Cancelled;
                }
            }

            let req = PageRequest {
                inst_id: &key.inst_id,
                interval: key.interval,
                cursor_ms: cursor,
                limit: self.cfg.page_limit,
            };
            let page = match self.fetch_with_retry(&req) {
                PageAttempt::Page(page) => page,
                PageAttempt::Cancelled => break StopReason::Cancelled,
                PageAttempt::Failed(err) => {
                    warn!(
                        component = "pager",
                        event = "pager.page.error",
                        inst_id = %key.inst_id,
                        bar = key.interval.label(),
                        cursor_ms = cursor,
                        pages_fetched,
                        error = %err
                    );
                    error = Some(err);
                    break StopReason::FetchFailed;
                }
            };
            pages_fetched += 1;

            if page.is_empty() {
                break StopReason::EmptyPage;
            }

            let page_len = page.len();
            let mut fresh = 0usize;
            let mut page_min = cursor;
            for record in page {
                if record.timestamp_ms >= cursor {
                    rejected_records += 1;
                    continue;
                }
                if seen.insert(record.timestamp_ms) {
                    page_min = page_min.min(record.timestamp_ms);
                    records.push(record);
                    fresh += 1;
                }
            }

            debug!(
                component = "pager",
                event = "pager.page.fetched",
                inst_id = %key.inst_id,
                bar = key.interval.label(),
                page = pages_fetched,
                cursor_ms = cursor,
                page_len,
                fresh,
                accumulated = records.len()
            );

            if fresh == 0 {
                break StopReason::NoNewRecords;
            }
            cursor = page_min;
        };

        if rejected_records > 0 {
            warn!(
                component = "pager",
                event = "pager.records.rejected",
                inst_id = %key.inst_id,
                bar = key.interval.label(),
                rejected_records
            );
        }
        info!(
            component = "pager",
            event = "pager.stop",
            inst_id = %key.inst_id,
            bar = key.interval.label(),
            reason = stop.as_str(),
            pages_fetched,
            records = records.len(),
            final_cursor_ms = cursor
        );

        PagerOutcome {
            records,
            pages_fetched,
            final_cursor_ms: cursor,
            rejected_records,
            stop,
            error,
        }
    }

    fn fetch_with_retry(&self, req: &PageRequest<'_>) -> PageAttempt {
        let mut attempt: u32 = 0;
        loop {
            match self.fetcher.fetch_page(req) {
                Ok(page) => return PageAttempt::Page(page),
                Err(err) if attempt >= self.cfg.max_retries || !err.is_retryable_fetch() => {
                    return PageAttempt::Failed(err)
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let shift = attempt.saturating_sub(1).min(10);
                    let sleep_ms = self.cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                    debug!(
                        component = "pager",
                        event = "pager.page.retry",
                        attempt,
                        sleep_ms,
                        error = %err
                    );
                    if self.cancel.is_cancelled() {
                        return PageAttempt::Cancelled;
                    }
                    std::thread::sleep(Duration::from_millis(sleep_ms));
                    if self.cancel.is_cancelled() {
                        return PageAttempt::Cancelled;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::BarInterval;
    use crate::error::FetchCause;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct ScriptedFetcher {
        pages: RefCell<VecDeque<Result<Vec<CandleRecord>, FetchCause>>>,
        cursors: RefCell<Vec<i64>>,
        cancel_after_call: Option<CancelToken>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Result<Vec<CandleRecord>, FetchCause>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                cursors: RefCell::new(Vec::new()),
                cancel_after_call: None,
            }
        }
    }

    impl PageFetcher for ScriptedFetcher {
        fn source_name(&self) -> &'static str {
            "scripted"
        }

        fn fetch_page(&self, req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError> {
            self.cursors.borrow_mut().push(req.cursor_ms);
            if let Some(token) = &self.cancel_after_call {
                token.cancel();
            }
            match self.pages.borrow_mut().pop_front() {
                Some(Ok(page)) => Ok(page
                    .into_iter()
                    .filter(|record| record.timestamp_ms < req.cursor_ms)
                    .collect()),
                Some(Err(cause)) => Err(IngestError::FetchFailed {
                    inst_id: req.inst_id.to_string(),
                    bar: req.interval.label().to_string(),
                    cause,
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    fn bars(timestamps: &[i64]) -> Vec<CandleRecord> {
        timestamps
            .iter()
            .map(|ts| CandleRecord::ohlc(*ts, 1.0, 1.0, 1.0, 1.0))
            .collect()
    }

    fn key() -> DatasetKey {
        DatasetKey::new("BTC-USD-SWAP", BarInterval::M5).unwrap()
    }

    #[test]
    fn cursor_follows_minimum_even_for_unordered_pages() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(bars(&[900, 700, 800])),
            Ok(bars(&[500, 600])),
            Ok(Vec::new()),
        ]);
        let cfg = PagerConfig::default();
        let cancel = CancelToken::new();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(*fetcher.cursors.borrow(), vec![1_000, 700, 500]);
        assert_eq!(out.stop, StopReason::EmptyPage);
        assert_eq!(out.pages_fetched, 3);
        assert_eq!(out.final_cursor_ms, 500);
        let ts: Vec<i64> = out.records.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(ts, vec![900, 700, 800, 500, 600]);
    }

    #[test]
    fn page_budget_bounds_the_walk() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(bars(&[900])),
            Ok(bars(&[800])),
            Ok(bars(&[700])),
        ]);
        let cfg = PagerConfig {
            page_budget: 2,
            ..PagerConfig::default()
        };
        let cancel = CancelToken::new();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(out.stop, StopReason::BudgetExhausted);
        assert!(out.stop.is_complete());
        assert_eq!(out.records.len(), 2);
        assert_eq!(fetcher.cursors.borrow().len(), 2);
    }

    #[test]
    fn overlapping_page_with_nothing_new_stops_the_walk() {
        let fetcher = ScriptedFetcher::new(vec![Ok(bars(&[900, 800])), Ok(bars(&[800]))]);
        let cfg = PagerConfig::default();
        let cancel = CancelToken::new();

        // Page two only repeats 800, which is not older than the cursor.
        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));
        assert_eq!(out.stop, StopReason::EmptyPage);
        assert_eq!(out.records.len(), 2);
    }

    #[test]
    fn rows_at_or_after_the_cursor_are_rejected_and_counted() {
        struct EchoFetcher;
        impl PageFetcher for EchoFetcher {
            fn source_name(&self) -> &'static str {
                "echo"
            }
            fn fetch_page(&self, req: &PageRequest<'_>) -> Result<Vec<CandleRecord>, IngestError> {
                Ok(bars(&[req.cursor_ms, req.cursor_ms + 100]))
            }
        }

        let cfg = PagerConfig::default();
        let cancel = CancelToken::new();
        let out = BackwardPager::new(&EchoFetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(out.stop, StopReason::NoNewRecords);
        assert!(out.records.is_empty());
        assert_eq!(out.rejected_records, 2);
        assert_eq!(out.pages_fetched, 1);
    }

    #[test]
    fn fetch_failure_keeps_accumulated_records() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(bars(&[900, 800])),
            Err(FetchCause::Transport("connection reset".to_string())),
        ]);
        let cfg = PagerConfig::default();
        let cancel = CancelToken::new();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(out.stop, StopReason::FetchFailed);
        assert!(!out.stop.is_complete());
        assert_eq!(out.records.len(), 2);
        assert!(matches!(out.error, Some(IngestError::FetchFailed { .. })));
    }

    #[test]
    fn retryable_failures_use_the_retry_budget() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchCause::Timeout("slow".to_string())),
            Ok(bars(&[900])),
            Ok(Vec::new()),
        ]);
        let cfg = PagerConfig {
            max_retries: 1,
            retry_backoff_ms: 0,
            ..PagerConfig::default()
        };
        let cancel = CancelToken::new();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(out.stop, StopReason::EmptyPage);
        assert_eq!(out.records.len(), 1);
        assert_eq!(*fetcher.cursors.borrow(), vec![1_000, 1_000, 900]);
    }

    #[test]
    fn non_retryable_failures_skip_the_retry_budget() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchCause::Malformed("bad json".to_string())),
            Ok(bars(&[900])),
        ]);
        let cfg = PagerConfig {
            max_retries: 3,
            retry_backoff_ms: 0,
            ..PagerConfig::default()
        };
        let cancel = CancelToken::new();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(out.stop, StopReason::FetchFailed);
        assert_eq!(fetcher.cursors.borrow().len(), 1);
    }

    #[test]
    fn cancellation_stops_before_the_next_request() {
        let cancel = CancelToken::new();
        let mut fetcher = ScriptedFetcher::new(vec![Ok(bars(&[900])), Ok(bars(&[800]))]);
        fetcher.cancel_after_call = Some(cancel.clone());
        let cfg = PagerConfig::default();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));

        assert_eq!(out.stop, StopReason::Cancelled);
        assert_eq!(out.pages_fetched, 1);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn cancel_during_request_delay_skips_the_next_request() {
        let cancel = CancelToken::new();
        let fetcher = ScriptedFetcher::new(vec![Ok(bars(&[900])), Ok(bars(&[800]))]);
        let cfg = PagerConfig {
            page_budget: 5,
            request_delay_ms: 400,
            ..PagerConfig::default()
        };

        let canceller = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };
        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));
        canceller.join().unwrap();

        assert_eq!(out.stop, StopReason::Cancelled);
        assert_eq!(out.pages_fetched, 1);
        assert_eq!(*fetcher.cursors.borrow(), vec![1_000]);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn cancel_during_retry_backoff_skips_the_retry() {
        let cancel = CancelToken::new();
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchCause::Timeout("slow".to_string())),
            Ok(bars(&[900])),
        ]);
        let cfg = PagerConfig {
            max_retries: 3,
            retry_backoff_ms: 400,
            ..PagerConfig::default()
        };

        let canceller = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };
        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Before(1_000));
        canceller.join().unwrap();

        assert_eq!(out.stop, StopReason::Cancelled);
        assert_eq!(out.pages_fetched, 0);
        assert!(out.error.is_none());
        assert_eq!(fetcher.cursors.borrow().len(), 1);
    }

    #[test]
    fn already_cancelled_token_issues_no_requests() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let fetcher = ScriptedFetcher::new(vec![Ok(bars(&[900]))]);
        let cfg = PagerConfig::default();

        let out = BackwardPager::new(&fetcher, &cfg, &cancel).run(&key(), StartCursor::Now);

        assert_eq!(out.stop, StopReason::Cancelled);
        assert!(fetcher.cursors.borrow().is_empty());
    }
}

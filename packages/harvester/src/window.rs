//! Time windows and the batcher that collects them one stream at a time.

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use twitter_client::{format_time, SearchQuery};

use crate::api::TweetSearch;
use crate::config::HarvestConfig;
use crate::error::Result;
use crate::pager::{PagerState, SearchPager, StopReason};
use crate::rate_limit::RequestCeiling;
use crate::record::{Record, RecordRow};
use crate::store::RecordStore;

/// Half-open `[start, end)` interval with its record budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub budget: usize,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, budget: usize) -> Self {
        Self { start, end, budget }
    }

    /// Split `[start, end)` into contiguous windows of `step`.
    ///
    /// The last window is truncated at `end`. Returns nothing for an empty
    /// range or a non-positive step.
    pub fn partition(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: TimeDelta,
        budget: usize,
    ) -> Vec<Window> {
        if start >= end || step <= TimeDelta::zero() {
            return vec![];
        }

        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = cursor
                .checked_add_signed(step)
                .map_or(end, |next| next.min(end));
            windows.push(Window::new(cursor, next, budget));
            cursor = next;
        }
        windows
    }

    /// `start_<start>_end_<end>_<keyword>.csv` with every character outside
    /// `[A-Za-z0-9]` replaced by `_`.
    pub fn file_name(&self, keyword: &str) -> String {
        format!(
            "start_{}_end_{}_{}.csv",
            sanitize(&format_time(self.start)),
            sanitize(&format_time(self.end)),
            sanitize(keyword)
        )
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", format_time(self.start), format_time(self.end))
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// What happened to one window.
#[derive(Debug)]
pub struct WindowReport {
    pub window: Window,
    pub state: PagerState,
    pub stop: StopReason,
    pub records: usize,
    pub requests: u64,
    /// Artifact written, if any.
    pub path: Option<PathBuf>,
    /// Why the search or the flush failed.
    pub error: Option<String>,
}

impl WindowReport {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Collects a list of windows, each with its own pager and request
/// accounting, and flushes every window that made progress.
pub struct WindowBatcher<'a, S: TweetSearch> {
    api: &'a S,
    store: &'a RecordStore,
    config: &'a HarvestConfig,
    ceiling: RequestCeiling,
    cancel: CancellationToken,
}

impl<'a, S: TweetSearch> WindowBatcher<'a, S> {
    pub fn new(
        api: &'a S,
        store: &'a RecordStore,
        config: &'a HarvestConfig,
    ) -> Result<Self> {
        Ok(Self {
            api,
            store,
            config,
            ceiling: config.ceiling()?,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Collect `windows` in order, up to `max_concurrent_windows` at a time.
    ///
    /// A failed window, whether the search or the flush failed, is reported
    /// and does not stop the run.
    pub async fn run(&self, query: &SearchQuery, windows: Vec<Window>) -> Vec<WindowReport> {
        let total = windows.len();
        info!(
            keyword = %query.keyword,
            windows = total,
            concurrency = self.config.max_concurrent_windows,
            "Starting collection"
        );

        stream::iter(windows.into_iter().enumerate())
            .map(|(index, window)| self.collect(query, window, index + 1, total))
            .buffered(self.config.max_concurrent_windows.max(1))
            .collect()
            .await
    }

    async fn collect(
        &self,
        query: &SearchQuery,
        window: Window,
        position: usize,
        total: usize,
    ) -> WindowReport {
        let run = SearchPager::new(self.api, query, window, self.config.rate_limit_state())
            .with_delay(self.config.inter_request_delay())
            .with_ceiling(Some(self.ceiling.clone()))
            .with_cancellation(self.cancel.child_token())
            .run()
            .await;

        let mut report = WindowReport {
            window,
            state: run.state,
            stop: run.stop,
            records: run.records.len(),
            requests: run.requests,
            path: None,
            error: run.error.map(|e| e.to_string()),
        };

        if run.stop == StopReason::Cancelled && run.requests == 0 {
            info!(%window, position, total, "Window cancelled before any request");
            return report;
        }

        let rows: Vec<RecordRow> = run.records.iter().map(Record::to_row).collect();
        let path = self.store.window_path(&window, &query.keyword);
        match self.store.flush(&rows, &path) {
            Ok(()) => {
                report.state.advance(PagerState::Flushed);
                report.path = Some(path);
            }
            Err(e) => {
                warn!(%window, position, total, records = report.records, error = %e, "Window flush failed");
                if report.state != PagerState::Failed {
                    report.state.advance(PagerState::Failed);
                }
                report.error = Some(e.to_string());
                return report;
            }
        }

        if let Some(error) = &report.error {
            warn!(
                %window,
                position,
                total,
                records = report.records,
                %error,
                "Window failed; partial records flushed"
            );
        } else {
            info!(
                %window,
                position,
                total,
                requests = report.requests,
                records = report.records,
                stop = ?report.stop,
                "Window collected"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, MockSearch};
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, d, 0, 0, 0).unwrap()
    }

    fn config() -> HarvestConfig {
        HarvestConfig::new("#TheLittleMermaid lang:en")
            .with_inter_request_delay(0)
            .with_threshold(0)
            .with_requests_per_second(1_000)
    }

    #[test]
    fn test_partition_is_contiguous_and_truncated() {
        let windows = Window::partition(day(1), day(10), TimeDelta::days(7), 100);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, day(1));
        assert_eq!(windows[0].end, day(8));
        assert_eq!(windows[1].start, day(8));
        assert_eq!(windows[1].end, day(10));
        assert!(windows.iter().all(|w| w.budget == 100));
    }

    #[test]
    fn test_partition_rejects_empty_range() {
        assert!(Window::partition(day(2), day(1), TimeDelta::days(1), 1).is_empty());
        assert!(Window::partition(day(1), day(2), TimeDelta::zero(), 1).is_empty());
    }

    #[test]
    fn test_file_name_is_sanitized() {
        let window = Window::new(day(1), day(8), 10);
        assert_eq!(
            window.file_name("#TheLittleMermaid lang:en"),
            "start_2022_01_01T00_00_00_000Z_end_2022_01_08T00_00_00_000Z__TheLittleMermaid_lang_en.csv"
        );
    }

    #[tokio::test]
    async fn test_failed_window_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let config = config();
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_failure(503)
            .with_page(page(100, 5, None));

        let batcher = WindowBatcher::new(&api, &store, &config).unwrap();
        let windows = vec![Window::new(day(1), day(8), 100), Window::new(day(8), day(15), 100)];
        let reports = batcher.run(&config.search_query(), windows).await;

        assert_eq!(reports.len(), 2);
        assert!(reports[0].failed());
        assert_eq!(reports[0].records, 10);
        assert_eq!(reports[0].state, PagerState::Flushed);
        assert!(reports[0].path.as_ref().unwrap().exists());
        assert!(!reports[1].failed());
        assert_eq!(reports[1].records, 5);
    }

    #[tokio::test]
    async fn test_each_window_starts_without_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let config = config();
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_page(page(11, 10, None))
            .with_page(page(21, 10, None));

        let batcher = WindowBatcher::new(&api, &store, &config).unwrap();
        let windows = vec![Window::new(day(1), day(8), 100), Window::new(day(8), day(15), 100)];
        batcher.run(&config.search_query(), windows).await;

        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].cursor, None);
        assert_eq!(calls[2].window.start, day(8));
    }

    #[test]
    fn test_rejects_zero_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let config = config().with_requests_per_second(0);
        let api = MockSearch::new();

        let err = WindowBatcher::new(&api, &store, &config).err().unwrap();
        assert!(matches!(err, crate::error::HarvestError::Config(_)));
    }

    #[tokio::test]
    async fn test_flush_failure_is_reported_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let config = config();
        let query = config.search_query();
        let windows = vec![Window::new(day(1), day(8), 100), Window::new(day(8), day(15), 100)];
        // A directory where the second artifact should go makes its rename fail.
        std::fs::create_dir(store.window_path(&windows[1], &query.keyword)).unwrap();
        let api = MockSearch::new()
            .with_page(page(1, 10, None))
            .with_page(page(11, 10, None));

        let batcher = WindowBatcher::new(&api, &store, &config).unwrap();
        let reports = batcher.run(&query, windows).await;

        assert_eq!(reports.len(), 2);
        assert!(!reports[0].failed());
        assert_eq!(reports[0].state, PagerState::Flushed);
        assert!(reports[0].path.as_ref().unwrap().is_file());
        assert!(reports[1].failed());
        assert_eq!(reports[1].state, PagerState::Failed);
        assert_eq!(reports[1].stop, StopReason::NoContinuation);
        assert_eq!(reports[1].records, 10);
        assert!(reports[1].path.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        let config = config();
        let api = MockSearch::endless(10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batcher = WindowBatcher::new(&api, &store, &config)
            .unwrap()
            .with_cancellation(cancel);
        let reports = batcher
            .run(&config.search_query(), vec![Window::new(day(1), day(8), 100)])
            .await;

        assert_eq!(reports[0].stop, StopReason::Cancelled);
        assert!(reports[0].path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

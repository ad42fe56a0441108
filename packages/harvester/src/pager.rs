//! Cursor-driven pagination for one (keyword, window) stream.
//!
//! Pagination ends on the first of three independent conditions:
//!
//! 1. the response carries no continuation token (final page),
//! 2. the page reports zero results,
//! 3. the accumulator has reached the window's budget.
//!
//! A page without a token is always the last one, even if budget remains.
//! Cancellation is checked between requests, never mid-request, and whatever
//! was accumulated is kept.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use twitter_client::{SearchQuery, TwitterError};

use crate::api::TweetSearch;
use crate::rate_limit::{RateLimitState, RequestCeiling};
use crate::record::Record;
use crate::window::Window;

/// Initial reservation for the accumulator; large budgets grow from here.
const MAX_PREALLOCATED_RECORDS: usize = 50_000;

/// Lifecycle of one window stream.
///
/// `Idle → Paging → (Exhausted | BudgetReached) → Flushed`, with `Cancelled`
/// and `Failed` as the other ways out of `Paging`. A window whose flush fails
/// ends in `Failed`. Nothing leaves `Flushed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerState {
    Idle,
    Paging,
    Exhausted,
    BudgetReached,
    Cancelled,
    Failed,
    Flushed,
}

impl PagerState {
    pub fn can_transition_to(self, next: PagerState) -> bool {
        use PagerState::*;
        matches!(
            (self, next),
            (Idle, Paging)
                | (Idle, Cancelled)
                | (Paging, Paging)
                | (Paging, Exhausted)
                | (Paging, BudgetReached)
                | (Paging, Cancelled)
                | (Paging, Failed)
                | (Exhausted, Flushed)
                | (BudgetReached, Flushed)
                | (Cancelled, Flushed)
                | (Failed, Flushed)
                | (Exhausted, Failed)
                | (BudgetReached, Failed)
                | (Cancelled, Failed)
        )
    }

    /// Advance, refusing transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: PagerState) -> bool {
        if self.can_transition_to(next) {
            *self = next;
            true
        } else {
            warn!(from = ?self, to = ?next, "Ignoring invalid window state transition");
            false
        }
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Response had no continuation token.
    NoContinuation,
    /// Page reported `result_count == 0`.
    EmptyPage,
    BudgetReached,
    Cancelled,
    /// The transport gave up; see [`PagerRun::error`].
    Failed,
}

impl StopReason {
    fn state(self) -> PagerState {
        match self {
            StopReason::NoContinuation | StopReason::EmptyPage => PagerState::Exhausted,
            StopReason::BudgetReached => PagerState::BudgetReached,
            StopReason::Cancelled => PagerState::Cancelled,
            StopReason::Failed => PagerState::Failed,
        }
    }
}

/// One parsed page.
#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    pub records: Vec<Record>,
    pub next_cursor: Option<String>,
    pub result_count: u64,
    /// Transport cooldowns spent on this page.
    pub cooldowns: u32,
}

/// Everything a finished pager hands back.
#[derive(Debug)]
pub struct PagerRun {
    pub records: Vec<Record>,
    pub requests: u64,
    pub stop: StopReason,
    pub state: PagerState,
    pub error: Option<TwitterError>,
}

/// Drives pagination for a single window.
pub struct SearchPager<'a, S: TweetSearch> {
    api: &'a S,
    query: &'a SearchQuery,
    window: Window,
    cursor: Option<String>,
    records: Vec<Record>,
    requests: u64,
    state: PagerState,
    limits: RateLimitState,
    ceiling: Option<RequestCeiling>,
    delay: Duration,
    cancel: CancellationToken,
}

impl<'a, S: TweetSearch> SearchPager<'a, S> {
    pub fn new(api: &'a S, query: &'a SearchQuery, window: Window, limits: RateLimitState) -> Self {
        Self {
            api,
            query,
            window,
            cursor: None,
            records: Vec::new(),
            requests: 0,
            state: PagerState::Idle,
            limits,
            ceiling: None,
            delay: Duration::from_secs(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Pause between pages that carry a continuation token.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_ceiling(mut self, ceiling: Option<RequestCeiling>) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    /// Issue one search call at `cursor` and parse the page.
    ///
    /// A body that cannot be decoded is logged and treated as an empty final
    /// page; only transport failures are returned as errors.
    pub async fn page(&self, cursor: Option<&str>) -> Result<PageOutcome, TwitterError> {
        let remaining = self.window.budget.saturating_sub(self.records.len());
        let per_call = remaining.min(u32::MAX as usize) as u32;
        let query = self
            .query
            .clone()
            .with_max_results(per_call.min(self.query.max_results));

        let fetched = match self.api.search_page(&query, &self.window, cursor).await {
            Ok(fetched) => fetched,
            Err(TwitterError::Decode { endpoint, source }) => {
                warn!(%endpoint, error = %source, window = %self.window, "Malformed search page; treating as empty");
                return Ok(PageOutcome::default());
            }
            Err(e) => return Err(e),
        };

        let page = fetched.value;
        if page.count_mismatch() {
            warn!(
                window = %self.window,
                reported = page.result_count,
                parsed = page.tweets.len(),
                "result_count does not match parsed tweets"
            );
        }

        let records = page.tweets.iter().filter_map(Record::from_tweet).collect();

        Ok(PageOutcome {
            records,
            next_cursor: page.next_token,
            result_count: page.result_count,
            cooldowns: fetched.cooldowns,
        })
    }

    /// Page until one of the stop conditions fires.
    pub async fn run(mut self) -> PagerRun {
        self.records
            .reserve(self.window.budget.min(MAX_PREALLOCATED_RECORDS));

        let mut error = None;
        let stop = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let cancelled = tokio::select! {
                _ = self.cancel.cancelled() => true,
                _ = self.limits.before_request() => false,
            };
            if cancelled {
                break StopReason::Cancelled;
            }
            if let Some(ceiling) = &self.ceiling {
                ceiling.until_ready().await;
            }

            self.state.advance(PagerState::Paging);
            let outcome = match self.page(self.cursor.as_deref()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(window = %self.window, error = %e, "Search request failed");
                    error = Some(e);
                    break StopReason::Failed;
                }
            };

            self.requests += 1;
            self.limits.record_request();
            if outcome.cooldowns > 0 {
                self.limits.note_cooldown();
            }

            debug!(
                window = %self.window,
                request = self.requests,
                result_count = outcome.result_count,
                has_next = outcome.next_cursor.is_some(),
                "Fetched search page"
            );

            match outcome.next_cursor {
                Some(next) => {
                    self.cursor = Some(next);
                    self.append(outcome.records);

                    if outcome.result_count == 0 {
                        break StopReason::EmptyPage;
                    }
                    if self.records.len() >= self.window.budget {
                        break StopReason::BudgetReached;
                    }
                    if !pause(&self.cancel, self.delay).await {
                        break StopReason::Cancelled;
                    }
                }
                None => {
                    if outcome.result_count > 0 {
                        self.append(outcome.records);
                    }
                    break StopReason::NoContinuation;
                }
            }
        };

        self.state.advance(stop.state());
        info!(
            window = %self.window,
            requests = self.requests,
            records = self.records.len(),
            stop = ?stop,
            "Window pagination finished"
        );

        PagerRun {
            records: self.records,
            requests: self.requests,
            stop,
            state: self.state,
            error,
        }
    }

    /// Append without ever exceeding the budget.
    fn append(&mut self, mut records: Vec<Record>) {
        let remaining = self.window.budget.saturating_sub(self.records.len());
        if records.len() > remaining {
            debug!(
                window = %self.window,
                dropped = records.len() - remaining,
                "Truncating page to budget"
            );
            records.truncate(remaining);
        }
        self.records.extend(records);
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, MockSearch};
    use chrono::{TimeZone, Utc};

    fn window(budget: usize) -> Window {
        Window::new(
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 1, 8, 0, 0, 0).unwrap(),
            budget,
        )
    }

    fn limits() -> RateLimitState {
        RateLimitState::new(0, Duration::from_secs(300))
    }

    async fn run(api: &MockSearch, budget: usize) -> PagerRun {
        let query = SearchQuery::new("#Dune");
        SearchPager::new(api, &query, window(budget), limits())
            .with_delay(Duration::ZERO)
            .run()
            .await
    }

    #[tokio::test]
    async fn test_stops_without_continuation_token() {
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_page(page(11, 10, None))
            .with_page(page(21, 10, Some("never")));

        let run = run(&api, 1_000).await;

        assert_eq!(run.stop, StopReason::NoContinuation);
        assert_eq!(run.records.len(), 20);
        assert_eq!(run.requests, 2);
        assert_eq!(run.state, PagerState::Exhausted);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page_even_with_token() {
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_page(page(11, 0, Some("t2")))
            .with_page(page(21, 10, None));

        let run = run(&api, 1_000).await;

        assert_eq!(run.stop, StopReason::EmptyPage);
        assert_eq!(run.records.len(), 10);
        assert_eq!(run.requests, 2);
    }

    #[tokio::test]
    async fn test_stops_at_budget_and_truncates() {
        let api = MockSearch::endless(100);

        let run = run(&api, 250).await;

        assert_eq!(run.stop, StopReason::BudgetReached);
        assert_eq!(run.records.len(), 250);
        assert_eq!(run.requests, 3);
        assert_eq!(run.state, PagerState::BudgetReached);
    }

    #[tokio::test]
    async fn test_final_page_kept_when_budget_remains() {
        let api = MockSearch::new().with_page(page(1, 5, None));

        let run = run(&api, 1_000).await;

        assert_eq!(run.records.len(), 5);
        assert_eq!(run.stop, StopReason::NoContinuation);
    }

    #[tokio::test]
    async fn test_final_page_with_zero_results_adds_nothing() {
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_page(page(11, 0, None));

        let run = run(&api, 1_000).await;

        assert_eq!(run.records.len(), 10);
        assert_eq!(run.stop, StopReason::NoContinuation);
    }

    #[tokio::test]
    async fn test_budget_met_on_page_without_token() {
        let api = MockSearch::new()
            .with_page(page(1, 500, Some("t1")))
            .with_page(page(501, 500, None));

        let run = run(&api, 600).await;

        assert_eq!(run.records.len(), 600);
        assert_eq!(run.requests, 2);
        assert_eq!(run.stop, StopReason::NoContinuation);
        assert_eq!(run.state, PagerState::Exhausted);
    }

    #[tokio::test]
    async fn test_cursor_is_threaded_through() {
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_page(page(11, 10, Some("t2")))
            .with_page(page(21, 10, None));

        run(&api, 1_000).await;

        let cursors: Vec<Option<String>> = api.calls().into_iter().map(|c| c.cursor).collect();
        assert_eq!(
            cursors,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_page_size_shrinks_to_remaining_budget() {
        let api = MockSearch::endless(500);

        run(&api, 620).await;

        let sizes: Vec<u32> = api.calls().into_iter().map(|c| c.max_results).collect();
        assert_eq!(sizes, vec![500, 120]);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_records() {
        let api = MockSearch::new()
            .with_page(page(1, 10, Some("t1")))
            .with_failure(429);

        let run = run(&api, 1_000).await;

        assert_eq!(run.stop, StopReason::Failed);
        assert_eq!(run.records.len(), 10);
        assert!(run.error.unwrap().is_retries_exhausted());
        assert_eq!(run.state, PagerState::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_request() {
        let api = MockSearch::endless(10);
        let query = SearchQuery::new("#Dune");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = SearchPager::new(&api, &query, window(100), limits())
            .with_cancellation(cancel)
            .run()
            .await;

        assert_eq!(run.stop, StopReason::Cancelled);
        assert_eq!(run.requests, 0);
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_keeps_records() {
        let api = MockSearch::endless(10);
        let query = SearchQuery::new("#Dune");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let run = SearchPager::new(&api, &query, window(1_000), limits())
            .with_delay(Duration::from_secs(1))
            .with_cancellation(cancel)
            .run()
            .await;

        assert_eq!(run.stop, StopReason::Cancelled);
        assert_eq!(run.requests, 2);
        assert_eq!(run.records.len(), 20);
    }

    #[test]
    fn test_flushed_is_final() {
        let mut state = PagerState::Flushed;
        assert!(!state.advance(PagerState::Paging));
        assert_eq!(state, PagerState::Flushed);
        assert!(PagerState::Exhausted.can_transition_to(PagerState::Flushed));
        assert!(!PagerState::Idle.can_transition_to(PagerState::Flushed));
        assert!(PagerState::Exhausted.can_transition_to(PagerState::Failed));
        assert!(!PagerState::Flushed.can_transition_to(PagerState::Failed));
    }
}

//! Test doubles for the search and lookup seams.
//!
//! Both mocks record every call so tests can assert on cursors, page sizes
//! and batch composition.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use twitter_client::{
    Fetched, LookupResponse, LookupTweet, PublicMetrics, SearchPage, SearchQuery, Tweet,
    TwitterError,
};

use crate::api::{TweetLookup, TweetSearch};
use crate::window::Window;

/// Build a page of `count` tweets with ids `first_id..first_id + count`.
pub fn page(first_id: u64, count: usize, next_token: Option<&str>) -> SearchPage {
    SearchPage {
        tweets: (first_id..first_id + count as u64).map(tweet).collect(),
        next_token: next_token.map(str::to_string),
        result_count: count as u64,
    }
}

pub fn tweet(id: u64) -> Tweet {
    Tweet {
        id: id.to_string(),
        text: format!("tweet {}", id),
        author_id: Some((1000 + id).to_string()),
        created_at: None,
        public_metrics: Some(PublicMetrics {
            retweet_count: 1,
            reply_count: 2,
            like_count: 3,
            quote_count: 4,
        }),
        referenced_tweets: None,
    }
}

fn fetched<T>(value: T) -> Fetched<T> {
    Fetched {
        value,
        attempts: 1,
        cooldowns: 0,
    }
}

fn exhausted(status: u16) -> TwitterError {
    TwitterError::RetriesExhausted {
        status,
        body: "{}".to_string(),
        attempts: 4,
    }
}

#[derive(Debug, Clone)]
enum SearchStep {
    Page(SearchPage),
    Fail(u16),
}

/// One recorded search call.
#[derive(Debug, Clone)]
pub struct SearchCall {
    pub window: Window,
    pub cursor: Option<String>,
    pub max_results: u32,
}

/// Search endpoint that replays queued pages.
///
/// When the queue is empty it either generates pages forever (see
/// [`MockSearch::endless`]) or returns an empty final page.
#[derive(Default, Clone)]
pub struct MockSearch {
    steps: Arc<RwLock<VecDeque<SearchStep>>>,
    endless_page_size: Option<usize>,
    next_id: Arc<AtomicU64>,
    calls: Arc<RwLock<Vec<SearchCall>>>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `page_size` fresh tweets and a continuation token.
    pub fn endless(page_size: usize) -> Self {
        Self {
            endless_page_size: Some(page_size),
            next_id: Arc::new(AtomicU64::new(1)),
            ..Default::default()
        }
    }

    pub fn with_page(self, page: SearchPage) -> Self {
        self.steps.write().unwrap().push_back(SearchStep::Page(page));
        self
    }

    /// Queue a call that fails as if every retry returned `status`.
    pub fn with_failure(self, status: u16) -> Self {
        self.steps.write().unwrap().push_back(SearchStep::Fail(status));
        self
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl TweetSearch for MockSearch {
    async fn search_page(
        &self,
        query: &SearchQuery,
        window: &Window,
        cursor: Option<&str>,
    ) -> Result<Fetched<SearchPage>, TwitterError> {
        let call_index = {
            let mut calls = self.calls.write().unwrap();
            calls.push(SearchCall {
                window: *window,
                cursor: cursor.map(str::to_string),
                max_results: query.max_results,
            });
            calls.len()
        };

        let step = self.steps.write().unwrap().pop_front();
        match step {
            Some(SearchStep::Page(page)) => Ok(fetched(page)),
            Some(SearchStep::Fail(status)) => Err(exhausted(status)),
            None => match self.endless_page_size {
                Some(size) => {
                    let first = self.next_id.fetch_add(size as u64, Ordering::SeqCst);
                    let token = format!("token-{}", call_index);
                    Ok(fetched(page(first, size, Some(&token))))
                }
                None => Ok(fetched(SearchPage::default())),
            },
        }
    }
}

/// Lookup endpoint backed by an id → `created_at` map.
///
/// Ids missing from the map are left out of the response. Selected calls
/// (0-based) can be made to return an error envelope or fail outright.
#[derive(Default, Clone)]
pub struct MockLookup {
    dates: Arc<RwLock<HashMap<u64, String>>>,
    envelope_calls: HashSet<usize>,
    failing_calls: HashSet<usize>,
    batches: Arc<RwLock<Vec<Vec<u64>>>>,
}

impl MockLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date(self, id: u64, created_at: impl Into<String>) -> Self {
        self.dates.write().unwrap().insert(id, created_at.into());
        self
    }

    /// Give every id in `ids` the same creation time.
    pub fn with_dates(self, ids: impl IntoIterator<Item = u64>, created_at: &str) -> Self {
        {
            let mut dates = self.dates.write().unwrap();
            for id in ids {
                dates.insert(id, created_at.to_string());
            }
        }
        self
    }

    /// Make call `index` answer with an error envelope and no data.
    pub fn with_envelope_on(mut self, index: usize) -> Self {
        self.envelope_calls.insert(index);
        self
    }

    /// Make call `index` fail with exhausted retries.
    pub fn with_failure_on(mut self, index: usize) -> Self {
        self.failing_calls.insert(index);
        self
    }

    /// Id batches received so far, in order.
    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.read().unwrap().clone()
    }
}

#[async_trait]
impl TweetLookup for MockLookup {
    async fn lookup(&self, ids: &[u64]) -> Result<Fetched<LookupResponse>, TwitterError> {
        let index = {
            let mut batches = self.batches.write().unwrap();
            batches.push(ids.to_vec());
            batches.len() - 1
        };

        if self.failing_calls.contains(&index) {
            return Err(exhausted(503));
        }
        if self.envelope_calls.contains(&index) {
            return Ok(fetched(LookupResponse {
                status: Some(503),
                title: Some("Service Unavailable".to_string()),
                ..Default::default()
            }));
        }

        let dates = self.dates.read().unwrap();
        let data: Vec<LookupTweet> = ids
            .iter()
            .filter_map(|id| {
                dates.get(id).map(|created_at| LookupTweet {
                    id: id.to_string(),
                    created_at: Some(created_at.clone()),
                })
            })
            .collect();

        let errors = ids
            .iter()
            .filter(|id| !dates.contains_key(*id))
            .map(|id| serde_json::json!({ "value": id.to_string(), "title": "Not Found Error" }))
            .collect();

        Ok(fetched(LookupResponse {
            data: if data.is_empty() { None } else { Some(data) },
            errors,
            ..Default::default()
        }))
    }
}

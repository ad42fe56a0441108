//! Pure Twitter v2 REST client.
//!
//! Covers the two endpoints the harvester needs: full-archive search
//! (`GET /2/tweets/search/all`) and batched tweet lookup (`GET /2/tweets`).
//! All calls go through a [`RateLimitedTransport`], so a non-200 response is
//! retried after a cooldown instead of being handed back to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use twitter_client::{HttpTransport, RetryPolicy, SearchQuery, TwitterClient};
//!
//! let transport = HttpTransport::new(token, Duration::from_secs(30))?;
//! let client = TwitterClient::new(transport, RetryPolicy::default());
//!
//! let query = SearchQuery::new("#TheLittleMermaid lang:en");
//! let page = client.search_all(&query, start, end, None).await?;
//! println!("{} tweets, next={:?}", page.value.tweets.len(), page.value.next_token);
//! ```

pub mod error;
pub mod testing;
pub mod transport;
pub mod types;

pub use error::{Result, TwitterError};
pub use transport::{Delivered, HttpTransport, RateLimitedTransport, RetryPolicy, Transport};
pub use types::{
    ApiRequest, LookupResponse, LookupTweet, PublicMetrics, RawResponse, ReferencedTweet,
    SearchPage, SearchQuery, Tweet, MAX_LOOKUP_IDS,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use types::SearchResponse;

const SEARCH_ALL: &str = "tweets/search/all";
const LOOKUP: &str = "tweets";

/// A decoded response plus the cooldowns spent getting it.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub attempts: u32,
    pub cooldowns: u32,
}

pub struct TwitterClient<T: Transport> {
    transport: RateLimitedTransport<T>,
}

impl<T: Transport> TwitterClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport: RateLimitedTransport::new(transport, policy),
        }
    }

    pub fn transport(&self) -> &RateLimitedTransport<T> {
        &self.transport
    }

    /// Fetch one page of full-archive search results for `[start, end)`.
    pub async fn search_all(
        &self,
        query: &SearchQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        next_token: Option<&str>,
    ) -> Result<Fetched<SearchPage>> {
        let mut request = ApiRequest::new(SEARCH_ALL)
            .param("query", &query.keyword)
            .param("start_time", format_time(start))
            .param("end_time", format_time(end))
            .param("max_results", query.max_results.to_string())
            .param("expansions", &query.expansions)
            .param("tweet.fields", &query.tweet_fields)
            .param("user.fields", &query.user_fields)
            .param("place.fields", &query.place_fields);
        if let Some(token) = next_token {
            request = request.param("next_token", token);
        }

        let delivered = self.transport.send(&request).await?;
        let response: SearchResponse = decode(SEARCH_ALL, &delivered.body)?;

        if response.data.is_none() {
            tracing::debug!(keyword = %query.keyword, "Search response has no data");
        }
        let meta = response.meta.unwrap_or_else(|| {
            tracing::warn!(keyword = %query.keyword, "Search response has no meta; treating as empty");
            Default::default()
        });
        let result_count = meta.result_count.unwrap_or_else(|| {
            tracing::warn!(keyword = %query.keyword, "Search response has no result_count");
            0
        });

        Ok(Fetched {
            value: SearchPage {
                tweets: response.data.unwrap_or_default(),
                next_token: meta.next_token,
                result_count,
            },
            attempts: delivered.attempts,
            cooldowns: delivered.cooldowns,
        })
    }

    /// Look up `created_at` for up to [`MAX_LOOKUP_IDS`] tweets in one call.
    pub async fn lookup_tweets(&self, ids: &[u64]) -> Result<Fetched<LookupResponse>> {
        if ids.len() > MAX_LOOKUP_IDS {
            return Err(TwitterError::BatchTooLarge {
                size: ids.len(),
                limit: MAX_LOOKUP_IDS,
            });
        }

        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let request = ApiRequest::new(LOOKUP)
            .param("ids", joined)
            .param("tweet.fields", "created_at");

        let delivered = self.transport.send(&request).await?;
        let response: LookupResponse = decode(LOOKUP, &delivered.body)?;

        Ok(Fetched {
            value: response,
            attempts: delivered.attempts,
            cooldowns: delivered.cooldowns,
        })
    }
}

fn decode<R: DeserializeOwned>(endpoint: &str, body: &str) -> Result<R> {
    serde_json::from_str(body).map_err(|source| TwitterError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

/// Timestamps go out as `2022-01-01T00:00:00.000Z`.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

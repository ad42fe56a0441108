//! Endpoint seams used by the pager and the joiner.
//!
//! [`TwitterClient`] implements both traits; tests substitute the mocks in
//! [`crate::testing`].

use async_trait::async_trait;
use twitter_client::{
    Fetched, LookupResponse, SearchPage, SearchQuery, Transport, TwitterClient, TwitterError,
};

use crate::window::Window;

/// One page of a full-archive search.
#[async_trait]
pub trait TweetSearch: Send + Sync {
    async fn search_page(
        &self,
        query: &SearchQuery,
        window: &Window,
        cursor: Option<&str>,
    ) -> Result<Fetched<SearchPage>, TwitterError>;
}

/// One batched lookup of tweet creation times.
#[async_trait]
pub trait TweetLookup: Send + Sync {
    async fn lookup(&self, ids: &[u64]) -> Result<Fetched<LookupResponse>, TwitterError>;
}

#[async_trait]
impl<T: Transport> TweetSearch for TwitterClient<T> {
    async fn search_page(
        &self,
        query: &SearchQuery,
        window: &Window,
        cursor: Option<&str>,
    ) -> Result<Fetched<SearchPage>, TwitterError> {
        self.search_all(query, window.start, window.end, cursor).await
    }
}

#[async_trait]
impl<T: Transport> TweetLookup for TwitterClient<T> {
    async fn lookup(&self, ids: &[u64]) -> Result<Fetched<LookupResponse>, TwitterError> {
        self.lookup_tweets(ids).await
    }
}

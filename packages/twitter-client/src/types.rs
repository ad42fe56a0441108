use serde::{Deserialize, Serialize};

/// Fields requested for every search call unless overridden.
pub const DEFAULT_EXPANSIONS: &str = "author_id,in_reply_to_user_id,geo.place_id";
pub const DEFAULT_TWEET_FIELDS: &str = "id,text,author_id,in_reply_to_user_id,geo,conversation_id,created_at,lang,public_metrics,referenced_tweets,reply_settings,source";
pub const DEFAULT_USER_FIELDS: &str =
    "id,name,username,created_at,description,public_metrics,verified";
pub const DEFAULT_PLACE_FIELDS: &str = "full_name,id,country,country_code,geo,name,place_type";

/// Lowest and highest `max_results` the full-archive endpoint accepts.
pub const MIN_RESULTS_PER_PAGE: u32 = 10;
pub const MAX_RESULTS_PER_PAGE: u32 = 500;

/// Protocol cap on ids per lookup call.
pub const MAX_LOOKUP_IDS: usize = 100;

/// A single outbound GET, described independently of the HTTP stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path below the API base, e.g. `tweets/search/all`.
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Look up a query parameter by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }
}

/// Parameters of a full-archive search, minus the time bounds and cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Search filter string, e.g. `#TheLittleMermaid lang:en`.
    pub keyword: String,
    pub max_results: u32,
    pub expansions: String,
    pub tweet_fields: String,
    pub user_fields: String,
    pub place_fields: String,
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            max_results: MAX_RESULTS_PER_PAGE,
            expansions: DEFAULT_EXPANSIONS.to_string(),
            tweet_fields: DEFAULT_TWEET_FIELDS.to_string(),
            user_fields: DEFAULT_USER_FIELDS.to_string(),
            place_fields: DEFAULT_PLACE_FIELDS.to_string(),
        }
    }

    /// Set results per page, clamped into the range the endpoint accepts.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results.clamp(MIN_RESULTS_PER_PAGE, MAX_RESULTS_PER_PAGE);
        self
    }
}

/// Engagement counters as returned under `public_metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedTweet {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

/// One tweet from a search page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub public_metrics: Option<PublicMetrics>,
    #[serde(default)]
    pub referenced_tweets: Option<Vec<ReferencedTweet>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub result_count: Option<u64>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Raw body of `GET tweets/search/all`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Option<Vec<Tweet>>,
    #[serde(default)]
    pub meta: Option<SearchMeta>,
}

/// A parsed search page as handed to callers.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub tweets: Vec<Tweet>,
    pub next_token: Option<String>,
    /// Count reported by the API in `meta.result_count` (0 when absent).
    pub result_count: u64,
}

impl SearchPage {
    /// The API's count disagrees with what was parsed.
    pub fn count_mismatch(&self) -> bool {
        self.result_count != self.tweets.len() as u64
    }
}

/// One tweet from a lookup call; only the fields enrichment needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupTweet {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body of `GET tweets?ids=...`, which may be a data payload or an error envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    pub data: Option<Vec<LookupTweet>>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl LookupResponse {
    /// Short description of an error envelope, if this is one.
    pub fn error_summary(&self) -> Option<String> {
        if self.data.is_some() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(status) = self.status {
            parts.push(format!("status {}", status));
        }
        if let Some(title) = &self.title {
            parts.push(title.clone());
        }
        if let Some(detail) = &self.detail {
            parts.push(detail.clone());
        }
        if !self.errors.is_empty() {
            parts.push(format!("{} errors", self.errors.len()));
        }
        if parts.is_empty() {
            Some("response has no data".to_string())
        } else {
            Some(parts.join(": "))
        }
    }
}

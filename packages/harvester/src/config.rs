//! Run configuration for collection and enrichment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use twitter_client::types::{MAX_RESULTS_PER_PAGE, MIN_RESULTS_PER_PAGE};
use twitter_client::{RetryPolicy, SearchQuery};

use crate::error::ConfigError;
use crate::rate_limit::{RateLimitState, RequestCeiling};
use crate::record::parse_key;
use crate::window::Window;

/// Environment variables checked, in order, for the bearer token.
pub const TOKEN_VARS: [&str; 2] = ["TWITTERTOKEN", "TWITTER_BEARER_TOKEN"];

/// Settings shared by the search and enrichment passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Search filter string, e.g. `#TheLittleMermaid lang:en`.
    pub keyword: String,

    /// Ordered `[start, end)` pairs to collect.
    #[serde(default)]
    pub windows: Vec<(DateTime<Utc>, DateTime<Utc>)>,

    /// `max_results` per search call (10..=500). Default: 500.
    pub max_results_per_page: u32,

    /// Records collected per window before pagination stops. Default: 10 000.
    pub budget_per_window: usize,

    /// Pause after each page that has a continuation token. Default: 1.
    pub inter_request_delay_secs: u64,

    /// Sleep on a non-200 response before retrying. Default: 300.
    pub rate_limit_cooldown_secs: u64,

    /// Requests per stream before a periodic cooldown (0 disables). Default: 300.
    pub rate_limit_threshold_requests: u32,

    /// Sleep once the request threshold is reached. Default: 900.
    #[serde(default = "default_periodic_cooldown_secs")]
    pub periodic_cooldown_secs: u64,

    /// Attempts per request, including the first. Default: 4.
    pub max_attempts: u32,

    /// Hard timeout for a single HTTP call. Default: 30.
    pub request_timeout_secs: u64,

    /// Ceiling shared by all concurrent streams. Default: 1.
    pub max_requests_per_second: u32,

    /// Windows collected at the same time. Default: 1.
    pub max_concurrent_windows: usize,

    /// Where window artifacts (and enriched copies, when set) are written.
    pub output_dir: PathBuf,

    /// Ids the lookup endpoint can no longer resolve.
    #[serde(default)]
    pub denylist: Vec<u64>,

    /// Override of the API root.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Field delimiter of artifacts. `None` writes commas and detects the
    /// delimiter of enrichment inputs.
    #[serde(default)]
    pub delimiter: Option<u8>,
}

fn default_periodic_cooldown_secs() -> u64 {
    900
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            windows: vec![],
            max_results_per_page: MAX_RESULTS_PER_PAGE,
            budget_per_window: 10_000,
            inter_request_delay_secs: 1,
            rate_limit_cooldown_secs: 300,
            rate_limit_threshold_requests: 300,
            periodic_cooldown_secs: default_periodic_cooldown_secs(),
            max_attempts: 4,
            request_timeout_secs: 30,
            max_requests_per_second: 1,
            max_concurrent_windows: 1,
            output_dir: PathBuf::from("."),
            denylist: vec![],
            base_url: None,
            delimiter: None,
        }
    }
}

impl HarvestConfig {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    pub fn with_windows(mut self, windows: Vec<(DateTime<Utc>, DateTime<Utc>)>) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget_per_window = budget;
        self
    }

    pub fn with_max_results_per_page(mut self, max_results: u32) -> Self {
        self.max_results_per_page = max_results;
        self
    }

    pub fn with_inter_request_delay(mut self, secs: u64) -> Self {
        self.inter_request_delay_secs = secs;
        self
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.rate_limit_cooldown_secs = secs;
        self
    }

    pub fn with_threshold(mut self, requests: u32) -> Self {
        self.rate_limit_threshold_requests = requests;
        self
    }

    pub fn with_periodic_cooldown(mut self, secs: u64) -> Self {
        self.periodic_cooldown_secs = secs;
        self
    }

    pub fn with_delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.max_requests_per_second = rps;
        self
    }

    pub fn with_concurrency(mut self, windows: usize) -> Self {
        self.max_concurrent_windows = windows;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_denylist(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.denylist = ids.into_iter().collect();
        self
    }

    /// Reject values that would make a run misbehave before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RESULTS_PER_PAGE..=MAX_RESULTS_PER_PAGE).contains(&self.max_results_per_page) {
            return Err(ConfigError::invalid(
                "max_results_per_page",
                format!(
                    "must be in {}..={}, got {}",
                    MIN_RESULTS_PER_PAGE, MAX_RESULTS_PER_PAGE, self.max_results_per_page
                ),
            ));
        }
        if self.budget_per_window == 0 {
            return Err(ConfigError::invalid("budget_per_window", "must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be >= 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("request_timeout_secs", "must be > 0"));
        }
        if self.max_requests_per_second == 0 {
            return Err(ConfigError::invalid("max_requests_per_second", "must be > 0"));
        }
        if self.max_concurrent_windows == 0 {
            return Err(ConfigError::invalid("max_concurrent_windows", "must be >= 1"));
        }
        if let Some(delimiter) = self.delimiter {
            check_delimiter(delimiter)?;
        }
        for (start, end) in &self.windows {
            if start >= end {
                return Err(ConfigError::invalid(
                    "windows",
                    format!("window start {} is not before end {}", start, end),
                ));
            }
        }
        Ok(())
    }

    pub fn search_query(&self) -> SearchQuery {
        SearchQuery::new(&self.keyword).with_max_results(self.max_results_per_page)
    }

    /// Configured windows, each carrying the per-window budget.
    pub fn window_list(&self) -> Vec<Window> {
        self.windows
            .iter()
            .map(|(start, end)| Window::new(*start, *end, self.budget_per_window))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.cooldown())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_secs(self.inter_request_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn periodic_cooldown(&self) -> Duration {
        Duration::from_secs(self.periodic_cooldown_secs)
    }

    /// Fresh accounting for one stream.
    pub fn rate_limit_state(&self) -> RateLimitState {
        RateLimitState::new(self.rate_limit_threshold_requests, self.periodic_cooldown())
    }

    pub fn ceiling(&self) -> Result<RequestCeiling, ConfigError> {
        RequestCeiling::per_second(self.max_requests_per_second)
    }
}

/// Parse a delimiter argument: a single ASCII character, `\t` or `tab`.
pub fn parse_delimiter(raw: &str) -> Result<u8, ConfigError> {
    let delimiter = match raw {
        "\\t" | "tab" | "\t" => b'\t',
        _ if raw.len() == 1 && raw.is_ascii() => raw.as_bytes()[0],
        _ => {
            return Err(ConfigError::invalid(
                "delimiter",
                format!("expected one ASCII character or `tab`, got {:?}", raw),
            ))
        }
    };
    check_delimiter(delimiter)?;
    Ok(delimiter)
}

fn check_delimiter(delimiter: u8) -> Result<(), ConfigError> {
    if matches!(delimiter, b'"' | b'\n' | b'\r') || delimiter.is_ascii_alphanumeric() {
        return Err(ConfigError::invalid(
            "delimiter",
            format!("{:?} cannot separate fields", delimiter as char),
        ));
    }
    Ok(())
}

/// Read the bearer token, loading `.env` first if present.
pub fn bearer_token_from_env() -> Result<String, ConfigError> {
    let _ = dotenvy::dotenv();

    TOKEN_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .ok_or(ConfigError::MissingToken)
}

/// Parse a denylist file: one id per line, blank lines and `#` comments skipped.
pub fn load_denylist(path: &Path) -> Result<Vec<u64>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_denylist(&content))
}

pub fn parse_denylist(content: &str) -> Vec<u64> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let key = parse_key(line);
            if key.is_none() {
                tracing::warn!(line, "Ignoring unparseable denylist entry");
            }
            key
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_validate() {
        assert!(HarvestConfig::new("#Dune").validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_page() {
        let config = HarvestConfig::new("x").with_max_results_per_page(501);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_results_per_page"));
    }

    #[test]
    fn test_rejects_inverted_window() {
        let t = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let config = HarvestConfig::new("x").with_windows(vec![(t, t)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_window_list_carries_budget() {
        let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2022, 1, 8, 0, 0, 0).unwrap();
        let config = HarvestConfig::new("x")
            .with_windows(vec![(start, end)])
            .with_budget(42);
        let windows = config.window_list();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].budget, 42);
    }

    #[test]
    fn test_periodic_cooldown_is_separate_from_retry_cooldown() {
        let config = HarvestConfig::new("x");
        assert_eq!(config.retry_policy().cooldown, Duration::from_secs(300));
        assert_eq!(config.rate_limit_state().cooldown(), Duration::from_secs(900));

        let config = config.with_cooldown(10).with_periodic_cooldown(20);
        assert_eq!(config.retry_policy().cooldown, Duration::from_secs(10));
        assert_eq!(config.rate_limit_state().cooldown(), Duration::from_secs(20));
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(",").unwrap(), b',');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert!(parse_delimiter("\"").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(HarvestConfig::new("x").with_delimiter(Some(b'a')).validate().is_err());
    }

    #[test]
    fn test_parse_denylist() {
        let ids = parse_denylist("# deleted tweets\n123\n\n456.0  # float form\nbogus\n");
        assert_eq!(ids, vec![123, 456]);
    }
}

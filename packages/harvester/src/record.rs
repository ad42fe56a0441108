//! Collected records and their persisted row form.

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use twitter_client::{PublicMetrics, Tweet};

/// Value of `resolved_date` for rows the lookup pass could not resolve.
pub const UNRESOLVED_DATE: &str = "0";

/// The item this record replies to, quotes, or retweets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub id: String,
    pub kind: String,
}

/// One collected post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u64,
    pub author_id: String,
    pub metrics: PublicMetrics,
    pub text: String,
    pub referenced: Option<Reference>,
}

impl Record {
    /// Convert a search result. Returns `None` when the id is not numeric.
    pub fn from_tweet(tweet: &Tweet) -> Option<Self> {
        let Some(id) = parse_key(&tweet.id) else {
            tracing::warn!(id = %tweet.id, "Dropping tweet with non-numeric id");
            return None;
        };

        let referenced = tweet
            .referenced_tweets
            .as_ref()
            .and_then(|refs| refs.first())
            .map(|r| Reference {
                id: r.id.clone(),
                kind: r.kind.clone(),
            });

        Some(Self {
            id,
            author_id: tweet.author_id.clone().unwrap_or_default(),
            metrics: tweet.public_metrics.unwrap_or_default(),
            text: tweet.text.clone(),
            referenced,
        })
    }

    pub fn to_row(&self) -> RecordRow {
        let (referenced_id, referenced_type) = match &self.referenced {
            Some(r) => (Some(r.id.clone()), Some(r.kind.clone())),
            None => (None, None),
        };
        RecordRow {
            id: self.id.to_string(),
            author_id: self.author_id.clone(),
            like_count: self.metrics.like_count.to_string(),
            quote_count: self.metrics.quote_count.to_string(),
            reply_count: self.metrics.reply_count.to_string(),
            retweet_count: self.metrics.retweet_count.to_string(),
            text: self.text.clone(),
            referenced_id,
            referenced_type,
        }
    }
}

/// A collected record in artifact column order.
///
/// Field order is the column order of a collected artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordRow {
    pub id: String,
    pub author_id: String,
    pub like_count: String,
    pub quote_count: String,
    pub reply_count: String,
    pub retweet_count: String,
    pub text: String,
    pub referenced_id: Option<String>,
    pub referenced_type: Option<String>,
}

/// Normalize a serialized id to an integer key.
///
/// Accepts `123`, `123.0` and `1.23e2`; rejects empty strings, `NaN`,
/// negatives and values with a fractional part.
pub fn parse_key(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty()
        || raw.eq_ignore_ascii_case("nan")
        || raw.eq_ignore_ascii_case("null")
        || raw.eq_ignore_ascii_case("none")
    {
        return None;
    }

    if let Ok(key) = raw.parse::<u64>() {
        return Some(key);
    }

    // `123.000` keeps full precision when parsed as integer + zero fraction.
    if let Some((whole, fraction)) = raw.split_once('.') {
        if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') {
            if let Ok(key) = whole.parse::<u64>() {
                return Some(key);
            }
        }
    }

    let value: f64 = raw.parse().ok()?;
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return None;
    }
    if value > 9_007_199_254_740_992.0 {
        tracing::warn!(raw, "Id beyond f64 integer precision; key may not match");
    }
    Some(value as u64)
}

/// Date component (`YYYY-MM-DD`) of a `created_at` timestamp.
pub fn date_component(created_at: &str) -> Option<String> {
    let created_at = created_at.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(created_at) {
        return Some(ts.date_naive().format("%Y-%m-%d").to_string());
    }

    let first = created_at.split(['T', ' ']).next()?;
    NaiveDate::parse_from_str(first, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use twitter_client::ReferencedTweet;

    #[test]
    fn test_parse_key_float_drift() {
        assert_eq!(parse_key("123"), Some(123));
        assert_eq!(parse_key("123.0"), Some(123));
        assert_eq!(parse_key(" 123.000 "), Some(123));
        assert_eq!(parse_key("1.23e2"), Some(123));
        assert_eq!(
            parse_key("1587316845567602688.0"),
            Some(1_587_316_845_567_602_688)
        );
    }

    #[test]
    fn test_parse_key_rejects_unusable() {
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("NaN"), None);
        assert_eq!(parse_key("nan"), None);
        assert_eq!(parse_key("-4"), None);
        assert_eq!(parse_key("12.5"), None);
        assert_eq!(parse_key("abc"), None);
    }

    #[test]
    fn test_date_component() {
        assert_eq!(
            date_component("2022-05-26T18:03:11.000Z").as_deref(),
            Some("2022-05-26")
        );
        assert_eq!(
            date_component("2022-05-26 18:03:11").as_deref(),
            Some("2022-05-26")
        );
        assert_eq!(date_component("yesterday"), None);
    }

    #[test]
    fn test_reference_pair_is_all_or_nothing() {
        let mut tweet = Tweet {
            id: "10".to_string(),
            text: "hello".to_string(),
            author_id: Some("7".to_string()),
            created_at: None,
            public_metrics: None,
            referenced_tweets: None,
        };
        let row = Record::from_tweet(&tweet).unwrap().to_row();
        assert_eq!(row.referenced_id, None);
        assert_eq!(row.referenced_type, None);

        tweet.referenced_tweets = Some(vec![ReferencedTweet {
            kind: "replied_to".to_string(),
            id: "9".to_string(),
        }]);
        let row = Record::from_tweet(&tweet).unwrap().to_row();
        assert_eq!(row.referenced_id.as_deref(), Some("9"));
        assert_eq!(row.referenced_type.as_deref(), Some("replied_to"));
        assert_eq!(row.id, "10");
    }

    #[test]
    fn test_non_numeric_tweet_id_dropped() {
        let tweet = Tweet {
            id: "not-an-id".to_string(),
            text: String::new(),
            author_id: None,
            created_at: None,
            public_metrics: None,
            referenced_tweets: None,
        };
        assert!(Record::from_tweet(&tweet).is_none());
    }
}

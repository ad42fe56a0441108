//! Creation-date enrichment of collected records.
//!
//! Keys are gathered from the `id` column, cleaned, deduplicated and sent to
//! the lookup endpoint in batches. Each answer is folded into a
//! [`BatchOutcome`] and the resolved dates are joined back onto the rows by
//! normalized key, in a `resolved_date` column. Every other column of the
//! input is carried through unchanged. Rows the lookup never resolves keep
//! [`UNRESOLVED_DATE`](crate::record::UNRESOLVED_DATE).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use twitter_client::LookupResponse;

use crate::api::TweetLookup;
use crate::config::HarvestConfig;
use crate::error::Result;
use crate::pager::pause;
use crate::rate_limit::{RateLimitState, RequestCeiling};
use crate::record::{date_component, parse_key, UNRESOLVED_DATE};
use crate::store::{RecordStore, Table, RESOLVED_DATE_COLUMN};

/// Keys per lookup call. The endpoint accepts 100; one is kept in reserve.
pub const LOOKUP_BATCH_SIZE: usize = 99;

/// What one lookup call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every key in the batch came back with a date.
    Resolved(HashMap<u64, String>),
    /// Some keys came back; the rest are listed in `missing`.
    Partial {
        resolved: HashMap<u64, String>,
        missing: Vec<u64>,
    },
    /// The call failed or the response carried no data.
    Failed(String),
}

impl BatchOutcome {
    /// Fold a lookup response for `batch` into an outcome.
    ///
    /// Entries for keys outside the batch, and entries whose `created_at`
    /// has no usable date, are ignored.
    pub fn from_response(batch: &[u64], response: &LookupResponse) -> Self {
        if let Some(summary) = response.error_summary() {
            return BatchOutcome::Failed(summary);
        }

        let wanted: HashSet<u64> = batch.iter().copied().collect();
        let resolved: HashMap<u64, String> = response
            .data
            .iter()
            .flatten()
            .filter_map(|tweet| {
                let key = parse_key(&tweet.id).filter(|key| wanted.contains(key))?;
                let date = tweet.created_at.as_deref().and_then(date_component)?;
                Some((key, date))
            })
            .collect();

        let missing: Vec<u64> = batch
            .iter()
            .copied()
            .filter(|key| !resolved.contains_key(key))
            .collect();

        if missing.is_empty() {
            BatchOutcome::Resolved(resolved)
        } else {
            BatchOutcome::Partial { resolved, missing }
        }
    }

    pub fn resolved(&self) -> Option<&HashMap<u64, String>> {
        match self {
            BatchOutcome::Resolved(resolved) | BatchOutcome::Partial { resolved, .. } => {
                Some(resolved)
            }
            BatchOutcome::Failed(_) => None,
        }
    }
}

/// Clean, deduplicated `keys`, in first-seen order, split into batches of
/// at most [`LOOKUP_BATCH_SIZE`].
///
/// Missing keys and keys on the denylist are left out.
pub fn plan_batches<I>(keys: I, denylist: &HashSet<u64>) -> Vec<Vec<u64>>
where
    I: IntoIterator<Item = Option<u64>>,
{
    let mut seen = HashSet::new();
    let keys: Vec<u64> = keys
        .into_iter()
        .flatten()
        .filter(|key| !denylist.contains(key))
        .filter(|key| seen.insert(*key))
        .collect();

    keys.chunks(LOOKUP_BATCH_SIZE)
        .map(<[u64]>::to_vec)
        .collect()
}

/// Summary of one enrichment pass.
#[derive(Debug, Clone)]
pub struct EnrichmentReport {
    /// Input table with `resolved_date` set on every row.
    pub table: Table,
    pub batches: usize,
    pub failed_batches: usize,
    /// Rows that received a date in this pass.
    pub resolved: usize,
    /// Rows skipped for a missing, unparseable or denylisted key.
    pub excluded: usize,
    pub cancelled: bool,
}

/// Joins creation dates onto collected rows.
pub struct EnrichmentJoiner<'a, L: TweetLookup> {
    api: &'a L,
    denylist: HashSet<u64>,
    limits: RateLimitState,
    ceiling: Option<RequestCeiling>,
    delay: Duration,
    cancel: CancellationToken,
}

impl<'a, L: TweetLookup> EnrichmentJoiner<'a, L> {
    pub fn new(api: &'a L, config: &HarvestConfig) -> Result<Self> {
        Ok(Self {
            api,
            denylist: config.denylist.iter().copied().collect(),
            limits: config.rate_limit_state(),
            ceiling: Some(config.ceiling()?),
            delay: config.inter_request_delay(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve dates for the rows of `table` and return it with the pass
    /// summary.
    ///
    /// A row that stays unresolved keeps the `resolved_date` it already had,
    /// or gets the sentinel.
    pub async fn enrich(&mut self, mut table: Table) -> EnrichmentReport {
        let keys = table.keys();
        let excluded = keys
            .iter()
            .filter(|key| key.map_or(true, |key| self.denylist.contains(&key)))
            .count();
        let batches = plan_batches(keys.iter().copied(), &self.denylist);
        let total = batches.len();

        info!(
            rows = table.len(),
            excluded,
            batches = total,
            "Starting enrichment"
        );

        let mut dates: HashMap<u64, String> = HashMap::new();
        let mut failed_batches = 0;
        let mut cancelled = false;

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !pause(&self.cancel, self.delay).await {
                cancelled = true;
                break;
            }
            if !self.ready().await {
                cancelled = true;
                break;
            }

            let outcome = match self.api.lookup(batch).await {
                Ok(fetched) => {
                    self.limits.record_request();
                    if fetched.cooldowns > 0 {
                        self.limits.note_cooldown();
                    }
                    BatchOutcome::from_response(batch, &fetched.value)
                }
                Err(e) => {
                    self.limits.record_request();
                    BatchOutcome::Failed(e.to_string())
                }
            };

            match &outcome {
                BatchOutcome::Resolved(resolved) => {
                    info!(batch = index + 1, total, resolved = resolved.len(), "Batch resolved");
                }
                BatchOutcome::Partial { resolved, missing } => {
                    info!(
                        batch = index + 1,
                        total,
                        resolved = resolved.len(),
                        missing = missing.len(),
                        "Batch partially resolved"
                    );
                    debug!(?missing, "Keys without a date");
                }
                BatchOutcome::Failed(reason) => {
                    failed_batches += 1;
                    warn!(batch = index + 1, total, size = batch.len(), %reason, "Batch failed; skipping");
                }
            }

            if let Some(resolved) = outcome.resolved() {
                dates.extend(resolved.iter().map(|(k, v)| (*k, v.clone())));
            }
        }

        let mut resolved = 0;
        let column: Vec<String> = keys
            .iter()
            .enumerate()
            .map(|(row, key)| match key.and_then(|key| dates.get(&key)) {
                Some(date) => {
                    resolved += 1;
                    date.clone()
                }
                None => table
                    .value(row, RESOLVED_DATE_COLUMN)
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or(UNRESOLVED_DATE)
                    .to_string(),
            })
            .collect();
        table.set_column(RESOLVED_DATE_COLUMN, column);

        if cancelled {
            warn!(resolved, "Enrichment cancelled; keeping partial results");
        }
        info!(
            rows = table.len(),
            resolved,
            batches = total,
            failed_batches,
            requests = self.limits.total_requests(),
            "Enrichment finished"
        );

        EnrichmentReport {
            table,
            batches: total,
            failed_batches,
            resolved,
            excluded,
            cancelled,
        }
    }

    /// Load `source`, enrich it, and write `<stem>_date.<ext>` under the
    /// store root with the source's columns and delimiter. The source file is
    /// never modified.
    pub async fn enrich_file(
        &mut self,
        store: &RecordStore,
        source: &Path,
    ) -> Result<(PathBuf, EnrichmentReport)> {
        let table = store.load(source)?;
        let report = self.enrich(table).await;

        let dest = store.enriched_path(source);
        store.write_table(&report.table, &dest)?;
        info!(source = %source.display(), dest = %dest.display(), "Wrote enriched artifact");

        Ok((dest, report))
    }

    /// Wait for the periodic cooldown and the shared ceiling. Returns
    /// `false` if cancelled first.
    async fn ready(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let cancelled = tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = self.limits.before_request() => false,
        };
        if cancelled {
            return false;
        }
        if let Some(ceiling) = &self.ceiling {
            ceiling.until_ready().await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLookup;
    use csv::StringRecord;
    use proptest::prelude::*;
    use twitter_client::LookupTweet;

    fn table(ids: &[&str]) -> Table {
        Table::new(
            StringRecord::from(vec!["id", "text"]),
            ids.iter()
                .map(|id| StringRecord::from(vec![*id, "hi"]))
                .collect(),
            b',',
        )
    }

    fn dates(report: &EnrichmentReport) -> Vec<&str> {
        (0..report.table.len())
            .map(|row| report.table.value(row, RESOLVED_DATE_COLUMN).unwrap())
            .collect()
    }

    fn config() -> HarvestConfig {
        HarvestConfig::new("x")
            .with_inter_request_delay(0)
            .with_threshold(0)
            .with_requests_per_second(1_000)
    }

    #[test]
    fn test_plan_excludes_and_dedupes() {
        let keys = table(&["1", "NaN", "2.0", "1", "", "3"]).keys();
        let denylist: HashSet<u64> = [3].into_iter().collect();

        assert_eq!(plan_batches(keys, &denylist), vec![vec![1, 2]]);
    }

    #[test]
    fn test_plan_splits_at_batch_size() {
        let sizes: Vec<usize> = plan_batches((1..=250).map(Some), &HashSet::new())
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![99, 99, 52]);
    }

    #[test]
    fn test_outcome_partial() {
        let response = LookupResponse {
            data: Some(vec![
                LookupTweet {
                    id: "1".to_string(),
                    created_at: Some("2022-03-04T05:06:07.000Z".to_string()),
                },
                LookupTweet {
                    id: "77".to_string(),
                    created_at: Some("2022-03-04T05:06:07.000Z".to_string()),
                },
            ]),
            ..Default::default()
        };

        let outcome = BatchOutcome::from_response(&[1, 2], &response);

        let expected: HashMap<u64, String> = [(1, "2022-03-04".to_string())].into_iter().collect();
        assert_eq!(
            outcome,
            BatchOutcome::Partial {
                resolved: expected,
                missing: vec![2],
            }
        );
    }

    #[test]
    fn test_outcome_failed_on_envelope() {
        let response = LookupResponse {
            status: Some(429),
            title: Some("Too Many Requests".to_string()),
            ..Default::default()
        };
        let outcome = BatchOutcome::from_response(&[1], &response);
        assert!(matches!(outcome, BatchOutcome::Failed(reason) if reason.contains("429")));
    }

    #[tokio::test]
    async fn test_float_ids_match_integer_keys() {
        let api = MockLookup::new().with_date(123, "2021-12-31T23:59:59.000Z");
        let config = config();
        let mut joiner = EnrichmentJoiner::new(&api, &config).unwrap();

        let report = joiner.enrich(table(&["123.0", "123"])).await;

        assert_eq!(api.batches(), vec![vec![123]]);
        assert_eq!(report.resolved, 2);
        assert_eq!(dates(&report), vec!["2021-12-31", "2021-12-31"]);
    }

    #[tokio::test]
    async fn test_denylisted_and_null_keys_keep_sentinel() {
        let api = MockLookup::new().with_dates([1, 2], "2022-01-01T00:00:00.000Z");
        let config = config().with_denylist([2]);
        let mut joiner = EnrichmentJoiner::new(&api, &config).unwrap();

        let report = joiner.enrich(table(&["1", "2", "nan"])).await;

        assert_eq!(report.excluded, 2);
        assert_eq!(dates(&report), vec!["2022-01-01", UNRESOLVED_DATE, UNRESOLVED_DATE]);
        assert_eq!(api.batches(), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_transport_failure_skips_batch() {
        let api = MockLookup::new()
            .with_dates(1..=150, "2022-01-01T00:00:00.000Z")
            .with_failure_on(0);
        let config = config();
        let mut joiner = EnrichmentJoiner::new(&api, &config).unwrap();

        let ids: Vec<String> = (1..=150).map(|i| i.to_string()).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let report = joiner.enrich(table(&ids)).await;

        assert_eq!(report.batches, 2);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.resolved, 51);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let api = MockLookup::new().with_date(1, "2022-01-01T00:00:00.000Z");
        let config = config();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut joiner = EnrichmentJoiner::new(&api, &config)
            .unwrap()
            .with_cancellation(cancel);

        let report = joiner.enrich(table(&["1"])).await;

        assert!(report.cancelled);
        assert_eq!(report.resolved, 0);
        assert!(api.batches().is_empty());
    }

    #[tokio::test]
    async fn test_error_envelope_batch_is_skipped() {
        let api = MockLookup::new()
            .with_dates(1..=200, "2022-01-01T00:00:00.000Z")
            .with_envelope_on(1);
        let config = config();
        let mut joiner = EnrichmentJoiner::new(&api, &config).unwrap();

        let ids: Vec<String> = (1..=200).map(|i| i.to_string()).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let report = joiner.enrich(table(&ids)).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.resolved, 101);
        assert_eq!(report.table.value(98, RESOLVED_DATE_COLUMN), Some("2022-01-01"));
        assert_eq!(report.table.value(99, RESOLVED_DATE_COLUMN), Some(UNRESOLVED_DATE));
        assert_eq!(report.table.value(199, RESOLVED_DATE_COLUMN), Some("2022-01-01"));
    }

    #[tokio::test]
    async fn test_foreign_columns_survive_enrichment() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie_sentiment.csv");
        std::fs::write(&source, "id\ttext\tsentiment\n5\thi\t0.93\n6\tyo\t0.10\n").unwrap();
        let store = RecordStore::new(dir.path());

        let api = MockLookup::new().with_date(5, "2022-03-01T12:00:00.000Z");
        let config = config();
        let mut joiner = EnrichmentJoiner::new(&api, &config).unwrap();
        let (dest, report) = joiner.enrich_file(&store, &source).await.unwrap();

        assert_eq!(report.resolved, 1);
        assert_eq!(
            std::fs::read_to_string(dest).unwrap(),
            "id\ttext\tsentiment\tresolved_date\n5\thi\t0.93\t2022-03-01\n6\tyo\t0.10\t0\n"
        );
    }

    #[tokio::test]
    async fn test_existing_resolved_date_is_replaced_or_kept() {
        let api = MockLookup::new().with_date(1, "2022-06-01T00:00:00.000Z");
        let config = config();
        let mut joiner = EnrichmentJoiner::new(&api, &config).unwrap();
        let input = Table::new(
            StringRecord::from(vec!["id", "resolved_date"]),
            vec![
                StringRecord::from(vec!["1", "0"]),
                StringRecord::from(vec!["2", "2021-01-01"]),
            ],
            b',',
        );

        let report = joiner.enrich(input).await;

        assert_eq!(report.table.headers().len(), 2);
        assert_eq!(dates(&report), vec!["2022-06-01", "2021-01-01"]);
    }

    proptest! {
        #[test]
        fn prop_batches_cover_unique_keys(ids in proptest::collection::vec(0u64..500, 0..600)) {
            let unique: HashSet<u64> = ids.iter().copied().collect();

            let batches = plan_batches(ids.iter().copied().map(Some), &HashSet::new());

            prop_assert_eq!(batches.len(), unique.len().div_ceil(LOOKUP_BATCH_SIZE));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= LOOKUP_BATCH_SIZE));
            let flat: Vec<u64> = batches.into_iter().flatten().collect();
            let flat_set: HashSet<u64> = flat.iter().copied().collect();
            prop_assert_eq!(flat.len(), flat_set.len());
            prop_assert_eq!(flat_set, unique);
        }
    }
}

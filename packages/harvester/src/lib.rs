//! Windowed tweet collection and date enrichment.
//!
//! The search pass walks a list of time [`Window`]s. Each window gets its
//! own [`SearchPager`], which follows continuation tokens until the results
//! run out or the window's budget is met, and the collected records are
//! flushed to one CSV artifact per window by the [`RecordStore`].
//!
//! The enrichment pass reads those artifacts back, looks up creation times
//! in batches through the [`EnrichmentJoiner`], and writes a `_date` copy
//! with a `resolved_date` column.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvester::{HarvestConfig, RecordStore, WindowBatcher};
//!
//! let config = HarvestConfig::new("#TheLittleMermaid lang:en").with_windows(windows);
//! let store = RecordStore::new(&config.output_dir);
//! let batcher = WindowBatcher::new(&client, &store, &config)?;
//! let reports = batcher.run(&config.search_query(), config.window_list()).await;
//! ```

pub mod api;
pub mod config;
pub mod enrich;
pub mod error;
pub mod pager;
pub mod rate_limit;
pub mod record;
pub mod store;
pub mod testing;
pub mod window;

pub use api::{TweetLookup, TweetSearch};
pub use config::HarvestConfig;
pub use enrich::{plan_batches, BatchOutcome, EnrichmentJoiner, EnrichmentReport, LOOKUP_BATCH_SIZE};
pub use error::{ConfigError, HarvestError, Result, StoreError};
pub use pager::{PagerRun, PagerState, SearchPager, StopReason};
pub use rate_limit::{RateLimitState, RequestCeiling};
pub use record::{parse_key, Record, RecordRow, UNRESOLVED_DATE};
pub use store::{RecordStore, Table, RESOLVED_DATE_COLUMN};
pub use window::{Window, WindowBatcher, WindowReport};

//! Command-line entry point: collect windows, then enrich the artifacts.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twitter_client::{HttpTransport, TwitterClient};

use harvester::config::{bearer_token_from_env, load_denylist, parse_delimiter};
use harvester::{EnrichmentJoiner, HarvestConfig, RecordStore, Window, WindowBatcher};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Collect and date-enrich tweets by time window")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    limits: LimitArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Collect every window of a date range into per-window CSV files
    Search(SearchArgs),
    /// Add a resolved_date column to collected CSV files
    Enrich(EnrichArgs),
}

#[derive(Args)]
struct LimitArgs {
    /// Seconds to sleep on a non-200 response before retrying
    #[arg(long, global = true, default_value_t = 300)]
    cooldown_secs: u64,

    /// Requests per stream before a periodic cooldown (0 disables)
    #[arg(long, global = true, default_value_t = 300)]
    threshold: u32,

    /// Seconds to sleep once the request threshold is reached
    #[arg(long, global = true, default_value_t = 900)]
    periodic_cooldown_secs: u64,

    /// Attempts per request, including the first
    #[arg(long, global = true, default_value_t = 4)]
    max_attempts: u32,

    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,

    /// Process-wide request ceiling
    #[arg(long, global = true, default_value_t = 1)]
    requests_per_second: u32,

    /// Pause between consecutive requests of one stream
    #[arg(long, global = true, default_value_t = 1)]
    delay_secs: u64,

    /// API root, for proxies and test servers
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Artifact field delimiter, e.g. "," or "tab" (default: comma when
    /// writing, detected when reading)
    #[arg(long, global = true, value_parser = parse_delimiter_arg)]
    delimiter: Option<u8>,
}

#[derive(Args)]
struct SearchArgs {
    /// Search filter, e.g. "#TheLittleMermaid lang:en"
    #[arg(long)]
    keyword: String,

    /// Range start (YYYY-MM-DD or RFC 3339, UTC)
    #[arg(long, value_parser = parse_time)]
    start: DateTime<Utc>,

    /// Range end, exclusive
    #[arg(long, value_parser = parse_time)]
    end: DateTime<Utc>,

    /// Window length in days
    #[arg(long, default_value_t = 7)]
    step_days: i64,

    /// Records per window
    #[arg(long, default_value_t = 10_000)]
    budget: usize,

    #[arg(long, default_value_t = 500)]
    max_results: u32,

    /// Windows collected at the same time
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args)]
struct EnrichArgs {
    /// Collected CSV files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Id to leave unresolved (repeatable)
    #[arg(long = "deny-id")]
    deny_ids: Vec<u64>,

    /// File with one id per line to leave unresolved
    #[arg(long)]
    denylist: Option<PathBuf>,

    /// Where to write the _date copies (default: next to each source)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn parse_delimiter_arg(raw: &str) -> std::result::Result<u8, String> {
    parse_delimiter(raw).map_err(|e| e.to_string())
}

fn parse_time(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc())
        .ok_or_else(|| format!("expected YYYY-MM-DD or RFC 3339, got {:?}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug,twitter_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing the current request and flushing");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::Search(args) => search(args, &cli.limits, cancel).await,
        Command::Enrich(args) => enrich(args, &cli.limits, cancel).await,
    }
}

fn base_config(keyword: &str, limits: &LimitArgs) -> HarvestConfig {
    let mut config = HarvestConfig::new(keyword)
        .with_cooldown(limits.cooldown_secs)
        .with_threshold(limits.threshold)
        .with_periodic_cooldown(limits.periodic_cooldown_secs)
        .with_delimiter(limits.delimiter)
        .with_max_attempts(limits.max_attempts)
        .with_requests_per_second(limits.requests_per_second)
        .with_inter_request_delay(limits.delay_secs);
    config.request_timeout_secs = limits.timeout_secs;
    config.base_url = limits.base_url.clone();
    config
}

fn build_client(config: &HarvestConfig) -> Result<TwitterClient<HttpTransport>> {
    let token = bearer_token_from_env().context("Failed to load bearer token")?;
    let mut transport = HttpTransport::new(token, config.request_timeout())
        .context("Failed to build HTTP client")?;
    if let Some(base_url) = &config.base_url {
        transport = transport.with_base_url(base_url);
    }
    Ok(TwitterClient::new(transport, config.retry_policy()))
}

async fn search(args: SearchArgs, limits: &LimitArgs, cancel: CancellationToken) -> Result<()> {
    if args.step_days <= 0 {
        bail!("--step-days must be positive");
    }
    let windows = Window::partition(args.start, args.end, TimeDelta::days(args.step_days), args.budget);
    if windows.is_empty() {
        bail!("--start must be before --end");
    }

    let config = base_config(&args.keyword, limits)
        .with_windows(windows.iter().map(|w| (w.start, w.end)).collect())
        .with_budget(args.budget)
        .with_max_results_per_page(args.max_results)
        .with_concurrency(args.concurrency)
        .with_output_dir(args.output_dir);
    config.validate().context("Invalid configuration")?;

    let client = build_client(&config)?;
    let store = RecordStore::new(&config.output_dir).with_delimiter(config.delimiter);
    let batcher = WindowBatcher::new(&client, &store, &config)?.with_cancellation(cancel);

    let reports = batcher
        .run(&config.search_query(), config.window_list())
        .await;

    println!();
    println!("Collected {} windows for {:?}", reports.len(), config.keyword);
    for report in &reports {
        let path = report
            .path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:>6} records  {:>4} requests  {:?}  {}",
            report.window, report.records, report.requests, report.stop, path
        );
        if let Some(error) = &report.error {
            println!("    error: {}", error);
        }
    }
    let failed = reports.iter().filter(|r| r.failed()).count();
    let total: usize = reports.iter().map(|r| r.records).sum();
    println!("Total: {} records, {} failed windows", total, failed);

    Ok(())
}

async fn enrich(args: EnrichArgs, limits: &LimitArgs, cancel: CancellationToken) -> Result<()> {
    let mut denylist = args.deny_ids.clone();
    if let Some(path) = &args.denylist {
        denylist.extend(load_denylist(path).context("Failed to load denylist")?);
    }

    let config = base_config("", limits).with_denylist(denylist);
    config.validate().context("Invalid configuration")?;
    let client = build_client(&config)?;

    for source in &args.files {
        if cancel.is_cancelled() {
            break;
        }

        let root = match &args.output_dir {
            Some(dir) => dir.clone(),
            None => source
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let store = RecordStore::new(root).with_delimiter(config.delimiter);

        let mut joiner = EnrichmentJoiner::new(&client, &config)?.with_cancellation(cancel.clone());
        let (dest, report) = joiner
            .enrich_file(&store, source)
            .await
            .with_context(|| format!("Failed to enrich {}", source.display()))?;

        println!(
            "{} -> {}: {}/{} rows resolved, {} excluded, {}/{} batches failed{}",
            source.display(),
            dest.display(),
            report.resolved,
            report.table.len(),
            report.excluded,
            report.failed_batches,
            report.batches,
            if report.cancelled { " (cancelled)" } else { "" }
        );
    }

    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use news_aggregator::config::CONFIG_ENV;
use news_aggregator::{AggregatorConfig, Aggregator, Query, ReportFeeds, SourceStatus};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "news-aggregator", version, about = "Multi-source news retrieval")]
struct Cli {
    /// JSON config file; falls back to $NEWS_AGGREGATOR_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory to write results to instead of stdout; falls back to $DATA_DIR.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crypto RSS headlines mentioning a ticker, as JSON (`crypto_sources`)
    Crypto {
        #[arg(long, default_value = "")]
        ticker: String,
    },
    /// News search digest for a query over a look-back window (`search_endpoint`)
    Search {
        #[arg(long)]
        query: String,
        /// Last day of the window, YYYY-MM-DD
        #[arg(long)]
        date: String,
        #[arg(long, default_value_t = 7)]
        look_back: i64,
    },
    /// Scraped futures headlines (`headline_sources`)
    Headlines {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Aggregate the sources in the config file and print the records as JSON
    Run {
        #[arg(long)]
        query: Option<String>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<AggregatorConfig> {
    let path = path.or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(path) => AggregatorConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(AggregatorConfig::default()),
    }
}

fn emit(output_dir: Option<&PathBuf>, file_name: &str, content: &str) -> Result<()> {
    match output_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join(file_name);
            std::fs::write(&path, content)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

/// Keeps generated file names to a safe character set.
fn file_stem(raw: &str) -> String {
    let stem: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "all".to_string()
    } else {
        stem
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    let output_dir = cli
        .output_dir
        .or_else(|| env::var_os("DATA_DIR").map(PathBuf::from));

    match cli.command {
        Command::Crypto { ticker } => {
            let feeds = ReportFeeds::new(config)?;
            let json = feeds.fetch_crypto_feed(&ticker).await?;
            emit(
                output_dir.as_ref(),
                &format!("crypto_{}.json", file_stem(&ticker)),
                &json,
            )?;
        }
        Command::Search {
            query,
            date,
            look_back,
        } => {
            let feeds = ReportFeeds::new(config)?;
            let digest = feeds.fetch_search_news(&query, &date, look_back).await?;
            if digest.is_empty() {
                warn!("No search results for {:?}", query);
            }
            emit(
                output_dir.as_ref(),
                &format!("search_{}_{}.md", file_stem(&query), file_stem(&date)),
                &digest,
            )?;
        }
        Command::Headlines { query, start, end } => {
            let feeds = ReportFeeds::new(config)?;
            let titles = feeds
                .fetch_scraped_headlines(query.as_deref(), start.as_deref(), end.as_deref())
                .await?;
            let json = serde_json::to_string_pretty(&titles)?;
            emit(output_dir.as_ref(), "headlines.json", &json)?;
        }
        Command::Run { query } => {
            if config.sources.is_empty() {
                bail!(
                    "no sources configured; pass --config or set {}",
                    CONFIG_ENV
                );
            }
            let aggregator = Aggregator::new(config)?;
            let query = query.map(Query::titled).unwrap_or_default();
            let report = aggregator.aggregate_report(&query).await;

            for outcome in &report.sources {
                match &outcome.status {
                    SourceStatus::Ok => info!(
                        "{} ({}): {} records",
                        outcome.source_id, outcome.kind, outcome.records
                    ),
                    SourceStatus::Failed(e) => warn!("{} ({}): {}", outcome.source_id, outcome.kind, e),
                    SourceStatus::TimedOut => warn!("{} ({}): timed out", outcome.source_id, outcome.kind),
                }
            }

            let json = serde_json::to_string_pretty(&report.records)?;
            emit(output_dir.as_ref(), "records.json", &json)?;
        }
    }

    Ok(())
}

use crate::types::{AggregatorError, FetchErrorKind, ParserParams, Result, SourceConfig};
use backoff::exponential::ExponentialBackoff;
use backoff::SystemClock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable the binary reads a config file path from.
pub const CONFIG_ENV: &str = "NEWS_AGGREGATOR_CONFIG";

/// Largest accepted single backoff delay (one hour).
pub const MAX_BACKOFF_MS: u64 = 3_600_000;
/// Largest accepted per-request timeout and per-call deadline (one day).
pub const MAX_DEADLINE_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound on a single backoff delay.
    pub backoff_max_ms: u64,
    pub retryable_status_codes: BTreeSet<u16>,
    pub retryable_error_kinds: Vec<FetchErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_multiplier: 2.0,
            backoff_max_ms: 60_000,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_error_kinds: vec![
                FetchErrorKind::Timeout,
                FetchErrorKind::Connect,
                FetchErrorKind::Reset,
                FetchErrorKind::Dns,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    pub fn is_retryable_error(&self, kind: FetchErrorKind) -> bool {
        self.retryable_error_kinds.contains(&kind)
    }

    /// Delay schedule for one fetch: base, base*m, base*m^2, ... capped at
    /// `backoff_max_ms`. No jitter, so delays never decrease.
    pub fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        let initial = Duration::from_millis(self.backoff_base_ms);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: self.backoff_multiplier,
            max_interval: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AggregatorError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(AggregatorError::Configuration(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.backoff_max_ms > MAX_BACKOFF_MS || self.backoff_base_ms > self.backoff_max_ms {
            return Err(AggregatorError::Configuration(format!(
                "retry backoff must satisfy backoff_base_ms <= backoff_max_ms <= {}, got {} and {}",
                MAX_BACKOFF_MS, self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}

/// Everything the aggregator needs, constructed once and owned by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_redirects: usize,
    pub retry: RetryPolicy,
    /// Upper bound on sources fetched at the same time.
    pub max_concurrency: usize,
    /// Wall-clock budget for one aggregation call.
    pub deadline_seconds: u64,
    /// Sources for the `run` command and `Aggregator::new`.
    pub sources: Vec<SourceConfig>,
    /// Feeds behind `fetch_crypto_feed`.
    pub crypto_sources: Vec<SourceConfig>,
    /// Pages behind `fetch_scraped_headlines`.
    pub headline_sources: Vec<SourceConfig>,
    /// RSS search endpoint behind `fetch_search_news`.
    pub search_endpoint: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("news-aggregator/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 15,
            max_redirects: 5,
            retry: RetryPolicy::default(),
            max_concurrency: 4,
            deadline_seconds: 60,
            sources: Vec::new(),
            crypto_sources: presets::crypto_feeds(),
            headline_sources: presets::hexun_futures(),
            search_endpoint: presets::NEWS_SEARCH_URL.to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AggregatorError::Configuration(format!("reading {}: {}", path.display(), e))
        })?;
        let config: AggregatorConfig = serde_json::from_str(&content).map_err(|e| {
            AggregatorError::Configuration(format!("parsing {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!(
            "Loaded config from {} with {} sources",
            path.display(),
            config.sources.len()
        );
        Ok(config)
    }

    pub fn with_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = sources;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(AggregatorError::Configuration(
                "user_agent must not be empty".to_string(),
            ));
        }
        if self.timeout_seconds == 0 || self.timeout_seconds > MAX_DEADLINE_SECONDS {
            return Err(AggregatorError::Configuration(format!(
                "timeout_seconds must be in 1..={}, got {}",
                MAX_DEADLINE_SECONDS, self.timeout_seconds
            )));
        }
        if self.max_concurrency == 0 {
            return Err(AggregatorError::Configuration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.deadline_seconds == 0 || self.deadline_seconds > MAX_DEADLINE_SECONDS {
            return Err(AggregatorError::Configuration(format!(
                "deadline_seconds must be in 1..={}, got {}",
                MAX_DEADLINE_SECONDS, self.deadline_seconds
            )));
        }
        self.retry.validate()?;

        validate_source_set("sources", &self.sources)?;
        validate_source_set("crypto_sources", &self.crypto_sources)?;
        validate_source_set("headline_sources", &self.headline_sources)?;

        let endpoint = Url::parse(&self.search_endpoint).map_err(|e| {
            AggregatorError::Configuration(format!(
                "invalid search_endpoint {}: {}",
                self.search_endpoint, e
            ))
        })?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(AggregatorError::Configuration(format!(
                "search_endpoint: unsupported scheme {}",
                endpoint.scheme()
            )));
        }
        Ok(())
    }
}

fn validate_source_set(name: &str, sources: &[SourceConfig]) -> Result<()> {
    let mut ids = HashSet::new();
    for source in sources {
        validate_source(source)?;
        if !ids.insert(source.id()) {
            return Err(AggregatorError::Configuration(format!(
                "{}: duplicate source id: {}",
                name,
                source.id()
            )));
        }
    }
    Ok(())
}

pub fn validate_source(source: &SourceConfig) -> Result<()> {
    if source.id().trim().is_empty() {
        return Err(AggregatorError::Configuration(
            "source id must not be empty".to_string(),
        ));
    }
    let endpoint = Url::parse(source.endpoint()).map_err(|e| {
        AggregatorError::Configuration(format!(
            "source {}: invalid endpoint {}: {}",
            source.id(),
            source.endpoint(),
            e
        ))
    })?;
    if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
        return Err(AggregatorError::Configuration(format!(
            "source {}: unsupported scheme {}",
            source.id(),
            endpoint.scheme()
        )));
    }

    match source.parser() {
        ParserParams::Rss(params) if params.max_entries == 0 => Err(
            AggregatorError::Configuration(format!("source {}: max_entries is 0", source.id())),
        ),
        ParserParams::HtmlScrape(params) => {
            for selector in [&params.container_selector, &params.item_selector] {
                scraper::Selector::parse(selector).map_err(|e| {
                    AggregatorError::Configuration(format!(
                        "source {}: invalid selector {:?}: {}",
                        source.id(),
                        selector,
                        e
                    ))
                })?;
            }
            if let Some(base) = &params.base_url {
                Url::parse(base).map_err(|e| {
                    AggregatorError::Configuration(format!(
                        "source {}: invalid base_url {}: {}",
                        source.id(),
                        base,
                        e
                    ))
                })?;
            }
            Ok(())
        }
        ParserParams::JsonApi(params)
            if !params.items_path.is_empty() && !params.items_path.starts_with('/') =>
        {
            Err(AggregatorError::Configuration(format!(
                "source {}: items_path must be a JSON pointer, got {:?}",
                source.id(),
                params.items_path
            )))
        }
        _ => Ok(()),
    }
}

/// Built-in source sets used by the report feeds.
pub mod presets {
    use crate::types::{AggregatorError, HtmlParams, Result, SourceConfig};
    use chrono::NaiveDate;
    use url::Url;

    pub const CRYPTO_FEEDS: &[&str] = &[
        "https://cointelegraph.com/rss",
        "https://bitcoinist.com/feed/",
        "https://bitcoinethereumnews.com/feed/",
        "https://cryptoverze.com/feed/",
        "https://www.coolwallet.io/blogs/blog.atom",
        "https://latinoreview.com/feed/",
        "https://bitrss.com/rss.xml",
        "https://coinlabz.com/feed/",
        "https://crypto.news/feed/",
        "https://cryptobriefing.com/feed/",
        "https://99bitcoins.com/feed/",
        "https://cryptopotato.com/feed/",
        "https://www.newsbtc.com/feed/",
    ];

    pub const HEXUN_FUTURES_URL: &str = "https://futures.hexun.com/integratednews/index.html";

    pub const NEWS_SEARCH_URL: &str = "https://news.google.com/rss/search";

    /// Crypto RSS feeds. The feed URL doubles as the source id, so
    /// provenance in the report output is the feed itself.
    pub fn crypto_feeds() -> Vec<SourceConfig> {
        CRYPTO_FEEDS
            .iter()
            .map(|url| SourceConfig::rss(*url, *url))
            .collect()
    }

    pub fn hexun_futures() -> Vec<SourceConfig> {
        vec![SourceConfig::html(
            "hexun_futures",
            HEXUN_FUTURES_URL,
            HtmlParams::default(),
        )]
    }

    /// News search as an RSS source limited to `[start, end]`.
    pub fn news_search(
        endpoint: &str,
        query: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SourceConfig> {
        // `before:` is exclusive upstream, so ask for the day after `end`.
        let before = end.succ_opt().unwrap_or(end);
        let q = format!(
            "{} after:{} before:{}",
            query.trim(),
            start.format("%Y-%m-%d"),
            before.format("%Y-%m-%d")
        );
        let url = Url::parse_with_params(
            endpoint,
            &[
                ("q", q.as_str()),
                ("hl", "en-US"),
                ("gl", "US"),
                ("ceid", "US:en"),
            ],
        )
        .map_err(|e| AggregatorError::Configuration(format!("news search endpoint: {}", e)))?;
        Ok(SourceConfig::rss("news_search", url.as_str()))
    }
}

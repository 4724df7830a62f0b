//! Report feeds: the calls the report layer makes, each one a single
//! aggregation over a preset source set.

use crate::aggregator::{Aggregator, Clock};
use crate::config::{presets, AggregatorConfig};
use crate::digest::compose_digest;
use crate::fetcher::Fetcher;
use crate::filter::{parse_date, DateWindow, Query};
use crate::types::{AggregatorError, NewsRecord, Result, SourceConfig};
use serde::Serialize;
use tracing::info;

/// Row shape of the crypto feed JSON.
#[derive(Debug, Serialize)]
struct FeedItem<'a> {
    title: &'a str,
    link: &'a str,
    published: &'a str,
    summary: &'a str,
    source: &'a str,
}

impl<'a> From<&'a NewsRecord> for FeedItem<'a> {
    fn from(record: &'a NewsRecord) -> Self {
        Self {
            title: record.title(),
            link: record.url(),
            published: record.published_at(),
            summary: record.summary(),
            source: record.source_id(),
        }
    }
}

pub struct ReportFeeds {
    settings: AggregatorConfig,
    fetcher: Fetcher,
    clock: Option<Clock>,
}

impl ReportFeeds {
    /// `settings` supplies the HTTP, retry and call limits together with
    /// the per-feed source sets (`crypto_sources`, `headline_sources`,
    /// `search_endpoint`). Its `sources` belong to the `run` command and
    /// are not used here.
    pub fn new(settings: AggregatorConfig) -> Result<Self> {
        settings.validate()?;
        let fetcher = Fetcher::new(&settings)?;
        Self::with_fetcher(settings, fetcher)
    }

    pub fn with_fetcher(settings: AggregatorConfig, fetcher: Fetcher) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            fetcher,
            clock: None,
        })
    }

    pub fn with_crypto_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.settings.crypto_sources = sources;
        self
    }

    pub fn with_headline_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.settings.headline_sources = sources;
        self
    }

    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.search_endpoint = endpoint.into();
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    fn aggregator(&self, sources: Vec<SourceConfig>) -> Result<Aggregator> {
        let config = self.settings.clone().with_sources(sources);
        let aggregator = Aggregator::with_fetcher(config, self.fetcher.clone())?;
        Ok(match &self.clock {
            Some(clock) => aggregator.with_clock(clock.clone()),
            None => aggregator,
        })
    }

    /// Crypto headlines whose title mentions `ticker`, as pretty-printed
    /// JSON. An empty ticker returns everything.
    pub async fn fetch_crypto_feed(&self, ticker: &str) -> Result<String> {
        let aggregator = self.aggregator(self.settings.crypto_sources.clone())?;
        let records = aggregator.aggregate(&Query::titled(ticker)).await;
        info!("Crypto feed for {:?}: {} items", ticker, records.len());

        let items: Vec<FeedItem> = records.iter().map(FeedItem::from).collect();
        Ok(serde_json::to_string_pretty(&items)?)
    }

    /// Search news for `query` over the `look_back_days` days up to and
    /// including `current_date` (`YYYY-MM-DD`), rendered as a digest.
    pub async fn fetch_search_news(
        &self,
        query: &str,
        current_date: &str,
        look_back_days: i64,
    ) -> Result<String> {
        if query.trim().is_empty() {
            return Err(AggregatorError::Validation(
                "search query must not be empty".to_string(),
            ));
        }
        if look_back_days < 0 {
            return Err(AggregatorError::Validation(format!(
                "look_back_days must not be negative, got {}",
                look_back_days
            )));
        }
        let end = parse_date(current_date)?;
        let start = chrono::Duration::try_days(look_back_days)
            .and_then(|span| end.checked_sub_signed(span))
            .ok_or_else(|| {
                AggregatorError::Validation(format!(
                    "look_back_days {} is out of range",
                    look_back_days
                ))
            })?;
        let window = DateWindow::new(Some(start), Some(end))?;

        let source = presets::news_search(&self.settings.search_endpoint, query, start, end)?;
        let aggregator = self.aggregator(vec![source])?;
        // The upstream already searched, so only the window is applied here.
        let records = aggregator.aggregate(&Query::all().with_window(window)).await;
        info!(
            "Search news for {:?} from {} to {}: {} items",
            query,
            start,
            end,
            records.len()
        );

        Ok(compose_digest(query, start, end, &records))
    }

    /// Headline titles from the configured list pages, in page order.
    pub async fn fetch_scraped_headlines(
        &self,
        query: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<String>> {
        let window = DateWindow::parse(start_date, end_date)?;
        let query = Query::titled(query.unwrap_or("")).with_window(window);

        let aggregator = self.aggregator(self.settings.headline_sources.clone())?;
        let records = aggregator.aggregate(&query).await;
        info!("Scraped {} headlines", records.len());

        Ok(records.iter().map(|r| r.title().to_string()).collect())
    }
}

pub mod html_scrape;
pub mod json_api;
pub mod rss_feed;

pub use html_scrape::HtmlScrapeAdapter;
pub use json_api::JsonApiAdapter;
pub use rss_feed::RssFeedAdapter;

use crate::fetcher::FetchedPayload;
use crate::types::{ParsedEntry, Result, SourceConfig, SourceKind};
use tracing::warn;

/// Turns one upstream's payload into parsed entries. Adapters are stateless
/// and do no I/O.
pub trait SourceAdapter: Send + Sync {
    /// Strict parse: a malformed document is an `UpstreamFormat` error.
    fn try_parse(&self, payload: &FetchedPayload, source: &SourceConfig)
        -> Result<Vec<ParsedEntry>>;

    fn kind(&self) -> SourceKind;

    /// Lenient parse: a malformed document yields no entries.
    fn parse(&self, payload: &FetchedPayload, source: &SourceConfig) -> Vec<ParsedEntry> {
        match self.try_parse(payload, source) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding payload from {}: {}", source.id(), e);
                Vec::new()
            }
        }
    }
}

static RSS: RssFeedAdapter = RssFeedAdapter;
static HTML: HtmlScrapeAdapter = HtmlScrapeAdapter;
static JSON_API: JsonApiAdapter = JsonApiAdapter;

pub fn adapter_for(kind: SourceKind) -> &'static dyn SourceAdapter {
    match kind {
        SourceKind::Rss => &RSS,
        SourceKind::HtmlScrape => &HTML,
        SourceKind::JsonApi => &JSON_API,
    }
}

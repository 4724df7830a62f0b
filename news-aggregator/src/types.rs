use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NO_TITLE: &str = "No title";
pub const NO_LINK: &str = "No link";
pub const NO_DATE: &str = "No date";
pub const NO_SUMMARY: &str = "No summary";

/// A single normalized news item, as handed to the report layer.
///
/// Records are only built by the normalizer, so every field is filled
/// (with a sentinel where the upstream had nothing) and `source_id` is
/// never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsRecord {
    pub(crate) title: String,
    pub(crate) url: String,
    pub(crate) published_at: String,
    pub(crate) summary: String,
    pub(crate) source_id: String,
    pub(crate) fetched_at: DateTime<Utc>,
}

impl NewsRecord {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw publication string from the upstream, or `"No date"`.
    pub fn published_at(&self) -> &str {
        &self.published_at
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn has_link(&self) -> bool {
        self.url != NO_LINK
    }

    /// Deduplication key.
    pub fn key(&self) -> (&str, &str) {
        (&self.title, &self.url)
    }
}

/// What an adapter pulls out of one upstream row before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEntry {
    pub title: Option<String>,
    pub url: Option<String>,
    pub published: Option<String>,
    pub summary: Option<String>,
}

impl ParsedEntry {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_published(mut self, published: impl Into<String>) -> Self {
        self.published = Some(published.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    HtmlScrape,
    JsonApi,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::Rss => "rss",
            SourceKind::HtmlScrape => "html_scrape",
            SourceKind::JsonApi => "json_api",
        };
        f.write_str(name)
    }
}

/// Parser parameters, one variant per adapter. The variant tag doubles as
/// the source kind in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParserParams {
    Rss(RssParams),
    HtmlScrape(HtmlParams),
    JsonApi(JsonApiParams),
}

impl ParserParams {
    pub fn kind(&self) -> SourceKind {
        match self {
            ParserParams::Rss(_) => SourceKind::Rss,
            ParserParams::HtmlScrape(_) => SourceKind::HtmlScrape,
            ParserParams::JsonApi(_) => SourceKind::JsonApi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssParams {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for RssParams {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    999
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlParams {
    /// Preferred container; anchors are taken from the first match.
    #[serde(default = "default_container_selector")]
    pub container_selector: String,
    /// Anchor selector, applied inside the container or, when the container
    /// is missing, over the whole document.
    #[serde(default = "default_item_selector")]
    pub item_selector: String,
    /// Overrides the response URL when resolving relative links.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for HtmlParams {
    fn default() -> Self {
        Self {
            container_selector: default_container_selector(),
            item_selector: default_item_selector(),
            base_url: None,
        }
    }
}

fn default_container_selector() -> String {
    "div.temp01".to_string()
}

fn default_item_selector() -> String {
    "li a[href]".to_string()
}

/// Field mapping for vendor JSON payloads. Field names starting with `/`
/// are JSON pointers relative to the item, anything else is a plain key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonApiParams {
    /// JSON pointer to the array of items; empty means the document root.
    #[serde(default)]
    pub items_path: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default = "default_url_field")]
    pub url_field: String,
    #[serde(default = "default_published_field")]
    pub published_field: String,
    #[serde(default = "default_summary_field")]
    pub summary_field: String,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for JsonApiParams {
    fn default() -> Self {
        Self {
            items_path: String::new(),
            title_field: default_title_field(),
            url_field: default_url_field(),
            published_field: default_published_field(),
            summary_field: default_summary_field(),
            max_entries: None,
        }
    }
}

fn default_title_field() -> String {
    "title".to_string()
}

fn default_url_field() -> String {
    "url".to_string()
}

fn default_published_field() -> String {
    "published".to_string()
}

fn default_summary_field() -> String {
    "summary".to_string()
}

/// One configured upstream. Immutable once built; validated when the
/// aggregator is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    id: String,
    endpoint: String,
    parser: ParserParams,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, parser: ParserParams) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            parser,
        }
    }

    pub fn rss(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(id, endpoint, ParserParams::Rss(RssParams::default()))
    }

    pub fn html(id: impl Into<String>, endpoint: impl Into<String>, params: HtmlParams) -> Self {
        Self::new(id, endpoint, ParserParams::HtmlScrape(params))
    }

    pub fn json_api(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        params: JsonApiParams,
    ) -> Self {
        Self::new(id, endpoint, ParserParams::JsonApi(params))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn kind(&self) -> SourceKind {
        self.parser.kind()
    }

    pub fn parser(&self) -> &ParserParams {
        &self.parser
    }
}

/// Classification of a failed request, used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Connect,
    Reset,
    Dns,
    HttpStatus,
    Body,
    DeadlineExceeded,
    Other,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Connect => "connect",
            FetchErrorKind::Reset => "connection reset",
            FetchErrorKind::Dns => "dns",
            FetchErrorKind::HttpStatus => "http status",
            FetchErrorKind::Body => "body",
            FetchErrorKind::DeadlineExceeded => "deadline exceeded",
            FetchErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// One request inside a fetch's retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchAttempt {
    pub source_id: String,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub error_kind: Option<FetchErrorKind>,
    pub http_status: Option<u16>,
    /// Delay slept after this attempt before the next one.
    pub backoff: Option<std::time::Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("transport error for {source_id}: {kind}: {message}")]
    Transport {
        source_id: String,
        kind: FetchErrorKind,
        message: String,
    },

    #[error("HTTP {status} from {source_id}")]
    HttpStatus { source_id: String, status: u16 },

    #[error("malformed payload from {source_id}: {message}")]
    UpstreamFormat { source_id: String, message: String },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AggregatorError {
    pub fn upstream_format(source_id: &str, message: impl Into<String>) -> Self {
        AggregatorError::UpstreamFormat {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    /// Source-level failures are absorbed by the aggregator; everything else
    /// belongs to the caller.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            AggregatorError::Transport { .. }
                | AggregatorError::HttpStatus { .. }
                | AggregatorError::UpstreamFormat { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

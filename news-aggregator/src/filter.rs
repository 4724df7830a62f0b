use crate::normalizer::parse_published;
use crate::types::{AggregatorError, NewsRecord, Result};
use chrono::NaiveDate;
use tracing::debug;

/// Inclusive publication-date window. Either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AggregatorError::Validation(format!(
                    "start date {} is after end date {}",
                    s, e
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Parses optional `YYYY-MM-DD` strings. Empty strings count as absent.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        Self::new(parse_date_arg(start)?, parse_date_arg(end)?)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    /// Records whose date cannot be parsed are kept.
    pub fn contains(&self, record: &NewsRecord) -> bool {
        match parse_published(record.published_at()) {
            Some(published) => {
                let day = published.date_naive();
                self.start.map_or(true, |s| day >= s) && self.end.map_or(true, |e| day <= e)
            }
            None => true,
        }
    }
}

/// Parses a caller-supplied `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        AggregatorError::Validation(format!("invalid date {:?} (expected YYYY-MM-DD): {}", raw, e))
    })
}

fn parse_date_arg(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_date(s).map(Some),
    }
}

/// Caller query: optional title substring plus an optional date window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    text: Option<String>,
    window: DateWindow,
}

impl Query {
    /// Matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn titled(text: impl Into<String>) -> Self {
        Self::default().with_text(text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        self.text = (!trimmed.is_empty()).then(|| trimmed.to_lowercase());
        self
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn window(&self) -> DateWindow {
        self.window
    }

    pub fn is_passthrough(&self) -> bool {
        self.text.is_none() && self.window.is_unbounded()
    }

    pub fn matches(&self, record: &NewsRecord) -> bool {
        title_matches(record, self.text.as_deref()) && self.window.contains(record)
    }

    pub fn apply(&self, records: Vec<NewsRecord>) -> Vec<NewsRecord> {
        if self.is_passthrough() {
            return records;
        }
        let before = records.len();
        let kept: Vec<NewsRecord> = records.into_iter().filter(|r| self.matches(r)).collect();
        debug!(
            "Filter {:?} kept {}/{} records",
            self.text.as_deref().unwrap_or(""),
            kept.len(),
            before
        );
        kept
    }
}

/// Case-insensitive title containment. An empty or absent query matches.
pub fn title_matches(record: &NewsRecord, query: Option<&str>) -> bool {
    match query.map(str::trim) {
        None | Some("") => true,
        Some(q) => record.title().to_lowercase().contains(&q.to_lowercase()),
    }
}

/// Title filter on its own; `filter(records, "")` is the identity.
pub fn filter(records: Vec<NewsRecord>, query: &str) -> Vec<NewsRecord> {
    Query::titled(query).apply(records)
}

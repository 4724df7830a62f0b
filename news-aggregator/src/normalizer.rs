use crate::types::{NewsRecord, ParsedEntry, NO_DATE, NO_LINK, NO_SUMMARY, NO_TITLE};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z!][^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Turns an adapter entry into a record: cleans every field, fills the
/// sentinels, and stamps provenance and fetch time. Pure.
pub fn normalize(entry: ParsedEntry, source_id: &str, fetched_at: DateTime<Utc>) -> NewsRecord {
    let title = entry
        .title
        .as_deref()
        .map(clean_text)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_TITLE.to_string());

    let url = entry
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| NO_LINK.to_string());

    let published_at = entry
        .published
        .as_deref()
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| NO_DATE.to_string());

    let summary = entry
        .summary
        .as_deref()
        .map(|s| clean_text(&strip_tags(s)))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_SUMMARY.to_string());

    NewsRecord {
        title,
        url,
        published_at,
        summary,
        source_id: source_id.to_string(),
        fetched_at,
    }
}

pub fn normalize_all(
    entries: Vec<ParsedEntry>,
    source_id: &str,
    fetched_at: DateTime<Utc>,
) -> Vec<NewsRecord> {
    entries
        .into_iter()
        .map(|entry| normalize(entry, source_id, fetched_at))
        .collect()
}

/// Decode entities once, then collapse whitespace.
fn clean_text(s: &str) -> String {
    collapse_whitespace(&html_escape::decode_html_entities(s))
}

fn strip_tags(s: &str) -> String {
    RE_TAGS.replace_all(s, " ").into_owned()
}

fn collapse_whitespace(s: &str) -> String {
    RE_WS.replace_all(s.trim(), " ").into_owned()
}

/// Best-effort parse of an upstream publication string. `None` for
/// sentinels and anything unrecognised; callers must not depend on it.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NO_DATE {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S", "%Y/%m/%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

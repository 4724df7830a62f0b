//! Headline scraping from list pages.
//!
//! Anchors are taken from the preferred container when the page has one and
//! from the whole document otherwise, so a layout change degrades to a
//! noisier result rather than an empty one.

use crate::fetcher::FetchedPayload;
use crate::sources::SourceAdapter;
use crate::types::{
    AggregatorError, HtmlParams, ParsedEntry, ParserParams, Result, SourceConfig, SourceKind,
};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}(?:\s+\d{1,2}:\d{2}(?::\d{2})?)?|\d{1,2}[-/]\d{1,2}\s+\d{1,2}:\d{2}",
    )
    .unwrap()
});

pub struct HtmlScrapeAdapter;

impl HtmlScrapeAdapter {
    pub fn extract(
        &self,
        html: &str,
        page_url: &str,
        params: &HtmlParams,
    ) -> std::result::Result<Vec<ParsedEntry>, String> {
        let container_selector = Selector::parse(&params.container_selector)
            .map_err(|e| format!("invalid container selector: {}", e))?;
        let item_selector = Selector::parse(&params.item_selector)
            .map_err(|e| format!("invalid item selector: {}", e))?;

        let document = Html::parse_document(html);
        let base = resolve_base(&document, params.base_url.as_deref(), page_url);

        let anchors: Vec<ElementRef> = match document.select(&container_selector).next() {
            Some(container) => container.select(&item_selector).collect(),
            None => {
                debug!(
                    "Container {:?} not found, falling back to document-wide {:?}",
                    params.container_selector, params.item_selector
                );
                document.select(&item_selector).collect()
            }
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for anchor in anchors {
            let raw_text: String = anchor.text().collect();
            let title = raw_text.split_whitespace().collect::<Vec<_>>().join(" ");
            let href = anchor.value().attr("href").unwrap_or("").trim();
            if title.is_empty() || href.is_empty() || is_script_link(href) {
                continue;
            }

            let url = match &base {
                Some(base) => base
                    .join(href)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| href.to_string()),
                None => href.to_string(),
            };

            if !seen.insert((title.clone(), url.clone())) {
                continue;
            }

            let mut entry = ParsedEntry::titled(title).with_url(url);
            entry.published = list_item_date(&anchor, &raw_text);
            entries.push(entry);
        }

        debug!("Extracted {} headlines from {}", entries.len(), page_url);
        Ok(entries)
    }
}

fn is_script_link(href: &str) -> bool {
    href.to_ascii_lowercase().starts_with("javascript")
}

/// `<base href>` wins, then the configured override, then the page URL.
fn resolve_base(document: &Html, configured: Option<&str>, page_url: &str) -> Option<Url> {
    let fallback = configured
        .and_then(|u| Url::parse(u).ok())
        .or_else(|| Url::parse(page_url).ok());

    let declared = Selector::parse("base[href]").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(|href| href.trim().to_string())
    });
    match declared.as_deref() {
        Some(href) => match &fallback {
            Some(page) => page.join(href).ok().or(fallback.clone()),
            None => Url::parse(href).ok(),
        },
        None => fallback,
    }
}

/// A date-looking string in the anchor's list item, outside the anchor text.
fn list_item_date(anchor: &ElementRef, anchor_text: &str) -> Option<String> {
    let item = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "li")?;
    let item_text: String = item.text().collect();
    let rest = item_text.replacen(anchor_text, " ", 1);
    RE_DATE.find(&rest).map(|m| m.as_str().to_string())
}

impl SourceAdapter for HtmlScrapeAdapter {
    fn try_parse(
        &self,
        payload: &FetchedPayload,
        source: &SourceConfig,
    ) -> Result<Vec<ParsedEntry>> {
        let default_params = HtmlParams::default();
        let params = match source.parser() {
            ParserParams::HtmlScrape(params) => params,
            _ => &default_params,
        };
        let page_url = if payload.final_url.is_empty() {
            source.endpoint()
        } else {
            payload.final_url.as_str()
        };
        self.extract(&payload.text, page_url, params)
            .map_err(|message| AggregatorError::upstream_format(source.id(), message))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::HtmlScrape
    }
}

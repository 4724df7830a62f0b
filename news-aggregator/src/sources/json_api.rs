use crate::fetcher::FetchedPayload;
use crate::sources::SourceAdapter;
use crate::types::{
    AggregatorError, JsonApiParams, ParsedEntry, ParserParams, Result, SourceConfig, SourceKind,
};
use serde_json::Value;
use tracing::debug;

/// Maps vendor JSON rows onto the record schema through configured field
/// names.
pub struct JsonApiAdapter;

impl JsonApiAdapter {
    pub fn map_items(
        &self,
        body: &str,
        params: &JsonApiParams,
    ) -> std::result::Result<Vec<ParsedEntry>, String> {
        let document: Value =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;

        let items = document
            .pointer(&params.items_path)
            .ok_or_else(|| format!("no value at {:?}", params.items_path))?
            .as_array()
            .ok_or_else(|| format!("value at {:?} is not an array", params.items_path))?;

        let limit = params.max_entries.unwrap_or(usize::MAX);
        let entries: Vec<ParsedEntry> = items
            .iter()
            .filter(|item| item.is_object())
            .take(limit)
            .map(|item| ParsedEntry {
                title: field(item, &params.title_field),
                url: field(item, &params.url_field),
                published: field(item, &params.published_field),
                summary: field(item, &params.summary_field),
            })
            .collect();

        debug!("Mapped {} JSON items", entries.len());
        Ok(entries)
    }
}

/// Scalars are stringified; objects, arrays and nulls count as absent.
fn field(item: &Value, name: &str) -> Option<String> {
    let value = if name.starts_with('/') {
        item.pointer(name)
    } else {
        item.get(name)
    }?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl SourceAdapter for JsonApiAdapter {
    fn try_parse(
        &self,
        payload: &FetchedPayload,
        source: &SourceConfig,
    ) -> Result<Vec<ParsedEntry>> {
        let default_params = JsonApiParams::default();
        let params = match source.parser() {
            ParserParams::JsonApi(params) => params,
            _ => &default_params,
        };
        self.map_items(&payload.text, params)
            .map_err(|message| AggregatorError::upstream_format(source.id(), message))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::JsonApi
    }
}

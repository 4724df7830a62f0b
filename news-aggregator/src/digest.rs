use crate::types::NewsRecord;
use chrono::NaiveDate;
use std::fmt::Write;

/// Markdown digest of search results, one section per record under a
/// heading naming the query and the window. No records, no digest.
pub fn compose_digest(
    query: &str,
    start: NaiveDate,
    end: NaiveDate,
    records: &[NewsRecord],
) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut digest = format!(
        "## {} News, from {} to {}:\n\n",
        query.trim(),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );
    for record in records {
        // Writing into a String cannot fail.
        let _ = write!(
            digest,
            "### {} (source: {})\n\n{}\n\n",
            record.title(),
            record.source_id(),
            record.summary()
        );
    }
    digest
}

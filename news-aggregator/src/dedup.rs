use crate::types::NewsRecord;
use std::collections::HashSet;
use tracing::{debug, info};

/// Seen-set of (title, url) keys for a single aggregation call.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<(String, String)>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a key is offered.
    pub fn insert(&mut self, title: &str, url: &str) -> bool {
        self.seen.insert((title.to_string(), url.to_string()))
    }

    /// Keeps the first record for every key, in input order. Returns the
    /// survivors and how many were dropped.
    pub fn dedup(records: Vec<NewsRecord>) -> (Vec<NewsRecord>, usize) {
        let total = records.len();
        let mut seen = Self::new();
        let unique: Vec<NewsRecord> = records
            .into_iter()
            .filter(|record| {
                let (title, url) = record.key();
                let fresh = seen.insert(title, url);
                if !fresh {
                    debug!(
                        "Removing duplicate record: {} ({}) from {}",
                        title,
                        url,
                        record.source_id()
                    );
                }
                fresh
            })
            .collect();

        let removed = total - unique.len();
        if removed > 0 {
            info!("Removed {} duplicate records", removed);
        }
        (unique, removed)
    }
}

use crate::config::{AggregatorConfig, MAX_DEADLINE_SECONDS};
use crate::dedup::Deduplicator;
use crate::fetcher::Fetcher;
use crate::filter::Query;
use crate::normalizer::normalize_all;
use crate::sources::adapter_for;
use crate::types::{AggregatorError, FetchAttempt, NewsRecord, Result, SourceConfig, SourceKind};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Source of `fetched_at` stamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug)]
pub enum SourceStatus {
    Ok,
    Failed(AggregatorError),
    /// Still outstanding when the call's deadline passed.
    TimedOut,
}

/// What one source contributed to a call.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source_id: String,
    pub kind: SourceKind,
    pub records: usize,
    pub status: SourceStatus,
    pub attempts: Vec<FetchAttempt>,
}

impl SourceOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, SourceStatus::Ok)
    }
}

#[derive(Debug)]
pub struct AggregationReport {
    pub records: Vec<NewsRecord>,
    pub sources: Vec<SourceOutcome>,
    pub duplicates_removed: usize,
}

/// Fans a fixed set of sources out through the fetcher and adapters and
/// merges what comes back. Holds no state between calls.
pub struct Aggregator {
    fetcher: Fetcher,
    sources: Vec<SourceConfig>,
    max_concurrency: usize,
    deadline: Duration,
    clock: Clock,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(&config)?;
        Self::with_fetcher(config, fetcher)
    }

    /// Builds an aggregator on an existing fetcher, sharing its connection
    /// pool.
    pub fn with_fetcher(config: AggregatorConfig, fetcher: Fetcher) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fetcher,
            max_concurrency: config.max_concurrency,
            deadline: config.deadline(),
            sources: config.sources,
            clock: Arc::new(Utc::now),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn aggregate(&self, query: &Query) -> Vec<NewsRecord> {
        self.aggregate_report(query).await.records
    }

    /// Runs one aggregation call. Source failures and timeouts show up in
    /// the per-source outcomes; they never fail the call.
    pub async fn aggregate_report(&self, query: &Query) -> AggregationReport {
        let call_id = Uuid::new_v4();
        let span = info_span!("aggregate", %call_id, sources = self.sources.len());
        self.run(query).instrument(span).await
    }

    async fn run(&self, query: &Query) -> AggregationReport {
        let now = Instant::now();
        let deadline = now
            .checked_add(self.deadline)
            .unwrap_or_else(|| now + Duration::from_secs(MAX_DEADLINE_SECONDS));
        info!(
            "Aggregating {} sources (concurrency {}, deadline {:?})",
            self.sources.len(),
            self.max_concurrency,
            self.deadline
        );

        // Sources start as soon as a slot frees up; the index restores the
        // configured order for the merge.
        let mut results: Vec<(usize, (Vec<NewsRecord>, SourceOutcome))> =
            stream::iter(self.sources.iter().enumerate())
                .map(|(index, source)| async move {
                    (index, self.collect_with_deadline(source, deadline).await)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut merged = Vec::new();
        let mut outcomes = Vec::with_capacity(results.len());
        for (_, (records, outcome)) in results {
            merged.extend(records);
            outcomes.push(outcome);
        }

        let (unique, duplicates_removed) = Deduplicator::dedup(merged);
        let records = query.apply(unique);

        let healthy = outcomes.iter().filter(|o| o.is_ok()).count();
        info!(
            "Aggregated {} records from {}/{} sources ({} duplicates removed)",
            records.len(),
            healthy,
            outcomes.len(),
            duplicates_removed
        );

        AggregationReport {
            records,
            sources: outcomes,
            duplicates_removed,
        }
    }

    async fn collect_with_deadline(
        &self,
        source: &SourceConfig,
        deadline: Instant,
    ) -> (Vec<NewsRecord>, SourceOutcome) {
        match timeout_at(deadline, self.collect_source(source, deadline)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Source {} timed out; contributing no records", source.id());
                (
                    Vec::new(),
                    SourceOutcome {
                        source_id: source.id().to_string(),
                        kind: source.kind(),
                        records: 0,
                        status: SourceStatus::TimedOut,
                        attempts: Vec::new(),
                    },
                )
            }
        }
    }

    async fn collect_source(
        &self,
        source: &SourceConfig,
        deadline: Instant,
    ) -> (Vec<NewsRecord>, SourceOutcome) {
        let fetch = self
            .fetcher
            .fetch(source.id(), source.endpoint(), Some(deadline))
            .await;

        let parsed = fetch.result.and_then(|payload| {
            let adapter = adapter_for(source.kind());
            adapter.try_parse(&payload, source)
        });

        let (records, status) = match parsed {
            Ok(entries) => {
                let records = normalize_all(entries, source.id(), (self.clock)());
                info!("Source {} produced {} records", source.id(), records.len());
                (records, SourceStatus::Ok)
            }
            Err(e) => {
                if e.is_source_failure() {
                    warn!("Source {} failed, contributing no records: {}", source.id(), e);
                } else {
                    error!("Source {} hit a local error: {}", source.id(), e);
                }
                (Vec::new(), SourceStatus::Failed(e))
            }
        };

        let outcome = SourceOutcome {
            source_id: source.id().to_string(),
            kind: source.kind(),
            records: records.len(),
            status,
            attempts: fetch.attempts,
        };
        (records, outcome)
    }
}

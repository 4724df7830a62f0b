pub mod types;
pub mod config;
pub mod encoding;
pub mod fetcher;
pub mod sources;
pub mod normalizer;
pub mod dedup;
pub mod filter;
pub mod aggregator;
pub mod digest;
pub mod api;

pub use types::*;
pub use config::{presets, AggregatorConfig, RetryPolicy};
pub use fetcher::{FetchOutcome, FetchedPayload, Fetcher, HttpTransport, ReqwestTransport};
pub use sources::{adapter_for, SourceAdapter};
pub use dedup::Deduplicator;
pub use filter::{filter, DateWindow, Query};
pub use aggregator::{AggregationReport, Aggregator, Clock, SourceOutcome, SourceStatus};
pub use api::ReportFeeds;

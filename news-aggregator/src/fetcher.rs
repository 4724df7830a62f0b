use crate::config::{AggregatorConfig, RetryPolicy};
use crate::encoding;
use crate::types::{AggregatorError, AttemptOutcome, FetchAttempt, FetchErrorKind, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use encoding_rs::Encoding;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A response as seen by the retry loop, before any status interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// URL after redirects.
    pub final_url: String,
    pub body: Vec<u8>,
}

/// A request that never produced a response.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One HTTP GET. Implementations must be safe to share across concurrent
/// fetches.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<RawResponse, TransportFailure>;
}

/// `HttpTransport` over a single pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &AggregatorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| AggregatorError::Configuration(format!("building HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> std::result::Result<RawResponse, TransportFailure> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(RawResponse {
            status,
            content_type,
            final_url,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportFailure {
    let message = error_chain(&err);
    let lowered = message.to_ascii_lowercase();

    let kind = if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if is_reset(&err) {
        FetchErrorKind::Reset
    } else if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
        FetchErrorKind::Dns
    } else if err.is_connect() {
        FetchErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        FetchErrorKind::Body
    } else {
        FetchErrorKind::Other
    };

    TransportFailure { kind, message }
}

fn is_reset(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

/// A successfully fetched and decoded payload.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub bytes: Vec<u8>,
    pub text: String,
    pub encoding: &'static Encoding,
    pub status: u16,
    pub final_url: String,
}

impl FetchedPayload {
    /// Builds a payload from an already decoded string, for feeding adapters
    /// directly.
    pub fn from_text(text: impl Into<String>, url: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            bytes: text.as_bytes().to_vec(),
            text,
            encoding: encoding_rs::UTF_8,
            status: 200,
            final_url: url.into(),
        }
    }
}

/// The result of one fetch together with every attempt it took.
#[derive(Debug)]
pub struct FetchOutcome {
    pub attempts: Vec<FetchAttempt>,
    pub result: Result<FetchedPayload>,
}

/// Retrying HTTP fetcher. Cloning shares the underlying transport and its
/// connection pool.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(config: &AggregatorConfig) -> Result<Self> {
        config.retry.validate()?;
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::with_transport(Arc::new(transport), config.retry.clone()))
    }

    pub fn with_transport(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetches `url`, retrying transient failures per the policy. No attempt
    /// or backoff sleep is started past `deadline`.
    pub async fn fetch(
        &self,
        source_id: &str,
        url: &str,
        deadline: Option<Instant>,
    ) -> FetchOutcome {
        let mut attempts: Vec<FetchAttempt> = Vec::new();
        let mut schedule = self.policy.backoff();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        debug!("Fetching {} for source {}", url, source_id);

        for attempt_number in 1..=max_attempts {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return FetchOutcome {
                    attempts,
                    result: Err(deadline_error(source_id)),
                };
            }

            let failure = match self.transport.get(url).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    attempts.push(attempt(
                        source_id,
                        attempt_number,
                        AttemptOutcome::Success,
                        None,
                        Some(response.status),
                    ));
                    let (text, encoding) =
                        encoding::decode(response.content_type.as_deref(), &response.body);
                    info!(
                        "Fetched {} for source {} ({} bytes, {}, attempt {})",
                        url,
                        source_id,
                        response.body.len(),
                        encoding.name(),
                        attempt_number
                    );
                    return FetchOutcome {
                        attempts,
                        result: Ok(FetchedPayload {
                            bytes: response.body,
                            text,
                            encoding,
                            status: response.status,
                            final_url: response.final_url,
                        }),
                    };
                }
                Ok(response) if self.policy.is_retryable_status(response.status) => {
                    attempts.push(attempt(
                        source_id,
                        attempt_number,
                        AttemptOutcome::TransientFailure,
                        Some(FetchErrorKind::HttpStatus),
                        Some(response.status),
                    ));
                    AggregatorError::Transport {
                        source_id: source_id.to_string(),
                        kind: FetchErrorKind::HttpStatus,
                        message: format!("HTTP {}", response.status),
                    }
                }
                Ok(response) => {
                    attempts.push(attempt(
                        source_id,
                        attempt_number,
                        AttemptOutcome::PermanentFailure,
                        Some(FetchErrorKind::HttpStatus),
                        Some(response.status),
                    ));
                    warn!(
                        "Source {} returned HTTP {} for {}, not retrying",
                        source_id, response.status, url
                    );
                    return FetchOutcome {
                        attempts,
                        result: Err(AggregatorError::HttpStatus {
                            source_id: source_id.to_string(),
                            status: response.status,
                        }),
                    };
                }
                Err(failure) => {
                    let retryable = self.policy.is_retryable_error(failure.kind);
                    let outcome = if retryable {
                        AttemptOutcome::TransientFailure
                    } else {
                        AttemptOutcome::PermanentFailure
                    };
                    attempts.push(attempt(
                        source_id,
                        attempt_number,
                        outcome,
                        Some(failure.kind),
                        None,
                    ));
                    let error = AggregatorError::Transport {
                        source_id: source_id.to_string(),
                        kind: failure.kind,
                        message: failure.message,
                    };
                    if !retryable {
                        warn!(
                            "Permanent failure fetching {} for source {}: {}",
                            url, source_id, error
                        );
                        return FetchOutcome {
                            attempts,
                            result: Err(error),
                        };
                    }
                    error
                }
            };

            if attempt_number == max_attempts {
                last_error = Some(failure);
                break;
            }

            let delay = schedule
                .next_backoff()
                .unwrap_or_else(|| Duration::from_millis(self.policy.backoff_max_ms));
            let retry_at = Instant::now().checked_add(delay);
            if deadline.is_some_and(|d| retry_at.map_or(true, |t| t >= d)) {
                warn!(
                    "Attempt {} failed for {} ({}); next retry would start past the deadline",
                    attempt_number, url, failure
                );
                return FetchOutcome {
                    attempts,
                    result: Err(deadline_error(source_id)),
                };
            }

            warn!(
                "Attempt {} failed for {} ({}), retrying in {:?}",
                attempt_number, url, failure, delay
            );
            if let Some(last) = attempts.last_mut() {
                last.backoff = Some(delay);
            }
            last_error = Some(failure);
            tokio::time::sleep(delay).await;
        }

        let error = last_error.unwrap_or_else(|| AggregatorError::Transport {
            source_id: source_id.to_string(),
            kind: FetchErrorKind::Other,
            message: "no attempt made".to_string(),
        });
        warn!(
            "Failed to fetch {} for source {} after {} attempts: {}",
            url,
            source_id,
            attempts.len(),
            error
        );
        FetchOutcome {
            attempts,
            result: Err(error),
        }
    }
}

fn attempt(
    source_id: &str,
    attempt_number: u32,
    outcome: AttemptOutcome,
    error_kind: Option<FetchErrorKind>,
    http_status: Option<u16>,
) -> FetchAttempt {
    FetchAttempt {
        source_id: source_id.to_string(),
        attempt_number,
        outcome,
        error_kind,
        http_status,
        backoff: None,
    }
}

fn deadline_error(source_id: &str) -> AggregatorError {
    AggregatorError::Transport {
        source_id: source_id.to_string(),
        kind: FetchErrorKind::DeadlineExceeded,
        message: "aggregation deadline reached".to_string(),
    }
}

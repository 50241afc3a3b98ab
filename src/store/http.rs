use super::{CircuitBreaker, ViewCountStore};
use crate::error::{ViewCountError, ViewCountResult};
use crate::metrics::StoreMetrics;
use crate::types::ContentId;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const INCREMENTS_ENDPOINT: &str = "/view-counts/increments";
const COUNTS_ENDPOINT: &str = "/view-counts";

#[derive(Debug, Serialize)]
struct IncrementRequest {
    increments: Vec<Increment>,
}

#[derive(Debug, Serialize)]
struct Increment {
    id: u64,
    delta: u64,
}

#[derive(Debug, Deserialize)]
struct IncrementResponse {
    /// Absent means the whole batch committed
    #[serde(default)]
    committed: Option<Vec<u64>>,
}

#[derive(Debug, Deserialize)]
struct CountsResponse {
    #[serde(default)]
    counts: HashMap<u64, u64>,
}

/// Settings for [`HttpViewCountStore`].
#[derive(Debug, Clone)]
pub struct HttpStoreOptions {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub auth_credentials: Option<(String, String)>,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for HttpStoreOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            auth_credentials: None,
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Durable store reached over HTTP.
///
/// Reads retry transient failures. Additive writes are sent exactly once per
/// call: a retried increment whose first attempt actually committed would be
/// counted twice, so failed writes are left for the next flush cycle instead.
pub struct HttpViewCountStore {
    client: Client,
    base_url: String,
    options: HttpStoreOptions,
    breaker: CircuitBreaker,
    metrics: Arc<StoreMetrics>,
}

impl HttpViewCountStore {
    pub fn new(
        base_url: impl Into<String>,
        options: HttpStoreOptions,
        metrics: Arc<StoreMetrics>,
    ) -> ViewCountResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| ViewCountError::InvalidArgument(format!("Invalid store URL: {}", e)))?;

        let client = Client::builder()
            .timeout(options.request_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ViewCountError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        let breaker = CircuitBreaker::new(options.breaker_threshold, options.breaker_cooldown)
            .with_metrics(Arc::clone(&metrics));

        Ok(Self {
            client,
            base_url,
            options,
            breaker,
            metrics,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn auth_header(&self) -> Option<String> {
        self.options
            .auth_credentials
            .as_ref()
            .map(|(username, password)| {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                format!("Basic {}", encoded)
            })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_header() {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }

    async fn check_response(response: reqwest::Response) -> ViewCountResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ViewCountError::StoreError(format!("Authentication failed: {}", message))
            }
            _ => ViewCountError::ApiError {
                status: status.as_u16(),
                message,
            },
        })
    }

    /// Run a read with retries for transient failures.
    async fn execute_with_retry<F, Fut>(&self, endpoint: &str, operation: F) -> ViewCountResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let mut attempt = 0;
        loop {
            let result = match operation().await {
                Ok(response) => Self::check_response(response).await,
                Err(e) => Err(e.into()),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.options.max_retries => {
                    attempt += 1;
                    self.metrics.record_retry(endpoint, attempt);
                    warn!(endpoint, attempt, error = %e, "Retrying store read");
                    sleep(self.options.retry_delay * attempt).await;
                }
                other => return other,
            }
        }
    }

    fn guard_circuit(&self, endpoint: &str) -> ViewCountResult<()> {
        if self.breaker.can_execute() {
            Ok(())
        } else {
            self.metrics.record_failure(endpoint, "circuit open");
            Err(ViewCountError::NetworkError(
                "durable store circuit breaker is open".to_string(),
            ))
        }
    }

    fn finish<T>(&self, endpoint: &str, start: Instant, result: &ViewCountResult<T>) {
        match result {
            Ok(_) => {
                self.breaker.record_success();
                self.metrics.record_success(endpoint, start.elapsed());
            }
            Err(e) => {
                if e.is_transient() || matches!(e, ViewCountError::ApiError { status: 500.., .. }) {
                    self.breaker.record_failure();
                }
                self.metrics.record_failure(endpoint, &e.to_string());
            }
        }
    }
}

/// Ids of `deltas` the store reports as committed in a 2xx `body`.
///
/// An empty body, a body without `committed`, or one that does not parse all
/// mean the whole batch committed. Unknown ids in `committed` are ignored.
fn committed_ids(deltas: &[(ContentId, u64)], body: &str) -> Vec<ContentId> {
    let all = || deltas.iter().map(|(id, _)| *id).collect::<Vec<_>>();
    if body.trim().is_empty() {
        return all();
    }
    match serde_json::from_str::<IncrementResponse>(body) {
        Ok(IncrementResponse {
            committed: Some(committed),
        }) => {
            let sent: HashMap<u64, ContentId> =
                deltas.iter().map(|(id, _)| (id.get(), *id)).collect();
            committed
                .into_iter()
                .filter_map(|raw| sent.get(&raw).copied())
                .collect()
        }
        Ok(IncrementResponse { committed: None }) => all(),
        Err(e) => {
            warn!(
                error = %e,
                ids = deltas.len(),
                "Unreadable increment response after success status, treating batch as committed"
            );
            all()
        }
    }
}

#[async_trait]
impl ViewCountStore for HttpViewCountStore {
    #[instrument(skip(self, deltas), fields(ids = deltas.len()))]
    async fn add_view_counts(&self, deltas: &[(ContentId, u64)]) -> ViewCountResult<Vec<ContentId>> {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        self.guard_circuit(INCREMENTS_ENDPOINT)?;
        self.metrics.record_request(INCREMENTS_ENDPOINT);
        let start = Instant::now();

        let body = IncrementRequest {
            increments: deltas
                .iter()
                .map(|(id, delta)| Increment {
                    id: id.get(),
                    delta: *delta,
                })
                .collect(),
        };
        let url = format!("{}{}", self.base_url, INCREMENTS_ENDPOINT);

        let result = async {
            let response = self
                .request(self.client.post(&url))
                .json(&body)
                .send()
                .await?;
            let response = Self::check_response(response).await?;
            // A 2xx means the store applied the batch; the body only narrows it
            let text = response.text().await.unwrap_or_default();
            Ok::<_, ViewCountError>(committed_ids(deltas, &text))
        }
        .await;

        self.finish(INCREMENTS_ENDPOINT, start, &result);
        if let Ok(committed) = &result {
            debug!(sent = deltas.len(), committed = committed.len(), "store increments applied");
        }
        result
    }

    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    async fn view_counts(&self, ids: &[ContentId]) -> ViewCountResult<HashMap<ContentId, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.guard_circuit(COUNTS_ENDPOINT)?;
        self.metrics.record_request(COUNTS_ENDPOINT);
        let start = Instant::now();

        let url = format!("{}{}", self.base_url, COUNTS_ENDPOINT);
        let query = ids
            .iter()
            .map(|id| id.get().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let result = async {
            let response = self
                .execute_with_retry(COUNTS_ENDPOINT, || {
                    self.request(self.client.get(&url))
                        .query(&[("ids", query.as_str())])
                        .send()
                })
                .await?;
            let parsed: CountsResponse = response.json().await?;
            Ok::<_, ViewCountError>(parsed
                .counts
                .into_iter()
                .filter_map(|(raw, count)| ContentId::new(raw).ok().map(|id| (id, count)))
                .collect())
        }
        .await;

        self.finish(COUNTS_ENDPOINT, start, &result);
        result
    }
}

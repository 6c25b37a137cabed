use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

/// Settings shared by every request a client makes.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Absolute deadline per request, including retries and backoff.
    pub request_timeout: Duration,
    /// Extra attempts after the first; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Backoff before retry `k` is `backoff_unit * k`.
    pub backoff_unit: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff_unit: Duration::from_secs(1),
            user_agent: concat!("orthostream/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub stream_path: String,
    pub chunk_path: String,
    pub chunk_size: u32,
    /// Upper bound on pages fetched in pull mode.
    pub max_chunks: u32,
    pub total_estimate: Option<u64>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            stream_path: "api/search/stream".to_string(),
            chunk_path: "api/search/chunk".to_string(),
            chunk_size: 50,
            max_chunks: 20,
            total_estimate: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TreeSettings {
    /// Path template; `{id}` is replaced by the tree identifier.
    pub preview_path: String,
    pub latency_budget: Duration,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            preview_path: "api/tree/{id}/preview".to_string(),
            latency_budget: Duration::from_millis(50),
        }
    }
}

/// Per-call adjustments to a request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

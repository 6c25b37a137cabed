use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use orthostream_logging::{ortho_info, ortho_warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::{ByteStream, ReqwestTransport, Transport};
use crate::{ClientSettings, RequestError, RequestOptions};

/// Cancellation and deadline shared by every await point of one request.
///
/// The caller's token ends the request at any time. The deadline ends it
/// with [`RequestError::Timeout`] unless it has been disarmed.
#[derive(Debug, Clone)]
pub struct RequestScope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    budget: Duration,
}

impl RequestScope {
    pub fn new(cancel: CancellationToken, budget: Duration) -> Self {
        Self {
            cancel,
            // A budget beyond the clock's range is no deadline at all.
            deadline: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    /// Stop enforcing the deadline; cancellation still applies.
    pub fn disarm_deadline(&mut self) {
        self.deadline = None;
    }

    /// Run `fut` until it finishes, the token is cancelled, or the deadline passes.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, RequestError> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RequestError::Cancelled),
            _ = deadline => Err(RequestError::Timeout { after: self.budget }),
            output = fut => Ok(output),
        }
    }
}

/// An accepted streaming response, ready to be decoded.
pub struct OpenedStream {
    pub url: Url,
    pub body: ByteStream,
    pub scope: RequestScope,
}

enum Delivery {
    Body(Vec<u8>),
    Stream(ByteStream),
}

/// Executes requests with an absolute deadline, bounded retries and cancellation.
///
/// Retries apply to connection failures and 5xx responses only. Any 4xx,
/// a timeout or a cancellation surfaces at once.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    settings: ClientSettings,
    base_url: Url,
}

impl RequestExecutor {
    pub fn new(settings: ClientSettings) -> Result<Self, RequestError> {
        let transport = Arc::new(ReqwestTransport::new(&settings)?);
        Self::with_transport(settings, transport)
    }

    pub fn with_transport(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RequestError> {
        let base_url = parse_base_url(&settings.base_url)?;
        Ok(Self {
            transport,
            settings,
            base_url,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Resolve `endpoint` against the base url. Absolute urls are used as given.
    pub fn resolve(&self, endpoint: &str, query: &[(String, String)]) -> Result<Url, RequestError> {
        let mut url = self
            .base_url
            .join(endpoint)
            .map_err(|err| RequestError::InvalidUrl(format!("{endpoint}: {err}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET `endpoint` and return its JSON body.
    pub async fn execute(&self, endpoint: &str, options: RequestOptions) -> Result<Value, RequestError> {
        self.execute_as(endpoint, options).await
    }

    /// GET `endpoint` and deserialize its JSON body.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let url = self.resolve(endpoint, &options.query)?;
        let scope = self.scope(&options);
        let retries = options.max_retries.unwrap_or(self.settings.max_retries);

        match self.run(&url, &scope, retries, true).await? {
            Delivery::Body(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| RequestError::Protocol(format!("{url}: {err}"))),
            Delivery::Stream(_) => Err(RequestError::Protocol(format!(
                "{url}: expected a complete body"
            ))),
        }
    }

    /// GET `endpoint` and hand back the unread body for incremental decoding.
    ///
    /// Retries cover establishing the response only. Once bytes flow, a
    /// failure ends the stream and the caller has to reopen it.
    pub async fn open(&self, endpoint: &str, options: RequestOptions) -> Result<OpenedStream, RequestError> {
        let url = self.resolve(endpoint, &options.query)?;
        let scope = self.scope(&options);
        let retries = options.max_retries.unwrap_or(self.settings.max_retries);

        match self.run(&url, &scope, retries, false).await? {
            Delivery::Stream(body) => Ok(OpenedStream { url, body, scope }),
            Delivery::Body(_) => Err(RequestError::Protocol(format!("{url}: expected a stream"))),
        }
    }

    fn scope(&self, options: &RequestOptions) -> RequestScope {
        // A child token: closing one request must not cancel the caller's other work.
        RequestScope::new(
            options
                .cancel
                .as_ref()
                .map(CancellationToken::child_token)
                .unwrap_or_default(),
            options.timeout.unwrap_or(self.settings.request_timeout),
        )
    }

    async fn run(
        &self,
        url: &Url,
        scope: &RequestScope,
        max_retries: u32,
        collect: bool,
    ) -> Result<Delivery, RequestError> {
        let attempts = max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.attempt(url, scope, collect).await {
                Ok(delivery) => {
                    ortho_info!("GET {} attempt {}/{} -> ok", url, attempt, attempts);
                    return Ok(delivery);
                }
                Err(err) => {
                    let retry = err.is_retryable() && attempt < attempts;
                    ortho_warn!(
                        "GET {} attempt {}/{} -> {}{}",
                        url,
                        attempt,
                        attempts,
                        err,
                        if retry { ", retrying" } else { "" }
                    );
                    if !retry {
                        return Err(err);
                    }
                    scope
                        .guard(tokio::time::sleep(backoff(self.settings.backoff_unit, attempt)))
                        .await?;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        scope: &RequestScope,
        collect: bool,
    ) -> Result<Delivery, RequestError> {
        let response = scope.guard(self.transport.get(url)).await??;
        if !(200..300).contains(&response.status) {
            return Err(RequestError::Http {
                status: response.status,
            });
        }
        if !collect {
            return Ok(Delivery::Stream(response.body));
        }
        let bytes = scope.guard(read_to_end(response.body)).await??;
        Ok(Delivery::Body(bytes))
    }
}

/// Linear backoff before retry `attempt`. Saturates so the deadline cuts it short.
fn backoff(unit: Duration, attempt: u32) -> Duration {
    unit.checked_mul(attempt).unwrap_or(Duration::MAX)
}

async fn read_to_end(mut body: ByteStream) -> Result<Vec<u8>, RequestError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(bytes)
}

fn parse_base_url(raw: &str) -> Result<Url, RequestError> {
    // Without a trailing slash `join` would replace the last path segment.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|err| RequestError::InvalidUrl(format!("{raw}: {err}")))
}

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use url::Url;

use crate::{ClientSettings, RequestError};

/// Response body as a stream of byte fragments of arbitrary size.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RequestError>> + Send>>;

/// Headers have arrived; the body has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// One HTTP GET. Implementations report status codes, not status errors;
/// classification and retries belong to the executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<TransportResponse, RequestError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(settings: &ClientSettings) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse, RequestError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}

// The client carries no overall timeout; the executor owns the deadline, so
// a reqwest timeout here can only be a connect timeout.
fn map_reqwest_error(err: reqwest::Error) -> RequestError {
    if err.is_builder() {
        return RequestError::InvalidUrl(err.to_string());
    }
    RequestError::Network(err.to_string())
}

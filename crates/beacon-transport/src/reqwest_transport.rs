//! Real HTTP transport using `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::http::{HeaderList, HttpResponse, Transport};

const USER_AGENT: &str = concat!("beacon/", env!("CARGO_PKG_VERSION"));

/// Gateway statuses meaning the backend itself never saw the request.
const UNAVAILABLE: [u16; 3] = [502, 503, 504];

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        headers: &HeaderList,
    ) -> Result<HttpResponse, TransportError> {
        let request = headers
            .iter()
            .fold(request, |req, (name, value)| req.header(name, value));

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "request failed");
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        if UNAVAILABLE.contains(&status) {
            warn!(status, "backend unavailable");
            return Err(TransportError::Unavailable { status });
        }

        let body = response.text().await.map_err(TransportError::from)?;
        debug!(status, bytes = body.len(), "response received");
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderList,
        body: String,
    ) -> Result<HttpResponse, TransportError> {
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.execute(request, headers).await
    }

    async fn get(&self, url: &str, headers: &HeaderList) -> Result<HttpResponse, TransportError> {
        self.execute(self.client.get(url), headers).await
    }

    async fn delete(
        &self,
        url: &str,
        headers: &HeaderList,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(self.client.delete(url), headers).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! The transport seam.
//!
//! Everything that talks to the collection service goes through
//! [`Transport`]. The production implementation is
//! [`crate::ReqwestTransport`]; tests script responses with
//! [`crate::mock::MockTransport`].

use std::fmt;

use async_trait::async_trait;

use crate::errors::TransportError;

/// Request headers as ordered name/value pairs.
pub type HeaderList = Vec<(String, String)>;

/// HTTP method used by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// DELETE.
    Delete,
}

impl Method {
    /// Uppercase method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response that arrived, whatever its status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Build a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client used by the authentication manager and dispatch engine.
///
/// A returned `Ok` means a response arrived; status interpretation is left
/// to the codec. `Err` means no usable response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body.
    async fn post(
        &self,
        url: &str,
        headers: &HeaderList,
        body: String,
    ) -> Result<HttpResponse, TransportError>;

    /// GET a resource.
    async fn get(&self, url: &str, headers: &HeaderList) -> Result<HttpResponse, TransportError>;

    /// DELETE a resource.
    async fn delete(
        &self,
        url: &str,
        headers: &HeaderList,
    ) -> Result<HttpResponse, TransportError>;

    /// Dispatch on `method`. The body is ignored for GET and DELETE.
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderList,
        body: String,
    ) -> Result<HttpResponse, TransportError> {
        match method {
            Method::Post => self.post(url, headers, body).await,
            Method::Get => self.get(url, headers).await,
            Method::Delete => self.delete(url, headers).await,
        }
    }
}

/// Append percent-encoded query parameters to `url`.
pub fn with_query(url: &str, params: &[(&str, &str)]) -> Result<String, TransportError> {
    let parsed = reqwest::Url::parse_with_params(url, params)
        .map_err(|e| TransportError::InvalidRequest(format!("{url}: {e}")))?;
    Ok(parsed.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(301, "").is_success());
        assert!(!HttpResponse::new(401, "").is_success());
    }

    #[test]
    fn query_is_encoded() {
        let url = with_query(
            "https://collect.example.com/v1/storage",
            &[("name", "high score"), ("scope", "user")],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://collect.example.com/v1/storage?name=high+score&scope=user"
        );
    }

    #[test]
    fn query_rejects_relative_url() {
        assert!(with_query("storage", &[("name", "x")]).is_err());
    }

    #[test]
    fn method_names() {
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }
}

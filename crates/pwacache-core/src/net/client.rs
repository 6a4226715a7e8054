//! Fetch seam used by the cache manager.
//!
//! `HttpNetwork` performs live requests with `reqwest` and tags each
//! response with its fetch-style type relative to the configured origin.

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::models::{Request, Response, ResponseType};

use super::NetworkError;

/// Abstraction over the network for testability.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a live fetch. An `Err` means no response was obtained at all;
    /// HTTP error statuses come back as `Ok`.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Network backed by `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    /// Create a network for pages served from `origin`.
    pub fn new(origin: Url) -> Result<Self, NetworkError> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, origin))
    }

    /// Create a network sharing an existing connection pool.
    pub fn with_client(client: Client, origin: Url) -> Self {
        Self { client, origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Same-origin means identical scheme, host and port.
    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn classify(&self, url: &Url) -> ResponseType {
        if self.is_same_origin(url) {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    NetworkError::Offline(e.to_string())
                } else {
                    NetworkError::Http(e)
                }
            })?;

        // Classify by the final URL so a redirect off-origin is not treated as basic
        let response_type = self.classify(response.url());
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!(url = %request.url, status = status, kind = ?response_type, bytes = body.len(), "Fetched from network");

        Ok(Response {
            status,
            headers,
            body,
            response_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(origin: &str) -> HttpNetwork {
        HttpNetwork::with_client(
            Client::new(),
            Url::parse(origin).expect("test origin should parse"),
        )
    }

    fn url(s: &str) -> Url {
        Url::parse(s).expect("test URL should parse")
    }

    #[test]
    fn test_same_origin_classification() {
        let net = network("http://localhost:3000");

        // Same origin
        assert_eq!(net.classify(&url("http://localhost:3000/")), ResponseType::Basic);
        assert_eq!(net.classify(&url("http://localhost:3000/static/js/bundle.js?v=2")), ResponseType::Basic);

        // Different port, scheme or host
        assert_eq!(net.classify(&url("http://localhost:8080/")), ResponseType::Cors);
        assert_eq!(net.classify(&url("https://localhost:3000/")), ResponseType::Cors);
        assert_eq!(net.classify(&url("http://cdn.example.com/app.js")), ResponseType::Cors);
    }

    #[test]
    fn test_default_port_is_same_origin() {
        let net = network("https://example.com");
        assert_eq!(net.classify(&url("https://example.com:443/index.html")), ResponseType::Basic);
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_an_error() {
        // Port 9 (discard) on localhost is not expected to accept HTTP connections
        let net = network("http://127.0.0.1:9");
        let result = net.fetch(&Request::get(url("http://127.0.0.1:9/"))).await;
        assert!(result.is_err_and(|e| e.is_offline()));
    }
}

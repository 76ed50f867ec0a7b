use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};

/**
    Header set sent with a request.

    Ordered so that serializing it (relay payloads, cached secrets) always
    yields the same key order.
*/
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("request cancelled")]
    Cancelled,
}

/// Status, headers and fully read body of a response.
#[derive(Debug)]
pub struct Response {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(HttpError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }
}

/**
    Shared HTTP client for every component.

    Built once from [`Config`]: certificate verification is relaxed, the
    optional upstream proxy applies to all requests, and every request is
    bounded by the configured timeout. Cloning is cheap and clones share the
    same cancellation token.
*/
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    cancel: CancellationToken,
    debug: bool,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout());

        if let Some(proxy_url) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Config(format!("invalid proxy URL '{proxy_url}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner,
            cancel: CancellationToken::new(),
            debug: config.debug,
        })
    }

    /// Replace the cancellation token observed by every request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.execute(Method::GET, url, headers, None).await
    }

    pub async fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: Vec<u8>,
    ) -> Result<Response, HttpError> {
        self.execute(Method::POST, url, headers, Some(body)).await
    }

    /**
        Send a request and read the whole body. Any status is returned as a
        response; use [`Response::error_for_status`] to reject non-2xx.
    */
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        body: Option<Vec<u8>>,
    ) -> Result<Response, HttpError> {
        if self.cancel.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        let mut request = self.inner.request(method.clone(), url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let transport = |source| HttpError::Transport {
            url: url.to_string(),
            source,
        };

        let exchange = async {
            let response = request.send().await.map_err(transport)?;
            let status = response.status();
            let response_headers = response.headers().clone();
            let body = response.bytes().await.map_err(transport)?;
            Ok::<_, HttpError>(Response {
                url: url.to_string(),
                status,
                headers: response_headers,
                body: body.to_vec(),
            })
        };

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(HttpError::Cancelled),
            response = exchange => response?,
        };

        tracing::debug!(%method, url, status = %response.status, "http exchange");
        if self.debug {
            tracing::debug!(url, body = %response.text(), "response body");
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_proxy_is_config_error() {
        let config = Config {
            proxy: Some("::not a url::".to_string()),
            ..Config::default()
        };
        assert!(matches!(HttpClient::new(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn cancelled_client_refuses_requests() {
        let client = HttpClient::new(&Config::default()).unwrap();
        client.cancellation().cancel();
        let err = client
            .get("https://example.invalid/", &Headers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Cancelled));
    }

    #[test]
    fn non_success_status_is_error() {
        let response = Response {
            url: "https://example.invalid/".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        assert!(matches!(
            response.error_for_status(),
            Err(HttpError::Status { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }
}

//! HTTP transport for streaming requests.
//!
//! This module provides reqwest client construction, URL and header
//! assembly, and the [`HttpTransport`] used by default.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::client::{ByteStream, StreamError, Transport};
use crate::model::StreamRequest;
use crate::options::TransportOptions;

/// Build a configured HTTP client from transport options.
///
/// This applies common configuration like timeouts and proxies.
pub fn build_http_client(options: &TransportOptions) -> Result<Client, StreamError> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(timeout) = options.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| StreamError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Resolve an endpoint against the base URL. Absolute endpoints are used as-is.
///
/// # Example
/// ```
/// use tutor_stream::http::endpoint_url;
///
/// let url = endpoint_url("https://example.com/api/v1/", "/user/chat").unwrap();
/// assert_eq!(url, "https://example.com/api/v1/user/chat");
/// ```
pub fn endpoint_url(base_url: &str, endpoint: &str) -> Result<String, StreamError> {
    if endpoint.trim().is_empty() {
        return Err(StreamError::Config("endpoint must not be empty".to_string()));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.to_string());
    }
    Ok(format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    ))
}

/// Assemble the headers for one streaming request.
///
/// Later layers override earlier ones: defaults, then the bearer token, then
/// configured extra headers, then the request's own headers.
pub fn build_headers(
    request: &StreamRequest,
    extra_headers: &Option<HashMap<String, String>>,
) -> Result<HeaderMap, StreamError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    if let Some(token) = &request.token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| {
                StreamError::Config("token contains invalid header characters".to_string())
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if let Some(extra) = extra_headers {
        add_headers(&mut headers, extra)?;
    }
    add_headers(&mut headers, &request.headers)?;

    Ok(headers)
}

fn add_headers(
    headers: &mut HeaderMap,
    source: &HashMap<String, String>,
) -> Result<(), StreamError> {
    for (key, value) in source {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| StreamError::Config(format!("invalid header name {:?}", key)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| StreamError::Config(format!("invalid value for header {:?}", key)))?;
        headers.insert(name, value);
    }
    Ok(())
}

/// Streams responses to `POST` requests over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    options: TransportOptions,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Result<Self, StreamError> {
        let client = build_http_client(&options)?;
        Ok(Self { client, options })
    }

    /// Use an existing reqwest client; its own timeouts and proxy apply.
    pub fn with_client(client: Client, options: TransportOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
        let url = endpoint_url(&self.options.base_url, &request.endpoint)?;
        let headers = build_headers(request, &self.options.extra_headers)?;

        debug!(url = %url, "opening event stream");
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Status { status, body });
        }
        if status == StatusCode::NO_CONTENT {
            return Err(StreamError::ResourceUnavailable(format!(
                "{} answered {} without a body",
                url, status
            )));
        }

        Ok(Box::pin(response.bytes_stream().map_err(StreamError::from)))
    }
}

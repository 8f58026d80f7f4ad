//! Transport configuration for the stream ingestor.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::StreamError;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://wishchain.muxi.org.cn/api/v1";

const ENV_BASE_URL: &str = "TUTOR_STREAM_BASE_URL";
const ENV_TIMEOUT_SECS: &str = "TUTOR_STREAM_TIMEOUT_SECS";
const ENV_PROXY: &str = "TUTOR_STREAM_PROXY";

/// A secret string type for bearer tokens.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Process-wide transport settings, shared read-only by every stream.
///
/// No timeout is set by default: a stalled server stream waits until the
/// caller cancels or the connection itself fails.
///
/// # Example
/// ```rust
/// use tutor_stream::options::TransportOptions;
/// use std::time::Duration;
///
/// let options = TransportOptions::new("http://localhost:8080/api/v1")
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_header("X-Client".to_string(), "tutor".to_string());
/// assert_eq!(options.base_url, "http://localhost:8080/api/v1");
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Base URL that relative endpoints are resolved against
    pub base_url: String,

    /// Bound on the whole request, body included
    pub timeout: Option<Duration>,

    /// Bound on connection setup only
    pub connect_timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in every request
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl TransportOptions {
    /// Create options for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            connect_timeout: None,
            proxy: None,
            extra_headers: None,
        }
    }

    /// Load options from `TUTOR_STREAM_*` environment variables.
    ///
    /// Unset variables fall back to defaults; a timeout that is not a whole
    /// number of seconds is a configuration error.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StreamError> {
        let mut options = match lookup(ENV_BASE_URL) {
            Some(base_url) => Self::new(base_url),
            None => Self::default(),
        };

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                StreamError::Config(format!(
                    "{} must be a number of seconds, got {:?}",
                    ENV_TIMEOUT_SECS, raw
                ))
            })?;
            options.timeout = Some(Duration::from_secs(secs));
        }

        options.proxy = lookup(ENV_PROXY);
        Ok(options)
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set extra headers.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }
}

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

use crate::config::ClientConfig;
use crate::error::NmdcError;

/// Fixed per-request timeout; callers cannot override it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything outside the RFC 3986 unreserved set is escaped.
pub const COMPONENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');
/// Filter values keep `/` literal, matching what the API has always been sent.
pub const FILTER_SET: &AsciiSet = &COMPONENT_SET.remove(b'/');
/// Projection lists keep their separating commas.
pub const PROJECTION_SET: &AsciiSet = &COMPONENT_SET.remove(b',');
/// Record ids such as `nmdc:bsm-11-x5xj6p33` keep their prefix colon.
pub const PATH_SET: &AsciiSet = &COMPONENT_SET.remove(b':');

/// Status and body of a completed HTTP exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One blocking GET. Implementations must not retry: a transport failure is
/// reported as [`NmdcError::Network`] and any completed response is returned
/// as-is so the caller can judge its status.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, NmdcError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &T {
    fn get(&self, url: &str) -> Result<HttpResponse, NmdcError> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, NmdcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("nmdc-client/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NmdcError::InvalidArgument(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| NmdcError::Network {
                url: config.base_url(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, NmdcError> {
        tracing::debug!(url, "GET");
        let response = self.client.get(url).send().map_err(|err| NmdcError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| NmdcError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        tracing::debug!(url, status, bytes = body.len(), "response");
        Ok(HttpResponse { status, body })
    }
}

/// Percent-encode `value` as UTF-8, escaping every byte in `set`.
pub fn encode_component(value: &str, set: &'static AsciiSet) -> String {
    utf8_percent_encode(value, set).to_string()
}

/// Join `base` with already-encoded query parameters.
pub fn build_query_url(base: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let mut out = String::from(base);
    out.push('?');
    for (idx, (key, value)) in params.iter().enumerate() {
        if idx > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

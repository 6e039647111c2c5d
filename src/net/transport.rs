//! HTTP transport abstraction.
//!
//! The fetch engine talks to the network only through [`Transport`], so the
//! retry/backoff policy can wrap any client (a real `reqwest` one here, a
//! scripted one in tests) the same way.

use crate::error::TransportError;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// What came back from one HTTP exchange, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, if present and in seconds.
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// Trait for a single HTTP GET.
pub trait Transport {
    /// Fetch `url`, routed through `proxy` when one is given.
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<RawResponse, TransportError>;
}

/// Parse a `Retry-After` value given in delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// `reqwest`-backed transport with one client per proxy endpoint.
#[derive(Debug)]
pub struct ReqwestTransport {
    direct: Client,
    via_proxy: HashMap<String, Client>,
}

impl ReqwestTransport {
    /// Build clients for a direct connection and for each proxy.
    ///
    /// Proxies that `reqwest` rejects are logged and left out; check
    /// [`ReqwestTransport::usable_proxies`] before building a rotator.
    pub fn new(proxies: &[String], timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let headers = default_headers(user_agent)?;
        let direct = Client::builder()
            .timeout(timeout)
            .default_headers(headers.clone())
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut via_proxy = HashMap::new();
        for endpoint in proxies {
            let client = Proxy::all(endpoint.as_str()).and_then(|proxy| {
                Client::builder()
                    .timeout(timeout)
                    .default_headers(headers.clone())
                    .proxy(proxy)
                    .build()
            });
            match client {
                Ok(client) => {
                    via_proxy.insert(endpoint.clone(), client);
                }
                Err(e) => warn!(proxy = %endpoint, error = %e, "Skipping unusable proxy"),
            }
        }
        Ok(Self { direct, via_proxy })
    }

    /// Proxies that got a working client, in configuration order.
    pub fn usable_proxies(&self, configured: &[String]) -> Vec<String> {
        configured
            .iter()
            .filter(|p| self.via_proxy.contains_key(p.as_str()))
            .cloned()
            .collect()
    }
}

/// Browser-like headers sent with every request.
fn default_headers(user_agent: &str) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    let agent = HeaderValue::from_str(user_agent).map_err(|e| TransportError::Malformed(e.to_string()))?;
    headers.insert(header::USER_AGENT, agent);
    Ok(headers)
}

/// A failure while the body is still arriving is a dropped connection, not
/// a bad payload: `text()` decodes invalid UTF-8 lossily.
fn body_read_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(e.to_string())
    }
}

impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<RawResponse, TransportError> {
        let client = match proxy {
            None => &self.direct,
            Some(p) => self.via_proxy.get(p).ok_or_else(|| TransportError::Proxy {
                proxy: p.to_string(),
                reason: "no client configured".to_string(),
            })?,
        };

        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.map_err(body_read_error)?;
        debug!(status, bytes = body.len(), "Received response");

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

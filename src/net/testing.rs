//! Scripted [`Transport`] for exercising the engine and coordinator offline.

use crate::error::TransportError;
use crate::net::transport::{RawResponse, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};

pub fn ok(body: &str) -> RawResponse {
    RawResponse {
        status: 200,
        retry_after: None,
        body: body.to_string(),
    }
}

pub fn status(code: u16) -> RawResponse {
    RawResponse {
        status: code,
        retry_after: None,
        body: String::new(),
    }
}

impl RawResponse {
    pub fn retry_after(mut self, d: Duration) -> Self {
        self.retry_after = Some(d);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub proxy: Option<String>,
    pub at: Instant,
}

/// Replays per-URL responses in order. URLs without a script (or whose
/// script ran out) answer `200` with a page registered via
/// [`ScriptedTransport::page`], or an empty document.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawResponse, TransportError>>>>,
    pages: HashMap<String, String>,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn script(self, url: &str, responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    pub fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.url == url).count()
    }

    pub fn proxies_used(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().iter().map(|c| c.proxy.clone()).collect()
    }
}

impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, proxy: Option<&str>) -> Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            proxy: proxy.map(str::to_owned),
            at: Instant::now(),
        });
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(response) => response,
            None => Ok(ok(self.pages.get(url).map(String::as_str).unwrap_or("<html></html>"))),
        }
    }
}

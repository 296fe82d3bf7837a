//! Scripted transport for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::transport::{FetchRequest, FetchResponse, HttpTransport};
use crate::error::FetchError;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(u16, String),
    TransportError,
}

impl Reply {
    pub(crate) fn json(value: serde_json::Value) -> Self {
        Reply::Status(200, value.to_string())
    }

    pub(crate) fn status(status: u16) -> Self {
        Reply::Status(status, String::new())
    }

    pub(crate) fn status_body(status: u16, body: &str) -> Self {
        Reply::Status(status, body.to_string())
    }

    pub(crate) fn transport_error() -> Self {
        Reply::TransportError
    }
}

struct Route {
    needles: Vec<String>,
    /// Replies are consumed in order; the last one repeats.
    replies: VecDeque<Reply>,
}

/// Routes requests by substrings of `"{METHOD} {url} {form}"`, records when
/// each call arrived and how many were in flight at once.
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn route(self, needles: &[&str], reply: Reply) -> Self {
        self.route_sequence(needles, vec![reply])
    }

    pub(crate) fn route_sequence(self, needles: &[&str], replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().push(Route {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            replies: replies.into(),
        });
        self
    }

    pub(crate) fn calls_to(&self, needle: &str) -> usize {
        self.call_instants(needle).len()
    }

    pub(crate) fn call_instants(&self, needle: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(sig, _)| sig.contains(needle))
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn signature(request: &FetchRequest) -> String {
        let form = request
            .form
            .as_ref()
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&")
            })
            .unwrap_or_default();
        format!("{} {} {}", request.method, request.url, form)
    }

    fn next_reply(&self, signature: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .find(|r| r.needles.iter().all(|n| signature.contains(n.as_str())));
        match route {
            Some(route) if route.replies.len() > 1 => route.replies.pop_front().unwrap(),
            Some(route) => route
                .replies
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::status(404)),
            None => Reply::status_body(404, "no scripted route"),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &FetchRequest,
        _timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let signature = Self::signature(request);
        self.calls
            .lock()
            .unwrap()
            .push((signature.clone(), Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_reply(&signature) {
            Reply::Status(status, body) => Ok(FetchResponse { status, body }),
            Reply::TransportError => Err(FetchError::Transport("connection reset".into())),
        }
    }
}

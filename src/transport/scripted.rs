//! In-memory transport driven by a per-endpoint script.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::{HeaderMap, StatusCode};

use crate::transport::{
    Connection, Exchange, ExchangeResponse, Phase, Transport, TransportError,
};

/// What the next exchange against an endpoint does.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(u16),
    Respond(u16, &'static str),
    /// Respond after the given delay, touching the activity clock only at the end.
    Delayed(Duration, u16),
    /// Fail before the response with "socket hang up".
    HangUp,
    /// Start the response, then cut it off.
    Abort,
    /// Never complete.
    Hang,
    /// Start the response, then never complete.
    HangMidResponse,
    /// Fail the connect.
    Refuse,
}

#[derive(Debug, Default)]
struct Script {
    /// Consumed by the next exchange against any endpoint.
    any: VecDeque<Step>,
    steps: HashMap<String, VecDeque<Step>>,
    paths: HashMap<String, Vec<String>>,
}

#[derive(Debug)]
struct Shared {
    script: Mutex<Script>,
    fallback: Step,
    connects: AtomicUsize,
}

impl Shared {
    fn next(&self, key: &str) -> Step {
        let mut script = self.script.lock().unwrap();
        if let Some(step) = script.any.pop_front() {
            return step;
        }
        script
            .steps
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn peek_refuse(&self, key: &str) -> bool {
        let mut script = self.script.lock().unwrap();
        match script.steps.get_mut(key) {
            Some(queue) if matches!(queue.front(), Some(Step::Refuse)) => {
                queue.pop_front();
                true
            }
            Some(queue) if queue.is_empty() => matches!(self.fallback, Step::Refuse),
            None => matches!(self.fallback, Step::Refuse),
            Some(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub(crate) fn with_default(fallback: Step) -> Self {
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(Script::default()),
                fallback,
                connects: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn push(&self, key: &str, step: Step) {
        let mut script = self.shared.script.lock().unwrap();
        script.steps.entry(key.to_string()).or_default().push_back(step);
    }

    pub(crate) fn push_any(&self, step: Step) {
        self.shared.script.lock().unwrap().any.push_back(step);
    }

    /// Connect calls so far, refused ones included.
    pub(crate) fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Paths of every exchange started against `key`.
    pub(crate) fn paths(&self, key: &str) -> Vec<String> {
        let script = self.shared.script.lock().unwrap();
        script.paths.get(key).cloned().unwrap_or_default()
    }

    /// Keys that saw at least one exchange, with their exchange counts.
    pub(crate) fn exchange_counts(&self) -> HashMap<String, usize> {
        let script = self.shared.script.lock().unwrap();
        script.paths.iter().map(|(key, paths)| (key.clone(), paths.len())).collect()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::with_default(Step::Status(200))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}:{}", host, port);
        if self.shared.peek_refuse(&key) {
            return Err(TransportError::other("connection refused", format!("connect {}: refused", key)));
        }
        Ok(Box::new(ScriptedConnection {
            key,
            shared: self.shared.clone(),
            usable: true,
        }))
    }
}

struct ScriptedConnection {
    key: String,
    shared: Arc<Shared>,
    usable: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn exchange(&mut self, request: Exchange) -> Result<ExchangeResponse, TransportError> {
        {
            let mut script = self.shared.script.lock().unwrap();
            script.paths.entry(self.key.clone()).or_default().push(request.path.clone());
        }
        let activity = request.activity;
        activity.advance(Phase::RequestWrite);
        activity.advance(Phase::RequestEnd);

        let step = match self.shared.next(&self.key) {
            Step::Refuse => Step::HangUp,
            step => step,
        };
        let (status, body) = match step {
            Step::Status(status) => (status, ""),
            Step::Respond(status, body) => (status, body),
            Step::Delayed(delay, status) => {
                tokio::time::sleep(delay).await;
                (status, "")
            }
            Step::HangUp | Step::Refuse => {
                self.usable = false;
                return Err(TransportError::hang_up("socket hang up"));
            }
            Step::Abort => {
                activity.advance(Phase::ResponseStart);
                self.usable = false;
                return Err(TransportError::aborted("aborted"));
            }
            Step::Hang => std::future::pending().await,
            Step::HangMidResponse => {
                activity.advance(Phase::ResponseStart);
                std::future::pending().await
            }
        };

        activity.advance(Phase::ResponseStart);
        activity.advance(Phase::ResponseRead);
        Ok(ExchangeResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        })
    }

    fn is_usable(&self) -> bool {
        self.usable
    }
}

//! A single backend endpoint.
//!
//! # Responsibilities
//! - Account every request as pending until it succeeds, fails or is filtered
//! - Track health and start the pinger on failure
//! - Sweep in-flight requests for idle timeouts and recompute the request rate
//! - Own the endpoint's idle connections and concurrent connection budget
//!
//! # Data Flow
//! ```text
//! Endpoint::request
//!     → register (request_count += 1, in-flight record)
//!     → acquire socket permit
//!     → idle connection (keep-alive) or Transport::connect
//!     → Connection::exchange ── raced against the timeout sweep's abort
//!     → release connection to the tracker
//!     → classify exactly once: success | failure | filtered
//! ```
//!
//! # Design Decisions
//! - Counters live behind one mutex, never held across an await
//! - Request ids come from their own counter, so a rebase never reuses one
//! - The in-flight guard classifies a dropped request as a failure without
//!   touching health

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::PoolConfig;
use crate::health::pinger::Pinger;
use crate::health::state::HealthState;
use crate::lifecycle::Shutdown;
use crate::load_balancer::error::{AttemptInfo, Reason, RequestError};
use crate::load_balancer::request::{Method, RequestOptions, Response};
use crate::load_balancer::stats::EndpointStats;
use crate::net::{ConnectionTracker, TrackedConnection};
use crate::observability::events::{EventEmitter, PoolEvent};
use crate::transport::{
    Activity, Exchange, ExchangeBody, ExchangeResponse, Phase, Transport, TransportError,
};

/// Per-endpoint settings derived from the pool configuration.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub timeout: Duration,
    pub resolution: Duration,
    pub ping_path: Option<String>,
    pub ping_timeout: Duration,
    pub ping_backoff_base: Duration,
    pub ping_backoff_max: Duration,
    pub keep_alive: bool,
    pub max_sockets: usize,
    pub max_requests_per_connection: u64,
    pub counter_ceiling: u64,
}

impl From<&PoolConfig> for EndpointSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            timeout: config.timeout(),
            resolution: config.resolution(),
            ping_path: config.ping.clone(),
            ping_timeout: config.ping_timeout(),
            ping_backoff_base: config.ping_backoff_base(),
            ping_backoff_max: config.ping_backoff_max(),
            keep_alive: config.keep_alive,
            max_sockets: config.max_sockets.max(1),
            max_requests_per_connection: config.max_requests_per_connection,
            counter_ceiling: config.counter_ceiling.max(1),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// The two stand-in endpoints selection returns when no real one can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Overloaded,
    Unhealthy,
}

impl Sentinel {
    fn host(&self) -> &'static str {
        match self {
            Sentinel::Overloaded => "overloaded",
            Sentinel::Unhealthy => "unhealthy",
        }
    }
}

/// Load counters of one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub request_count: u64,
    pub requests_last_check: u64,
    pub request_rate: u64,
    pub pending: u64,
    pub successes: u64,
    pub failures: u64,
    pub filtered: u64,
}

impl Counters {
    /// Recompute `pending` and rebase once the ceiling is reached.
    fn settle(&mut self, ceiling: u64) {
        let completed = self.successes + self.failures + self.filtered;
        self.pending = self.request_count.saturating_sub(completed);
        if self.request_count >= ceiling {
            self.rebase();
        }
    }

    /// Shrink the counters without changing `pending` or the requests
    /// counted since the last tick.
    fn rebase(&mut self) {
        let since_check = self.request_count.wrapping_sub(self.requests_last_check);
        self.successes = 0;
        self.failures = 0;
        self.filtered = 0;
        self.request_count = self.pending;
        self.requests_last_check = self.request_count.wrapping_sub(since_check);
    }

    fn tick(&mut self, ceiling: u64) {
        self.request_rate = self.request_count.wrapping_sub(self.requests_last_check);
        self.requests_last_check = self.request_count;
        if self.request_count >= ceiling {
            self.rebase();
        }
    }
}

struct InFlight {
    method: Method,
    path: String,
    timeout: Duration,
    activity: Activity,
    abort: Arc<Notify>,
    timed_out: Arc<AtomicBool>,
    connection_exchanges: Option<u64>,
}

struct EndpointState {
    health: HealthState,
    counters: Counters,
    next_id: u64,
    requests: HashMap<u64, InFlight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Filtered,
    Cancelled,
}

/// Classifies its request exactly once, even when the request future is dropped.
struct InFlightGuard<'a> {
    endpoint: &'a Endpoint,
    id: u64,
    done: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(endpoint: &'a Endpoint, id: u64) -> Self {
        Self { endpoint, id, done: false }
    }

    fn finish(mut self, outcome: Outcome) {
        self.done = true;
        self.endpoint.complete(self.id, outcome);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.endpoint.complete(self.id, Outcome::Cancelled);
        }
    }
}

/// Timed-out request picked up by the sweep.
struct Expired {
    method: Method,
    path: String,
    phase: Phase,
    idle: Duration,
    abort: Arc<Notify>,
}

/// One backend server.
pub struct Endpoint {
    host: String,
    port: u16,
    name: String,
    sentinel: Option<Sentinel>,
    settings: EndpointSettings,
    transport: Arc<dyn Transport>,
    events: EventEmitter,
    state: Mutex<EndpointState>,
    connections: ConnectionTracker,
    sockets: Semaphore,
    pinger: Pinger,
    shutdown: Shutdown,
    closed: AtomicBool,
    self_ref: Weak<Endpoint>,
}

impl Endpoint {
    /// Create an endpoint and start its timeout sweep.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        settings: EndpointSettings,
        transport: Arc<dyn Transport>,
        events: EventEmitter,
    ) -> Arc<Self> {
        let host = host.into();
        let endpoint = Arc::new_cyclic(|weak| {
            Self::build(host, port, None, settings, transport, events, weak.clone())
        });
        endpoint.start_sweep();
        endpoint
    }

    /// Create a permanently unhealthy stand-in that fails every request.
    pub(crate) fn sentinel(
        kind: Sentinel,
        settings: EndpointSettings,
        transport: Arc<dyn Transport>,
        events: EventEmitter,
    ) -> Arc<Self> {
        let settings = EndpointSettings { ping_path: None, ..settings };
        Arc::new_cyclic(|weak| {
            Self::build(kind.host().to_string(), 0, Some(kind), settings, transport, events, weak.clone())
        })
    }

    fn build(
        host: String,
        port: u16,
        sentinel: Option<Sentinel>,
        settings: EndpointSettings,
        transport: Arc<dyn Transport>,
        events: EventEmitter,
        self_ref: Weak<Endpoint>,
    ) -> Self {
        let health = if sentinel.is_some() {
            HealthState::Unhealthy
        } else {
            HealthState::Healthy
        };
        Self {
            name: format!("{}:{}", host, port),
            host,
            port,
            sentinel,
            connections: ConnectionTracker::new(settings.max_requests_per_connection),
            sockets: Semaphore::new(settings.max_sockets.max(1)),
            pinger: Pinger::new(&settings),
            settings,
            transport,
            events,
            state: Mutex::new(EndpointState {
                health,
                counters: Counters::default(),
                next_id: 0,
                requests: HashMap::new(),
            }),
            shutdown: Shutdown::new(),
            closed: AtomicBool::new(false),
            self_ref,
        }
    }

    /// `host:port`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn sentinel_kind(&self) -> Option<Sentinel> {
        self.sentinel
    }

    pub fn is_healthy(&self) -> bool {
        self.lock_state().health.is_healthy()
    }

    pub fn pending(&self) -> u64 {
        self.lock_state().counters.pending
    }

    /// Requests started during the last resolution window.
    pub fn request_rate(&self) -> u64 {
        self.lock_state().counters.request_rate
    }

    pub fn request_count(&self) -> u64 {
        self.lock_state().counters.request_count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pinger(&self) -> &Pinger {
        &self.pinger
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run `task` until it finishes or the endpoint closes.
    pub(crate) fn until_closed<F>(&self, task: F) -> impl Future<Output = Option<F::Output>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        self.shutdown.bind(task)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EndpointState> {
        self.state.lock().expect("endpoint state mutex poisoned")
    }

    fn connection_key(&self) -> String {
        ConnectionTracker::build_key(&self.host, self.port, None)
    }

    /// True when the endpoint can take a request without queuing.
    ///
    /// With keep-alive that means more idle connections than pending
    /// requests; without it, nothing pending at all.
    pub fn ready(&self) -> bool {
        let pending = {
            let state = self.lock_state();
            if !state.health.is_healthy() {
                return false;
            }
            state.counters.pending
        };
        if self.settings.keep_alive {
            self.connections.idle_count(&self.connection_key()) as u64 > pending
        } else {
            pending == 0
        }
    }

    /// Change health, publishing one event per real change.
    ///
    /// Endpoints without a ping path stay healthy. Turning unhealthy starts
    /// the pinger.
    pub fn set_healthy(&self, healthy: bool) {
        self.apply_health(healthy, false);
    }

    /// A probe succeeded: the pinger goes idle and the endpoint healthy in
    /// one step.
    pub(crate) fn probe_succeeded(&self) {
        self.apply_health(true, true);
    }

    fn apply_health(&self, healthy: bool, from_probe: bool) {
        if self.sentinel.is_some() || self.settings.ping_path.is_none() {
            return;
        }

        // Health and the pinger's running flag change together under the
        // state lock, so an unhealthy endpoint always has a pinger.
        let spawn_pinger = {
            let mut state = self.lock_state();
            if from_probe {
                self.pinger.finish();
            }
            if state.health.transition(healthy).is_some() {
                if healthy {
                    tracing::info!(endpoint = %self.name, "Endpoint recovered");
                } else {
                    tracing::warn!(endpoint = %self.name, "Endpoint marked unhealthy");
                }
                self.events.emit(PoolEvent::Health {
                    endpoint: self.name.clone(),
                    healthy,
                });
            }
            !state.health.is_healthy() && !self.is_closed() && self.pinger.claim()
        };

        if spawn_pinger {
            self.pinger.spawn(self.self_ref.clone());
        }
    }

    /// Point-in-time snapshot of counters, health and connections.
    pub fn stats(&self) -> EndpointStats {
        let state = self.lock_state();
        let mut connection_exchange_counts = self.connections.exchange_counts();
        connection_exchange_counts.extend(
            state.requests.values().filter_map(|request| request.connection_exchanges),
        );
        EndpointStats {
            name: self.name.clone(),
            request_count: state.counters.request_count,
            request_rate: state.counters.request_rate,
            pending: state.counters.pending,
            successes: state.counters.successes,
            failures: state.counters.failures,
            filtered: state.counters.filtered,
            healthy: state.health.is_healthy(),
            connection_exchange_counts,
        }
    }

    /// Perform one attempt of a request on this endpoint.
    ///
    /// Sentinels fail immediately with `full` or `unhealthy`.
    pub async fn request(
        &self,
        options: &RequestOptions,
        body: ExchangeBody,
    ) -> Result<Response, RequestError> {
        let timeout = options.timeout.unwrap_or(self.settings.timeout);
        if let Some(kind) = self.sentinel {
            let (reason, message) = match kind {
                Sentinel::Overloaded => (Reason::Full, "too many pending requests"),
                Sentinel::Unhealthy => (Reason::Unhealthy, "no healthy endpoints"),
            };
            return Err(RequestError::new(reason, message).with_attempt(self.attempt_info(options, timeout, None)));
        }

        let activity = Activity::new();
        let abort = Arc::new(Notify::new());
        let timed_out = Arc::new(AtomicBool::new(false));
        let id = self.register(InFlight {
            method: options.method,
            path: options.path.clone(),
            timeout,
            activity: activity.clone(),
            abort: abort.clone(),
            timed_out: timed_out.clone(),
            connection_exchanges: None,
        });
        let guard = InFlightGuard::new(self, id);

        let result = tokio::select! {
            result = self.perform(id, options, body, &activity) => result,
            _ = abort.notified() => Err(TransportError::aborted("aborted by timeout sweep")),
        };
        let elapsed = activity.elapsed();

        let failure = match result {
            Ok((exchange, exchanges)) => {
                let response = Response::from_exchange(
                    exchange,
                    options.encoding,
                    self.name.clone(),
                    exchanges,
                    elapsed,
                )
                .with_latency(activity.latency());
                let rejection = options.retry_filter.as_ref().and_then(|filter| filter(&response));
                match rejection {
                    None => {
                        guard.finish(Outcome::Success);
                        return Ok(response);
                    }
                    Some(detail) => {
                        guard.finish(Outcome::Filtered);
                        tracing::debug!(endpoint = %self.name, path = %options.path, detail = %detail, "Response rejected by retry filter");
                        RequestError::new(
                            Reason::Filter,
                            format!("{} error: response rejected: {}", self.name, detail),
                        )
                    }
                }
            }
            Err(_) if timed_out.load(Ordering::Acquire) => {
                guard.finish(Outcome::Failure);
                let what = if activity.phase().response_started() {
                    "response timed out"
                } else {
                    "request timed out"
                };
                RequestError::new(Reason::Aborted, format!("{} error: {}", self.name, what))
            }
            Err(e) => {
                guard.finish(Outcome::Failure);
                tracing::debug!(endpoint = %self.name, path = %options.path, error = %e, "Request attempt failed");
                RequestError::new(Reason::from(&e.kind), format!("{} error: {}", self.name, e.message))
            }
        };

        Err(failure.with_attempt(self.attempt_info(options, timeout, Some(&activity))))
    }

    async fn perform(
        &self,
        id: u64,
        options: &RequestOptions,
        body: ExchangeBody,
        activity: &Activity,
    ) -> Result<(ExchangeResponse, u64), TransportError> {
        activity.advance(Phase::Connecting);
        let _permit = self
            .sockets
            .acquire()
            .await
            .map_err(|_| TransportError::other("closed", format!("{} is closed", self.name)))?;

        let key = self.connection_key();
        let idle = if self.settings.keep_alive {
            self.connections.acquire(&key)
        } else {
            None
        };
        let mut conn = match idle {
            Some(conn) => conn,
            None => TrackedConnection::new(self.transport.connect(&self.host, self.port).await?),
        };
        activity.touch();
        self.note_connection(id, conn.exchanges());

        let exchange = Exchange {
            host: self.host.clone(),
            port: self.port,
            method: options.method,
            path: options.path.clone(),
            headers: options.headers.clone(),
            body,
            activity: activity.clone(),
        };
        let response = conn.connection().exchange(exchange).await?;

        let exchanges = conn.exchanges() + 1;
        if self.settings.keep_alive && !self.is_closed() {
            self.connections.release(&key, conn);
        }
        Ok((response, exchanges))
    }

    fn register(&self, request: InFlight) -> u64 {
        let mut state = self.lock_state();
        state.next_id += 1;
        let id = state.next_id;
        state.requests.insert(id, request);
        state.counters.request_count += 1;
        state.counters.settle(self.settings.counter_ceiling);
        id
    }

    fn note_connection(&self, id: u64, exchanges: u64) {
        let mut state = self.lock_state();
        if let Some(request) = state.requests.get_mut(&id) {
            request.connection_exchanges = Some(exchanges);
        }
    }

    fn complete(&self, id: u64, outcome: Outcome) {
        {
            let mut state = self.lock_state();
            if state.requests.remove(&id).is_none() {
                return;
            }
            match outcome {
                Outcome::Success => state.counters.successes += 1,
                Outcome::Failure | Outcome::Cancelled => state.counters.failures += 1,
                Outcome::Filtered => state.counters.filtered += 1,
            }
            state.counters.settle(self.settings.counter_ceiling);
        }

        if outcome == Outcome::Failure {
            self.set_healthy(false);
        }
    }

    fn attempt_info(
        &self,
        options: &RequestOptions,
        timeout: Duration,
        activity: Option<&Activity>,
    ) -> AttemptInfo {
        let (phase, elapsed, latency) = match activity {
            Some(activity) => (activity.phase(), activity.elapsed(), activity.latency()),
            None => (Phase::Init, Duration::ZERO, Duration::ZERO),
        };
        AttemptInfo {
            endpoint: self.stats(),
            method: options.method,
            path: options.path.clone(),
            timeout,
            retry_delay: options.retry_delay.unwrap_or_default(),
            phase,
            elapsed,
            latency,
        }
    }

    fn start_sweep(&self) {
        let resolution = self.settings.resolution;
        if resolution.is_zero() {
            return;
        }
        let weak = self.self_ref.clone();

        tokio::spawn(self.until_closed(async move {
            let mut ticker = time::interval_at(Instant::now() + resolution, resolution);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(endpoint) => endpoint.sweep(),
                    None => break,
                }
            }
        }));
    }

    /// Abort idle in-flight requests and recompute the request rate.
    pub(crate) fn sweep(&self) {
        let expired = {
            let mut state = self.lock_state();
            let mut expired = Vec::new();
            for request in state.requests.values() {
                if request.timeout.is_zero() || request.timed_out.load(Ordering::Acquire) {
                    continue;
                }
                let idle = request.activity.idle();
                if idle >= request.timeout {
                    request.timed_out.store(true, Ordering::Release);
                    expired.push(Expired {
                        method: request.method,
                        path: request.path.clone(),
                        phase: request.activity.phase(),
                        idle,
                        abort: request.abort.clone(),
                    });
                }
            }
            state.counters.tick(self.settings.counter_ceiling);
            expired
        };

        for request in expired {
            if self.settings.ping_path.as_deref() != Some(request.path.as_str()) {
                tracing::warn!(
                    endpoint = %self.name,
                    method = %request.method,
                    path = %request.path,
                    phase = request.phase.as_str(),
                    idle_ms = request.idle.as_millis() as u64,
                    "Request timed out"
                );
                self.events.emit(PoolEvent::Timeout {
                    endpoint: self.name.clone(),
                    method: request.method,
                    path: request.path,
                    phase: request.phase,
                    idle: request.idle,
                });
            }
            request.abort.notify_one();
        }
    }

    /// Stop background tasks and destroy idle connections.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.trigger();
        self.sockets.close();
        self.connections.clear();
        tracing::debug!(endpoint = %self.name, "Endpoint closed");
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> Counters {
        self.lock_state().counters
    }

    /// Pretend `count` requests are in flight.
    #[cfg(test)]
    pub(crate) fn simulate_pending(&self, count: u64) {
        let mut state = self.lock_state();
        state.counters.request_count += count;
        state.counters.settle(self.settings.counter_ceiling);
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("sentinel", &self.sentinel)
            .field("closed", &self.is_closed())
            .finish()
    }
}

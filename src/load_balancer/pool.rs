//! Endpoint pool.
//!
//! # Responsibilities
//! - Own the membership and the two sentinel endpoints
//! - Select an endpoint per attempt
//! - Run logical requests through a `RequestSet` and publish their outcome
//! - Aggregate endpoint statistics

use std::sync::{Arc, RwLock};

use rand::Rng;
use tokio::sync::broadcast;

use crate::config::PoolConfig;
use crate::load_balancer::endpoint::{Endpoint, EndpointSettings, Sentinel};
use crate::load_balancer::error::{PoolError, RequestError};
use crate::load_balancer::membership::{canonical_key, Membership};
use crate::load_balancer::request::{Method, RequestBody, RequestOptions, Response, RetryFilter};
use crate::load_balancer::stats::{EndpointStats, PoolSummary};
use crate::observability::events::{EventEmitter, PoolEvent, TimingInfo};
use crate::resilience::request_set::RequestSet;
use crate::transport::Transport;

/// A set of interchangeable endpoints plus the policy that spreads requests
/// across them.
pub struct Pool {
    name: String,
    config: PoolConfig,
    settings: EndpointSettings,
    transport: Arc<dyn Transport>,
    events: EventEmitter,
    membership: RwLock<Membership>,
    overloaded: Arc<Endpoint>,
    unhealthy: Arc<Endpoint>,
    retry_filter: Option<RetryFilter>,
}

impl Pool {
    /// Build a pool over `endpoints` (`host:port` strings).
    ///
    /// Malformed and duplicate entries are skipped. Must be called within a
    /// Tokio runtime, since every endpoint runs a timeout sweep.
    pub fn new<S: AsRef<str>>(
        transport: Arc<dyn Transport>,
        endpoints: &[S],
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        if endpoints.is_empty() {
            return Err(PoolError::NoEndpoints);
        }
        if config.max_pool_size == Some(0) {
            return Err(PoolError::InvalidPoolSize);
        }

        let mut keys: Vec<String> = Vec::with_capacity(endpoints.len());
        for entry in endpoints {
            match canonical_key(entry.as_ref()) {
                Some(key) if !keys.contains(&key) => keys.push(key),
                Some(_) => {}
                None => tracing::warn!(endpoint = %entry.as_ref(), "Ignoring invalid endpoint address"),
            }
        }
        if keys.is_empty() {
            return Err(PoolError::NoValidEndpoints(
                endpoints.iter().map(|e| e.as_ref().to_string()).collect(),
            ));
        }

        let name = config.name.clone().unwrap_or_else(|| "pool".to_string());
        let settings = EndpointSettings::from(&config);
        let events = EventEmitter::new(config.event_capacity);

        let membership = {
            let mut spawn = spawner(&settings, &transport, &events);
            Membership::initialize(keys, config.max_pool_size, &mut spawn)
        };

        let overloaded = Endpoint::sentinel(Sentinel::Overloaded, settings.clone(), transport.clone(), events.clone());
        let unhealthy = Endpoint::sentinel(Sentinel::Unhealthy, settings.clone(), transport.clone(), events.clone());

        tracing::info!(
            pool = %name,
            active = membership.len(),
            known = membership.known().len(),
            max_pool_size = ?config.max_pool_size,
            keep_alive = config.keep_alive,
            "Pool created"
        );

        Ok(Self {
            name,
            config,
            settings,
            transport,
            events,
            membership: RwLock::new(membership),
            overloaded,
            unhealthy,
            retry_filter: None,
        })
    }

    /// Build a pool over the endpoints listed in `config`.
    pub fn from_config(transport: Arc<dyn Transport>, config: PoolConfig) -> Result<Self, PoolError> {
        let endpoints = config.endpoints.clone();
        Self::new(transport, &endpoints, config)
    }

    /// Filter applied to requests that do not carry their own.
    pub fn with_retry_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Response) -> Option<String> + Send + Sync + 'static,
    {
        self.retry_filter = Some(Arc::new(filter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn membership(&self) -> std::sync::RwLockReadGuard<'_, Membership> {
        self.membership.read().expect("pool membership lock poisoned")
    }

    fn membership_mut(&self) -> std::sync::RwLockWriteGuard<'_, Membership> {
        self.membership.write().expect("pool membership lock poisoned")
    }

    /// Send a logical request, retrying per policy.
    pub async fn request(
        &self,
        options: impl Into<RequestOptions>,
        body: impl Into<RequestBody>,
    ) -> Result<Response, RequestError> {
        let options = self.resolve(options.into());
        let body = body.into();

        let mut set = RequestSet::new(self, &options, &body);
        let result = set.run().await;
        self.publish_outcome(&options, &result, &set);
        result
    }

    pub async fn get(&self, options: impl Into<RequestOptions>) -> Result<Response, RequestError> {
        self.request(options.into().method(Method::Get), RequestBody::Empty).await
    }

    pub async fn put(
        &self,
        options: impl Into<RequestOptions>,
        body: impl Into<RequestBody>,
    ) -> Result<Response, RequestError> {
        self.request(options.into().method(Method::Put), body).await
    }

    pub async fn post(
        &self,
        options: impl Into<RequestOptions>,
        body: impl Into<RequestBody>,
    ) -> Result<Response, RequestError> {
        self.request(options.into().method(Method::Post), body).await
    }

    pub async fn delete(&self, options: impl Into<RequestOptions>) -> Result<Response, RequestError> {
        self.request(options.into().method(Method::Delete), RequestBody::Empty).await
    }

    /// Fill unset options from the pool configuration.
    fn resolve(&self, mut options: RequestOptions) -> RequestOptions {
        options.retry_delay.get_or_insert(self.config.retry_delay());
        options.max_hangups.get_or_insert(self.config.max_hangups);
        options.max_aborts.get_or_insert(self.config.max_aborts);
        if options.retry_filter.is_none() {
            options.retry_filter = self.retry_filter.clone();
        }
        options
    }

    fn publish_outcome(
        &self,
        options: &RequestOptions,
        result: &Result<Response, RequestError>,
        set: &RequestSet<'_>,
    ) {
        let (endpoint, reused) = match result {
            Ok(response) => (Some(response.endpoint.clone()), response.reused),
            Err(err) => (err.endpoint().map(str::to_string), false),
        };
        match result {
            Ok(response) => tracing::debug!(
                pool = %self.name,
                method = %options.method,
                path = %options.path,
                status = response.status.as_u16(),
                endpoint = %response.endpoint,
                "Request completed"
            ),
            Err(err) => tracing::debug!(
                pool = %self.name,
                method = %options.method,
                path = %options.path,
                reason = %err.reason,
                error = %err,
                "Request failed"
            ),
        }

        if let Some(duration) = set.duration() {
            self.events.emit(PoolEvent::Timing {
                duration,
                info: TimingInfo {
                    method: options.method,
                    path: options.path.clone(),
                    endpoint,
                    success: result.is_ok(),
                    reused,
                },
            });
        }
        self.events.emit(PoolEvent::Response {
            error: result.as_ref().err().cloned(),
            method: options.method,
            path: options.path.clone(),
            status: result.as_ref().ok().map(|response| response.status),
        });
    }

    /// Pick the endpoint for the next attempt.
    ///
    /// Never fails: when no real endpoint can serve, returns a sentinel whose
    /// request fails with `full` or `unhealthy`.
    pub fn get_endpoint(&self, options: &RequestOptions) -> Arc<Endpoint> {
        let membership = self.membership();

        if let Some(pinned) = options.endpoint.as_deref() {
            let endpoint = canonical_key(pinned).and_then(|key| membership.get(&key).cloned());
            return match endpoint {
                None => self.unhealthy.clone(),
                Some(endpoint) if endpoint.pending() >= self.config.max_pending => self.overloaded.clone(),
                Some(endpoint) => endpoint,
            };
        }

        let endpoints = membership.endpoints();
        if endpoints.is_empty() {
            return self.unhealthy.clone();
        }

        let len = endpoints.len();
        let start = rand::thread_rng().gen_range(0..len);
        let mut total_pending = 0u64;
        let mut least: Option<(&Arc<Endpoint>, u64)> = None;

        for offset in 0..len {
            let endpoint = &endpoints[(start + offset) % len];
            if endpoint.ready() {
                return endpoint.clone();
            }
            let pending = endpoint.pending();
            total_pending += pending;
            if endpoint.is_healthy() && least.map_or(true, |(_, lowest)| pending < lowest) {
                least = Some((endpoint, pending));
            }
        }

        if total_pending >= self.config.max_pending && !options.override_pending {
            tracing::debug!(pool = %self.name, total_pending, "Pool overloaded");
            return self.overloaded.clone();
        }
        match least {
            Some((endpoint, _)) => endpoint.clone(),
            None => self.unhealthy.clone(),
        }
    }

    fn close_all(&self, endpoints: Vec<Arc<Endpoint>>) {
        for endpoint in endpoints {
            endpoint.close();
        }
    }

    /// Register `host_port`. Malformed or already known addresses are ignored.
    pub fn add_endpoint(&self, host_port: &str) {
        let Some(key) = canonical_key(host_port) else {
            return;
        };
        let mut spawn = spawner(&self.settings, &self.transport, &self.events);
        let removed = {
            let mut membership = self.membership_mut();
            if membership.is_known(&key) {
                return;
            }
            tracing::info!(pool = %self.name, endpoint = %key, "Adding endpoint");
            membership.add(key, self.config.max_pool_size, &mut spawn)
        };
        self.close_all(removed);
    }

    /// Forget `host_port`. Malformed or unknown addresses are ignored.
    pub fn remove_endpoint(&self, host_port: &str) {
        let Some(key) = canonical_key(host_port) else {
            return;
        };
        let mut spawn = spawner(&self.settings, &self.transport, &self.events);
        let removed = {
            let mut membership = self.membership_mut();
            if !membership.is_known(&key) {
                return;
            }
            tracing::info!(pool = %self.name, endpoint = %key, "Removing endpoint");
            membership.remove(&key, self.config.max_pool_size, &mut spawn)
        };
        self.close_all(removed);
    }

    /// Reconcile membership with a complete list of addresses.
    pub fn sync_endpoints<S: AsRef<str>>(&self, endpoints: &[S]) {
        let wanted: Vec<String> = endpoints.iter().filter_map(|e| canonical_key(e.as_ref())).collect();
        let stale: Vec<String> = self
            .known_endpoints()
            .into_iter()
            .filter(|known| !wanted.contains(known))
            .collect();

        for key in &stale {
            self.remove_endpoint(key);
        }
        for key in &wanted {
            self.add_endpoint(key);
        }
        tracing::info!(
            pool = %self.name,
            removed = stale.len(),
            active = self.len(),
            known = self.known_endpoints().len(),
            "Endpoints synchronized"
        );
    }

    /// Bring the active count back to `min(max_pool_size, known)`.
    pub fn adjust_pool_size(&self) {
        let mut spawn = spawner(&self.settings, &self.transport, &self.events);
        let removed = self.membership_mut().rebalance(self.config.max_pool_size, &mut spawn);
        self.close_all(removed);
    }

    /// Active endpoints, in activation order.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.membership().endpoints().to_vec()
    }

    pub fn healthy_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.membership()
            .endpoints()
            .iter()
            .filter(|endpoint| endpoint.is_healthy())
            .cloned()
            .collect()
    }

    /// Every registered address, active or not.
    pub fn known_endpoints(&self) -> Vec<String> {
        self.membership().known().to_vec()
    }

    pub fn stats(&self) -> Vec<EndpointStats> {
        self.membership().endpoints().iter().map(|endpoint| endpoint.stats()).collect()
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary::from_stats(self.stats())
    }

    pub fn pending(&self) -> u64 {
        self.membership().endpoints().iter().map(|endpoint| endpoint.pending()).sum()
    }

    pub fn rate(&self) -> u64 {
        self.membership().endpoints().iter().map(|endpoint| endpoint.request_rate()).sum()
    }

    pub fn request_count(&self) -> u64 {
        self.membership().endpoints().iter().map(|endpoint| endpoint.request_count()).sum()
    }

    /// Number of active endpoints.
    pub fn len(&self) -> usize {
        self.membership().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every endpoint, stopping their timers and pingers.
    pub fn close(&self) {
        for endpoint in self.endpoints() {
            endpoint.close();
        }
        self.overloaded.close();
        self.unhealthy.close();
        tracing::info!(pool = %self.name, "Pool closed");
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("active", &self.len())
            .finish()
    }
}

fn spawner<'a>(
    settings: &'a EndpointSettings,
    transport: &'a Arc<dyn Transport>,
    events: &'a EventEmitter,
) -> impl FnMut(&str, u16) -> Arc<Endpoint> + 'a {
    move |host: &str, port: u16| Endpoint::new(host, port, settings.clone(), transport.clone(), events.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::error::Reason;
    use crate::transport::scripted::{ScriptedTransport, Step};
    use std::collections::HashSet;

    fn config() -> PoolConfig {
        PoolConfig {
            resolution_ms: 0,
            retry_delay_ms: 0,
            ..PoolConfig::default()
        }
    }

    fn pool_of(n: usize, config: PoolConfig) -> (Pool, ScriptedTransport) {
        let transport = ScriptedTransport::default();
        let endpoints: Vec<String> = (0..n).map(|i| format!("h{}:80", i)).collect();
        let pool = Pool::new(Arc::new(transport.clone()), &endpoints, config).unwrap();
        (pool, transport)
    }

    #[test]
    fn construction_errors() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::default());
        let none: [&str; 0] = [];
        assert!(matches!(Pool::new(transport.clone(), &none, config()), Err(PoolError::NoEndpoints)));
        assert!(matches!(
            Pool::new(transport.clone(), &["nope", "a:0"], config()),
            Err(PoolError::NoValidEndpoints(_))
        ));
        let capped = PoolConfig { max_pool_size: Some(0), ..config() };
        assert!(matches!(Pool::new(transport, &["a:1"], capped), Err(PoolError::InvalidPoolSize)));
    }

    #[test]
    fn construction_skips_bad_and_duplicate_entries() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::default());
        let pool = Pool::new(transport, &["a:1", "bad", "a:1", "b:2"], config()).unwrap();
        assert_eq!(pool.len(), 2);
        let names: HashSet<String> = pool.endpoints().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, HashSet::from(["a:1".to_string(), "b:2".to_string()]));
    }

    #[test]
    fn capped_construction_samples_cap() {
        let config = PoolConfig { max_pool_size: Some(4), ..config() };
        let (pool, _) = pool_of(10, config);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.known_endpoints().len(), 10);
        let names: HashSet<String> = pool.endpoints().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn selection_prefers_ready_endpoints() {
        let (pool, _) = pool_of(3, config());
        pool.endpoints()[0].simulate_pending(2);
        pool.endpoints()[2].simulate_pending(2);
        for _ in 0..20 {
            assert_eq!(pool.get_endpoint(&RequestOptions::default()).name(), "h1:80");
        }
    }

    #[test]
    fn selection_respects_pool_pending_limit() {
        let config = PoolConfig { max_pending: 30, ..config() };
        let (pool, _) = pool_of(3, config);
        for endpoint in pool.endpoints() {
            endpoint.simulate_pending(5);
        }
        let chosen = pool.get_endpoint(&RequestOptions::default());
        assert!(chosen.sentinel_kind().is_none());

        for endpoint in pool.endpoints() {
            endpoint.simulate_pending(5);
        }
        let chosen = pool.get_endpoint(&RequestOptions::default());
        assert_eq!(chosen.sentinel_kind(), Some(Sentinel::Overloaded));

        let options = RequestOptions::default().override_pending(true);
        assert!(pool.get_endpoint(&options).sentinel_kind().is_none());
    }

    #[test]
    fn selection_picks_least_pending_healthy() {
        let (pool, _) = pool_of(3, config());
        let endpoints = pool.endpoints();
        endpoints[0].simulate_pending(4);
        endpoints[1].simulate_pending(1);
        endpoints[2].simulate_pending(3);
        for _ in 0..20 {
            assert_eq!(pool.get_endpoint(&RequestOptions::default()).name(), "h1:80");
        }
    }

    #[tokio::test]
    async fn all_unhealthy_selects_unhealthy_sentinel() {
        let config = PoolConfig { ping: Some("/ping".into()), ..config() };
        let transport = ScriptedTransport::with_default(Step::Hang);
        let pool = Pool::new(Arc::new(transport), &["a:1", "b:2"], config).unwrap();
        for endpoint in pool.endpoints() {
            endpoint.set_healthy(false);
        }

        let chosen = pool.get_endpoint(&RequestOptions::default());
        assert_eq!(chosen.sentinel_kind(), Some(Sentinel::Unhealthy));
        assert!(pool.healthy_endpoints().is_empty());

        let err = pool.get("/foo").await.unwrap_err();
        assert_eq!(err.reason, Reason::Unhealthy);
        assert_eq!(pool.summary().total_unhealthy, 2);
        pool.close();
    }

    #[tokio::test]
    async fn pinned_endpoint_selection() {
        let config = PoolConfig { max_pending: 2, ping: Some("/ping".into()), ..config() };
        let transport = ScriptedTransport::with_default(Step::Hang);
        let pool = Pool::new(Arc::new(transport), &["a:1", "b:2"], config).unwrap();
        let pinned = RequestOptions::default().endpoint("b:2");

        pool.endpoints()[1].set_healthy(false);
        assert_eq!(pool.get_endpoint(&pinned).name(), "b:2");

        pool.endpoints()[1].simulate_pending(2);
        assert_eq!(pool.get_endpoint(&pinned).sentinel_kind(), Some(Sentinel::Overloaded));

        let unknown = RequestOptions::default().endpoint("c:3");
        assert_eq!(pool.get_endpoint(&unknown).sentinel_kind(), Some(Sentinel::Unhealthy));
        let malformed = RequestOptions::default().endpoint("garbage");
        assert_eq!(pool.get_endpoint(&malformed).sentinel_kind(), Some(Sentinel::Unhealthy));
        pool.close();
    }

    #[test]
    fn membership_changes_through_pool() {
        let config = PoolConfig { max_pool_size: Some(2), ..config() };
        let (pool, _) = pool_of(2, config);

        pool.add_endpoint("h7:80");
        pool.add_endpoint("not an address");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.known_endpoints().len(), 3);

        pool.remove_endpoint("unknown:1");
        assert_eq!(pool.known_endpoints().len(), 3);

        pool.remove_endpoint("h7:80");
        pool.remove_endpoint("h0:80");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.endpoints()[0].name(), "h1:80");
    }

    #[test]
    fn removed_endpoints_are_closed() {
        let (pool, _) = pool_of(2, config());
        let endpoint = pool.endpoints()[0].clone();
        pool.remove_endpoint(endpoint.name());
        assert!(endpoint.is_closed());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn sync_reconciles_membership() {
        let (pool, _) = pool_of(3, config());
        pool.sync_endpoints(&["h1:80", "h5:80", "h6:80", "junk"]);

        let known: HashSet<String> = pool.known_endpoints().into_iter().collect();
        let expected: HashSet<String> = ["h1:80", "h5:80", "h6:80"].iter().map(|s| s.to_string()).collect();
        assert_eq!(known, expected);
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn request_publishes_timing_and_response() {
        let (pool, _) = pool_of(1, config());
        let mut rx = pool.subscribe();

        let response = pool.post("/echo", "bar").await.unwrap();
        assert_eq!(response.status, hyper::StatusCode::OK);

        match rx.recv().await.unwrap() {
            PoolEvent::Timing { info, .. } => {
                assert_eq!(info.method, Method::Post);
                assert_eq!(info.path, "/echo");
                assert_eq!(info.endpoint.as_deref(), Some("h0:80"));
                assert!(info.success);
                assert!(!info.reused);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            PoolEvent::Response { error, status, .. } => {
                assert!(error.is_none());
                assert_eq!(status, Some(hyper::StatusCode::OK));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(pool.request_count(), 1);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_retry_filter_applies_by_default() {
        let (pool, transport) = pool_of(2, config());
        transport.push("h0:80", Step::Respond(200, "busy"));
        transport.push("h1:80", Step::Respond(200, "busy"));
        let pool = pool.with_retry_filter(|response| {
            (response.text() == Some("busy")).then(|| "backend busy".to_string())
        });

        let response = pool.get(RequestOptions::new("/foo").max_attempts(3)).await.unwrap();
        assert_eq!(response.text(), Some(""));
        let filtered: u64 = pool.stats().iter().map(|s| s.filtered).sum();
        assert!((1..=2).contains(&filtered));
    }
}

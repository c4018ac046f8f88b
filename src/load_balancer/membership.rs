//! Pool membership.
//!
//! # Responsibilities
//! - Parse and canonicalize `host:port` addresses
//! - Keep the active endpoint list and its key index in step
//! - Remember every known address, active or not
//! - Keep the active set at `min(cap, known)` with uniform sampling
//!
//! # Design Decisions
//! - Initial activation under a cap uses reservoir sampling (Algorithm R)
//! - Endpoints leaving the active set are returned to the caller, which
//!   closes them outside the membership lock

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::load_balancer::endpoint::Endpoint;

/// Parse `host:port`, port 1-65535. Returns `None` for anything else.
pub fn parse_host_port(input: &str) -> Option<(String, u16)> {
    let (host, port) = input.trim().rsplit_once(':')?;
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return None;
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some((host.to_string(), port)),
    }
}

/// Canonical membership key of an address, if it parses.
pub fn canonical_key(input: &str) -> Option<String> {
    parse_host_port(input).map(|(host, port)| format!("{}:{}", host, port))
}

/// Uniformly pick `k` items (all of them when there are fewer).
pub fn reservoir_sample<T: Clone, R: Rng + ?Sized>(items: &[T], k: usize, rng: &mut R) -> Vec<T> {
    let mut reservoir: Vec<T> = items.iter().take(k).cloned().collect();
    for (i, item) in items.iter().enumerate().skip(k) {
        let j = rng.gen_range(0..=i);
        if j < k {
            reservoir[j] = item.clone();
        }
    }
    reservoir
}

/// Active endpoints plus every known address.
#[derive(Debug, Default)]
pub(crate) struct Membership {
    endpoints: Vec<Arc<Endpoint>>,
    by_key: HashMap<String, Arc<Endpoint>>,
    all_host_ports: Vec<String>,
}

impl Membership {
    /// Activate `keys` (already canonical and unique), sampling `cap` of them.
    pub(crate) fn initialize<F>(keys: Vec<String>, cap: Option<usize>, spawn: &mut F) -> Self
    where
        F: FnMut(&str, u16) -> Arc<Endpoint>,
    {
        let mut membership = Membership::default();
        let active = match cap {
            Some(cap) if cap < keys.len() => reservoir_sample(&keys, cap, &mut rand::thread_rng()),
            _ => keys.clone(),
        };
        membership.all_host_ports = keys;
        for key in &active {
            membership.activate(key, spawn);
        }
        membership
    }

    pub(crate) fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Arc<Endpoint>> {
        self.by_key.get(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub(crate) fn known(&self) -> &[String] {
        &self.all_host_ports
    }

    pub(crate) fn is_known(&self, key: &str) -> bool {
        self.all_host_ports.iter().any(|known| known == key)
    }

    /// Register a new address. Returns endpoints that left the active set.
    pub(crate) fn add<F>(&mut self, key: String, cap: Option<usize>, spawn: &mut F) -> Vec<Arc<Endpoint>>
    where
        F: FnMut(&str, u16) -> Arc<Endpoint>,
    {
        if self.is_known(&key) {
            return Vec::new();
        }
        self.all_host_ports.push(key.clone());

        let mut removed = Vec::new();
        match cap {
            Some(cap) if self.endpoints.len() >= cap => {
                let p = cap as f64 / self.all_host_ports.len() as f64;
                let mut rng = rand::thread_rng();
                if rng.gen_bool(p.clamp(0.0, 1.0)) && !self.endpoints.is_empty() {
                    let evict = rng.gen_range(0..self.endpoints.len());
                    let evicted = self.endpoints[evict].name().to_string();
                    removed.extend(self.deactivate(&evicted));
                    self.activate(&key, spawn);
                }
            }
            _ => self.activate(&key, spawn),
        }
        removed.extend(self.rebalance(cap, spawn));
        removed
    }

    /// Forget an address. Returns endpoints that left the active set.
    pub(crate) fn remove<F>(&mut self, key: &str, cap: Option<usize>, spawn: &mut F) -> Vec<Arc<Endpoint>>
    where
        F: FnMut(&str, u16) -> Arc<Endpoint>,
    {
        if !self.is_known(key) {
            return Vec::new();
        }
        self.all_host_ports.retain(|known| known != key);
        let mut removed: Vec<Arc<Endpoint>> = self.deactivate(key).into_iter().collect();
        removed.extend(self.rebalance(cap, spawn));
        removed
    }

    /// Bring the active count to `min(cap, known)`.
    pub(crate) fn rebalance<F>(&mut self, cap: Option<usize>, spawn: &mut F) -> Vec<Arc<Endpoint>>
    where
        F: FnMut(&str, u16) -> Arc<Endpoint>,
    {
        let target = cap.unwrap_or(usize::MAX).min(self.all_host_ports.len());
        let mut rng = rand::thread_rng();
        let mut removed = Vec::new();

        while self.endpoints.len() < target {
            let inactive: Vec<&String> = self
                .all_host_ports
                .iter()
                .filter(|key| !self.by_key.contains_key(key.as_str()))
                .collect();
            let Some(key) = inactive.choose(&mut rng).map(|key| (*key).clone()) else {
                break;
            };
            self.activate(&key, spawn);
        }

        while self.endpoints.len() > target {
            let victim = rng.gen_range(0..self.endpoints.len());
            let key = self.endpoints[victim].name().to_string();
            removed.extend(self.deactivate(&key));
        }
        removed
    }

    fn activate<F>(&mut self, key: &str, spawn: &mut F)
    where
        F: FnMut(&str, u16) -> Arc<Endpoint>,
    {
        if self.by_key.contains_key(key) {
            return;
        }
        let Some((host, port)) = parse_host_port(key) else {
            return;
        };
        let endpoint = spawn(&host, port);
        tracing::debug!(endpoint = %key, "Endpoint activated");
        self.by_key.insert(key.to_string(), endpoint.clone());
        self.endpoints.push(endpoint);
    }

    fn deactivate(&mut self, key: &str) -> Option<Arc<Endpoint>> {
        let endpoint = self.by_key.remove(key)?;
        self.endpoints.retain(|active| active.name() != key);
        tracing::debug!(endpoint = %key, "Endpoint deactivated");
        Some(endpoint)
    }
}

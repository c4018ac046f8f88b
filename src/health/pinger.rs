//! Active recovery probing.
//!
//! # Responsibilities
//! - Probe an unhealthy endpoint's health-check path until it answers 200
//! - Back off exponentially between failed probes
//! - Mark the endpoint healthy on the first good probe

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Weak;
use std::time::Duration;

use hyper::{HeaderMap, StatusCode};
use tokio::time;

use crate::load_balancer::endpoint::{Endpoint, EndpointSettings};
use crate::load_balancer::request::Method;
use crate::resilience::backoff::probe_backoff;
use crate::transport::{Activity, Exchange, ExchangeBody, ExchangeResponse, TransportError};

/// Prober owned by one endpoint.
#[derive(Debug)]
pub struct Pinger {
    path: Option<String>,
    timeout: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
    running: AtomicBool,
    attempts: AtomicU32,
}

impl Pinger {
    pub fn new(settings: &EndpointSettings) -> Self {
        Self {
            path: settings.ping_path.clone(),
            timeout: settings.ping_timeout,
            backoff_base: settings.ping_backoff_base,
            backoff_max: settings.ping_backoff_max,
            running: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Failed probes since the last start.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Mark the pinger running. False when it already was or has no path.
    pub(crate) fn claim(&self) -> bool {
        if self.path.is_none() || self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.attempts.store(0, Ordering::Release);
        true
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Run the probe loop of a claimed pinger. The first probe fires
    /// immediately.
    pub(crate) fn spawn(&self, endpoint: Weak<Endpoint>) {
        let Some(path) = self.path.clone() else {
            self.finish();
            return;
        };
        let Some(owner) = endpoint.upgrade() else {
            self.finish();
            return;
        };
        let name = owner.name().to_string();
        tracing::info!(endpoint = %name, path = %path, "Health monitor starting");
        let probing = owner.until_closed(probe_until_healthy(endpoint, path));
        drop(owner);

        tokio::spawn(async move {
            if probing.await.is_none() {
                tracing::debug!(endpoint = %name, "Endpoint closed, health monitor exiting");
            }
        });
    }
}

async fn probe_until_healthy(endpoint: Weak<Endpoint>, path: String) {
    loop {
        let delay = {
            let Some(owner) = endpoint.upgrade() else {
                return;
            };
            let pinger = owner.pinger();
            match pinger.attempts() {
                0 => Duration::ZERO,
                attempts => probe_backoff(attempts, pinger.backoff_base, pinger.backoff_max),
            }
        };
        if !delay.is_zero() {
            time::sleep(delay).await;
        }

        let Some(owner) = endpoint.upgrade() else {
            return;
        };
        if probe(&owner, &path).await {
            owner.probe_succeeded();
            return;
        }
        owner.pinger().attempts.fetch_add(1, Ordering::AcqRel);
    }
}

async fn probe(endpoint: &Endpoint, path: &str) -> bool {
    let timeout = endpoint.pinger().timeout;
    match time::timeout(timeout, probe_once(endpoint, path)).await {
        Ok(Ok(response)) if response.status == StatusCode::OK => true,
        Ok(Ok(response)) => {
            tracing::debug!(endpoint = %endpoint.name(), status = %response.status, "Health check failed: non-200 status");
            false
        }
        Ok(Err(e)) => {
            tracing::debug!(endpoint = %endpoint.name(), error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::debug!(endpoint = %endpoint.name(), "Health check failed: timeout");
            false
        }
    }
}

/// One probe over a fresh connection; idle connections are never used.
async fn probe_once(endpoint: &Endpoint, path: &str) -> Result<ExchangeResponse, TransportError> {
    let mut conn = endpoint.transport().connect(endpoint.host(), endpoint.port()).await?;
    conn.exchange(Exchange {
        host: endpoint.host().to_string(),
        port: endpoint.port(),
        method: Method::Get,
        path: path.to_string(),
        headers: HeaderMap::new(),
        body: ExchangeBody::Empty,
        activity: Activity::new(),
    })
    .await
}

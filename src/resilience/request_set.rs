//! Retry orchestration of one logical request.
//!
//! # State Machine
//! ```text
//! attempting ──ok──────────────────────────────→ done(response)
//!     │
//!     └─err→ attempts_remaining -= 1, delay chosen
//!              ├─ retry allowed → retrying (event, sleep) → attempting
//!              └─ otherwise ──────────────────────────────→ done(error)
//! ```
//!
//! # Design Decisions
//! - Attempts are strictly sequential; each one asks the pool for a fresh
//!   endpoint
//! - Pool exhaustion (`full`, `unhealthy`) is final
//! - Hang ups and aborts have their own budgets so a dying backend cannot
//!   burn every attempt

use std::time::Duration;

use tokio::time;

use crate::load_balancer::error::{Reason, RequestError};
use crate::load_balancer::pool::Pool;
use crate::load_balancer::request::{RequestBody, RequestOptions, Response};
use crate::observability::events::PoolEvent;
use crate::resilience::backoff::retry_backoff;

/// Attempts a request gets when it does not set its own limit.
pub fn default_max_attempts(max_retries: u32, endpoints: usize) -> u32 {
    let spread = endpoints.max(2).min(u32::MAX as usize) as u32;
    max_retries.saturating_add(1).min(spread)
}

pub struct RequestSet<'a> {
    pool: &'a Pool,
    options: &'a RequestOptions,
    body: &'a RequestBody,
    max_attempts: u32,
    max_hangups: u32,
    max_aborts: u32,
    retry_delay: Duration,
    attempts_remaining: u32,
    hangups: u32,
    aborts: u32,
    duration: Option<Duration>,
}

impl<'a> RequestSet<'a> {
    pub fn new(pool: &'a Pool, options: &'a RequestOptions, body: &'a RequestBody) -> Self {
        let config = pool.config();
        let max_attempts = if body.is_stream() {
            1
        } else {
            options
                .max_attempts
                .unwrap_or_else(|| default_max_attempts(config.max_retries, pool.len()))
                .max(1)
        };

        Self {
            pool,
            options,
            body,
            max_attempts,
            max_hangups: options.max_hangups.unwrap_or(config.max_hangups),
            max_aborts: options.max_aborts.unwrap_or(config.max_aborts),
            retry_delay: options.retry_delay.unwrap_or_else(|| config.retry_delay()),
            attempts_remaining: max_attempts,
            hangups: 0,
            aborts: 0,
            duration: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    pub fn hangups(&self) -> u32 {
        self.hangups
    }

    pub fn aborts(&self) -> u32 {
        self.aborts
    }

    /// Request-end to response-start time of the last attempt.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Run attempts until one succeeds or the policy gives up.
    pub async fn run(&mut self) -> Result<Response, RequestError> {
        loop {
            let endpoint = self.pool.get_endpoint(self.options);
            let err = match endpoint.request(self.options, self.body.for_attempt()).await {
                Ok(response) => {
                    self.duration = Some(response.latency);
                    return Ok(response);
                }
                Err(err) => err,
            };
            drop(endpoint);

            let err = self.record_failure(err);
            if !self.should_retry(&err) {
                return Err(err);
            }

            let delay = err.delay.unwrap_or_default();
            tracing::debug!(
                endpoint = err.endpoint().unwrap_or("-"),
                reason = %err.reason,
                attempts_remaining = self.attempts_remaining,
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );
            self.pool.events().emit(PoolEvent::Retrying(err));
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
        }
    }

    fn record_failure(&mut self, mut err: RequestError) -> RequestError {
        self.duration = err.attempt.as_ref().map(|attempt| attempt.latency);
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);

        let exponent = self.max_attempts - self.attempts_remaining;
        err.delay = Some(retry_backoff(exponent, self.retry_delay));

        match err.reason {
            Reason::SocketHangUp => self.hangups += 1,
            Reason::Aborted => self.aborts += 1,
            _ => {}
        }
        err
    }

    fn should_retry(&self, err: &RequestError) -> bool {
        self.attempts_remaining > 0
            && !err.reason.is_exhaustion()
            && self.hangups < self.max_hangups
            && self.aborts < self.max_aborts
    }
}

//! Endpoint health state machine.
//!
//! # States
//! - Healthy: endpoint receives traffic
//! - Unhealthy: endpoint only reachable by pinned requests
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: any request failure other than caller cancellation
//! Unhealthy → Healthy: a successful health probe
//! ```
//!
//! # Design Decisions
//! - No hysteresis: one failure is enough, one good probe is enough
//! - `transition` reports only real changes, so callers publish exactly one
//!   event per change

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn from_healthy(healthy: bool) -> Self {
        if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }

    /// Move to the requested state. Returns the new state if it changed.
    pub fn transition(&mut self, healthy: bool) -> Option<HealthState> {
        let next = HealthState::from_healthy(healthy);
        if *self == next {
            return None;
        }
        *self = next;
        Some(next)
    }
}

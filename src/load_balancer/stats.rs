//! Point-in-time statistics of endpoints and the pool.

use serde::Serialize;

/// Snapshot of one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    pub name: String,
    pub request_count: u64,
    /// Requests started during the last resolution window.
    pub request_rate: u64,
    pub pending: u64,
    pub successes: u64,
    pub failures: u64,
    pub filtered: u64,
    pub healthy: bool,
    /// Exchanges carried so far by each open connection, idle or busy.
    pub connection_exchange_counts: Vec<u64>,
}

impl EndpointStats {
    pub fn connections(&self) -> usize {
        self.connection_exchange_counts.len()
    }
}

/// Totals across every active endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolSummary {
    pub total_pending: u64,
    pub total_connections: usize,
    pub total_unhealthy: usize,
    pub total_rate: u64,
    pub endpoints: Vec<EndpointStats>,
}

impl PoolSummary {
    pub fn from_stats(endpoints: Vec<EndpointStats>) -> Self {
        let mut summary = PoolSummary::default();
        for stats in &endpoints {
            summary.total_pending += stats.pending;
            summary.total_connections += stats.connections();
            summary.total_rate += stats.request_rate;
            if !stats.healthy {
                summary.total_unhealthy += 1;
            }
        }
        summary.endpoints = endpoints;
        summary
    }
}

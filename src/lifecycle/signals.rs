//! OS signal handling.

/// Wait for Ctrl+C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

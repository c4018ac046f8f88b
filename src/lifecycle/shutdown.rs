//! Stop signal for an endpoint's background tasks.

use std::future::Future;

use tokio::sync::broadcast;

/// One-shot stop signal shared by the tasks an endpoint spawns.
///
/// Tasks are wrapped with [`Shutdown::bind`]. Triggering the signal, or
/// dropping it, ends every bound task at its next suspension point.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Wrap `task` so it stops with this signal.
    ///
    /// The subscription is taken now, so a trigger that happens before the
    /// returned future is first polled still stops it. Resolves to `None`
    /// when stopped early.
    pub fn bind<F>(&self, task: F) -> impl Future<Output = Option<F::Output>> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let mut stop = self.tx.subscribe();
        async move {
            tokio::select! {
                output = task => Some(output),
                _ = stop.recv() => None,
            }
        }
    }

    /// Stop every bound task. Returns how many were still running.
    pub fn trigger(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn trigger_stops_bound_tasks() {
        let shutdown = Shutdown::new();
        let forever = tokio::spawn(shutdown.bind(std::future::pending::<()>()));
        let quick = shutdown.bind(async { 7 });

        assert_eq!(quick.await, Some(7));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(shutdown.trigger(), 1);
        assert_eq!(forever.await.unwrap(), None);
        assert_eq!(shutdown.trigger(), 0);
    }

    #[tokio::test]
    async fn trigger_before_first_poll_still_stops() {
        let shutdown = Shutdown::new();
        let bound = shutdown.bind(std::future::pending::<()>());
        shutdown.trigger();
        assert_eq!(bound.await, None);
    }

    #[tokio::test]
    async fn drop_stops_bound_tasks() {
        let shutdown = Shutdown::new();
        let bound = shutdown.bind(std::future::pending::<()>());
        drop(shutdown);
        assert_eq!(bound.await, None);
    }
}

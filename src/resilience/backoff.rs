//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before the next attempt of a request set.
///
/// `round(random() * 2^attempt * base)`, so the window doubles with every
/// attempt and the first retry can fire immediately.
pub fn retry_backoff(attempt: u32, base: Duration) -> Duration {
    let window_ms = (base.as_millis() as f64) * 2f64.powi(attempt.min(30) as i32);
    let delay_ms = (rand::thread_rng().gen::<f64>() * window_ms).round();
    Duration::from_millis(delay_ms as u64)
}

/// Delay before the next health probe.
///
/// `min(random(0, 2^attempts) + base, ceiling)`.
pub fn probe_backoff(attempts: u32, base: Duration, ceiling: Duration) -> Duration {
    let window_ms = 2u64.saturating_pow(attempts.min(63));
    let jitter_ms = rand::thread_rng().gen_range(0..window_ms.max(1));
    let delay = base.saturating_add(Duration::from_millis(jitter_ms));
    delay.min(ceiling)
}

//! Retry backoff schedule for transient delivery failures.

use std::time::Duration;

use rand::Rng;

/// Safety valve: a row at this attempt count fails permanently without a
/// send attempt.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// Delay table for attempts 1..=5; clamped at the last entry beyond that.
pub const BACKOFF_DELAYS_SECS: [u64; 5] = [30, 120, 600, 1800, 7200];

/// Uniform jitter applied around the table value.
pub const JITTER_FACTOR: f64 = 0.2;

/// Table delay for a 1-based attempt number, without jitter.
pub fn base_delay_secs(attempt: u32) -> u64 {
    let idx = (attempt.saturating_sub(1) as usize).min(BACKOFF_DELAYS_SECS.len() - 1);
    BACKOFF_DELAYS_SECS[idx]
}

/// Jittered retry delay for a 1-based attempt number.
///
/// The result is uniformly sampled from ±20% around the table value and
/// floored at one second after the jitter draw, so a negative draw can
/// never produce a non-positive delay.
pub fn retry_delay(attempt: u32) -> Duration {
    let base = base_delay_secs(attempt) as f64;
    let jitter_range = base * JITTER_FACTOR;
    let jitter = if jitter_range > 0.0 {
        rand::rng().random_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };
    let secs = (base + jitter).max(1.0);
    Duration::from_secs_f64(secs)
}

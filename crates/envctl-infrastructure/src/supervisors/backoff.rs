//! Full-jitter exponential backoff shared by both supervisors.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-indexed): uniform in
/// `[0, min(base * 2^(attempt-1), max)]`.
#[must_use]
pub fn full_jitter(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let cap = base
        .saturating_mul(2_u32.saturating_pow(exponent))
        .min(max);
    let cap_millis = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
    if cap_millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=cap_millis))
}

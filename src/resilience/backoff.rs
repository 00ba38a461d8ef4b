//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `retry_index` (0-indexed).
///
/// `base × multiplier^retry_index`, capped at `max`.
pub fn calculate_backoff(base: Duration, multiplier: f64, retry_index: u32, max: Duration) -> Duration {
    let factor = multiplier.max(1.0).powi(retry_index.min(i32::MAX as u32) as i32);
    let delay_ms = base.as_millis() as f64 * factor;
    let max_ms = max.as_millis() as f64;

    if !delay_ms.is_finite() || delay_ms >= max_ms {
        max
    } else {
        Duration::from_millis(delay_ms.round() as u64)
    }
}

/// Add up to `ratio × delay` of random delay.
pub fn apply_jitter(delay: Duration, ratio: f64) -> Duration {
    let jitter_range = (delay.as_millis() as f64 * ratio.clamp(0.0, 1.0)) as u64;
    if jitter_range == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_range))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: Duration = Duration::from_secs(10);

    #[test]
    fn test_backoff_growth() {
        let base = Duration::from_millis(2_000);
        let d0 = calculate_backoff(base, 2.0, 0, CAP);
        let d1 = calculate_backoff(base, 2.0, 1, CAP);
        let d2 = calculate_backoff(base, 2.0, 2, CAP);
        assert_eq!(d0, Duration::from_millis(2_000));
        assert_eq!(d1, d0 * 2);
        assert_eq!(d2, d1 * 2);
        assert_eq!(calculate_backoff(base, 2.0, 3, CAP), CAP);
    }

    #[test]
    fn test_fractional_multiplier() {
        let base = Duration::from_millis(5_000);
        assert_eq!(calculate_backoff(base, 1.5, 1, CAP), Duration::from_millis(7_500));
        assert_eq!(calculate_backoff(base, 1.5, 2, CAP), CAP);
    }

    #[test]
    fn test_huge_index_is_capped() {
        assert_eq!(calculate_backoff(Duration::from_secs(1), 2.0, 10_000, CAP), CAP);
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(1_000);
        assert_eq!(apply_jitter(delay, 0.0), delay);
        for _ in 0..50 {
            let j = apply_jitter(delay, 0.1);
            assert!(j >= delay && j < delay + Duration::from_millis(100));
        }
    }
}

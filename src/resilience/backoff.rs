//! Delay between attempts on a single destination.

use rand::Rng;
use std::time::Duration;

/// Delay before the attempt following `attempt`: `base * multiplier^attempt`,
/// capped at `max_ms`, with up to 10% jitter when enabled.
pub fn calculate_backoff(attempt: u32, base_ms: u64, multiplier: f64, max_ms: u64, jitter: bool) -> Duration {
    let factor = if multiplier > 0.0 {
        multiplier.powi(attempt.min(i32::MAX as u32) as i32)
    } else {
        1.0
    };
    let delay_ms = (base_ms as f64 * factor).min(max_ms as f64);
    let capped_delay = if delay_ms.is_finite() && delay_ms > 0.0 {
        delay_ms as u64
    } else {
        0
    };

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_delay() {
        assert_eq!(calculate_backoff(0, 250, 1.0, 10_000, false), Duration::from_millis(250));
        assert_eq!(calculate_backoff(4, 250, 1.0, 10_000, false), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, 100, 2.0, 2000, false), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, 100, 2.0, 2000, false), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, 100, 2.0, 2000, false), Duration::from_millis(800));

        let max = calculate_backoff(10, 100, 2.0, 1000, false);
        assert_eq!(max, Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..20 {
            let d = calculate_backoff(1, 100, 2.0, 2000, true);
            assert!(d >= Duration::from_millis(200));
            assert!(d < Duration::from_millis(220));
        }
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::SyncConfig;

/// Un-jittered retry delay for the given attempt number.
///
/// Formula: delay = min(base * 2^(attempt-1), max). Attempt 0 yields zero.
pub fn base_backoff_ms(attempt: u32, config: &SyncConfig) -> u64 {
    if attempt == 0 {
        return 0;
    }

    let exp = attempt.saturating_sub(1).min(62) as i32;
    let scaled = (config.backoff_base_ms as f64) * 2f64.powi(exp);
    scaled.min(config.backoff_max_ms as f64).max(0.0) as u64
}

/// Retry delay for the given attempt: the base delay with uniform jitter of
/// `backoff_jitter_ratio` in either direction, never below the floor.
pub fn calculate_backoff(attempt: u32, config: &SyncConfig) -> Duration {
    let base = base_backoff_ms(attempt, config) as f64;
    let spread = base * config.backoff_jitter_ratio;
    let jitter = if spread > 0.0 {
        rand::thread_rng().gen_range(-spread..=spread)
    } else {
        0.0
    };
    let delay = (base + jitter).round().max(config.backoff_floor_ms as f64);
    Duration::from_millis(delay as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_doubles_until_cap() {
        let config = SyncConfig::default();
        assert_eq!(base_backoff_ms(1, &config), 1_000);
        assert_eq!(base_backoff_ms(2, &config), 2_000);
        assert_eq!(base_backoff_ms(3, &config), 4_000);
        assert_eq!(base_backoff_ms(5, &config), 16_000);
        assert_eq!(base_backoff_ms(6, &config), 30_000);
        assert_eq!(base_backoff_ms(40, &config), 30_000);
    }

    #[test]
    fn test_base_is_monotonic() {
        let config = SyncConfig::default();
        for n in 1..20 {
            assert!(base_backoff_ms(n, &config) <= base_backoff_ms(n + 1, &config));
        }
    }

    #[test]
    fn test_jitter_stays_within_ratio_and_floor() {
        let config = SyncConfig::default();
        for attempt in 1..=8 {
            let base = base_backoff_ms(attempt, &config) as f64;
            for _ in 0..200 {
                let ms = calculate_backoff(attempt, &config).as_millis() as f64;
                assert!(ms >= 1_000.0, "attempt {attempt} gave {ms}ms");
                assert!(ms <= (base * 1.1).ceil());
                assert!(ms >= (base * 0.9).floor().max(1_000.0));
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let config = SyncConfig {
            backoff_jitter_ratio: 0.0,
            ..Default::default()
        };
        assert_eq!(calculate_backoff(3, &config), Duration::from_millis(4_000));
    }

    #[test]
    fn test_attempt_zero_hits_floor() {
        let config = SyncConfig::default();
        assert_eq!(calculate_backoff(0, &config), Duration::from_millis(1_000));
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Exponential backoff parameters for retried writes.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    /// Each delay is drawn uniformly from `interval * (1 ± randomization_factor)`.
    pub randomization_factor: f64,
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Fresh schedule, one per delivered message.
    pub fn schedule(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            current: self.initial_interval,
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// Delay before the next attempt. Grows geometrically up to the max interval.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.policy.randomization_factor.clamp(0.0, 1.0);
        let base = self.current.as_secs_f64();
        let delta = base * factor;
        let delay = (base - delta) + fastrand::f64() * (2.0 * delta);

        let grown = base * self.policy.multiplier.max(1.0);
        self.current = if grown >= self.policy.max_interval.as_secs_f64() {
            self.policy.max_interval
        } else {
            Duration::from_secs_f64(grown)
        };

        Duration::from_secs_f64(delay.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_randomization_grows_geometrically() {
        let mut backoff = BackoffPolicy {
            randomization_factor: 0.0,
            ..Default::default()
        }
        .schedule();

        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(750));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1125));
    }

    #[test]
    fn test_capped_at_max_interval() {
        let mut backoff = BackoffPolicy {
            initial_interval: Duration::from_secs(40),
            randomization_factor: 0.0,
            ..Default::default()
        }
        .schedule();

        assert_eq!(backoff.next_delay(), Duration::from_secs(40));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_randomized_within_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.schedule().next_delay();
            assert!(delay >= Duration::from_millis(250));
            assert!(delay <= Duration::from_millis(750));
        }
    }
}

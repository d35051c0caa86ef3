//! Per-backend performance statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::config::RouterConfig;
use crate::clock::add_duration;
use crate::error::ErrorClass;

/// Result of one backend call, as reported to the router
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOutcome {
    pub success: bool,
    pub latency: Duration,
    pub error: Option<ErrorClass>,
}

impl CallOutcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error: None,
        }
    }

    pub fn failure(error: ErrorClass, latency: Duration) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error),
        }
    }
}

/// Rolling statistics for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Exponentially weighted success rate in `[0, 1]`
    pub success_rate: f64,
    /// Exponentially weighted latency
    pub mean_latency_ms: f64,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unavailable_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorClass>,
}

impl ModelStats {
    pub fn new(prior_success_rate: f64) -> Self {
        Self {
            calls: 0,
            successes: 0,
            failures: 0,
            success_rate: prior_success_rate.clamp(0.0, 1.0),
            mean_latency_ms: 0.0,
            consecutive_failures: 0,
            last_unavailable_at: None,
            cooldown_until: None,
            last_error: None,
        }
    }

    /// Fold one call outcome into the statistics
    pub fn record(&mut self, outcome: &CallOutcome, config: &RouterConfig, now: DateTime<Utc>) {
        let alpha = config.ewma_alpha.clamp(0.0, 1.0);
        let latency_ms = outcome.latency.as_micros() as f64 / 1000.0;

        self.calls += 1;
        self.mean_latency_ms = if self.calls == 1 {
            latency_ms
        } else {
            self.mean_latency_ms + alpha * (latency_ms - self.mean_latency_ms)
        };

        if outcome.success {
            self.successes += 1;
            self.success_rate += alpha * (1.0 - self.success_rate);
            self.consecutive_failures = 0;
            self.cooldown_until = None;
            return;
        }

        self.failures += 1;
        self.success_rate -= alpha * self.success_rate;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = outcome.error;

        if outcome.error == Some(ErrorClass::PermanentBackend) {
            self.exclude(now, config.permanent_cooldown);
        } else if self.consecutive_failures >= config.failure_threshold {
            self.exclude(now, config.transient_cooldown);
        }
    }

    fn exclude(&mut self, now: DateTime<Utc>, ttl: Duration) {
        let until = add_duration(now, ttl);
        self.last_unavailable_at = Some(now);
        // Never shorten an exclusion that is already longer
        self.cooldown_until = Some(match self.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Check if the backend is excluded at `now`
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Check if the backend has enough samples and a poor enough rate to be demoted
    pub fn is_demoted(&self, config: &RouterConfig) -> bool {
        self.calls >= config.min_samples && self.success_rate < config.demote_below
    }

    /// Exploitation score: success rate minus a bounded latency penalty
    pub fn score(&self, config: &RouterConfig) -> f64 {
        let scale_ms = (config.latency_scale.as_secs_f64() * 1000.0).max(1.0);
        let penalty = self.mean_latency_ms / (self.mean_latency_ms + scale_ms);
        self.success_rate - config.latency_weight * penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_success_raises_rate_and_resets_failures() {
        let config = RouterConfig::default();
        let mut stats = ModelStats::new(0.5);
        stats.record(&CallOutcome::failure(ErrorClass::TransientBackend, Duration::ZERO), &config, at(0));
        assert_eq!(stats.consecutive_failures, 1);

        stats.record(&CallOutcome::success(Duration::from_millis(100)), &config, at(1));
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.successes, 1);
        assert!(stats.success_rate > 0.4);
    }

    #[test]
    fn test_threshold_triggers_transient_cooldown() {
        let config = RouterConfig::default()
            .with_failure_threshold(2)
            .with_transient_cooldown(Duration::from_secs(10));
        let mut stats = ModelStats::new(0.5);
        let fail = CallOutcome::failure(ErrorClass::TransientBackend, Duration::ZERO);

        stats.record(&fail, &config, at(100));
        assert!(!stats.is_cooling_down(at(100)));

        stats.record(&fail, &config, at(101));
        assert!(stats.is_cooling_down(at(101)));
        assert!(stats.is_cooling_down(at(110)));
        assert!(!stats.is_cooling_down(at(111)));
        assert_eq!(stats.last_unavailable_at, Some(at(101)));
    }

    #[test]
    fn test_permanent_failure_excludes_immediately() {
        let config = RouterConfig::default().with_permanent_cooldown(Duration::from_secs(600));
        let mut stats = ModelStats::new(0.5);
        stats.record(
            &CallOutcome::failure(ErrorClass::PermanentBackend, Duration::ZERO),
            &config,
            at(0),
        );
        assert!(stats.is_cooling_down(at(599)));
        assert!(!stats.is_cooling_down(at(600)));
    }

    #[test]
    fn test_latency_lowers_score() {
        let config = RouterConfig::default();
        let mut fast = ModelStats::new(0.5);
        let mut slow = ModelStats::new(0.5);
        fast.record(&CallOutcome::success(Duration::from_millis(50)), &config, at(0));
        slow.record(&CallOutcome::success(Duration::from_secs(5)), &config, at(0));
        assert!(fast.score(&config) > slow.score(&config));
    }

    #[test]
    fn test_demotion_needs_samples() {
        let config = RouterConfig::default().with_demotion(3, 0.4);
        let mut stats = ModelStats::new(0.5);
        let fail = CallOutcome::failure(ErrorClass::Timeout, Duration::ZERO);
        stats.record(&fail, &config, at(0));
        assert!(!stats.is_demoted(&config));
        stats.record(&fail, &config, at(0));
        stats.record(&fail, &config, at(0));
        assert!(stats.is_demoted(&config));
    }
}

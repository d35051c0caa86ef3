//! Router configuration
//!
//! Exploration rate, exclusion thresholds and cooldown TTLs are all
//! configuration so deployments can tune them without code changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Highest tier the fallback chain may escalate to
    pub max_tier: u8,

    /// Probability of returning the least-sampled alternative instead of the best
    pub explore_probability: f64,

    /// Consecutive failures before a backend cools down
    pub failure_threshold: u32,

    /// Exclusion after repeated transient failures
    #[serde(with = "humantime_serde")]
    pub transient_cooldown: Duration,

    /// Exclusion after a permanent (auth/entitlement) failure
    #[serde(with = "humantime_serde")]
    pub permanent_cooldown: Duration,

    /// Smoothing factor for success-rate and latency averages
    pub ewma_alpha: f64,

    /// Weight of the latency penalty in the score
    pub latency_weight: f64,

    /// Latency at which the penalty reaches half of `latency_weight`
    #[serde(with = "humantime_serde")]
    pub latency_scale: Duration,

    /// Success rate assumed for a backend with no history
    pub prior_success_rate: f64,

    /// Calls needed before a backend can be demoted
    pub min_samples: u64,

    /// Success rate under which a sampled backend is demoted to the end of the chain
    pub demote_below: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_tier: 3,
            explore_probability: 0.05,
            failure_threshold: 3,
            transient_cooldown: Duration::from_secs(30),
            permanent_cooldown: Duration::from_secs(3600),
            ewma_alpha: 0.2,
            latency_weight: 0.3,
            latency_scale: Duration::from_secs(2),
            prior_success_rate: 0.5,
            min_samples: 5,
            demote_below: 0.3,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tier(mut self, max_tier: u8) -> Self {
        self.max_tier = max_tier;
        self
    }

    /// Set exploration probability (clamped to `[0, 1]`)
    pub fn with_explore_probability(mut self, p: f64) -> Self {
        self.explore_probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_transient_cooldown(mut self, ttl: Duration) -> Self {
        self.transient_cooldown = ttl;
        self
    }

    pub fn with_permanent_cooldown(mut self, ttl: Duration) -> Self {
        self.permanent_cooldown = ttl;
        self
    }

    pub fn with_demotion(mut self, min_samples: u64, demote_below: f64) -> Self {
        self.min_samples = min_samples;
        self.demote_below = demote_below;
        self
    }

    /// Disable exploration entirely
    pub fn exploit_only(self) -> Self {
        self.with_explore_probability(0.0)
    }
}

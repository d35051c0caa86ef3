//! Smart Router - tiered, adaptive backend selection
//!
//! ```text
//!  route(tier=1, "summarize")
//!        │
//!        ▼
//!  ┌──────────── fallback chain ────────────┐
//!  │ tier 1: [best … worst]  (by score)     │  ◀── explore: least-sampled
//!  │ tier 2: [best … worst]                 │      alternative of tier 1
//!  │ …up to max_tier                        │
//!  │ demoted backends (any tier)            │
//!  └────────────────────────────────────────┘
//!        │ filtered: serves capability, not cooling down
//!        ▼
//!    backend id  ──call──▶  report(id, outcome) ──▶ ModelStats
//! ```
//!
//! The router exclusively owns [`ModelStats`]. Each backend's entry lives in
//! a `DashMap` so concurrent reports are serialized per backend without a
//! router-wide lock. Randomness and time are injected so routing decisions
//! are reproducible in tests.

pub mod config;
pub mod random;
pub mod stats;

pub use config::RouterConfig;
pub use random::{RandomSource, SeededRandom, SequenceRandom, ThreadRandom};
pub use stats::{CallOutcome, ModelStats};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::FlowError;
use crate::llm::{DynModelBackend, ModelDescriptor};
use crate::persist;

const STATS_FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StatsFile {
    version: u32,
    saved_at: DateTime<Utc>,
    backends: BTreeMap<String, ModelStats>,
}

/// One entry of a computed fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEntry {
    pub backend_id: String,
    pub tier: u8,
    pub score: f64,
    pub calls: u64,
    pub demoted: bool,
}

/// Tiered adaptive router
pub struct SmartRouter {
    config: RouterConfig,
    /// Registered backends in registration order
    backends: RwLock<Vec<DynModelBackend>>,
    stats: DashMap<String, ModelStats>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for SmartRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartRouter")
            .field("config", &self.config)
            .field("backends", &self.backend_ids())
            .finish()
    }
}

impl SmartRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            backends: RwLock::new(Vec::new()),
            stats: DashMap::new(),
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
        }
    }

    /// Use an injected clock for cooldown bookkeeping
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use an injected random source for exploration draws
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a backend. Ids must be unique.
    pub fn register(&self, backend: DynModelBackend) -> Result<(), FlowError> {
        let descriptor = backend.descriptor().clone();
        if descriptor.tier == 0 {
            return Err(FlowError::validation(format!(
                "backend '{}' declares tier 0; tier 0 is reserved for local tools",
                descriptor.id
            )));
        }

        let mut backends = self.backends.write();
        if backends.iter().any(|b| b.id() == descriptor.id) {
            return Err(FlowError::validation(format!(
                "backend '{}' is already registered",
                descriptor.id
            )));
        }
        backends.push(backend);
        self.stats
            .entry(descriptor.id.clone())
            .or_insert_with(|| ModelStats::new(self.config.prior_success_rate));

        info!(backend = %descriptor.id, tier = descriptor.tier, "Registered model backend");
        Ok(())
    }

    /// Look up a registered backend
    pub fn backend(&self, id: &str) -> Option<DynModelBackend> {
        self.backends.read().iter().find(|b| b.id() == id).cloned()
    }

    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.read().iter().map(|b| b.id().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        self.backends.read().iter().map(|b| b.descriptor().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Compute the ordered fallback chain for a tier and capability
    pub fn fallback_chain(&self, tier: u8, capability: &str) -> Vec<ChainEntry> {
        self.chain(tier, capability, &[])
    }

    fn chain(&self, tier: u8, capability: &str, excluded: &[String]) -> Vec<ChainEntry> {
        let now = self.clock.now();
        let floor = tier.max(1);

        // (entry, cost, registration index) for deterministic tie-breaks
        let mut candidates: Vec<(ChainEntry, crate::llm::CostClass, usize)> = Vec::new();
        for (index, backend) in self.backends.read().iter().enumerate() {
            let d = backend.descriptor();
            if d.tier < floor || d.tier > self.config.max_tier || !d.serves(capability) {
                continue;
            }
            if excluded.iter().any(|e| e == &d.id) {
                continue;
            }

            let stats = self
                .stats
                .get(&d.id)
                .map(|s| s.clone())
                .unwrap_or_else(|| ModelStats::new(self.config.prior_success_rate));
            if stats.is_cooling_down(now) {
                continue;
            }

            candidates.push((
                ChainEntry {
                    backend_id: d.id.clone(),
                    tier: d.tier,
                    score: stats.score(&self.config),
                    calls: stats.calls,
                    demoted: stats.is_demoted(&self.config),
                },
                d.cost,
                index,
            ));
        }

        candidates.sort_by(|(a, a_cost, a_idx), (b, b_cost, b_idx)| {
            a.demoted
                .cmp(&b.demoted)
                .then(a.tier.cmp(&b.tier))
                .then(b.score.total_cmp(&a.score))
                .then(a_cost.cmp(b_cost))
                .then(a_idx.cmp(b_idx))
        });

        candidates.into_iter().map(|(entry, _, _)| entry).collect()
    }

    /// Select a backend for a capability at a tier
    pub fn route(&self, tier: u8, capability: &str) -> Result<String, FlowError> {
        self.route_excluding(tier, capability, &[])
    }

    /// Select a backend, skipping ids already tried in this attempt
    pub fn route_excluding(
        &self,
        tier: u8,
        capability: &str,
        tried: &[String],
    ) -> Result<String, FlowError> {
        let chain = self.chain(tier, capability, tried);
        let Some(best) = chain.first() else {
            warn!(capability, tier, "No backend available");
            return Err(FlowError::no_backend(capability, tier));
        };

        if chain.len() > 1 && self.random.next_f64() < self.config.explore_probability {
            // Least-sampled alternative within the first non-empty tier
            let alternative = chain
                .iter()
                .skip(1)
                .filter(|e| e.tier == best.tier && !e.demoted)
                .min_by_key(|e| e.calls);
            if let Some(alt) = alternative {
                debug!(capability, tier, backend = %alt.backend_id, "Routing (explore)");
                return Ok(alt.backend_id.clone());
            }
        }

        debug!(capability, tier, backend = %best.backend_id, score = best.score, "Routing (exploit)");
        Ok(best.backend_id.clone())
    }

    /// Fold a call outcome into the backend's statistics
    pub fn report(&self, backend_id: &str, outcome: CallOutcome) {
        let now = self.clock.now();
        let mut entry = self
            .stats
            .entry(backend_id.to_string())
            .or_insert_with(|| ModelStats::new(self.config.prior_success_rate));
        let was_cooling = entry.is_cooling_down(now);
        entry.record(&outcome, &self.config, now);

        if !was_cooling && entry.is_cooling_down(now) {
            warn!(
                backend = backend_id,
                error = ?outcome.error,
                until = ?entry.cooldown_until,
                "Backend excluded"
            );
        }
    }

    pub fn stats(&self, backend_id: &str) -> Option<ModelStats> {
        self.stats.get(backend_id).map(|s| s.clone())
    }

    /// Copy of every backend's statistics
    pub fn snapshot(&self) -> BTreeMap<String, ModelStats> {
        self.stats
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Persist statistics to a JSON file
    pub async fn save_stats(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let file = StatsFile {
            version: STATS_FILE_VERSION,
            saved_at: self.clock.now(),
            backends: self.snapshot(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        persist::write_atomic(path.as_ref(), &json).await?;
        debug!(path = %path.as_ref().display(), backends = file.backends.len(), "Saved router stats");
        Ok(())
    }

    /// Merge statistics from a JSON file; returns the number of entries loaded
    pub async fn load_stats(&self, path: impl AsRef<Path>) -> Result<usize, FlowError> {
        let Some(data) = persist::read_optional(path.as_ref()).await? else {
            return Ok(0);
        };
        let file: StatsFile = serde_json::from_slice(&data)?;
        if file.version != STATS_FILE_VERSION {
            return Err(FlowError::serialization(format!(
                "unsupported stats file version {}",
                file.version
            )));
        }

        let count = file.backends.len();
        for (id, stats) in file.backends {
            self.stats.insert(id, stats);
        }
        info!(path = %path.as_ref().display(), backends = count, "Loaded router stats");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorClass;
    use crate::llm::{CostClass, EchoBackend};
    use std::time::Duration;

    fn backend(id: &str, tier: u8) -> DynModelBackend {
        Arc::new(EchoBackend::new(id, tier))
    }

    fn router(config: RouterConfig, clock: Arc<ManualClock>, random: SequenceRandom) -> SmartRouter {
        let router = SmartRouter::new(config)
            .with_clock(clock)
            .with_random(Arc::new(random));
        router.register(backend("t1-a", 1)).unwrap();
        router.register(backend("t1-b", 1)).unwrap();
        router.register(backend("t2-a", 2)).unwrap();
        router
    }

    static_assertions::assert_impl_all!(SmartRouter: Send, Sync);

    #[test]
    fn test_duplicate_and_tier_zero_registration_rejected() {
        let router = SmartRouter::new(RouterConfig::default());
        router.register(backend("m", 1)).unwrap();
        assert!(router.register(backend("m", 2)).is_err());
        assert!(router.register(backend("local", 0)).is_err());
    }

    #[test]
    fn test_chain_orders_by_tier_then_registration() {
        let clock = Arc::new(ManualClock::at_epoch());
        let r = router(RouterConfig::default().exploit_only(), clock, SequenceRandom::never());

        let ids: Vec<_> = r.fallback_chain(1, "summarize").into_iter().map(|e| e.backend_id).collect();
        assert_eq!(ids, vec!["t1-a", "t1-b", "t2-a"]);

        let ids: Vec<_> = r.fallback_chain(2, "summarize").into_iter().map(|e| e.backend_id).collect();
        assert_eq!(ids, vec!["t2-a"]);
    }

    #[test]
    fn test_cost_class_breaks_ties() {
        let router = SmartRouter::new(RouterConfig::default().exploit_only());
        router
            .register(Arc::new(EchoBackend::with_descriptor(
                ModelDescriptor::new("pricey", 1).with_cost(CostClass::High),
            )))
            .unwrap();
        router
            .register(Arc::new(EchoBackend::with_descriptor(
                ModelDescriptor::new("cheap", 1).with_cost(CostClass::Low),
            )))
            .unwrap();
        assert_eq!(router.route(1, "plan").unwrap(), "cheap");
    }

    #[test]
    fn test_exploit_prefers_higher_score() {
        let clock = Arc::new(ManualClock::at_epoch());
        let r = router(RouterConfig::default().exploit_only(), clock, SequenceRandom::never());

        r.report("t1-a", CallOutcome::failure(ErrorClass::TransientBackend, Duration::from_millis(10)));
        r.report("t1-b", CallOutcome::success(Duration::from_millis(10)));

        assert_eq!(r.route(1, "summarize").unwrap(), "t1-b");
    }

    #[test]
    fn test_explore_picks_least_sampled_alternative() {
        let clock = Arc::new(ManualClock::at_epoch());
        let config = RouterConfig::default().with_explore_probability(0.5);
        let r = router(config, clock, SequenceRandom::new([0.1, 0.9]));

        for _ in 0..3 {
            r.report("t1-a", CallOutcome::success(Duration::from_millis(5)));
        }

        // First draw explores, second exploits
        assert_eq!(r.route(1, "summarize").unwrap(), "t1-b");
        assert_eq!(r.route(1, "summarize").unwrap(), "t1-a");
    }

    #[test]
    fn test_consecutive_failures_exclude_until_cooldown_expires() {
        let clock = Arc::new(ManualClock::at_epoch());
        let config = RouterConfig::default()
            .exploit_only()
            .with_failure_threshold(2)
            .with_transient_cooldown(Duration::from_secs(30));
        let r = router(config, clock.clone(), SequenceRandom::never());

        let fail = CallOutcome::failure(ErrorClass::TransientBackend, Duration::ZERO);
        r.report("t1-a", fail);
        assert_eq!(r.route(1, "summarize").unwrap(), "t1-b");
        r.report("t1-b", fail);
        r.report("t1-b", fail);
        r.report("t1-a", fail);

        // Both tier-1 backends cooling down: escalate to tier 2
        assert_eq!(r.route(1, "summarize").unwrap(), "t2-a");

        clock.advance(Duration::from_secs(31));
        let chain = r.fallback_chain(1, "summarize");
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_permanent_failure_excludes_immediately() {
        let clock = Arc::new(ManualClock::at_epoch());
        let r = router(RouterConfig::default().exploit_only(), clock.clone(), SequenceRandom::never());

        r.report("t1-a", CallOutcome::failure(ErrorClass::PermanentBackend, Duration::ZERO));
        assert_eq!(r.route(1, "summarize").unwrap(), "t1-b");

        clock.advance(Duration::from_secs(60));
        assert_eq!(r.route(1, "summarize").unwrap(), "t1-b");
    }

    #[test]
    fn test_all_excluded_is_no_backend_available() {
        let clock = Arc::new(ManualClock::at_epoch());
        let r = router(RouterConfig::default().exploit_only(), clock, SequenceRandom::never());
        for id in ["t1-a", "t1-b", "t2-a"] {
            r.report(id, CallOutcome::failure(ErrorClass::PermanentBackend, Duration::ZERO));
        }

        let err = r.route(1, "summarize").unwrap_err();
        assert_eq!(err.class(), ErrorClass::NoBackendAvailable);
    }

    #[test]
    fn test_route_excluding_and_max_tier() {
        let clock = Arc::new(ManualClock::at_epoch());
        let config = RouterConfig::default().exploit_only().with_max_tier(1);
        let r = router(config, clock, SequenceRandom::never());

        let tried = vec!["t1-a".to_string()];
        assert_eq!(r.route_excluding(1, "x", &tried).unwrap(), "t1-b");

        let tried = vec!["t1-a".to_string(), "t1-b".to_string()];
        assert!(r.route_excluding(1, "x", &tried).is_err());
    }

    #[test]
    fn test_demoted_backend_moves_to_end_of_chain() {
        let clock = Arc::new(ManualClock::at_epoch());
        let config = RouterConfig::default()
            .exploit_only()
            .with_failure_threshold(100)
            .with_demotion(3, 0.4);
        let r = router(config, clock, SequenceRandom::never());

        for _ in 0..3 {
            r.report("t1-a", CallOutcome::failure(ErrorClass::Timeout, Duration::ZERO));
        }

        let chain = r.fallback_chain(1, "summarize");
        assert_eq!(chain.last().unwrap().backend_id, "t1-a");
        assert!(chain.last().unwrap().demoted);

        // Recovery promotes it back
        for _ in 0..8 {
            r.report("t1-a", CallOutcome::success(Duration::ZERO));
        }
        let chain = r.fallback_chain(1, "summarize");
        assert!(!chain.iter().any(|e| e.demoted));
        assert_eq!(chain[2].backend_id, "t2-a");
    }

    #[test]
    fn test_capability_allow_list_filters() {
        let router = SmartRouter::new(RouterConfig::default().exploit_only());
        router
            .register(Arc::new(EchoBackend::with_descriptor(
                ModelDescriptor::new("reviewer", 1).with_capabilities(vec!["review".into()]),
            )))
            .unwrap();
        assert_eq!(router.route(1, "review").unwrap(), "reviewer");
        assert!(router.route(1, "summarize").is_err());
    }

    #[tokio::test]
    async fn test_stats_persist_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stats").join("model_stats.json");

        let clock = Arc::new(ManualClock::at_epoch());
        let r = router(RouterConfig::default(), clock.clone(), SequenceRandom::never());
        r.report("t1-a", CallOutcome::success(Duration::from_millis(120)));
        r.save_stats(&path).await.unwrap();

        let fresh = router(RouterConfig::default(), clock, SequenceRandom::never());
        assert_eq!(fresh.load_stats(&path).await.unwrap(), 3);
        assert_eq!(fresh.stats("t1-a").unwrap().calls, 1);
        assert_eq!(fresh.stats("t1-a").unwrap().mean_latency_ms, 120.0);

        assert_eq!(fresh.load_stats(dir.path().join("missing.json")).await.unwrap(), 0);
    }
}

//! Engine configuration
//!
//! [`EngineConfig`] collects run-wide defaults (concurrency, failure policy,
//! step timeout, retry policy), the nested [`RouterConfig`], and persistence
//! locations. Values come from `Default`, a YAML file, or `DEEPFLOW_*`
//! environment variables layered on top.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::FlowError;
use crate::router::RouterConfig;
use crate::workflow::FailurePolicy;

/// Retry policy for failed step attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set backoff base duration
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set maximum backoff duration
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Delay before retry number `retry` (0-based), exponential and capped
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry);
        let delay = self.backoff_base.saturating_mul(multiplier);
        delay.min(self.backoff_max)
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self::new(0)
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default concurrency limit when a workflow does not set one
    pub concurrency: usize,

    /// Default failure policy when a workflow does not set one
    pub failure_policy: FailurePolicy,

    /// Default per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub step_timeout: Duration,

    /// Default retry policy for steps without a `retry` block
    pub retry: RetryPolicy,

    pub router: RouterConfig,

    /// Root for run records, artifacts and router stats
    pub data_dir: PathBuf,

    /// Write a run record after every run
    pub persist_runs: bool,

    /// Compress run records with zstd
    pub compress_runs: bool,

    /// Write artifacts found in successful step outputs
    pub extract_artifacts: bool,

    /// Load router stats before a run and save them after
    pub persist_stats: bool,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(env::temp_dir)
        .join("deepflow")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            failure_policy: FailurePolicy::FailFast,
            step_timeout: Duration::from_secs(300), // 5 min per attempt
            retry: RetryPolicy::default(),
            router: RouterConfig::default(),
            data_dir: default_data_dir(),
            persist_runs: true,
            compress_runs: false,
            extract_artifacts: true,
            persist_stats: true,
        }
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, FlowError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| FlowError::validation(format!("{} has an invalid value '{}': {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

fn env_duration(key: &str) -> Result<Option<Duration>, FlowError> {
    match env::var(key) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| FlowError::validation(format!("{} has an invalid duration '{}': {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DEEPFLOW_*` environment variables
    pub fn from_env() -> Result<Self, FlowError> {
        Self::default().merge_env()
    }

    /// Read a YAML file; missing keys keep their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&text)
            .map_err(|e| FlowError::schema(path.display().to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DEEPFLOW_*` overrides on top of this config
    pub fn merge_env(mut self) -> Result<Self, FlowError> {
        if let Some(v) = env_value("DEEPFLOW_CONCURRENCY")? {
            self.concurrency = v;
        }
        if let Some(v) = env_value::<String>("DEEPFLOW_FAILURE_POLICY")? {
            self.failure_policy = match v.as_str() {
                "fail-fast" | "fail_fast" => FailurePolicy::FailFast,
                "best-effort" | "best_effort" => FailurePolicy::BestEffort,
                other => {
                    return Err(FlowError::validation(format!(
                        "DEEPFLOW_FAILURE_POLICY must be fail-fast or best-effort, got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = env_duration("DEEPFLOW_STEP_TIMEOUT")? {
            self.step_timeout = v;
        }
        if let Some(v) = env_value("DEEPFLOW_MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(v) = env_duration("DEEPFLOW_RETRY_BACKOFF")? {
            self.retry.backoff_base = v;
        }
        if let Some(v) = env_value::<String>("DEEPFLOW_DATA_DIR")? {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_value("DEEPFLOW_PERSIST_RUNS")? {
            self.persist_runs = v;
        }
        if let Some(v) = env_value("DEEPFLOW_COMPRESS_RUNS")? {
            self.compress_runs = v;
        }
        if let Some(v) = env_value("DEEPFLOW_EXPLORE_PROBABILITY")? {
            self.router.explore_probability = v;
        }
        if let Some(v) = env_value("DEEPFLOW_MAX_TIER")? {
            self.router.max_tier = v;
        }
        if let Some(v) = env_duration("DEEPFLOW_TRANSIENT_COOLDOWN")? {
            self.router.transient_cooldown = v;
        }
        if let Some(v) = env_duration("DEEPFLOW_PERMANENT_COOLDOWN")? {
            self.router.permanent_cooldown = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.concurrency == 0 {
            return Err(FlowError::validation("concurrency must be at least 1"));
        }
        if self.step_timeout.is_zero() {
            return Err(FlowError::validation("step_timeout must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.router.explore_probability) {
            return Err(FlowError::validation(format!(
                "explore_probability must be within [0, 1], got {}",
                self.router.explore_probability
            )));
        }
        if self.router.max_tier == 0 {
            return Err(FlowError::validation("router max_tier must be at least 1"));
        }
        Ok(())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_persistence(mut self, runs: bool, stats: bool) -> Self {
        self.persist_runs = runs;
        self.persist_stats = stats;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_runs = enabled;
        self
    }

    pub fn with_artifacts(mut self, enabled: bool) -> Self {
        self.extract_artifacts = enabled;
        self
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("model_stats.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.concurrency > 0);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert!(config.data_dir.ends_with("deepflow"));
        assert_eq!(config.stats_path(), config.data_dir.join("model_stats.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_delays_are_exponential_and_capped() {
        let policy = RetryPolicy::new(5)
            .with_backoff_base(Duration::from_millis(100))
            .with_backoff_max(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(500));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn test_yaml_file_with_partial_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("deepflow.yaml");
        std::fs::write(
            &path,
            "concurrency: 2\nfailure_policy: best-effort\nstep_timeout: 45s\nrouter:\n  max_tier: 2\n",
        )
        .unwrap();

        let config = EngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
        assert_eq!(config.step_timeout, Duration::from_secs(45));
        assert_eq!(config.router.max_tier, 2);
        assert_eq!(config.router.failure_threshold, 3);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(EngineConfig::default().with_step_timeout(Duration::ZERO).validate().is_err());

        let mut config = EngineConfig::default();
        config.router.explore_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_concurrency(0)
            .with_data_dir("/tmp/df")
            .with_persistence(false, false);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.runs_dir(), PathBuf::from("/tmp/df/runs"));
        assert!(!config.persist_runs);
    }
}

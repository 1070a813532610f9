//! Configuration for the sync engine.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the dispatcher does with jobs of a dormant module.
///
/// A module is dormant when it is disabled or lost its exclusive group to a
/// higher-ranked module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DormantPolicy {
    /// Process residual jobs normally.
    #[default]
    Process,
    /// Dead-letter them with a reason.
    Drop,
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of jobs claimed per run.
    pub batch_size: usize,
    /// How long a claim is held before another worker may take the job over.
    pub claim_ttl: Duration,
    /// Maximum nesting of inline dependency pushes.
    pub max_dependency_depth: usize,
    /// Handling of jobs owned by dormant modules.
    pub dormant_policy: DormantPolicy,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Tick interval of the background service.
    pub poll_interval: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            batch_size: 50,
            claim_ttl: Duration::from_secs(300),
            max_dependency_depth: 8,
            dormant_policy: DormantPolicy::Process,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(60),
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the claim lifetime.
    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    /// Sets the maximum dependency depth.
    pub fn with_max_dependency_depth(mut self, depth: usize) -> Self {
        self.max_dependency_depth = depth;
        self
    }

    /// Sets the dormant policy.
    pub fn with_dormant_policy(mut self, policy: DormantPolicy) -> Self {
        self.dormant_policy = policy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the service tick interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before a transiently failing job is dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Creates a configuration that dead-letters on the first failure.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction. Zero disables jitter.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Returns true if a job that has failed `attempt_count` times may retry
    /// once more.
    pub fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count.saturating_add(1) < self.max_attempts
    }

    /// Delay before retry number `attempt` (1-indexed).
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max_delay`, plus up to
    /// `jitter` of random extra delay. Never zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter > 0.0 {
            let extra: f64 = rand::thread_rng().gen_range(0.0..=self.jitter);
            capped * (1.0 + extra)
        } else {
            capped
        };

        Duration::try_from_secs_f64(delay)
            .unwrap_or(self.max_delay)
            .max(Duration::from_millis(1))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

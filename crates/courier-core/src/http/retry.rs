//! Retry policy with exponential backoff
//!
//! A [`RetryPolicy`] is pure: given an attempt index it tells the request loop
//! whether another attempt is allowed and how long to wait before it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RetryPolicyConfig", into = "RetryPolicyFields")]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to randomize delays to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Decision on whether to retry a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay
    Retry { delay: Duration },
    /// Do not retry the request
    NoRetry,
}

impl RetryPolicy {
    /// Create a policy with explicit settings; out-of-range values are clamped
    pub fn new(
        max_attempts: usize,
        base_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            multiplier,
            jitter,
        }
        .clamped()
    }

    /// 5 attempts starting at 500ms, capped at 30s
    pub fn aggressive() -> Self {
        Self::new(
            5,
            Duration::from_millis(500),
            Duration::from_secs(30),
            2.0,
            true,
        )
    }

    /// 2 attempts starting at 2s, capped at 10s, no jitter
    pub fn conservative() -> Self {
        Self::new(
            2,
            Duration::from_secs(2),
            Duration::from_secs(10),
            2.0,
            false,
        )
    }

    /// A single attempt, never retried
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0, false)
    }

    /// Look up a named preset
    pub fn preset(preset: RetryPreset) -> Self {
        match preset {
            RetryPreset::Default => Self::default(),
            RetryPreset::Aggressive => Self::aggressive(),
            RetryPreset::Conservative => Self::conservative(),
            RetryPreset::None => Self::none(),
        }
    }

    /// Set the number of attempts
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self.clamped()
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self.clamped()
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self.clamped()
    }

    /// Set the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self.clamped()
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn clamped(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }

    /// Whether another attempt may follow the zero-based `attempt`
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts.saturating_sub(1)
    }

    /// Backoff to wait after the zero-based `attempt` failed
    pub fn delay(&self, attempt: usize) -> Duration {
        let cap = self.max_delay.as_secs_f64();
        let exponent = attempt.min(i32::MAX as usize) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let mut secs = if raw.is_finite() { raw.min(cap) } else { cap };

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            secs = (secs * factor).min(cap);
        }

        // caps near Duration::MAX do not survive the round trip through f64
        Duration::try_from_secs_f64(secs.max(0.0))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Combined eligibility and delay for the zero-based `attempt`
    pub fn decide(&self, attempt: usize) -> RetryDecision {
        if self.should_retry(attempt) {
            RetryDecision::Retry {
                delay: self.delay(attempt),
            }
        } else {
            RetryDecision::NoRetry
        }
    }
}

/// Named retry presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPreset {
    Default,
    Aggressive,
    Conservative,
    None,
}

/// On-disk shape of a policy: a preset name or explicit fields
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RetryPolicyConfig {
    Preset { preset: RetryPreset },
    Explicit(RetryPolicyFields),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryPolicyFields {
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    multiplier: f64,
    #[serde(default = "default_jitter")]
    jitter: bool,
}

fn default_max_attempts() -> usize {
    RetryPolicy::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    RetryPolicy::default().base_delay.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    RetryPolicy::default().max_delay.as_millis() as u64
}

fn default_multiplier() -> f64 {
    RetryPolicy::default().multiplier
}

fn default_jitter() -> bool {
    RetryPolicy::default().jitter
}

impl From<RetryPolicyConfig> for RetryPolicy {
    fn from(config: RetryPolicyConfig) -> Self {
        match config {
            RetryPolicyConfig::Preset { preset } => RetryPolicy::preset(preset),
            RetryPolicyConfig::Explicit(fields) => RetryPolicy::new(
                fields.max_attempts,
                Duration::from_millis(fields.base_delay_ms),
                Duration::from_millis(fields.max_delay_ms),
                fields.multiplier,
                fields.jitter,
            ),
        }
    }
}

impl From<RetryPolicy> for RetryPolicyFields {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
        assert!(policy.jitter);
    }

    #[test]
    fn test_presets() {
        let aggressive = RetryPolicy::aggressive();
        assert_eq!(aggressive.max_attempts, 5);
        assert_eq!(aggressive.base_delay, Duration::from_millis(500));
        assert_eq!(aggressive.max_delay, Duration::from_secs(30));
        assert!(aggressive.jitter);

        let conservative = RetryPolicy::conservative();
        assert_eq!(conservative.max_attempts, 2);
        assert_eq!(conservative.base_delay, Duration::from_secs(2));
        assert_eq!(conservative.max_delay, Duration::from_secs(10));
        assert!(!conservative.jitter);

        let none = RetryPolicy::none();
        assert_eq!(none.max_attempts, 1);
        assert!(!none.should_retry(0));
    }

    #[test]
    fn test_should_retry_boundary() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!policy.should_retry(10));
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let policy = RetryPolicy::default().with_jitter(false);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(60));
        assert_eq!(policy.delay(5000), Duration::from_secs(60));
    }

    #[test]
    fn test_decide() {
        let policy = RetryPolicy::conservative();
        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(policy.decide(1), RetryDecision::NoRetry);
    }

    #[test]
    fn test_inputs_are_clamped() {
        let policy = RetryPolicy::new(
            0,
            Duration::from_secs(5),
            Duration::from_secs(1),
            0.25,
            false,
        );
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert_eq!(policy.multiplier, 1.0);

        let nan = RetryPolicy::default().with_multiplier(f64::NAN);
        assert_eq!(nan.multiplier, 1.0);
    }

    #[test]
    fn test_deserialize_preset_and_fields() {
        let preset: RetryPolicy = serde_yaml::from_str("preset: aggressive").unwrap();
        assert_eq!(preset, RetryPolicy::aggressive());

        let explicit: RetryPolicy = serde_json::from_str(
            r#"{"max_attempts": 4, "base_delay_ms": 100, "max_delay_ms": 800, "jitter": false}"#,
        )
        .unwrap();
        assert_eq!(explicit.max_attempts, 4);
        assert_eq!(explicit.base_delay, Duration::from_millis(100));
        assert_eq!(explicit.max_delay, Duration::from_millis(800));
        assert_eq!(explicit.multiplier, 2.0);
        assert!(!explicit.jitter);

        assert!(serde_json::from_str::<RetryPolicy>(r#"{"preset": "bogus"}"#).is_err());
    }

    #[test]
    fn test_serialize_round_trips_through_fields() {
        let policy = RetryPolicy::conservative();
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["base_delay_ms"], 2000);
        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_delay_with_unbounded_cap() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::MAX, 2.0, false);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(100), Duration::MAX);
        assert_eq!(policy.delay(usize::MAX), Duration::MAX);

        let jittered = policy.with_jitter(true);
        assert!(jittered.delay(2_000) <= Duration::MAX);
    }

    proptest! {
        #[test]
        fn prop_delay_respects_huge_caps(
            base_secs in 0u64..1_000,
            max_secs in any::<u64>(),
            max_nanos in 0u32..1_000_000_000,
            attempt in 0usize..2_000,
            jitter in any::<bool>(),
        ) {
            let policy = RetryPolicy::new(
                3,
                Duration::from_secs(base_secs),
                Duration::new(max_secs, max_nanos),
                2.0,
                jitter,
            );
            prop_assert!(policy.delay(attempt) <= policy.max_delay);
        }

        #[test]
        fn prop_delay_never_exceeds_max(
            max_attempts in 1usize..20,
            base_ms in 0u64..10_000,
            extra_ms in 0u64..120_000,
            multiplier in 1.0f64..10.0,
            jitter in any::<bool>(),
        ) {
            let policy = RetryPolicy::new(
                max_attempts,
                Duration::from_millis(base_ms),
                Duration::from_millis(base_ms + extra_ms),
                multiplier,
                jitter,
            );
            for attempt in 0..policy.max_attempts {
                prop_assert!(policy.delay(attempt) <= policy.max_delay);
            }
        }

        #[test]
        fn prop_delay_without_jitter_is_capped_exponential(
            base_ms in 0u64..5_000,
            extra_ms in 0u64..60_000,
            attempt in 0usize..16,
        ) {
            let policy = RetryPolicy::new(
                16,
                Duration::from_millis(base_ms),
                Duration::from_millis(base_ms + extra_ms),
                2.0,
                false,
            );
            let expected = (base_ms as f64 / 1000.0 * 2f64.powi(attempt as i32))
                .min(policy.max_delay.as_secs_f64());
            let actual = policy.delay(attempt).as_secs_f64();
            prop_assert!((actual - expected).abs() < 1e-6);
        }
    }
}

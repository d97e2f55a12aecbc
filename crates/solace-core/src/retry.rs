//! Retry policy for bounded, degradable operations.
//!
//! Every remote or late-bound step in the client (session retrieval,
//! provider loading, reachability probes) runs under a policy of the same
//! shape: a fixed attempt ceiling, a per-attempt timeout, and a backoff
//! delay inserted before each re-attempt. When the ceiling is exhausted the
//! caller degrades (fallback value, anonymous session) instead of erroring.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay between attempts.
    Fixed {
        /// Delay duration.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,

        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },

    /// Linear backoff (delay grows by a fixed increment per attempt).
    Linear {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Increment per retry.
        #[serde(with = "humantime_serde")]
        increment: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Linear {
            initial_delay: Duration::from_millis(500),
            increment: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay inserted before re-attempt number `attempt`
    /// (1-based: the delay after the first failed attempt is
    /// `delay_for_attempt(1)`).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                #[allow(clippy::cast_possible_wrap)] // attempt count won't exceed i32
                let delay_secs =
                    initial_delay.as_secs_f64() * multiplier.powi((attempt - 1) as i32);
                let delay = Duration::from_secs_f64(delay_secs);
                delay.min(*max_delay)
            },
            Self::Linear {
                initial_delay,
                increment,
                max_delay,
            } => {
                let delay = *initial_delay + *increment * (attempt - 1);
                delay.min(*max_delay)
            },
        }
    }
}

/// Bounded-retry policy applied to one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (not "retries after
    /// the first try"). A policy with `max_attempts = 2` whose operation
    /// fails twice degrades, even if a third call would have succeeded.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout applied to each individual attempt.
    #[serde(default = "default_attempt_timeout")]
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,

    /// Backoff inserted before each re-attempt.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_attempt_timeout() -> Duration {
    Duration::from_secs(3)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout: default_attempt_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryConfig {
    /// A policy that attempts exactly once with the given timeout.
    #[must_use]
    pub fn single_attempt(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout: timeout,
            backoff: BackoffConfig::default(),
        }
    }

    /// Upper bound on the wall-clock time a caller honoring this policy can
    /// spend: every attempt timing out plus every backoff delay. Callers use
    /// this to prove their stage settles in bounded time.
    #[must_use]
    pub fn worst_case_budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = self.attempt_timeout * attempts;
        for attempt in 1..attempts {
            total += self.backoff.delay_for_attempt(attempt);
        }
        total
    }
}

pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

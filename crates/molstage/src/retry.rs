//! Retry policy for transient rendering-resource failures.
//!
//! A policy is a plain value: attempt budget, delay function and classifier.
//! The viewer load task consults it after every failed attempt.

use std::sync::Arc;
use std::time::Duration;

use molstage_render::RenderError;

use crate::config::RetryConfig;

/// How a failed load attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Graphics context trouble; worth retrying after a pause.
    Transient,
    /// Bad content, unsupported format, representation failure.
    Permanent,
}

/// Retry policy for structure loads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    signatures: Arc<[String]>,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` counts the first attempt and is at least 1.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        signatures: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            signatures: signatures.into_iter().collect(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.transient_signatures.iter().cloned(),
        )
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify an error by substring match against the transient signatures.
    ///
    /// The default signature set includes the bare words `WebGL` and
    /// `context`, so any library message mentioning them is retried. This is
    /// known to be broad.
    pub fn classify(&self, error: &RenderError) -> ErrorClass {
        let message = error.message();
        if self
            .signatures
            .iter()
            .any(|signature| !signature.is_empty() && message.contains(signature.as_str()))
        {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    /// Delay after failed attempt number `attempt` (1-based): `base × attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Whether a failure of `class` on attempt `attempt` (1-based) gets another try.
    pub fn should_retry(&self, class: ErrorClass, attempt: u32) -> bool {
        class == ErrorClass::Transient && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

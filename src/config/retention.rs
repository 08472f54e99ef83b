//! Retention engine configuration.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! signing_secret = "${RETENTION_SIGNING_SECRET}"
//! batch_size = 1000
//! audit_retry_attempts = 3
//! audit_retry_backoff_ms = 100
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Minimum length of the prune-token signing secret, in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Retention engine configuration.
///
/// The signing secret keys the HMAC that binds an export to the prune it
/// authorizes. It is read once at startup and never changes at runtime.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Secret used to sign prune tokens. At least 32 bytes.
    pub signing_secret: String,

    /// Records fetched per export batch and deleted per prune transaction.
    /// Default: 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts made to write the audit entry after a prune.
    /// Default: 3
    #[serde(default = "default_audit_retry_attempts")]
    pub audit_retry_attempts: u32,

    /// Base delay between audit write attempts. Grows linearly per attempt.
    /// Default: 100
    #[serde(default = "default_audit_retry_backoff_ms")]
    pub audit_retry_backoff_ms: u64,
}

impl std::fmt::Debug for RetentionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionConfig")
            .field("signing_secret", &"****")
            .field("batch_size", &self.batch_size)
            .field("audit_retry_attempts", &self.audit_retry_attempts)
            .field("audit_retry_backoff_ms", &self.audit_retry_backoff_ms)
            .finish()
    }
}

impl RetentionConfig {
    /// Config with the given secret and every other field at its default.
    pub fn with_secret(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            batch_size: default_batch_size(),
            audit_retry_attempts: default_audit_retry_attempts(),
            audit_retry_backoff_ms: default_audit_retry_backoff_ms(),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::Validation(format!(
                "retention.signing_secret must be at least {MIN_SIGNING_SECRET_LEN} bytes"
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "retention.batch_size must be greater than 0".into(),
            ));
        }
        if self.audit_retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "retention.audit_retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Delay before audit retry number `attempt` (1-based).
    pub fn audit_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.audit_retry_backoff_ms.saturating_mul(attempt as u64))
    }
}

fn default_batch_size() -> u32 {
    1000
}

fn default_audit_retry_attempts() -> u32 {
    3
}

fn default_audit_retry_backoff_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults() {
        let config: RetentionConfig =
            toml::from_str(&format!(r#"signing_secret = "{SECRET}""#)).unwrap();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.audit_retry_attempts, 3);
        assert_eq!(config.audit_retry_backoff_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = RetentionConfig::with_secret("too-short");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing_secret"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = RetentionConfig::with_secret(SECRET);
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = RetentionConfig::with_secret(SECRET);
        let debug = format!("{config:?}");
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_audit_backoff_is_linear() {
        let config = RetentionConfig::with_secret(SECRET);
        assert_eq!(config.audit_backoff(1), Duration::from_millis(100));
        assert_eq!(config.audit_backoff(3), Duration::from_millis(300));
    }
}

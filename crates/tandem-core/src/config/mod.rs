//! Reconciliation and scheduling configuration.
//!
//! `SyncConfig` travels through config files and environment overrides, so
//! it is serde-friendly. `ScheduleConfig` is wired in code by whoever spawns
//! the scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ConflictStrategy;
use crate::util::normalize_text_option;

pub const DEFAULT_NAMESPACE: &str = "tandem";
const DEFAULT_PUSH_CONCURRENCY: usize = 8;
const DEFAULT_MESSAGE_RETENTION: usize = 500;
const DEFAULT_MESSAGE_TTL_SECS: u64 = 86_400;

/// Settings applied uniformly to every reconciliation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Leading key segment shared by every device of one logical dataset
    pub namespace: String,
    pub strategy: ConflictStrategy,
    /// Flag equal-version content divergence as a conflict
    pub strict_content_check: bool,
    /// Upper bound on snapshot writes in flight during the push phase
    pub push_concurrency: usize,
    /// Envelopes kept on the shared change list
    pub message_retention: usize,
    /// TTL refreshed on the change list after each push
    pub message_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            strategy: ConflictStrategy::default(),
            strict_content_check: false,
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            message_retention: DEFAULT_MESSAGE_RETENTION,
            message_ttl_secs: DEFAULT_MESSAGE_TTL_SECS,
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given namespace with defaults elsewhere
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_strict_content_check(mut self, strict: bool) -> Self {
        self.strict_content_check = strict;
        self
    }

    /// Key of the shared change list
    pub fn messages_key(&self) -> String {
        format!("{}:messages", self.namespace)
    }

    /// Normalize and check values loaded from untrusted sources.
    pub fn validated(mut self) -> Result<Self> {
        self.namespace = normalize_text_option(Some(self.namespace))
            .ok_or_else(|| Error::InvalidInput("namespace must not be empty".into()))?;
        if self.namespace.contains(':') || self.namespace.contains('*') {
            return Err(Error::InvalidInput(format!(
                "namespace '{}' must not contain ':' or '*'",
                self.namespace
            )));
        }
        if self.push_concurrency == 0 {
            return Err(Error::InvalidInput(
                "push_concurrency must be at least 1".into(),
            ));
        }
        if self.message_retention == 0 {
            return Err(Error::InvalidInput(
                "message_retention must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}

/// When the scheduler fires reconciliation cycles and polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Periodic cycle interval while online (default: 60 seconds)
    pub sync_interval: Option<Duration>,
    /// Quiet window after the last local mutation
    pub debounce: Duration,
    /// Change list polling interval (default: 5 seconds)
    pub poll_interval: Option<Duration>,
    /// Re-check delay for a cycle postponed by the busy predicate
    pub busy_retry: Duration,
    /// Whether the device starts online
    pub start_online: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_interval: Some(Duration::from_secs(60)),
            debounce: Duration::from_secs(2),
            poll_interval: Some(Duration::from_secs(5)),
            busy_retry: Duration::from_secs(1),
            start_online: true,
        }
    }
}

impl ScheduleConfig {
    /// Set the automatic sync interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable periodic cycles (mutation/event triggers only)
    #[must_use]
    pub const fn without_periodic_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn without_polling(mut self) -> Self {
        self.poll_interval = None;
        self
    }

    #[must_use]
    pub const fn with_busy_retry(mut self, retry: Duration) -> Self {
        self.busy_retry = retry;
        self
    }

    #[must_use]
    pub const fn starting_offline(mut self) -> Self {
        self.start_online = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.namespace, "tandem");
        assert_eq!(config.strategy, ConflictStrategy::LocalWins);
        assert!(!config.strict_content_check);
        assert_eq!(config.messages_key(), "tandem:messages");
    }

    #[test]
    fn sync_config_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"namespace":"ns","strategy":"merge"}"#).unwrap();
        assert_eq!(config.namespace, "ns");
        assert_eq!(config.strategy, ConflictStrategy::Merge);
        assert_eq!(config.push_concurrency, DEFAULT_PUSH_CONCURRENCY);
    }

    #[test]
    fn sync_config_rejects_unknown_fields() {
        let error = serde_json::from_str::<SyncConfig>(r#"{"nmespace":"ns"}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validated_rejects_bad_namespaces() {
        assert!(SyncConfig::new("  ").validated().is_err());
        assert!(SyncConfig::new("a:b").validated().is_err());
        assert_eq!(SyncConfig::new(" ns ").validated().unwrap().namespace, "ns");

        let mut config = SyncConfig::new("ns");
        config.push_concurrency = 0;
        assert!(config.validated().is_err());
    }

    #[test]
    fn schedule_builders() {
        let config = ScheduleConfig::default()
            .without_periodic_sync()
            .with_debounce(Duration::from_millis(300))
            .without_polling()
            .starting_offline();
        assert_eq!(config.sync_interval, None);
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.poll_interval, None);
        assert!(!config.start_online);
    }
}

//! Runtime configuration.

use std::time::Duration;

/// How a context consumer retries when no provider is registered yet.
///
/// A descendant can render before its ancestor provider has registered, so
/// the consumer re-checks the registry every `interval`, at most `attempts`
/// times, before settling on "unresolved".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between two lookups.
    pub interval: Duration,
    /// Maximum number of retries after the initial lookup.
    pub attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            attempts: 10,
        }
    }
}

impl PollOptions {
    /// Create poll options from an interval and an attempt budget.
    pub fn new(interval: Duration, attempts: u32) -> Self {
        Self { interval, attempts }
    }

    /// Shorthand for an interval given in milliseconds.
    pub fn from_millis(polling_ms: u64, attempts: u32) -> Self {
        Self::new(Duration::from_millis(polling_ms), attempts)
    }

    /// Poll options that never retry.
    pub fn no_retry() -> Self {
        Self {
            attempts: 0,
            ..Default::default()
        }
    }
}

/// Settings shared by every instance mounted under one root.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Poll options used by [`use_context_default`](crate::context::use_context_default).
    pub context_polling: PollOptions,
    /// Fail when a render calls a different number of hooks than the previous one.
    pub strict_hook_count: bool,
    /// Resume the first caught effect panic once the rest of the queue has run.
    pub propagate_effect_panics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            context_polling: PollOptions::default(),
            strict_hook_count: true,
            propagate_effect_panics: true,
        }
    }
}

impl RuntimeConfig {
    /// Set the default context poll options.
    pub fn with_context_polling(mut self, polling: PollOptions) -> Self {
        self.context_polling = polling;
        self
    }

    /// Enable or disable the hook count check.
    pub fn with_strict_hook_count(mut self, strict: bool) -> Self {
        self.strict_hook_count = strict;
        self
    }

    /// Choose whether caught effect panics are resumed after the flush.
    pub fn with_propagate_effect_panics(mut self, propagate: bool) -> Self {
        self.propagate_effect_panics = propagate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert!(config.strict_hook_count);
        assert!(config.propagate_effect_panics);
        assert_eq!(config.context_polling.interval, Duration::from_millis(100));
        assert_eq!(config.context_polling.attempts, 10);
    }

    #[test]
    fn builders_override_fields() {
        let config = RuntimeConfig::default()
            .with_context_polling(PollOptions::from_millis(25, 3))
            .with_strict_hook_count(false)
            .with_propagate_effect_panics(false);

        assert_eq!(config.context_polling, PollOptions::new(Duration::from_millis(25), 3));
        assert!(!config.strict_hook_count);
        assert!(!config.propagate_effect_panics);
        assert_eq!(PollOptions::no_retry().attempts, 0);
    }
}

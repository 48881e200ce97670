//! Configuration for a transport buffer.

use crate::constants::{DEFAULT_HISTORY_SIZE, DEFAULT_MAX_CONCURRENT_ACQUIRES};
use crate::error::{Error, Result};
use crate::types::UintHalfT;

/// Recognized configuration keys for `Publisher::create` /
/// `MessageBuffer::create_or_open`.
///
/// Invalid combinations are rejected once, at creation time, via
/// [`Options::validate`], rather than checked on every hot-path call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Sizes the `PublisherEntry` array and contributes to the width of
    /// each publisher's slot sub-range. Must be > 0.
    pub max_publishers: UintHalfT,
    /// Sizes the `SubscriberEntry` array and contributes to
    /// `slots_per_publisher` via `max_subscribers * max_concurrent_acquires + 2`.
    /// Must be > 0.
    pub max_subscribers: UintHalfT,
    /// Per-subscriber concurrent-acquire cap. Must be > 0.
    pub max_concurrent_acquires: UintHalfT,
    /// Reserved for future history retention. Currently has no consumer
    /// logic and any non-zero value is rejected at construction.
    pub history_size: UintHalfT,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_publishers: 1,
            max_subscribers: 1,
            max_concurrent_acquires: DEFAULT_MAX_CONCURRENT_ACQUIRES,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl Options {
    /// Construct options for a single-publisher, single-subscriber
    /// topic, the most common configuration.
    pub fn new(max_publishers: UintHalfT, max_subscribers: UintHalfT) -> Self {
        Self {
            max_publishers,
            max_subscribers,
            ..Default::default()
        }
    }

    /// Override the per-subscriber concurrent-acquire cap.
    pub fn with_max_concurrent_acquires(mut self, max_concurrent_acquires: UintHalfT) -> Self {
        self.max_concurrent_acquires = max_concurrent_acquires;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_publishers == 0 {
            return Err(Error::invalid_options("max_publishers must be > 0"));
        }
        if self.max_subscribers == 0 {
            return Err(Error::invalid_options("max_subscribers must be > 0"));
        }
        if self.max_concurrent_acquires == 0 {
            return Err(Error::invalid_options("max_concurrent_acquires must be > 0"));
        }
        if self.history_size != 0 {
            return Err(Error::invalid_options(
                "history_size > 0 is reserved and unimplemented in v1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn test_zero_max_publishers_rejected() {
        let opts = Options { max_publishers: 0, ..Default::default() };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_history_size_rejected() {
        let opts = Options { history_size: 1, ..Default::default() };
        assert!(matches!(opts.validate(), Err(Error::InvalidOptions { .. })));
    }

    #[test]
    fn test_builder_sets_acquire_cap() {
        let opts = Options::new(2, 3).with_max_concurrent_acquires(4);
        assert_eq!(opts.max_concurrent_acquires, 4);
        assert_eq!(opts.max_publishers, 2);
        assert_eq!(opts.max_subscribers, 3);
    }
}

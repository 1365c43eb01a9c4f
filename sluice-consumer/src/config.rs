//! Broker-level consumer configuration.

use std::time::Duration;

use serde::Deserialize;

const fn default_min_large_message_size() -> usize {
    100 * 1024
}

const fn default_flush_timeout_ms() -> u64 {
    10_000
}

/// Settings shared by every consumer a broker creates.
///
/// ```ron
/// (
///     min_large_message_size: 102400,
///     flush_timeout_ms: 10000,
///     respect_write_readiness: false,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Largest slice of a large message body sent in one continuation frame
    ///
    /// Default: 102400 bytes
    #[serde(default = "default_min_large_message_size")]
    pub min_large_message_size: usize,

    /// Upper bound for waiting on the queue executor to drain (in milliseconds)
    ///
    /// Applies to forced delivery and to entering transfer mode. Expiry is
    /// logged and the operation proceeds.
    ///
    /// Default: 10000 (10 seconds)
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Defer admissions while the transport reports it cannot take writes
    ///
    /// Default: `false`
    #[serde(default)]
    pub respect_write_readiness: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            min_large_message_size: default_min_large_message_size(),
            flush_timeout_ms: default_flush_timeout_ms(),
            respect_write_readiness: false,
        }
    }
}

impl ConsumerConfig {
    #[must_use]
    pub const fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

//! Shared support for the sluice broker core: logging bootstrap, the
//! direction-tagged logging macros and RON configuration loading.

pub mod config;
pub mod error;
pub mod logging;

pub use error::ConfigError;
pub use tracing;

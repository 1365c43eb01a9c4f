//! Error types for the sluice-common crate.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration text is not valid RON for the requested type.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

//! Error types for outpost-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration load/save.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with file path and serde_yaml line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`; `~/.outpost/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The configuration file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },
}

/// Malformed textual input for a [`crate::Version`] or [`crate::RangeSet`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid version '{input}': {reason}")]
    Version { input: String, reason: String },

    #[error("invalid range '{input}': {reason}")]
    Range { input: String, reason: String },
}

impl ParseError {
    pub(crate) fn version(input: &str, reason: impl Into<String>) -> Self {
        Self::Version {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn range(input: &str, reason: impl Into<String>) -> Self {
        Self::Range {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

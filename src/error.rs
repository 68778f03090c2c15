//! Host-side errors
//!
//! Errors raised inside the traced world travel as [`crate::value::Throw`];
//! this type covers setup, configuration and script loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    /// A root could not be resolved during setup
    #[error("failed to enumerate '{name}': {reason}")]
    Enumeration { name: String, reason: String },

    /// The filter threw while admitting a root
    #[error("filter failed for '{name}': {message}")]
    Filter { name: String, message: String },

    #[error("invalid selector '{expr}'")]
    Selector {
        expr: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("script error at line {line}: {message}")]
    Script { line: usize, message: String },
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;

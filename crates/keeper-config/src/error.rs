//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Not valid TOML, or a key has the wrong type.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required key is absent or empty.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A field is present but unusable.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

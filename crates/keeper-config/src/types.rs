//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default idle timeout in seconds.
pub const DEFAULT_TIMEOUT: u64 = 14_400;

/// Default lifetime in seconds.
pub const DEFAULT_LIFETIME: u64 = 86_400;

/// Default number of cached sessions.
pub const DEFAULT_CACHE_LIMIT: i64 = 128;

/// Default seconds between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 60;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub session: SessionSection,
    pub logging: LoggingSection,
}

impl KeeperConfig {
    /// Parse and validate from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: KeeperConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields.
    pub fn validate(&self) -> crate::Result<()> {
        if self.session.path.as_os_str().is_empty() {
            return Err(crate::ConfigError::MissingField {
                field: "path".to_string(),
                context: "[session]".to_string(),
            });
        }
        if self.session.name.is_empty() {
            return Err(crate::ConfigError::MissingField {
                field: "name".to_string(),
                context: "[session]".to_string(),
            });
        }
        if self.session.name.contains(|c: char| c.is_whitespace() || c == ';' || c == '=') {
            return Err(crate::ConfigError::InvalidValue {
                field: "session.name".to_string(),
                reason: "cookie names cannot contain whitespace, ';' or '='".to_string(),
            });
        }
        Ok(())
    }
}

/// `[session]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Directory holding session files. Must already exist.
    pub path: PathBuf,
    /// Cookie name carrying the session id.
    pub name: String,
    /// Idle timeout in seconds, 0 to disable.
    pub timeout: u64,
    /// Lifetime in seconds, 0 to disable.
    pub lifetime: u64,
    /// Cached session count, 0 to disable. Negative values count as 0 and
    /// values above 4096 are clamped by the engine.
    pub cache_limit: i64,
    /// Seconds between expiry sweeps, 0 to disable.
    pub sweep_interval: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            name: String::new(),
            timeout: DEFAULT_TIMEOUT,
            lifetime: DEFAULT_LIFETIME,
            cache_limit: DEFAULT_CACHE_LIMIT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SessionSection {
    /// `cache_limit` with negative values raised to 0.
    pub fn cache_limit_or_zero(&self) -> usize {
        usize::try_from(self.cache_limit).unwrap_or(0)
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigError;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = KeeperConfig::from_toml(
            r#"
[session]
path = "/tmp/s"
name = "SID"
"#,
        )
        .unwrap();
        assert_eq!(config.session.timeout, 14_400);
        assert_eq!(config.session.lifetime, 86_400);
        assert_eq!(config.session.cache_limit, 128);
        assert_eq!(config.session.sweep_interval, 60);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_full_config() {
        let config = KeeperConfig::from_toml(
            r#"
[session]
path = "/tmp/s"
name = "SID"
timeout = 0
lifetime = 3600
cache_limit = 0
sweep_interval = 0

[logging]
level = "keeper_session=debug"
json = true
"#,
        )
        .unwrap();
        assert_eq!(config.session.timeout, 0);
        assert_eq!(config.session.lifetime, 3600);
        assert_eq!(config.session.cache_limit, 0);
        assert_eq!(config.session.sweep_interval, 0);
        assert_eq!(config.logging.level, "keeper_session=debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_negative_cache_limit_disables_cache() {
        let config =
            KeeperConfig::from_toml("[session]\npath = \"/tmp\"\nname = \"SID\"\ncache_limit = -5\n")
                .unwrap();
        assert_eq!(config.session.cache_limit, -5);
        assert_eq!(config.session.cache_limit_or_zero(), 0);

        let config =
            KeeperConfig::from_toml("[session]\npath = \"/tmp\"\nname = \"SID\"\ncache_limit = 9000\n")
                .unwrap();
        assert_eq!(config.session.cache_limit_or_zero(), 9000);
    }

    #[test]
    fn test_missing_path() {
        let err = KeeperConfig::from_toml("[session]\nname = \"SID\"\n").unwrap_err();
        match err {
            ConfigError::MissingField { field, context } => {
                assert_eq!(field, "path");
                assert_eq!(context, "[session]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_name() {
        let err = KeeperConfig::from_toml("[session]\npath = \"/tmp\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_empty_file_is_incomplete() {
        assert!(KeeperConfig::from_toml("").is_err());
    }

    #[test]
    fn test_bad_cookie_name() {
        let err = KeeperConfig::from_toml("[session]\npath = \"/tmp\"\nname = \"a b\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let err = KeeperConfig::from_toml("[session]\npath = \"/tmp\"\nname = \"SID\"\ntimeout = \"long\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

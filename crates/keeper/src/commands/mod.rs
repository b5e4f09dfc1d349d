//! CLI command handlers.

pub mod check;
pub mod inspect;
pub mod run;
pub mod stats;
pub mod sweep;

use std::time::Duration;

use anyhow::{Context as _, Result};
use keeper_config::KeeperConfig;
use keeper_session::{MAX_CACHE_LIMIT, SessionEngine, SessionOptions};
use tracing::warn;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded config, for commands that open the session directory.
    pub config: Option<KeeperConfig>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn config(&self) -> Result<&KeeperConfig> {
        self.config.as_ref().context("no configuration loaded")
    }

    /// Engine options from the `[session]` section.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let section = &self.config()?.session;
        let cache_limit = section.cache_limit_or_zero();
        if section.cache_limit < 0 || cache_limit > MAX_CACHE_LIMIT {
            warn!(
                requested = section.cache_limit,
                max = MAX_CACHE_LIMIT,
                "cache_limit clamped"
            );
        }

        let options = SessionOptions::new(section.path.clone(), section.name.clone())
            .with_timeout(section.timeout)
            .with_lifetime(section.lifetime)
            .with_cache_limit(cache_limit);
        Ok(match section.sweep_interval {
            0 => options.without_sweep(),
            secs => options.with_sweep_interval(Duration::from_secs(secs)),
        })
    }

    pub fn engine(&self) -> Result<SessionEngine> {
        Ok(SessionEngine::new(self.session_options()?)?)
    }
}

/// RFC 3339 rendering of an epoch timestamp, or the raw number if out of range.
pub fn format_ts(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

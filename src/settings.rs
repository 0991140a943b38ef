//! Runtime settings read from the environment.

use crate::auth::DEFAULT_SESSION_DURATION_SECS;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "resources.yaml";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// `RESOURCE_CONFIG_PATH`
    pub config_path: PathBuf,
    /// `BIND_ADDR`
    pub bind_addr: String,
    /// `SESSION_DURATION_SECS`: how long a session stays valid after its last use.
    pub session_duration_secs: i64,
    /// `MAX_BODY_BYTES`
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        Ok(Settings {
            config_path: lookup("RESOURCE_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            session_duration_secs: parsed(&lookup, "SESSION_DURATION_SECS")?
                .unwrap_or(defaults.session_duration_secs),
            max_body_bytes: parsed(&lookup, "MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes),
        })
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_duration_secs)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::Load(format!("{} must be a number, got {:?}", key, raw)))
        })
        .transpose()
}

//! # Configuration
//!
//! Capture settings read from `STACKWIRE_*` environment variables. Command
//! line flags override whatever is loaded here.
//!
//! | variable | default |
//! |---|---|
//! | `STACKWIRE_BUFFER_SIZE` | `65536` bytes |
//! | `STACKWIRE_ATTACH_TIMEOUT_MS` | `1000` |
//! | `STACKWIRE_MAX_FRAMES` | `256` |
//! | `STACKWIRE_CACHE_DIR` | unset (system temporary directory) |
//! | `STACKWIRE_BACKEND` | `native` |
//!
//! The backend is kept as a string: this crate does not depend on the
//! capture library, the caller parses it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Capture settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings
{
    /// Capture buffer size in bytes
    pub buffer_size: usize,
    /// How long a remote target gets to stop after attach
    pub attach_timeout: Duration,
    /// Frame limit per capture
    pub max_frames: usize,
    /// Directory for shared-memory backing files when `memfd` is unavailable
    pub cache_dir: Option<PathBuf>,
    /// Backend name
    pub backend: String,
}

impl Settings
{
    pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
    pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const DEFAULT_MAX_FRAMES: usize = 256;
    pub const DEFAULT_BACKEND: &'static str = "native";

    /// Load settings from the process environment
    ///
    /// ## Errors
    ///
    /// [`ConfigError::Invalid`] when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup` instead of the process environment
    ///
    /// ## Errors
    ///
    /// As for [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let attach_timeout = parse::<u64>(&lookup, "STACKWIRE_ATTACH_TIMEOUT_MS")?.map(Duration::from_millis);
        Ok(Self {
            buffer_size: parse(&lookup, "STACKWIRE_BUFFER_SIZE")?.unwrap_or(defaults.buffer_size),
            attach_timeout: attach_timeout.unwrap_or(defaults.attach_timeout),
            max_frames: parse(&lookup, "STACKWIRE_MAX_FRAMES")?.unwrap_or(defaults.max_frames),
            cache_dir: lookup("STACKWIRE_CACHE_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            backend: lookup("STACKWIRE_BACKEND")
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.backend),
        })
    }
}

impl Default for Settings
{
    fn default() -> Self
    {
        Self {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            attach_timeout: Self::DEFAULT_ATTACH_TIMEOUT,
            max_frames: Self::DEFAULT_MAX_FRAMES,
            cache_dir: None,
            backend: Self::DEFAULT_BACKEND.to_string(),
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError
{
    /// A variable is set to something that does not parse
    #[error("Invalid value for {key}: {value:?}")]
    Invalid
    {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

//! # stackwire utilities
//!
//! Logging setup and environment configuration for the stackwire command
//! line tool and for embedders that want the same defaults.

pub mod config;
pub mod logging;

pub use config::{ConfigError, Settings};
pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};

//! Configuration System
//!
//! Process-wide configuration with environment variable overrides. The one
//! setting the core itself depends on is the serialization-delegate
//! implementation name; it is read lazily at each cache miss, so its absence
//! is fatal at first use rather than at startup, and installing updated
//! configuration lets a later call succeed.

use std::path::Path;
use std::sync::{Arc, RwLock};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LoggingConfig;

/// Configuration key selecting the serialization-delegate implementation.
pub const DELEGATE_IMPLEMENTATION_KEY: &str = "delegate_implementation";

/// Environment variable form of [`DELEGATE_IMPLEMENTATION_KEY`].
pub const DELEGATE_IMPLEMENTATION_ENV: &str = "SWITCHYARD_DELEGATE_IMPLEMENTATION";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Name of the serialization-delegate implementation instantiated per
    /// resolution context. No default; required at first cache miss.
    #[serde(default)]
    pub delegate_implementation: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            delegate_implementation: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from defaults, an optional TOML file, and
    /// `SWITCHYARD_*` environment overrides (highest priority).
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix("SWITCHYARD").separator("__"))
            .build()?;

        let config: RuntimeConfig = settings.try_deserialize()?;
        Ok(config)
    }
}

fn installed() -> &'static RwLock<Arc<RuntimeConfig>> {
    static INSTALLED: std::sync::OnceLock<RwLock<Arc<RuntimeConfig>>> = std::sync::OnceLock::new();
    INSTALLED.get_or_init(|| RwLock::new(Arc::new(RuntimeConfig::default())))
}

/// Install `config` as the process-wide configuration.
pub fn install(config: RuntimeConfig) {
    let mut guard = installed().write().unwrap_or_else(|e| e.into_inner());
    *guard = Arc::new(config);
}

/// Snapshot of the process-wide configuration.
pub fn current() -> Arc<RuntimeConfig> {
    let guard = installed().read().unwrap_or_else(|e| e.into_inner());
    Arc::clone(&guard)
}

/// The configured delegate implementation name, if any.
///
/// Resolution order: the `SWITCHYARD_DELEGATE_IMPLEMENTATION` environment
/// variable, then the installed process-wide configuration. Evaluated fresh
/// on every call so a late `install` (or env change in tests) is honored.
pub fn delegate_implementation() -> Option<String> {
    if let Ok(implementation) = std::env::var(DELEGATE_IMPLEMENTATION_ENV) {
        if !implementation.is_empty() {
            return Some(implementation);
        }
    }
    current().delegate_implementation.clone()
}

//! Configuration Loader
//!
//! Layers sources with the `config` crate, lowest precedence first:
//!
//! 1. Built-in defaults (`#[serde(default)]` on every section)
//! 2. An optional TOML file
//! 3. `CACHE_GUARD__`-prefixed environment variables, `__` separating sections
//!    (e.g. `CACHE_GUARD__DEFAULTS__WAIT_SLEEP_TIME_MS=20`)
//!
//! The merged result is deserialized with serde and validated with `validator`.

use super::error::{ConfigResult, ConfigurationError};
use super::{GuardSettings, StoreBackend};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use validator::Validate;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CACHE_GUARD";

/// Separator between prefix, sections and fields in environment keys
const ENV_SEPARATOR: &str = "__";

/// Zero-state loader; all functions are associated
#[derive(Debug)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from an optional TOML file plus the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<GuardSettings> {
        Self::load_with_env(path, None)
    }

    /// Load settings with an explicit environment map instead of the process environment
    ///
    /// Useful for tests that must not modify global environment variables.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<GuardSettings> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::ConfigFileNotFound {
                    path: path.to_path_buf(),
                });
            }
            debug!(path = %path.display(), "Loading cache guard configuration file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        let environment = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env.map(|vars| vars.into_iter().collect()));
        builder = builder.add_source(environment);

        let settings: GuardSettings = builder.build()?.try_deserialize()?;
        Self::validate(&settings)?;

        debug!(
            backend = ?settings.store.backend,
            expire_time_ms = settings.defaults.expire_time_ms,
            max_wait_time_ms = ?settings.defaults.max_wait_time_ms,
            "Cache guard configuration loaded"
        );

        Ok(settings)
    }

    /// Validate declared constraints plus cross-field rules
    pub fn validate(settings: &GuardSettings) -> ConfigResult<()> {
        settings.validate()?;

        match (&settings.store.backend, &settings.store.redis) {
            (StoreBackend::Redis, None) => Err(ConfigurationError::invalid_value(
                "store.redis",
                "<missing>",
                "redis backend requires a [store.redis] section",
            )),
            (_, Some(redis)) => redis.validate().map_err(ConfigurationError::from),
            (StoreBackend::Memory, None) => Ok(()),
        }
    }
}

//! Context configuration.

use luna_engine::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::error::{BindError, BindResult};

/// Settings for a [`Context`](crate::Context).
///
/// ```toml
/// open_default_libs = true
/// chunk_name = "game"
///
/// [runtime]
/// memory_limit = 1048576
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Register the base library (`print`, `pairs`, `pcall`, ...)
    pub open_default_libs: bool,

    /// Name used for executed chunks in error locations
    pub chunk_name: String,

    /// Limits of the underlying runtime
    pub runtime: RuntimeConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            open_default_libs: true,
            chunk_name: "chunk".to_string(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> BindResult<Self> {
        toml::from_str(source).map_err(|err| BindError::Config(err.to_string()))
    }
}

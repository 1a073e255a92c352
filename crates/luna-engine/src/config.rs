//! Runtime limits.

use serde::{Deserialize, Serialize};

/// Limits applied to a single runtime instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of live stack slots across all frames.
    pub stack_limit: usize,

    /// Maximum nesting of function calls (script and native).
    pub max_call_depth: usize,

    /// Upper bound in bytes for tables and userdata, if any.
    pub memory_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_limit: 1_000_000,
            max_call_depth: 200,
            memory_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_call_depth, 200);
        assert!(config.memory_limit.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RuntimeConfig = toml::from_str("memory_limit = 4096").unwrap();
        assert_eq!(config.memory_limit, Some(4096));
        assert_eq!(config.stack_limit, 1_000_000);
    }
}

//! Credential pool discovered from numbered environment variables.

use crate::ConfigError;

/// Default variable prefix: keys are read from `GEMINI_API_KEY_1`, `GEMINI_API_KEY_2`, ...
pub const DEFAULT_KEY_PREFIX: &str = "GEMINI_API_KEY";

/// Ordered, non-empty list of API keys.
#[derive(Clone)]
pub struct ApiKeyPool {
    keys: Vec<String>,
}

impl std::fmt::Debug for ApiKeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyPool")
            .field("keys", &self.keys.iter().map(|_| "***").collect::<Vec<_>>())
            .finish()
    }
}

impl ApiKeyPool {
    /// Build a pool from explicit keys. Fails if `keys` is empty.
    pub fn new(keys: Vec<String>, prefix: &str) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::NoApiKeys {
                prefix: prefix.to_string(),
            });
        }
        Ok(Self { keys })
    }

    /// Read `<prefix>_1`, `<prefix>_2`, ... from the process environment,
    /// stopping at the first missing or blank variable.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but with an injectable variable lookup.
    pub fn from_lookup(
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut keys = Vec::new();
        for n in 1.. {
            let name = format!("{prefix}_{n}");
            match lookup(&name) {
                Some(value) if !value.trim().is_empty() => keys.push(value.trim().to_string()),
                _ => break,
            }
        }
        tracing::debug!(prefix, count = keys.len(), "discovered API keys");
        Self::new(keys, prefix)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `index`, wrapping around the pool.
    pub fn get(&self, index: usize) -> &str {
        &self.keys[index % self.keys.len()]
    }
}

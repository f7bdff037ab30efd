use std::collections::HashMap;

/// Resolves provider credentials by key name.
///
/// Empty or whitespace-only values count as absent.
pub trait CredentialSource: Send + Sync {
    /// Returns the credential stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads credentials from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

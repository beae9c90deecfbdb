//! Named settings sources.

use std::collections::HashMap;

/// A place settings can be read from.
pub trait SettingsSource: Send + Sync {
    /// Name shown in logs when a setting comes from this source.
    fn name(&self) -> &str;

    /// Get a setting by key, or `None` when absent.
    fn get(&self, key: &str) -> Option<String>;
}

/// Process environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    /// Replaces the real environment when set.
    vars: Option<HashMap<String, String>>,
}

impl EnvSource {
    /// Read from the real process environment.
    pub fn process() -> Self {
        Self { vars: None }
    }

    /// Read from a fixed set of variables instead of the process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars: Some(vars) }
    }
}

impl SettingsSource for EnvSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }
}

/// The `settings` block of a project file.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    name: String,
    values: HashMap<String, String>,
}

impl FileSource {
    pub fn new(name: impl Into<String>, values: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

impl SettingsSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

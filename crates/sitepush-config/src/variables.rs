//! `${...}` substitution in build commands and build env values.
//!
//! Known names:
//! - `${source}`, `${output}`: absolute source root and artifact directory
//! - `${locale}`: display locale tag, e.g. `en-AU`
//! - `${env.NAME}`: a variable from the captured environment
//! - `${timestamp}`, `${date}`, `${datetime}`: current time in UTC
//!
//! Anything else is left as written. Names registered with
//! [`VariableContextBuilder::withhold`] never resolve, so deploy settings
//! cannot leak into a generator's arguments.

use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\}")
        .expect("reference pattern is valid")
});

/// Values available to `${...}` references.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    source: String,
    output: String,
    locale: String,
    env: HashMap<String, String>,
}

impl VariableContext {
    /// Value for a reference name, without the `${}`.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(key) = name.strip_prefix("env.") {
            return self.env.get(key).cloned();
        }

        let now = chrono::Utc::now();
        match name {
            "source" => Some(self.source.clone()),
            "output" => Some(self.output.clone()),
            "locale" if !self.locale.is_empty() => Some(self.locale.clone()),
            "timestamp" => Some(now.timestamp().to_string()),
            "date" => Some(now.format("%Y-%m-%d").to_string()),
            "datetime" => Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            _ => None,
        }
    }

    pub fn interpolate(&self, input: &str) -> String {
        REFERENCE
            .replace_all(input, |caps: &Captures| {
                self.resolve(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct VariableContextBuilder {
    ctx: VariableContext,
    withheld: HashSet<String>,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.ctx.source = source.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.ctx.output = output.into();
        self
    }

    pub fn with_locale(mut self, tag: impl Into<String>) -> Self {
        self.ctx.locale = tag.into();
        self
    }

    /// Add environment entries for `${env.NAME}`.
    pub fn with_env_vars<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.ctx
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_process_env(self) -> Self {
        self.with_env_vars(std::env::vars())
    }

    /// Never resolve `${env.NAME}` for these names, whatever was captured.
    pub fn withhold<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.withheld.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(mut self) -> VariableContext {
        let withheld = self.withheld;
        self.ctx.env.retain(|name, _| !withheld.contains(name));
        self.ctx
    }
}

//! Deploy credential resolution.

use sitepush_core::{DeployCredentials, DeployKey};
use tracing::debug;

use crate::settings::{EnvSource, FileSource, SettingsSource};
use crate::{ConfigError, ConfigResult};

pub const SITE_ID_SETTING: &str = "NETLIFY_SITE_ID";
pub const DEPLOY_KEY_SETTING: &str = "NETLIFY_DEPLOY_KEY";

/// Names of the settings holding the site identifier and deploy key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingNames {
    pub site_id_key: String,
    pub deploy_key_key: String,
}

impl Default for SettingNames {
    fn default() -> Self {
        Self {
            site_id_key: SITE_ID_SETTING.to_string(),
            deploy_key_key: DEPLOY_KEY_SETTING.to_string(),
        }
    }
}

/// Reads settings from an ordered list of sources. The first non-empty value wins.
#[derive(Default)]
pub struct ConfigResolver {
    sources: Vec<Box<dyn SettingsSource>>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment first, then the project's settings block if there is one.
    pub fn standard(settings_file: Option<FileSource>) -> Self {
        let resolver = Self::new().with_source(EnvSource::process());
        match settings_file {
            Some(file) => resolver.with_source(file),
            None => resolver,
        }
    }

    /// Append a source with lower priority than those already added.
    pub fn with_source(mut self, source: impl SettingsSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Look up a setting, skipping absent and blank values.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|source| {
            let value = source.get(key)?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            debug!(key, source = source.name(), "Setting resolved");
            Some(value.to_string())
        })
    }

    /// Resolve deploy credentials.
    pub fn resolve(&self, names: &SettingNames) -> ConfigResult<DeployCredentials> {
        let site_id = self
            .lookup(&names.site_id_key)
            .ok_or_else(|| ConfigError::MissingSetting(names.site_id_key.clone()))?;
        let deploy_key = self
            .lookup(&names.deploy_key_key)
            .map(DeployKey::new)
            .ok_or_else(|| ConfigError::MissingSetting(names.deploy_key_key.clone()))?;

        DeployCredentials::new(site_id, deploy_key).map_err(|e| match e.field {
            "site_id" => ConfigError::MissingSetting(names.site_id_key.clone()),
            _ => ConfigError::MissingSetting(names.deploy_key_key.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> EnvSource {
        EnvSource::from_map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn file(pairs: &[(&str, &str)]) -> FileSource {
        FileSource::new(
            "sitepush.kdl",
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_resolve_from_env() {
        let resolver = ConfigResolver::new().with_source(env(&[
            ("NETLIFY_SITE_ID", "site-1"),
            ("NETLIFY_DEPLOY_KEY", "key-1"),
        ]));

        let creds = resolver.resolve(&SettingNames::default()).unwrap();
        assert_eq!(creds.site_id(), "site-1");
        assert_eq!(creds.deploy_key().expose(), "key-1");
    }

    #[test]
    fn test_env_wins_over_file() {
        let resolver = ConfigResolver::new()
            .with_source(env(&[("NETLIFY_SITE_ID", "from-env")]))
            .with_source(file(&[
                ("NETLIFY_SITE_ID", "from-file"),
                ("NETLIFY_DEPLOY_KEY", "file-key"),
            ]));

        let creds = resolver.resolve(&SettingNames::default()).unwrap();
        assert_eq!(creds.site_id(), "from-env");
        assert_eq!(creds.deploy_key().expose(), "file-key");
    }

    #[test]
    fn test_empty_env_falls_through_to_file() {
        let resolver = ConfigResolver::new()
            .with_source(env(&[("NETLIFY_SITE_ID", "   ")]))
            .with_source(file(&[
                ("NETLIFY_SITE_ID", "from-file"),
                ("NETLIFY_DEPLOY_KEY", "k"),
            ]));

        let creds = resolver.resolve(&SettingNames::default()).unwrap();
        assert_eq!(creds.site_id(), "from-file");
    }

    #[test]
    fn test_missing_site_id() {
        let resolver = ConfigResolver::new().with_source(env(&[("NETLIFY_DEPLOY_KEY", "k")]));

        let err = resolver.resolve(&SettingNames::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting(ref name) if name == "NETLIFY_SITE_ID"));
    }

    #[test]
    fn test_empty_deploy_key_is_missing() {
        let resolver = ConfigResolver::new().with_source(env(&[
            ("NETLIFY_SITE_ID", "site"),
            ("NETLIFY_DEPLOY_KEY", ""),
        ]));

        let err = resolver.resolve(&SettingNames::default()).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingSetting(ref name) if name == "NETLIFY_DEPLOY_KEY")
        );
    }

    #[test]
    fn test_custom_setting_names() {
        let names = SettingNames {
            site_id_key: "STAGING_SITE".to_string(),
            deploy_key_key: "STAGING_KEY".to_string(),
        };
        let resolver =
            ConfigResolver::new().with_source(env(&[("STAGING_SITE", "s"), ("STAGING_KEY", "k")]));

        let creds = resolver.resolve(&names).unwrap();
        assert_eq!(creds.site_id(), "s");
    }

    #[test]
    fn test_no_sources_is_missing() {
        let err = ConfigResolver::new()
            .resolve(&SettingNames::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting(_)));
    }
}

//! Project configuration parsing (sitepush.kdl).
//!
//! ```kdl
//! site {
//!     output "output"
//!     command "dotnet" "run" "--" "--output" "${output}"
//!     env { DOTNET_CLI_TELEMETRY_OPTOUT "1"; }
//! }
//! deploy {
//!     api-url "https://api.netlify.com"
//!     max-attempts 4
//!     poll-interval-ms 2000
//!     timeout-secs 600
//! }
//! settings {
//!     NETLIFY_SITE_ID "my-site-id"
//! }
//! locale "en-AU"
//! ```

use crate::settings::FileSource;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_FILE_NAME: &str = "sitepush.kdl";
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Parsed project file. Every field is optional in the file.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// Directory containing the project file; relative paths resolve against it.
    pub base_dir: Option<PathBuf>,
    pub site: SiteConfig,
    pub deploy: DeploySettings,
    /// Values from the `settings` block. May hold credentials, so not `Serialize`.
    pub settings: HashMap<String, String>,
    pub locale: Option<String>,
}

/// How to generate the site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub source: Option<PathBuf>,
    pub output: PathBuf,
    /// Generator command and arguments. Empty means the output is pre-built.
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            source: None,
            output: PathBuf::from(DEFAULT_OUTPUT_DIR),
            command: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// Deploy tuning. Unset fields keep the deployer's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySettings {
    pub api_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl ProjectConfig {
    /// Source root: the `site.source` entry resolved against the file's directory.
    pub fn source_root(&self) -> PathBuf {
        let base = self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        match &self.site.source {
            Some(source) if source.is_absolute() => source.clone(),
            Some(source) => base.join(source),
            None => base,
        }
    }

    /// The `settings` block as a settings source.
    pub fn settings_source(&self, name: impl Into<String>) -> FileSource {
        FileSource::new(name, self.settings.clone())
    }
}

/// Read a project file.
///
/// When `required` is false a missing file yields the default configuration.
pub fn load_project(path: &Path, required: bool) -> ConfigResult<ProjectConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(ProjectConfig {
                base_dir: path.parent().map(Path::to_path_buf),
                ..ProjectConfig::default()
            });
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut project = parse_project(&content)?;
    project.base_dir = path.parent().map(|p| {
        if p.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            p.to_path_buf()
        }
    });
    Ok(project)
}

/// Parse a project configuration from KDL text.
pub fn parse_project(kdl: &str) -> ConfigResult<ProjectConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut project = ProjectConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "site" => project.site = parse_site(node)?,
            "deploy" => project.deploy = parse_deploy(node)?,
            "settings" => project.settings = parse_string_map(node),
            "locale" => {
                project.locale = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| invalid("locale", "expected a string"))?,
                );
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(project)
}

fn parse_site(node: &KdlNode) -> ConfigResult<SiteConfig> {
    let mut site = SiteConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => {
                    site.source = Some(PathBuf::from(
                        get_first_string_arg(child)
                            .ok_or_else(|| invalid("site.source", "expected a path"))?,
                    ));
                }
                "output" => {
                    site.output = PathBuf::from(
                        get_first_string_arg(child)
                            .ok_or_else(|| invalid("site.output", "expected a path"))?,
                    );
                }
                "command" => {
                    site.command = get_all_string_args(child);
                    if site.command.is_empty() {
                        return Err(invalid("site.command", "expected at least one argument"));
                    }
                }
                "env" => site.env = parse_string_map(child),
                _ => {}
            }
        }
    }

    Ok(site)
}

fn parse_deploy(node: &KdlNode) -> ConfigResult<DeploySettings> {
    let mut deploy = DeploySettings::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            match key {
                "api-url" | "api_url" => {
                    deploy.api_url = Some(
                        get_first_string_arg(child)
                            .ok_or_else(|| invalid("deploy.api-url", "expected a string"))?,
                    );
                }
                "max-attempts" | "max_attempts" => {
                    let attempts: u32 = get_unsigned_arg(child, key)?;
                    if attempts == 0 {
                        return Err(invalid("deploy.max-attempts", "must be at least 1"));
                    }
                    deploy.max_attempts = Some(attempts);
                }
                "initial-backoff-ms" | "initial_backoff_ms" => {
                    deploy.initial_backoff_ms = Some(get_unsigned_arg(child, key)?);
                }
                "max-backoff-ms" | "max_backoff_ms" => {
                    deploy.max_backoff_ms = Some(get_unsigned_arg(child, key)?);
                }
                "poll-interval-ms" | "poll_interval_ms" => {
                    deploy.poll_interval_ms = Some(get_unsigned_arg(child, key)?);
                }
                "timeout-secs" | "timeout_secs" => {
                    deploy.timeout_secs = Some(get_unsigned_arg(child, key)?);
                }
                "request-timeout-secs" | "request_timeout_secs" => {
                    deploy.request_timeout_secs = Some(get_unsigned_arg(child, key)?);
                }
                _ => {}
            }
        }
    }

    Ok(deploy)
}

fn parse_string_map(node: &KdlNode) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                map.insert(key, val);
            }
        }
    }
    map
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_unsigned_arg<T: TryFrom<i128>>(node: &KdlNode, field: &str) -> ConfigResult<T> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| invalid(&format!("deploy.{}", field), "expected a non-negative integer"))
}

//! Configuration for sitepush.
//!
//! This crate handles:
//! - Deploy credential resolution from settings sources
//! - Project configuration (sitepush.kdl)
//! - Variable interpolation for build commands

pub mod error;
pub mod project;
pub mod resolver;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use project::{DeploySettings, ProjectConfig, SiteConfig, load_project, parse_project};
pub use resolver::{ConfigResolver, SettingNames};
pub use settings::{EnvSource, FileSource, SettingsSource};
pub use variables::{VariableContext, VariableContextBuilder};

//! Core domain types and traits for sitepush.
//!
//! This crate contains:
//! - Deploy credentials and the deploy key secret
//! - Builder trait and build result types
//! - Deployer trait and deploy outcome types
//! - Deploy error taxonomy
//! - The process-wide display locale

pub mod builder;
pub mod deployer;
pub mod error;
pub mod id;
pub mod locale;
pub mod secret;

pub use builder::{BuildResult, Diagnostic, DiagnosticStream, SiteBuilder};
pub use deployer::{DeployOutcome, DeployProgress, DeployState, DeployStatus, Deployer};
pub use error::{DeployError, DeployResult};
pub use id::DeployId;
pub use secret::{CredentialError, DeployCredentials, DeployKey};

//! Site generation backends for sitepush.
//!
//! Provides builder implementations:
//! - External generator command (any static-site generator with a CLI)

pub mod command;

pub use command::{CommandBuilder, count_files};
pub use sitepush_core::builder::{BuildResult, Diagnostic, DiagnosticStream, SiteBuilder};

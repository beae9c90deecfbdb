//! Builder trait and build result types.
//!
//! Builders run the site generator against a source tree and report the
//! artifact directory it produced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A line of build output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub timestamp: DateTime<Utc>,
    pub stream: DiagnosticStream,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticStream {
    Stdout,
    Stderr,
    /// Emitted by sitepush itself rather than the generator.
    System,
}

impl Diagnostic {
    pub fn new(stream: DiagnosticStream, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(DiagnosticStream::System, message)
    }
}

/// Result of one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    /// Artifact directory. Set only on success, and then exists and is non-empty.
    pub output_path: Option<PathBuf>,
    /// Build output in the order it was produced.
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildResult {
    pub fn succeeded(output_path: PathBuf, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path),
            diagnostics,
        }
    }

    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            output_path: None,
            diagnostics,
        }
    }
}

/// Trait for site builders.
#[async_trait]
pub trait SiteBuilder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Build the site rooted at `source_root`.
    ///
    /// Generation errors are reported through the returned [`BuildResult`],
    /// never raised. Each diagnostic is also sent to `logs` as it is produced.
    async fn build(
        &self,
        source_root: &Path,
        logs: Option<mpsc::Sender<Diagnostic>>,
        cancel: &CancellationToken,
    ) -> BuildResult;
}

//! Pipeline errors and exit codes.

use sitepush_config::ConfigError;
use sitepush_core::{DeployOutcome, DeployStatus, Diagnostic, DiagnosticStream};
use thiserror::Error;

/// Process exit code for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Success,
    BuildError,
    ConfigError,
    DeployFailed,
    DeployTimedOut,
    Cancelled,
}

impl PipelineExit {
    pub fn code(self) -> u8 {
        match self {
            PipelineExit::Success => 0,
            PipelineExit::BuildError => 1,
            PipelineExit::ConfigError => 2,
            PipelineExit::DeployFailed => 3,
            PipelineExit::DeployTimedOut => 4,
            PipelineExit::Cancelled => 5,
        }
    }

    pub fn is_success(self) -> bool {
        self == PipelineExit::Success
    }
}

impl From<DeployStatus> for PipelineExit {
    fn from(status: DeployStatus) -> Self {
        match status {
            DeployStatus::Succeeded => PipelineExit::Success,
            DeployStatus::Failed => PipelineExit::DeployFailed,
            DeployStatus::TimedOut => PipelineExit::DeployTimedOut,
            DeployStatus::Cancelled => PipelineExit::Cancelled,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("build error: {}", build_summary(.0))]
    Build(Vec<Diagnostic>),

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("deploy timed out: {0}")]
    DeployTimedOut(String),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn exit_code(&self) -> PipelineExit {
        match self {
            PipelineError::Config(_) => PipelineExit::ConfigError,
            PipelineError::Build(_) => PipelineExit::BuildError,
            PipelineError::DeployFailed(_) => PipelineExit::DeployFailed,
            PipelineError::DeployTimedOut(_) => PipelineExit::DeployTimedOut,
            PipelineError::Cancelled => PipelineExit::Cancelled,
        }
    }

    /// Error for a deploy that did not succeed, or `None` if it did.
    pub fn from_outcome(outcome: &DeployOutcome) -> Option<Self> {
        let detail = || {
            outcome
                .error_detail
                .clone()
                .unwrap_or_else(|| "no detail reported".to_string())
        };
        match outcome.status {
            DeployStatus::Succeeded => None,
            DeployStatus::Failed => Some(PipelineError::DeployFailed(detail())),
            DeployStatus::TimedOut => Some(PipelineError::DeployTimedOut(detail())),
            DeployStatus::Cancelled => Some(PipelineError::Cancelled),
        }
    }
}

/// The last sitepush-emitted line usually names the failure; fall back to stderr.
fn build_summary(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .rev()
        .find(|d| d.stream == DiagnosticStream::System)
        .or_else(|| {
            diagnostics
                .iter()
                .rev()
                .find(|d| d.stream == DiagnosticStream::Stderr)
        })
        .map(|d| d.message.clone())
        .unwrap_or_else(|| "build failed".to_string())
}

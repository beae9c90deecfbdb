//! Build-then-deploy orchestration for sitepush.
//!
//! Resolves credentials, runs the builder, hands the artifact directory to
//! the deployer and maps the result to a process exit code.

pub mod exit;
pub mod orchestrator;

pub use exit::{PipelineError, PipelineExit};
pub use orchestrator::{PipelineEvent, PipelineOrchestrator, PipelineReport, PipelineRequest};

//! Deployer trait and deploy outcome types.
//!
//! Deployers upload a finished artifact directory to a hosting provider and
//! wait until the provider reports a terminal state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{DeployCredentials, DeployId};

/// Terminal status of a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployStatus {
    Succeeded,
    Failed,
    /// The poll window elapsed. The remote deploy may still finish later.
    TimedOut,
    Cancelled,
}

/// Final result of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub status: DeployStatus,
    pub deploy_id: Option<DeployId>,
    pub deployed_url: Option<String>,
    pub error_detail: Option<String>,
}

impl DeployOutcome {
    pub fn succeeded(deploy_id: DeployId, deployed_url: Option<String>) -> Self {
        Self {
            status: DeployStatus::Succeeded,
            deploy_id: Some(deploy_id),
            deployed_url,
            error_detail: None,
        }
    }

    pub fn failed(deploy_id: Option<DeployId>, detail: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::Failed,
            deploy_id,
            deployed_url: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn timed_out(deploy_id: Option<DeployId>, detail: impl Into<String>) -> Self {
        Self {
            status: DeployStatus::TimedOut,
            deploy_id,
            deployed_url: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn cancelled(deploy_id: Option<DeployId>) -> Self {
        Self {
            status: DeployStatus::Cancelled,
            deploy_id,
            deployed_url: None,
            error_detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeployStatus::Succeeded
    }
}

/// State of a deploy as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeployState {
    New,
    Uploading,
    Uploaded,
    Processing,
    Prepared,
    Ready,
    Error,
    /// Any state this client does not know. Treated as pending.
    Other(String),
}

impl DeployState {
    pub fn as_str(&self) -> &str {
        match self {
            DeployState::New => "new",
            DeployState::Uploading => "uploading",
            DeployState::Uploaded => "uploaded",
            DeployState::Processing => "processing",
            DeployState::Prepared => "prepared",
            DeployState::Ready => "ready",
            DeployState::Error => "error",
            DeployState::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Ready | DeployState::Error)
    }
}

impl From<String> for DeployState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "new" => DeployState::New,
            "uploading" => DeployState::Uploading,
            "uploaded" => DeployState::Uploaded,
            "processing" => DeployState::Processing,
            "prepared" => DeployState::Prepared,
            "ready" => DeployState::Ready,
            "error" => DeployState::Error,
            _ => DeployState::Other(s),
        }
    }
}

impl From<DeployState> for String {
    fn from(state: DeployState) -> Self {
        state.as_str().to_string()
    }
}

/// Progress reported while a deploy runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeployProgress {
    Archived { file_count: usize, bytes: u64 },
    Submitted { deploy_id: DeployId },
    State { deploy_id: DeployId, state: DeployState },
    Retrying { attempt: u32, delay: Duration, reason: String },
}

/// Trait for deployers.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Name of this deployer.
    fn name(&self) -> &'static str;

    /// Upload `output_path` and wait for the deploy to reach a terminal state.
    ///
    /// Every failure mode is folded into the returned [`DeployOutcome`].
    async fn deploy(
        &self,
        output_path: &Path,
        creds: &DeployCredentials,
        progress: Option<mpsc::Sender<DeployProgress>>,
        cancel: &CancellationToken,
    ) -> DeployOutcome;
}

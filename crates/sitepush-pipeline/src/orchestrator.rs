//! Pipeline orchestrator - resolves config, builds, then deploys.

use sitepush_config::{ConfigResolver, SettingNames};
use sitepush_core::{
    BuildResult, DeployOutcome, DeployProgress, Deployer, Diagnostic, SiteBuilder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::exit::{PipelineError, PipelineExit};

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ConfigResolved { site_id: String },
    BuildStarted { source_root: PathBuf },
    BuildLog(Diagnostic),
    BuildCompleted {
        success: bool,
        output_path: Option<PathBuf>,
        duration: Duration,
    },
    DeployStarted { site_id: String, output_path: PathBuf },
    DeployProgress(DeployProgress),
    DeployCompleted(DeployOutcome),
    PipelineCompleted { exit: PipelineExit },
}

/// What to run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub source_root: PathBuf,
    pub setting_names: SettingNames,
    /// Stop after a successful build.
    pub skip_deploy: bool,
}

impl PipelineRequest {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            setting_names: SettingNames::default(),
            skip_deploy: false,
        }
    }
}

/// Result of a pipeline execution.
#[derive(Debug)]
pub struct PipelineReport {
    pub exit: PipelineExit,
    pub error: Option<PipelineError>,
    pub build: Option<BuildResult>,
    pub deploy: Option<DeployOutcome>,
}

impl PipelineReport {
    fn finished(
        error: Option<PipelineError>,
        build: Option<BuildResult>,
        deploy: Option<DeployOutcome>,
    ) -> Self {
        let exit = error
            .as_ref()
            .map(PipelineError::exit_code)
            .unwrap_or(PipelineExit::Success);
        Self {
            exit,
            error,
            build,
            deploy,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit.code()
    }

    pub fn deployed_url(&self) -> Option<&str> {
        self.deploy.as_ref().and_then(|d| d.deployed_url.as_deref())
    }
}

/// Orchestrates the execution of one build-and-deploy run.
pub struct PipelineOrchestrator {
    resolver: Arc<ConfigResolver>,
    builder: Arc<dyn SiteBuilder>,
    deployer: Arc<dyn Deployer>,
}

impl PipelineOrchestrator {
    pub fn new(
        resolver: ConfigResolver,
        builder: Arc<dyn SiteBuilder>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            builder,
            deployer,
        }
    }

    /// Execute the pipeline, returning a channel of events and a handle to get the final report.
    pub fn execute(
        &self,
        request: PipelineRequest,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<PipelineEvent>,
        tokio::task::JoinHandle<PipelineReport>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let resolver = self.resolver.clone();
        let builder = self.builder.clone();
        let deployer = self.deployer.clone();

        let handle = tokio::spawn(async move {
            Self::execute_inner(resolver, builder, deployer, request, cancel, Some(tx)).await
        });

        (rx, handle)
    }

    /// Execute the pipeline without emitting events.
    pub async fn run(&self, request: PipelineRequest, cancel: CancellationToken) -> PipelineReport {
        Self::execute_inner(
            self.resolver.clone(),
            self.builder.clone(),
            self.deployer.clone(),
            request,
            cancel,
            None,
        )
        .await
    }

    /// Internal execution logic
    async fn execute_inner(
        resolver: Arc<ConfigResolver>,
        builder: Arc<dyn SiteBuilder>,
        deployer: Arc<dyn Deployer>,
        request: PipelineRequest,
        cancel: CancellationToken,
        tx: Option<mpsc::Sender<PipelineEvent>>,
    ) -> PipelineReport {
        let report = Self::run_stages(&resolver, &builder, &deployer, &request, &cancel, &tx).await;

        match &report.error {
            None => info!("Pipeline completed successfully"),
            Some(e) => error!(exit_code = report.exit_code(), error = %e, "Pipeline failed"),
        }
        emit(&tx, PipelineEvent::PipelineCompleted { exit: report.exit }).await;
        report
    }

    async fn run_stages(
        resolver: &ConfigResolver,
        builder: &Arc<dyn SiteBuilder>,
        deployer: &Arc<dyn Deployer>,
        request: &PipelineRequest,
        cancel: &CancellationToken,
        tx: &Option<mpsc::Sender<PipelineEvent>>,
    ) -> PipelineReport {
        // Credentials first, so a misconfigured run fails before any work.
        let creds = if request.skip_deploy {
            None
        } else {
            match resolver.resolve(&request.setting_names) {
                Ok(creds) => {
                    info!(site_id = creds.site_id(), "Deploy credentials resolved");
                    emit(
                        tx,
                        PipelineEvent::ConfigResolved {
                            site_id: creds.site_id().to_string(),
                        },
                    )
                    .await;
                    Some(creds)
                }
                Err(e) => {
                    error!(error = %e, "Configuration error");
                    return PipelineReport::finished(Some(e.into()), None, None);
                }
            }
        };

        if cancel.is_cancelled() {
            return PipelineReport::finished(Some(PipelineError::Cancelled), None, None);
        }

        // Build
        info!(builder = builder.name(), source = %request.source_root.display(), "Starting build");
        emit(
            tx,
            PipelineEvent::BuildStarted {
                source_root: request.source_root.clone(),
            },
        )
        .await;

        let started = Instant::now();
        let build = {
            let (log_tx, forwarder) = forward(tx, PipelineEvent::BuildLog);
            let result = builder.build(&request.source_root, log_tx, cancel).await;
            if let Some(forwarder) = forwarder {
                let _ = forwarder.await;
            }
            result
        };
        let duration = started.elapsed();

        emit(
            tx,
            PipelineEvent::BuildCompleted {
                success: build.success,
                output_path: build.output_path.clone(),
                duration,
            },
        )
        .await;

        if cancel.is_cancelled() {
            warn!("Cancelled during build");
            return PipelineReport::finished(Some(PipelineError::Cancelled), Some(build), None);
        }

        let output_path = match (&build.output_path, build.success) {
            (Some(path), true) => path.clone(),
            _ => {
                error!(diagnostics = build.diagnostics.len(), "Build failed, skipping deploy");
                let err = PipelineError::Build(build.diagnostics.clone());
                return PipelineReport::finished(Some(err), Some(build), None);
            }
        };
        info!(output = %output_path.display(), elapsed_ms = duration.as_millis() as u64, "Build succeeded");

        let Some(creds) = creds else {
            info!("Deploy skipped");
            return PipelineReport::finished(None, Some(build), None);
        };

        // Deploy. Only starts once the build is finished and its output verified.
        info!(deployer = deployer.name(), site_id = creds.site_id(), "Starting deploy");
        emit(
            tx,
            PipelineEvent::DeployStarted {
                site_id: creds.site_id().to_string(),
                output_path: output_path.clone(),
            },
        )
        .await;

        let outcome = {
            let (progress_tx, forwarder) = forward(tx, PipelineEvent::DeployProgress);
            let outcome = deployer
                .deploy(&output_path, &creds, progress_tx, cancel)
                .await;
            if let Some(forwarder) = forwarder {
                let _ = forwarder.await;
            }
            outcome
        };

        emit(tx, PipelineEvent::DeployCompleted(outcome.clone())).await;

        let err = PipelineError::from_outcome(&outcome);
        PipelineReport::finished(err, Some(build), Some(outcome))
    }
}

async fn emit(tx: &Option<mpsc::Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event).await;
    }
}

/// Channel whose messages are wrapped into pipeline events. The forwarding task
/// ends once the returned sender (and its clones) are dropped.
fn forward<T: Send + 'static>(
    tx: &Option<mpsc::Sender<PipelineEvent>>,
    wrap: fn(T) -> PipelineEvent,
) -> (Option<mpsc::Sender<T>>, Option<tokio::task::JoinHandle<()>>) {
    let Some(events) = tx.clone() else {
        return (None, None);
    };
    let (item_tx, mut item_rx) = mpsc::channel::<T>(100);
    let handle = tokio::spawn(async move {
        while let Some(item) = item_rx.recv().await {
            let _ = events.send(wrap(item)).await;
        }
    });
    (Some(item_tx), Some(handle))
}

//! Build-and-deploy command.

use anyhow::{Context, Result};
use chrono::Utc;
use sitepush_builder::CommandBuilder;
use sitepush_config::project::DEFAULT_FILE_NAME;
use sitepush_config::{
    ConfigError, ConfigResolver, DeploySettings, ProjectConfig, SettingNames,
    VariableContextBuilder, load_project,
};
use sitepush_core::locale::{self, DisplayLocale};
use sitepush_core::{DeployProgress, DeployStatus, DiagnosticStream};
use sitepush_deployer::{DEFAULT_API_URL, DeployPolicy, NetlifyDeployer};
use sitepush_pipeline::{
    PipelineError, PipelineEvent, PipelineExit, PipelineOrchestrator, PipelineRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// Options gathered from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub source: PathBuf,
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub api_url: Option<String>,
    pub locale: Option<String>,
    pub skip_deploy: bool,
}

/// Everything the pipeline needs, resolved from CLI options and the project file.
struct Prepared {
    source_root: PathBuf,
    builder: CommandBuilder,
    api_url: Url,
    policy: DeployPolicy,
    resolver: ConfigResolver,
}

/// Build the site and deploy it, printing progress as it goes.
pub async fn run(options: RunOptions) -> Result<PipelineExit> {
    let prepared = match prepare(&options) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("✗ {}", PipelineError::from(e));
            return Ok(PipelineExit::ConfigError);
        }
    };

    let deployer = match NetlifyDeployer::new(prepared.api_url.clone(), prepared.policy.clone()) {
        Ok(deployer) => deployer,
        Err(e) => {
            let err = PipelineError::DeployFailed(format!("cannot create the Netlify client: {}", e));
            eprintln!("✗ {}", err);
            return Ok(err.exit_code());
        }
    };

    info!(
        source = %prepared.source_root.display(),
        api_url = %prepared.api_url,
        skip_deploy = options.skip_deploy,
        "Starting sitepush"
    );

    let orchestrator = PipelineOrchestrator::new(
        prepared.resolver,
        Arc::new(prepared.builder),
        Arc::new(deployer),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });

    let mut request = PipelineRequest::new(prepared.source_root);
    request.skip_deploy = options.skip_deploy;

    let (mut rx, report_handle) = orchestrator.execute(request, cancel);

    let display = locale::current();
    while let Some(event) = rx.recv().await {
        render(display, &event);
    }

    let report = report_handle
        .await
        .context("Pipeline execution task failed")?;

    match &report.error {
        None => {
            if let Some(url) = report.deployed_url() {
                println!("\n✓ Site is live at {}", url);
            } else {
                println!("\n✓ Done");
            }
        }
        Some(e) => eprintln!("\n✗ {}", e),
    }

    Ok(report.exit)
}

fn prepare(options: &RunOptions) -> Result<Prepared, ConfigError> {
    let (config_path, required) = match &options.config {
        Some(path) => (path.clone(), true),
        None => (options.source.join(DEFAULT_FILE_NAME), false),
    };
    let project = load_project(&config_path, required)?;

    let tag = options
        .locale
        .clone()
        .or_else(|| project.locale.clone())
        .unwrap_or_else(|| locale::DEFAULT_TAG.to_string());
    let display = locale::lookup(&tag).ok_or_else(|| ConfigError::UnknownLocale(tag.clone()))?;
    locale::init(display);

    let source_root = if project.site.source.is_some() {
        project.source_root()
    } else {
        options.source.clone()
    };

    let builder = site_builder(
        &project,
        &source_root,
        options.output.clone(),
        display.tag,
    );
    let api_url = api_url(options.api_url.as_deref(), &project.deploy)?;
    let policy = deploy_policy(&project.deploy);

    let resolver = ConfigResolver::standard(Some(
        project.settings_source(config_path.display().to_string()),
    ));

    Ok(Prepared {
        source_root,
        builder,
        api_url,
        policy,
        resolver,
    })
}

/// Generator command with `${...}` references filled in. Deploy settings are
/// kept out of both the references and the child's environment.
fn site_builder(
    project: &ProjectConfig,
    source_root: &std::path::Path,
    output_override: Option<PathBuf>,
    locale_tag: &str,
) -> CommandBuilder {
    let output = output_override.unwrap_or_else(|| project.site.output.clone());
    let output_path = if output.is_absolute() {
        output.clone()
    } else {
        source_root.join(&output)
    };

    let withheld = withheld_settings(project);
    let vars = VariableContextBuilder::new()
        .with_source(source_root.display().to_string())
        .with_output(output_path.display().to_string())
        .with_locale(locale_tag)
        .with_process_env()
        .withhold(withheld.iter().cloned())
        .build();

    CommandBuilder::new(vars.interpolate_vec(&project.site.command), output)
        .with_env(vars.interpolate_map(&project.site.env))
        .without_env(withheld)
}

/// The deploy key setting plus every key of the project's `settings` block.
fn withheld_settings(project: &ProjectConfig) -> Vec<String> {
    let mut names = vec![SettingNames::default().deploy_key_key];
    names.extend(project.settings.keys().cloned());
    names.sort();
    names.dedup();
    names
}

/// API base URL: command line or environment first, then the project file.
fn api_url(cli: Option<&str>, settings: &DeploySettings) -> Result<Url, ConfigError> {
    let raw = cli
        .filter(|v| !v.trim().is_empty())
        .or(settings.api_url.as_deref())
        .unwrap_or(DEFAULT_API_URL);

    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        field: "api-url".to_string(),
        message: format!("{}: {}", raw, e),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidValue {
            field: "api-url".to_string(),
            message: format!("{} cannot be used as a base URL", raw),
        });
    }
    Ok(url)
}

/// Deployer defaults overlaid with the project's `deploy` block.
fn deploy_policy(settings: &DeploySettings) -> DeployPolicy {
    let mut policy = DeployPolicy::default();
    if let Some(v) = settings.max_attempts {
        policy.max_attempts = v;
    }
    if let Some(v) = settings.initial_backoff_ms {
        policy.initial_backoff = Duration::from_millis(v);
    }
    if let Some(v) = settings.max_backoff_ms {
        policy.max_backoff = Duration::from_millis(v);
    }
    if let Some(v) = settings.poll_interval_ms {
        policy.poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = settings.timeout_secs {
        policy.timeout = Duration::from_secs(v);
    }
    if let Some(v) = settings.request_timeout_secs {
        policy.request_timeout = Duration::from_secs(v);
    }
    policy
}

fn render(display: &DisplayLocale, event: &PipelineEvent) {
    match event {
        PipelineEvent::ConfigResolved { site_id } => {
            println!("Site: {}", site_id);
        }
        PipelineEvent::BuildStarted { source_root } => {
            println!("▶ Building {}", source_root.display());
        }
        PipelineEvent::BuildLog(line) => {
            let marker = match line.stream {
                DiagnosticStream::Stdout => " ",
                DiagnosticStream::Stderr => "!",
                DiagnosticStream::System => "*",
            };
            println!("  [build]{} {}", marker, line.message);
        }
        PipelineEvent::BuildCompleted {
            success, duration, ..
        } => {
            if *success {
                println!("✓ Build completed in {}\n", display.format_duration(*duration));
            } else {
                println!("✗ Build failed after {}\n", display.format_duration(*duration));
            }
        }
        PipelineEvent::DeployStarted {
            site_id,
            output_path,
        } => {
            println!("▶ Deploying {} to {}", output_path.display(), site_id);
        }
        PipelineEvent::DeployProgress(progress) => match progress {
            DeployProgress::Archived { file_count, bytes } => {
                println!(
                    "  Archived {} files ({})",
                    display.format_integer(*file_count as u64),
                    display.format_bytes(*bytes)
                );
            }
            DeployProgress::Submitted { deploy_id } => {
                println!("  Deploy {} submitted", deploy_id);
            }
            DeployProgress::State { deploy_id, state } => {
                println!("  Deploy {}: {}", deploy_id, state.as_str());
            }
            DeployProgress::Retrying {
                attempt,
                delay,
                reason,
            } => {
                println!(
                    "  Attempt {} failed ({}), retrying in {}",
                    attempt,
                    reason,
                    display.format_duration(*delay)
                );
            }
        },
        PipelineEvent::DeployCompleted(outcome) => match outcome.status {
            DeployStatus::Succeeded => println!("✓ Deploy ready\n"),
            DeployStatus::Failed => println!("✗ Deploy failed\n"),
            DeployStatus::TimedOut => println!("✗ Deploy timed out\n"),
            DeployStatus::Cancelled => println!("⊘ Deploy cancelled\n"),
        },
        PipelineEvent::PipelineCompleted { exit } => {
            let now = display.format_datetime(Utc::now());
            if exit.is_success() {
                println!("--- Pipeline completed successfully at {} ---", now);
            } else {
                println!("--- Pipeline failed at {} (exit {}) ---", now, exit.code());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_precedence() {
        let settings = DeploySettings {
            api_url: Some("https://file.example.com".to_string()),
            ..Default::default()
        };

        let url = api_url(Some("http://127.0.0.1:9000"), &settings).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/");

        let url = api_url(Some("  "), &settings).unwrap();
        assert_eq!(url.host_str(), Some("file.example.com"));

        let url = api_url(None, &DeploySettings::default()).unwrap();
        assert_eq!(url.as_str(), "https://api.netlify.com/");
    }

    #[test]
    fn test_api_url_rejects_garbage() {
        let err = api_url(Some("not a url"), &DeploySettings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = api_url(Some("mailto:ops@example.com"), &DeploySettings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_deploy_policy_overlay() {
        let settings = DeploySettings {
            max_attempts: Some(2),
            poll_interval_ms: Some(250),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let policy = deploy_policy(&settings);
        let defaults = DeployPolicy::default();

        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.initial_backoff, defaults.initial_backoff);
        assert_eq!(policy.request_timeout, defaults.request_timeout);
    }

    #[test]
    fn test_site_builder_output_override() {
        let mut project = ProjectConfig::default();
        project.site.command = vec![
            "generate".to_string(),
            "--out".to_string(),
            "${output}".to_string(),
        ];
        let source = PathBuf::from("/srv/blog");
        let builder = site_builder(&project, &source, Some(PathBuf::from("public")), "en-AU");

        assert_eq!(builder.output_path(&source), PathBuf::from("/srv/blog/public"));
    }

    #[test]
    fn test_deploy_settings_are_withheld() {
        let mut project = ProjectConfig::default();
        project
            .settings
            .insert("NETLIFY_SITE_ID".to_string(), "site-1".to_string());
        project
            .settings
            .insert("EXTRA_TOKEN".to_string(), "abc".to_string());

        assert_eq!(
            withheld_settings(&project),
            vec!["EXTRA_TOKEN", "NETLIFY_DEPLOY_KEY", "NETLIFY_SITE_ID"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deploy_key_never_reaches_generator() {
        use sitepush_core::SiteBuilder;

        let dir = tempfile::tempdir().unwrap();
        let mut project = ProjectConfig::default();
        project.site.output = PathBuf::from("out");
        project.site.command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "mkdir -p out && touch out/a && echo \"arg=$0 env=${TOKEN:-unset}\"".to_string(),
            "${env.NETLIFY_DEPLOY_KEY}".to_string(),
        ];
        project
            .site
            .env
            .insert("TOKEN".to_string(), "${env.NETLIFY_DEPLOY_KEY}".to_string());

        let builder = site_builder(&project, dir.path(), None, "en-AU");
        let result = builder
            .build(dir.path(), None, &CancellationToken::new())
            .await;

        assert!(result.success);
        let echoed = result
            .diagnostics
            .iter()
            .find(|d| d.message.starts_with("arg="))
            .map(|d| d.message.clone())
            .unwrap();
        assert_eq!(echoed, "arg=${env.NETLIFY_DEPLOY_KEY} env=${env.NETLIFY_DEPLOY_KEY}");
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = std::env::temp_dir().join("sitepush-no-such-dir");
        let options = RunOptions {
            source: dir.clone(),
            config: Some(dir.join("sitepush.kdl")),
            ..Default::default()
        };
        assert!(matches!(prepare(&options), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_unknown_locale_is_a_config_error() {
        let options = RunOptions {
            source: std::env::temp_dir().join("sitepush-no-such-dir"),
            locale: Some("xx-YY".to_string()),
            ..Default::default()
        };
        assert!(matches!(prepare(&options), Err(ConfigError::UnknownLocale(_))));
    }
}

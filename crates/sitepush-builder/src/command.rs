//! External generator command builder.

use async_trait::async_trait;
use sitepush_core::builder::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Runs a site generator as a child process in the source root.
pub struct CommandBuilder {
    /// Program and arguments. Empty means the output directory is pre-built.
    command: Vec<String>,
    /// Artifact directory, relative to the source root unless absolute.
    output_dir: PathBuf,
    env: HashMap<String, String>,
    /// Inherited variables removed from the child's environment.
    withheld_env: Vec<String>,
}

/// How long to keep collecting output after the generator exits. A detached
/// descendant may hold the pipes open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

impl CommandBuilder {
    pub fn new(command: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            env: HashMap::new(),
            withheld_env: Vec::new(),
        }
    }

    /// Skip generation and only verify an existing output directory.
    pub fn prebuilt(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(Vec::new(), output_dir)
    }

    /// Extra environment for the child, on top of the inherited environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Keep these variables out of the child's environment, even if set in
    /// the parent or passed through `with_env`.
    pub fn without_env<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.withheld_env.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn output_path(&self, source_root: &Path) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            source_root.join(&self.output_dir)
        }
    }

    async fn run_command(
        &self,
        source_root: &Path,
        sink: &mut DiagnosticSink,
        cancel: &CancellationToken,
    ) -> Result<(), String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| "no build command configured".to_string())?;

        sink.push(Diagnostic::system(format!(
            "Running: {}",
            self.command.join(" ")
        )))
        .await;

        let mut command = Command::new(program);
        command.args(args).current_dir(source_root).envs(&self.env);
        for name in &self.withheld_env {
            command.env_remove(name);
        }

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start '{}': {}", program, e))?;

        let (tx, mut rx) = mpsc::channel::<Diagnostic>(256);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(stdout, DiagnosticStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(stderr, DiagnosticStream::Stderr, tx.clone())));
        }
        drop(tx);

        let exited = loop {
            tokio::select! {
                _ = cancel.cancelled() => break None,
                Some(line) = rx.recv() => sink.push(line).await,
                status = child.wait() => break Some(status),
            }
        };

        let Some(status) = exited else {
            warn!(program = %program, "Build cancelled, killing generator");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Kill after cancellation failed");
            }
            abort_all(&readers);
            return Err("build cancelled".to_string());
        };
        let status = status.map_err(|e| format!("failed to wait for build: {}", e))?;

        // Pick up what is still buffered in the pipes.
        let grace = tokio::time::sleep(OUTPUT_GRACE);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                line = rx.recv() => match line {
                    Some(line) => sink.push(line).await,
                    None => break,
                },
                _ = &mut grace => {
                    debug!(program = %program, "Output still open after generator exit, detaching");
                    break;
                }
            }
        }
        abort_all(&readers);

        if status.success() {
            Ok(())
        } else {
            Err(format!("build command failed with {}", status))
        }
    }
}

#[async_trait]
impl SiteBuilder for CommandBuilder {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn build(
        &self,
        source_root: &Path,
        logs: Option<mpsc::Sender<Diagnostic>>,
        cancel: &CancellationToken,
    ) -> BuildResult {
        let mut sink = DiagnosticSink::new(logs);

        if !source_root.is_dir() {
            sink.push(Diagnostic::system(format!(
                "source root {} is not a directory",
                source_root.display()
            )))
            .await;
            return BuildResult::failed(sink.into_inner());
        }

        if !self.command.is_empty() {
            info!(source = %source_root.display(), "Running site generator");
            if let Err(message) = self.run_command(source_root, &mut sink, cancel).await {
                sink.push(Diagnostic::system(message)).await;
                return BuildResult::failed(sink.into_inner());
            }
        }

        let output_path = self.output_path(source_root);
        match count_files(&output_path) {
            Ok(0) => {
                sink.push(Diagnostic::system(format!(
                    "output directory {} is empty",
                    output_path.display()
                )))
                .await;
                BuildResult::failed(sink.into_inner())
            }
            Ok(files) => {
                info!(output = %output_path.display(), files, "Build output ready");
                sink.push(Diagnostic::system(format!(
                    "{} files in {}",
                    files,
                    output_path.display()
                )))
                .await;
                BuildResult::succeeded(output_path, sink.into_inner())
            }
            Err(message) => {
                sink.push(Diagnostic::system(message)).await;
                BuildResult::failed(sink.into_inner())
            }
        }
    }
}

/// Count regular files under `dir`, recursively.
pub fn count_files(dir: &Path) -> Result<usize, String> {
    if !dir.is_dir() {
        return Err(format!(
            "output directory {} does not exist",
            dir.display()
        ));
    }

    let mut count = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| format!("failed to scan {}: {}", dir.display(), e))?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Collects diagnostics and forwards each one to the caller's channel.
struct DiagnosticSink {
    lines: Vec<Diagnostic>,
    forward: Option<mpsc::Sender<Diagnostic>>,
}

impl DiagnosticSink {
    fn new(forward: Option<mpsc::Sender<Diagnostic>>) -> Self {
        Self {
            lines: Vec::new(),
            forward,
        }
    }

    async fn push(&mut self, line: Diagnostic) {
        if let Some(tx) = &self.forward {
            let _ = tx.send(line.clone()).await;
        }
        self.lines.push(line);
    }

    fn into_inner(self) -> Vec<Diagnostic> {
        self.lines
    }
}

fn abort_all(readers: &[JoinHandle<()>]) {
    for reader in readers {
        reader.abort();
    }
}

/// Forward each line of `reader`. Bytes that are not UTF-8 are replaced
/// rather than ending the stream, so the pipe keeps draining.
async fn read_lines(
    reader: impl AsyncRead + Unpin,
    stream: DiagnosticStream,
    tx: mpsc::Sender<Diagnostic>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(Diagnostic::new(stream, line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, ?stream, "Failed to read build output");
                break;
            }
        }
    }
}

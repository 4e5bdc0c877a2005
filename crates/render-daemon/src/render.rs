use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use crate::config::ServiceConfig;
use crate::error::RenderError;

/// Name editly is told to write the rendered video to
pub const OUTPUT_FILE_NAME: &str = "output.mp4";

/// How long to keep draining output pipes after the child is gone
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured editly output, kept for logging whatever the outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub stdout: String,
    pub stderr: String,
}

/// A render output confirmed to exist on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug)]
pub enum RenderResult {
    Success(RenderedArtifact),
    Failure {
        reason: RenderError,
        diagnostics: Diagnostics,
    },
}

/// Runs editly as a child process under a deadline
#[derive(Debug, Clone)]
pub struct EditlyInvoker {
    pub editly_bin: PathBuf,
    pub display: String,
    pub timeout: Duration,
}

impl EditlyInvoker {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        EditlyInvoker {
            editly_bin: cfg.editly_bin.clone(),
            display: cfg.display.clone(),
            timeout: cfg.render_timeout(),
        }
    }

    /// Arguments for `editly <spec> --out <output>`
    pub fn build_args(spec_path: &Path, output_path: &Path) -> Vec<OsString> {
        vec![
            spec_path.as_os_str().to_owned(),
            OsString::from("--out"),
            output_path.as_os_str().to_owned(),
        ]
    }

    /// Render `spec_path` into `<workspace>/output.mp4`.
    ///
    /// Success requires a clean exit *and* the output file on disk. There is
    /// exactly one attempt; every failure is final for the job.
    pub async fn render(&self, spec_path: &Path, workspace: &Path) -> RenderResult {
        let output_path = workspace.join(OUTPUT_FILE_NAME);
        let args = Self::build_args(spec_path, &output_path);

        info!(
            "Executing: {} \"{}\" --out \"{}\"",
            self.editly_bin.display(),
            spec_path.display(),
            output_path.display()
        );

        let mut cmd = Command::new(&self.editly_bin);
        cmd.args(&args)
            .current_dir(workspace)
            .env("DISPLAY", &self.display)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Abandoned jobs (client hung up mid-render) must not leave editly running
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RenderResult::Failure {
                    reason: RenderError::Launch(format!("{}: {}", self.editly_bin.display(), e)),
                    diagnostics: Diagnostics::default(),
                };
            }
        };

        let stdout_handle = child.stdout.take().map(spawn_reader);
        let stderr_handle = child.stderr.take().map(spawn_reader);

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;

        let status = match waited {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                let diagnostics = collect(stdout_handle, stderr_handle).await;
                log_diagnostics(&diagnostics);
                return RenderResult::Failure {
                    reason: RenderError::Launch(format!("failed to wait for editly: {}", e)),
                    diagnostics,
                };
            }
            Err(_) => {
                warn!("editly exceeded {}ms deadline, killing it", self.timeout.as_millis());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill editly: {}", e);
                }
                None
            }
        };

        let diagnostics = collect(stdout_handle, stderr_handle).await;
        log_diagnostics(&diagnostics);

        let status = match status {
            Some(status) => status,
            None => {
                return RenderResult::Failure {
                    reason: RenderError::Timeout(self.timeout),
                    diagnostics,
                };
            }
        };

        debug!("editly finished with {}", status);

        if !status.success() {
            return RenderResult::Failure {
                reason: RenderError::ExitStatus(status.to_string()),
                diagnostics,
            };
        }

        // A clean exit proves nothing on its own; the file has to be there
        match tokio::fs::metadata(&output_path).await {
            Ok(meta) if meta.is_file() => {
                let size_bytes = meta.len();
                info!(
                    "Video render completed successfully, output file size: {}",
                    humansize::format_size(size_bytes, humansize::DECIMAL)
                );
                RenderResult::Success(RenderedArtifact {
                    path: output_path,
                    size_bytes,
                })
            }
            Ok(_) => RenderResult::Failure {
                reason: RenderError::OutputMissing,
                diagnostics,
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => RenderResult::Failure {
                reason: RenderError::OutputMissing,
                diagnostics,
            },
            Err(e) => RenderResult::Failure {
                reason: RenderError::Inspect(e.to_string()),
                diagnostics,
            },
        }
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Stopped reading editly output: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Join the pipe readers. Grandchildren that inherited the pipes can keep
/// them open past the child's death, so give up after a short grace.
async fn collect(
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
) -> Diagnostics {
    Diagnostics {
        stdout: drain(stdout).await,
        stderr: drain(stderr).await,
    }
}

async fn drain(handle: Option<JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!("editly output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            handle.abort();
            warn!("editly output pipe still open after exit, output truncated");
            String::new()
        }
    }
}

fn log_diagnostics(diagnostics: &Diagnostics) {
    if !diagnostics.stderr.is_empty() {
        info!("Editly stderr: {}", diagnostics.stderr.trim_end());
    }
    if !diagnostics.stdout.is_empty() {
        info!("Editly stdout: {}", diagnostics.stdout.trim_end());
    }
}

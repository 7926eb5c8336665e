//! Running a test's pipeline of shell commands.
//!
//! ## Notes
//!
//! - Each run-line is its own subprocess, started in a fresh process group so that a timeout
//!   can kill everything the command spawned, not just the shell.
//! - One deadline covers the whole pipeline.
//! - stdout and stderr are read concurrently with the wait; whatever was read before a kill is
//!   kept in the transcript.
//! - A process group does not receive the terminal's SIGINT, so a [`KillSwitch`] is the only way
//!   to stop a pipeline that has no deadline. Raising it kills every running group.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::Instant;

use super::result::RunLineOutput;

/// Per-stream capture limit; output beyond this is dropped.
const MAX_STREAM_BYTES: usize = 4 * 1024 * 1024;

/// Grace period for draining pipes after the group was killed.
const DRAIN_AFTER_KILL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("shell command line is empty")]
    EmptyShell,

    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// One fully substituted run-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub command: String,
    /// When false, a failure of this line does not stop the pipeline or fail the test.
    pub propagate_failure: bool,
}

/// Everything needed to run one test's commands.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub commands: Vec<RunCommand>,
    /// Shell argv prefix; the command text is appended as the final argument.
    pub shell: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// How the pipeline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Passed,
    Failed,
    TimedOut,
    /// Killed through the [`KillSwitch`].
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub runs: Vec<RunLineOutput>,
}

/// Executes a test's run-lines.
///
/// The scheduler is generic over this so that scheduling can be exercised without spawning
/// processes.
pub trait TestExecutor: Send + Sync + 'static {
    fn run_pipeline(&self, request: RunRequest) -> impl Future<Output = Result<PipelineReport, ExecError>> + Send;
}

// ============================================================================
// Shell executor
// ============================================================================

/// One-way signal that kills every pipeline still running.
#[derive(Debug, Clone)]
pub struct KillSwitch(Arc<watch::Sender<bool>>);

impl KillSwitch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes once the switch is raised; never, without one.
async fn killed(kill: Option<&watch::Receiver<bool>>) {
    if let Some(kill) = kill {
        let mut kill = kill.clone();
        if kill.wait_for(|&raised| raised).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Why a run-line was stopped before it exited.
enum Stopped {
    Deadline,
    Killed,
}

/// Runs each line through the configured shell.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    kill: Option<watch::Receiver<bool>>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop running pipelines when `switch` is triggered.
    pub fn with_kill_switch(switch: &KillSwitch) -> Self {
        Self {
            kill: Some(switch.subscribe()),
        }
    }

    fn kill_requested(&self) -> bool {
        self.kill.as_ref().is_some_and(|kill| *kill.borrow())
    }
}

impl TestExecutor for ShellExecutor {
    async fn run_pipeline(&self, request: RunRequest) -> Result<PipelineReport, ExecError> {
        let (program, shell_args) = request.shell.split_first().ok_or(ExecError::EmptyShell)?;
        tokio::fs::create_dir_all(&request.cwd)
            .await
            .map_err(|source| ExecError::OutputDir {
                path: request.cwd.clone(),
                source,
            })?;

        let deadline = request.timeout.map(|t| Instant::now() + t);
        let mut runs = Vec::with_capacity(request.commands.len());
        let mut outcome = PipelineOutcome::Passed;

        for line in &request.commands {
            if self.kill_requested() {
                outcome = PipelineOutcome::Interrupted;
                break;
            }

            let mut cmd = tokio::process::Command::new(program);
            cmd.args(shell_args)
                .arg(&line.command)
                .current_dir(&request.cwd)
                .envs(&request.env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(unix)]
            cmd.process_group(0);

            tracing::debug!(command = %line.command, "spawning run-line");
            let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
                program: program.clone(),
                source,
            })?;
            let pid = child.id();
            let mut stdout_pipe = child.stdout.take();
            let mut stderr_pipe = child.stderr.take();
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            let waited = {
                let work = async {
                    let (_, _, status) = tokio::join!(
                        read_capped(stdout_pipe.as_mut(), &mut stdout),
                        read_capped(stderr_pipe.as_mut(), &mut stderr),
                        child.wait()
                    );
                    status
                };
                let expired = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    status = work => Ok(status),
                    () = expired => Err(Stopped::Deadline),
                    () = killed(self.kill.as_ref()) => Err(Stopped::Killed),
                }
            };

            let exit_code = match waited {
                Ok(status) => {
                    let status = status.map_err(|source| ExecError::Wait {
                        command: line.command.clone(),
                        source,
                    })?;
                    status.code()
                }
                Err(stopped) => {
                    outcome = match stopped {
                        Stopped::Deadline => {
                            tracing::debug!(command = %line.command, ?pid, "deadline reached, killing process group");
                            PipelineOutcome::TimedOut
                        }
                        Stopped::Killed => {
                            tracing::debug!(command = %line.command, ?pid, "kill requested, killing process group");
                            PipelineOutcome::Interrupted
                        }
                    };
                    kill_group(pid, &mut child).await;
                    let _ = tokio::time::timeout(DRAIN_AFTER_KILL, async {
                        tokio::join!(
                            read_capped(stdout_pipe.as_mut(), &mut stdout),
                            read_capped(stderr_pipe.as_mut(), &mut stderr)
                        )
                    })
                    .await;
                    None
                }
            };

            runs.push(RunLineOutput {
                command: line.command.clone(),
                exit_code,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });

            if matches!(outcome, PipelineOutcome::TimedOut | PipelineOutcome::Interrupted) {
                break;
            }
            if exit_code != Some(0) && line.propagate_failure {
                outcome = PipelineOutcome::Failed;
                break;
            }
        }

        Ok(PipelineReport { outcome, runs })
    }
}

/// Append from `pipe` into `buf` until EOF, an error, or the capture limit.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<&mut R>, buf: &mut Vec<u8>) {
    let Some(pipe) = pipe else {
        return;
    };
    let mut chunk = vec![0u8; 16 * 1024];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_STREAM_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
}

#[cfg(unix)]
async fn kill_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            tracing::warn!(pid, %err, "failed to kill process group");
        }
    }
    // Reap the shell; the group members are gone or orphaned to init.
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn kill_group(_pid: Option<u32>, child: &mut tokio::process::Child) {
    let _ = child.kill().await;
}

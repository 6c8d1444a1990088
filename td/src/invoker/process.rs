//! Process-backed `AgentInvoker` (spec.md §4.3).
//!
//! Spawns the external agent binary, streams its stdout line-by-line to a
//! caller-supplied sink, and on cancellation kills the whole process group
//! so descendants the agent itself spawned don't leak.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::ratelimit::{self, RateLimitInfo};
use crate::orchestrator::cancellation::CancellationToken;

/// A rendered request to an agent persona (spec.md §6 "Agent invocation contract").
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub persona: String,
    pub prompt: String,
    pub working_dir: PathBuf,
}

/// Terminal, successful outcome of one subprocess run.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

#[derive(Debug, Error, Clone)]
pub enum InvokerError {
    #[error("failed to spawn agent binary {binary}: {message}")]
    Spawn { binary: String, message: String },

    #[error("agent exited {code}: {stderr_head}")]
    NonZeroExit { code: i32, stderr_head: String },

    #[error("cancelled before agent exited")]
    Cancelled,

    #[error("attempt timed out before agent exited")]
    Timeout,

    #[error("rate limited: {0:?}")]
    RateLimited(RateLimitInfo),
}

/// Line-oriented sink the invoker streams stdout through as it arrives.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        invocation: &AgentInvocation,
        cancel: &CancellationToken,
        on_line: LineSink,
    ) -> Result<AgentOutput, InvokerError>;
}

/// Spawns `binary` with `[persona, prompt_file_path, working_dir]` (spec.md §6).
pub struct ProcessInvoker {
    binary: PathBuf,
    termination_grace: Duration,
}

impl ProcessInvoker {
    pub fn new(binary: PathBuf, termination_grace: Duration) -> Self {
        Self { binary, termination_grace }
    }

    /// Send SIGTERM to the child's process group, wait up to the grace
    /// period, then SIGKILL if it hasn't exited (spec.md §5 "Cancellation
    /// and timeout").
    #[cfg(unix)]
    async fn terminate(&self, child: &mut tokio::process::Child) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = child.id() else {
            return;
        };
        debug!(pid, "ProcessInvoker::terminate: sending SIGTERM to process group");
        let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGTERM);

        let grace = tokio::time::sleep(self.termination_grace);
        tokio::select! {
            _ = child.wait() => {}
            _ = grace => {
                warn!(pid, "ProcessInvoker::terminate: grace period elapsed, sending SIGKILL");
                let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
                let _ = child.wait().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&self, child: &mut tokio::process::Child) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[async_trait]
impl AgentInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        invocation: &AgentInvocation,
        cancel: &CancellationToken,
        on_line: LineSink,
    ) -> Result<AgentOutput, InvokerError> {
        let start = Instant::now();

        let mut prompt_file = tempfile::NamedTempFile::new().map_err(|e| InvokerError::Spawn {
            binary: self.binary.display().to_string(),
            message: format!("failed to create prompt file: {e}"),
        })?;
        {
            use std::io::Write;
            prompt_file.write_all(invocation.prompt.as_bytes()).map_err(|e| InvokerError::Spawn {
                binary: self.binary.display().to_string(),
                message: format!("failed to write prompt file: {e}"),
            })?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg(&invocation.persona)
            .arg(prompt_file.path())
            .arg(&invocation.working_dir)
            .current_dir(&invocation.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // New session/process group so a single kill(-pid) reaches every
        // descendant the agent itself spawns (spec.md §4.3 cancellation semantics).
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| InvokerError::Spawn {
            binary: self.binary.display().to_string(),
            message: e.to_string(),
        })?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut buf = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                on_line(&line);
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut buf = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| InvokerError::Spawn {
                binary: self.binary.display().to_string(),
                message: e.to_string(),
            })?,
            _ = cancel.cancelled() => {
                self.terminate(&mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                if cancel.own_deadline_elapsed() {
                    return Err(InvokerError::Timeout);
                }
                return Err(InvokerError::Cancelled);
            }
        };

        let stdout_buf = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();
        let combined = format!("{stdout_buf}\n{stderr_buf}");

        if let Some(info) = ratelimit::detect(&combined) {
            debug!(persona = %invocation.persona, ?info, "ProcessInvoker::invoke: rate-limit signature detected");
            return Err(InvokerError::RateLimited(info));
        }

        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(InvokerError::NonZeroExit {
                code: exit_code,
                stderr_head: stderr_buf.lines().next().unwrap_or_default().to_string(),
            });
        }

        Ok(AgentOutput {
            stdout: stdout_buf,
            stderr: stderr_buf,
            exit_code,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker(binary: &str) -> ProcessInvoker {
        ProcessInvoker::new(PathBuf::from(binary), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn spawn_error_for_missing_binary() {
        let inv = invoker("/definitely/not/a/real/agent-binary");
        let invocation = AgentInvocation {
            persona: "builder".into(),
            prompt: "do it".into(),
            working_dir: std::env::temp_dir(),
        };
        let cancel = CancellationToken::new(None);
        let result = inv.invoke(&invocation, &cancel, Arc::new(|_| {})).await;
        assert!(matches!(result, Err(InvokerError::Spawn { .. })));
    }

    #[tokio::test]
    async fn successful_exit_captures_stdout() {
        let inv = invoker("echo");
        let invocation = AgentInvocation {
            persona: "builder".into(),
            prompt: "hello".into(),
            working_dir: std::env::temp_dir(),
        };
        let cancel = CancellationToken::new(None);
        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let result = inv
            .invoke(&invocation, &cancel, Arc::new(move |l: &str| sink_lines.lock().unwrap().push(l.to_string())))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("builder"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let inv = invoker("false");
        let invocation = AgentInvocation {
            persona: "builder".into(),
            prompt: "prompt".into(),
            working_dir: std::env::temp_dir(),
        };
        let cancel = CancellationToken::new(None);
        let result = inv.invoke(&invocation, &cancel, Arc::new(|_| {})).await;
        assert!(matches!(result, Err(InvokerError::NonZeroExit { .. })));
    }

    #[tokio::test]
    async fn cancellation_before_spawn_completes_kills_child() {
        let inv = invoker("sleep");
        let invocation = AgentInvocation {
            persona: "10".into(),
            prompt: "prompt".into(),
            working_dir: std::env::temp_dir(),
        };
        let cancel = CancellationToken::new(None);
        let canceller = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let result = inv.invoke(&invocation, &cancel, Arc::new(|_| {})).await;
        handle.await.unwrap();
        assert!(matches!(result, Err(InvokerError::Cancelled)));
    }

    #[tokio::test]
    async fn rate_limit_signature_in_output_is_detected() {
        let inv = invoker("sh");
        // `sh -c` receives its one argument, so reusing persona/prompt/working_dir
        // positions doesn't line up here; exercise via echo-style args instead.
        let invocation = AgentInvocation {
            persona: "-c".into(),
            prompt: "echo 'daily quota exceeded for this account'".into(),
            working_dir: std::env::temp_dir(),
        };
        let cancel = CancellationToken::new(None);
        let result = inv.invoke(&invocation, &cancel, Arc::new(|_| {})).await;
        assert!(matches!(result, Err(InvokerError::RateLimited(_))));
    }
}

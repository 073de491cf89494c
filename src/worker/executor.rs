use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::{CmdqueueError, Result};
use crate::scheduler::{CommandSpec, LOST};

/// Captured result of a process that ran to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or the negated signal number if the process was killed
    /// by a signal
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns commands with both output streams captured.
///
/// Output is only available once the process has exited; nothing is
/// streamed while it runs.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Start `command`. Must be called from within a tokio runtime.
    pub fn spawn(&self, command: &CommandSpec) -> Result<RunningProcess> {
        let program = command.program().ok_or_else(|| {
            CmdqueueError::Spawn(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;

        let child = Command::new(program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CmdqueueError::Spawn)?;

        // Only None once the child has been reaped, which cannot have
        // happened yet
        let pid = child.id().ok_or_else(|| {
            CmdqueueError::Spawn(io::Error::new(
                io::ErrorKind::Other,
                "process id unavailable after spawn",
            ))
        })?;

        tracing::info!(pid, command = %command, "Process started");
        Ok(RunningProcess {
            child,
            pid: i64::from(pid),
        })
    }

    /// Spawn `command` and wait for it to exit.
    pub async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput> {
        self.spawn(command)?.wait(CancellationToken::new()).await
    }
}

/// A spawned process that has not been reaped yet.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: i64,
}

impl RunningProcess {
    pub fn pid(&self) -> i64 {
        self.pid
    }

    /// Drain both output streams and wait for exit.
    ///
    /// Cancelling `cancel` sends SIGTERM to the process once and keeps
    /// waiting; the process is free to ignore it.
    pub async fn wait(mut self, cancel: CancellationToken) -> Result<ProcessOutput> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();
        let pid = self.pid;
        let child = &mut self.child;

        let exit = async move {
            let early = tokio::select! {
                status = child.wait() => Some(status),
                _ = cancel.cancelled() => None,
            };
            match early {
                Some(status) => status,
                None => {
                    tracing::info!(pid, "Terminating process");
                    send_terminate(child);
                    child.wait().await
                }
            }
        };

        let (status, stdout, stderr) =
            tokio::join!(exit, read_stream(stdout), read_stream(stderr));

        let exit_code = exit_code(status?);
        tracing::info!(pid, exit_code, "Process exited");

        Ok(ProcessOutput {
            stdout: stdout?,
            stderr: stderr?,
            exit_code,
        })
    }
}

async fn read_stream<R>(pipe: Option<R>) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Already reaped, nothing to signal
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "Failed to signal process");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill process");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    LOST
}

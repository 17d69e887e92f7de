use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

use super::invocation::TranscodeInvocation;

/// Spawns the transcoder for a session. The returned child is owned by the
/// supervisor from then on.
#[async_trait::async_trait]
pub trait TranscoderLauncher: Send + Sync {
    async fn launch(&self, invocation: &TranscodeInvocation) -> io::Result<Child>;
}

#[derive(Debug, Default)]
pub struct SystemLauncher;

#[async_trait::async_trait]
impl TranscoderLauncher for SystemLauncher {
    async fn launch(&self, invocation: &TranscodeInvocation) -> io::Result<Child> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "transcoder", pid, "{line}");
                }
            });
        }
        Ok(child)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own before any signal was sent.
    AlreadyExited(ExitStatus),
    Graceful(ExitStatus),
    Forced,
}

/// SIGTERM, wait up to `grace`, then SIGKILL and wait up to `kill_timeout`.
pub async fn terminate(
    child: &mut Child,
    grace: Duration,
    kill_timeout: Duration,
) -> io::Result<Termination> {
    if let Some(status) = child.try_wait()? {
        return Ok(Termination::AlreadyExited(status));
    }

    request_exit(child)?;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => return status.map(Termination::Graceful),
        Err(_) => {
            warn!(
                pid = child.id(),
                grace_ms = grace.as_millis() as u64,
                "transcoder ignored termination request, killing"
            );
        }
    }

    child.start_kill()?;
    match tokio::time::timeout(kill_timeout, child.wait()).await {
        Ok(status) => status.map(|_| Termination::Forced),
        Err(_) => {
            error!(pid = child.id(), "transcoder still alive after kill");
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "transcoder did not exit after kill",
            ))
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: plain signal delivery to a pid we spawned and have not yet reaped,
    // so it cannot have been recycled for another process.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

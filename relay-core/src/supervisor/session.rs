use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use uuid::Uuid;

use super::invocation::PUBLIC_PLAYLIST_PATH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopping,
    /// The transcoder exited without being asked to. The source is kept so
    /// the session can be restarted.
    Error,
}

#[derive(Debug)]
pub(crate) struct TranscoderProcess {
    pub(crate) child: Child,
    pub(crate) pid: Option<u32>,
}

/// The single session slot. Transitions only go through the methods below so
/// that `process` is present exactly in Running/Stopping and `source` is
/// present exactly outside Idle.
#[derive(Debug)]
pub(crate) struct StreamSession {
    status: SessionStatus,
    source: Option<String>,
    process: Option<TranscoderProcess>,
    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    last_exit: Option<String>,
}

/// Point-in-time view of the session, safe to hand out to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub source: Option<String>,
    pub session_id: Option<Uuid>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit: Option<String>,
}

impl SessionSnapshot {
    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn hls_url(&self) -> Option<&'static str> {
        self.is_running().then_some(PUBLIC_PLAYLIST_PATH)
    }
}

impl StreamSession {
    pub(crate) fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            source: None,
            process: None,
            session_id: None,
            started_at: None,
            last_exit: None,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn has_process(&self) -> bool {
        self.process.is_some()
    }

    /// Idle -> Running.
    pub(crate) fn begin(&mut self, source: String, child: Child) -> Uuid {
        debug_assert_eq!(self.status, SessionStatus::Idle);
        let id = Uuid::new_v4();
        let pid = child.id();
        self.status = SessionStatus::Running;
        self.source = Some(source);
        self.process = Some(TranscoderProcess { child, pid });
        self.session_id = Some(id);
        self.started_at = Some(Utc::now());
        self.last_exit = None;
        id
    }

    /// Running -> Stopping. Hands out the process so the caller can drive
    /// termination while the slot still records it.
    pub(crate) fn begin_stopping(&mut self) -> Option<&mut TranscoderProcess> {
        let process = self.process.as_mut()?;
        self.status = SessionStatus::Stopping;
        Some(process)
    }

    /// Running -> Error after the process exited on its own.
    pub(crate) fn mark_exited(&mut self, exit: String) {
        self.process = None;
        self.status = SessionStatus::Error;
        self.last_exit = Some(exit);
    }

    /// Any state -> Idle. Dropping the process handle here is the last owner.
    pub(crate) fn reset(&mut self) {
        self.status = SessionStatus::Idle;
        self.source = None;
        self.process = None;
        self.session_id = None;
        self.started_at = None;
    }

    /// Checks the recorded process against the OS. Returns a description of
    /// the exit when the process turned out to be gone.
    pub(crate) fn reconcile(&mut self) -> Option<String> {
        if self.status != SessionStatus::Running {
            return None;
        }
        let process = self.process.as_mut()?;
        let exit = match process.child.try_wait() {
            Ok(None) => return None,
            Ok(Some(status)) => describe_exit(status),
            Err(err) => format!("failed to poll transcoder: {err}"),
        };
        self.mark_exited(exit.clone());
        Some(exit)
    }

    /// Resolves when the tracked process exits; pending forever otherwise.
    pub(crate) async fn exited(&mut self) -> String {
        match self.process.as_mut() {
            Some(process) => match process.child.wait().await {
                Ok(status) => describe_exit(status),
                Err(err) => format!("failed to wait for transcoder: {err}"),
            },
            None => std::future::pending().await,
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            source: self.source.clone(),
            session_id: self.session_id,
            pid: self.process.as_ref().and_then(|process| process.pid),
            started_at: self.started_at,
            last_exit: self.last_exit.clone(),
        }
    }
}

pub(crate) fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("transcoder exited with code {code}"),
        None => "transcoder terminated by signal".to_string(),
    }
}

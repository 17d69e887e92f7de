//! Stream supervisor: owns the single transcoding session.
//!
//! All operations are funnelled through one actor task, so start, stop,
//! restart and status never interleave and the slot is never observed half
//! updated. The actor also watches the running child and records an
//! unexpected exit as soon as it happens.

pub mod invocation;
pub mod process;
mod session;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::RelayConfig;

pub use self::invocation::{TranscodeInvocation, PUBLIC_PLAYLIST_PATH};
pub use self::process::{SystemLauncher, TranscoderLauncher};
pub use self::session::{SessionSnapshot, SessionStatus};

use self::process::Termination;
use self::session::StreamSession;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("transcoder binary {0} not found, is FFmpeg installed?")]
    TranscoderMissing(PathBuf),
    #[error("failed to start stream: {0}")]
    ProcessLaunch(#[source] io::Error),
    #[error("no stream to restart")]
    NothingToRestart,
    #[error("stream supervisor is not running")]
    Unavailable,
}

impl SupervisorError {
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            SupervisorError::TranscoderMissing(_) | SupervisorError::ProcessLaunch(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub binary: PathBuf,
    pub output_dir: PathBuf,
    pub grace_period: Duration,
    pub kill_timeout: Duration,
    pub command_buffer: usize,
}

impl SupervisorSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            binary: config.transcoder_binary(),
            output_dir: config.output_dir(),
            grace_period: config.grace_period(),
            kill_timeout: config.kill_timeout(),
            command_buffer: config.supervisor.command_buffer.max(1),
        }
    }
}

/// Returned by a successful start or restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub source: String,
    pub hls_url: &'static str,
    pub session_id: Uuid,
    pub pid: Option<u32>,
    /// How the superseded session ended, if there was one.
    pub superseded: Option<StopOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyIdle,
    Graceful,
    Forced,
}

impl StopOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            StopOutcome::AlreadyIdle => "No stream is currently running",
            StopOutcome::Graceful => "Stream stopped successfully",
            StopOutcome::Forced => "Stream force stopped",
        }
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug)]
enum Command {
    Start {
        source: String,
        responder: oneshot::Sender<Result<Started, SupervisorError>>,
    },
    Stop {
        responder: oneshot::Sender<StopOutcome>,
    },
    Restart {
        responder: oneshot::Sender<Result<Started, SupervisorError>>,
    },
    Status {
        responder: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown {
        responder: oneshot::Sender<StopOutcome>,
    },
}

/// Cloneable handle to the supervisor actor.
#[derive(Debug, Clone)]
pub struct StreamSupervisor {
    commands: mpsc::Sender<Command>,
}

impl StreamSupervisor {
    /// Spawns the actor on the current runtime.
    pub fn spawn(
        settings: SupervisorSettings,
        launcher: Option<Arc<dyn TranscoderLauncher>>,
    ) -> (Self, JoinHandle<()>) {
        let launcher = launcher.unwrap_or_else(|| Arc::new(SystemLauncher));
        let (tx, rx) = mpsc::channel(settings.command_buffer.max(1));
        let actor = SupervisorActor {
            settings,
            launcher,
            session: StreamSession::new(),
            commands: rx,
        };
        let handle = tokio::spawn(actor.run());
        (Self { commands: tx }, handle)
    }

    pub async fn start(&self, source: impl Into<String>) -> Result<Started, SupervisorError> {
        let source = source.into();
        self.request(|responder| Command::Start { source, responder })
            .await?
    }

    pub async fn stop(&self) -> Result<StopOutcome, SupervisorError> {
        self.request(|responder| Command::Stop { responder }).await
    }

    pub async fn restart(&self) -> Result<Started, SupervisorError> {
        self.request(|responder| Command::Restart { responder })
            .await?
    }

    pub async fn status(&self) -> Result<SessionSnapshot, SupervisorError> {
        self.request(|responder| Command::Status { responder }).await
    }

    /// Stops any active session and ends the actor.
    pub async fn shutdown(&self) -> Result<StopOutcome, SupervisorError> {
        self.request(|responder| Command::Shutdown { responder })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (responder, response) = oneshot::channel();
        self.commands
            .send(build(responder))
            .await
            .map_err(|_| SupervisorError::Unavailable)?;
        response.await.map_err(|_| SupervisorError::Unavailable)
    }
}

enum Event {
    Command(Command),
    Exited(String),
    Closed,
}

struct SupervisorActor {
    settings: SupervisorSettings,
    launcher: Arc<dyn TranscoderLauncher>,
    session: StreamSession,
    commands: mpsc::Receiver<Command>,
}

impl SupervisorActor {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::Closed,
                },
                exit = self.session.exited() => Event::Exited(exit),
            };

            match event {
                Event::Command(Command::Start { source, responder }) => {
                    let result = self.start_session(source).await;
                    let _ = responder.send(result);
                }
                Event::Command(Command::Stop { responder }) => {
                    let outcome = self.stop_session().await;
                    let _ = responder.send(outcome);
                }
                Event::Command(Command::Restart { responder }) => {
                    let result = self.restart_session().await;
                    let _ = responder.send(result);
                }
                Event::Command(Command::Status { responder }) => {
                    self.reconcile();
                    let _ = responder.send(self.session.snapshot());
                }
                Event::Command(Command::Shutdown { responder }) => {
                    let outcome = self.stop_session().await;
                    let _ = responder.send(outcome);
                    info!("stream supervisor shut down");
                    return;
                }
                Event::Exited(exit) => {
                    warn!(
                        source = self.session.source().unwrap_or_default(),
                        %exit,
                        "transcoder exited unexpectedly"
                    );
                    self.session.mark_exited(exit);
                }
                Event::Closed => {
                    self.stop_session().await;
                    return;
                }
            }
        }
    }

    async fn start_session(&mut self, source: String) -> Result<Started, SupervisorError> {
        let source = source.trim().to_string();
        if source.is_empty() {
            return Err(SupervisorError::InvalidInput(
                "RTSP URL is required".to_string(),
            ));
        }

        let superseded = if self.session.status() == SessionStatus::Idle {
            None
        } else {
            let outcome = self.stop_session().await;
            info!(%outcome, "previous session superseded");
            Some(outcome)
        };

        let invocation =
            TranscodeInvocation::hls(&self.settings.binary, &source, &self.settings.output_dir);
        if let Err(err) = tokio::fs::create_dir_all(&invocation.output_dir).await {
            error!(dir = %invocation.output_dir.display(), %err, "cannot create output directory");
            return Err(SupervisorError::ProcessLaunch(err));
        }

        let child = match self.launcher.launch(&invocation).await {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                error!(binary = %self.settings.binary.display(), "transcoder binary not found");
                return Err(SupervisorError::TranscoderMissing(
                    self.settings.binary.clone(),
                ));
            }
            Err(err) => {
                error!(command = %invocation.command_line(), %err, "failed to launch transcoder");
                return Err(SupervisorError::ProcessLaunch(err));
            }
        };

        let pid = child.id();
        let session_id = self.session.begin(source.clone(), child);
        info!(
            %session_id,
            pid,
            %source,
            playlist = %invocation.playlist_path().display(),
            "stream started"
        );
        Ok(Started {
            source,
            hls_url: PUBLIC_PLAYLIST_PATH,
            session_id,
            pid,
            superseded,
        })
    }

    async fn stop_session(&mut self) -> StopOutcome {
        self.reconcile();
        if !self.session.has_process() {
            if self.session.status() != SessionStatus::Idle {
                self.session.reset();
            }
            return StopOutcome::AlreadyIdle;
        }

        let grace = self.settings.grace_period;
        let kill_timeout = self.settings.kill_timeout;
        let outcome = match self.session.begin_stopping() {
            Some(transcoder) => {
                match process::terminate(&mut transcoder.child, grace, kill_timeout).await {
                    Ok(Termination::Graceful(_)) | Ok(Termination::AlreadyExited(_)) => {
                        StopOutcome::Graceful
                    }
                    Ok(Termination::Forced) => StopOutcome::Forced,
                    Err(err) => {
                        error!(pid = transcoder.pid, %err, "transcoder termination failed");
                        StopOutcome::Forced
                    }
                }
            }
            None => StopOutcome::AlreadyIdle,
        };
        self.session.reset();
        info!(%outcome, "stream stopped");
        outcome
    }

    async fn restart_session(&mut self) -> Result<Started, SupervisorError> {
        self.reconcile();
        let Some(source) = self.session.source().map(str::to_string) else {
            return Err(SupervisorError::NothingToRestart);
        };
        info!(%source, "restarting stream");
        let stopped = self.stop_session().await;
        let mut started = self.start_session(source).await?;
        started.superseded = Some(stopped);
        Ok(started)
    }

    fn reconcile(&mut self) {
        if let Some(exit) = self.session.reconcile() {
            warn!(%exit, "transcoder found dead");
        }
    }
}

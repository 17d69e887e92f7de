#![cfg(unix)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::{
    SessionStatus, StopOutcome, StreamSupervisor, SupervisorError, SupervisorSettings,
    TranscodeInvocation, TranscoderLauncher,
};
use tempfile::TempDir;
use tokio::process::{Child, Command};

/// Runs a shell script in place of the transcoder and remembers every launch.
struct ScriptLauncher {
    script: String,
    launches: Mutex<Vec<(TranscodeInvocation, u32)>>,
}

impl ScriptLauncher {
    fn new(script: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            script: script.into(),
            launches: Mutex::new(Vec::new()),
        })
    }

    fn launches(&self) -> Vec<(TranscodeInvocation, u32)> {
        self.launches.lock().unwrap().clone()
    }

    fn pids(&self) -> Vec<u32> {
        self.launches().into_iter().map(|(_, pid)| pid).collect()
    }
}

#[async_trait::async_trait]
impl TranscoderLauncher for ScriptLauncher {
    async fn launch(&self, invocation: &TranscodeInvocation) -> io::Result<Child> {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id().expect("fresh child has a pid");
        self.launches
            .lock()
            .unwrap()
            .push((invocation.clone(), pid));
        Ok(child)
    }
}

struct FailingLauncher(io::ErrorKind);

#[async_trait::async_trait]
impl TranscoderLauncher for FailingLauncher {
    async fn launch(&self, _invocation: &TranscodeInvocation) -> io::Result<Child> {
        Err(io::Error::new(self.0, "launch refused"))
    }
}

/// Launches `sleep`, except for the call at `fail_at` which reports a missing binary.
struct FlakyLauncher {
    fail_at: usize,
    calls: AtomicUsize,
    pids: Mutex<Vec<u32>>,
}

impl FlakyLauncher {
    fn failing_on(fail_at: usize) -> Self {
        Self {
            fail_at,
            calls: AtomicUsize::new(0),
            pids: Mutex::new(Vec::new()),
        }
    }

    fn pids(&self) -> Vec<u32> {
        self.pids.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TranscoderLauncher for FlakyLauncher {
    async fn launch(&self, _invocation: &TranscodeInvocation) -> io::Result<Child> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(io::Error::new(io::ErrorKind::NotFound, "ffmpeg"));
        }
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exec sleep 30")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.pids
            .lock()
            .unwrap()
            .push(child.id().expect("fresh child has a pid"));
        Ok(child)
    }
}

fn settings(dir: &Path) -> SupervisorSettings {
    SupervisorSettings {
        binary: PathBuf::from("ffmpeg"),
        output_dir: dir.join("streams"),
        grace_period: Duration::from_secs(2),
        kill_timeout: Duration::from_secs(2),
        command_buffer: 8,
    }
}

fn spawn_with(dir: &Path, launcher: Arc<dyn TranscoderLauncher>) -> StreamSupervisor {
    let (supervisor, _actor) = StreamSupervisor::spawn(settings(dir), Some(launcher));
    supervisor
}

fn alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks that the pid exists; nothing is delivered.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

async fn wait_for_file(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never appeared", path.display());
}

#[tokio::test]
async fn start_reports_running_session() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    let started = supervisor.start("rtsp://host/cam1").await.unwrap();
    assert_eq!(started.source, "rtsp://host/cam1");
    assert_eq!(started.hls_url, "/stream.m3u8");
    assert!(started.superseded.is_none());

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.status, SessionStatus::Running);
    assert!(status.is_running());
    assert_eq!(status.source.as_deref(), Some("rtsp://host/cam1"));
    assert_eq!(status.session_id, Some(started.session_id));
    assert_eq!(status.hls_url(), Some("/stream.m3u8"));

    let launches = launcher.launches();
    assert_eq!(launches.len(), 1);
    let (invocation, pid) = &launches[0];
    assert_eq!(status.pid, Some(*pid));
    assert!(invocation.args.contains(&"rtsp://host/cam1".to_string()));
    assert_eq!(invocation.output_dir, dir.path().join("streams"));
    assert!(dir.path().join("streams").is_dir());

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn start_rejects_empty_source() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    for source in ["", "   "] {
        let err = supervisor.start(source).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidInput(_)));
    }

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.status, SessionStatus::Idle);
    assert!(status.source.is_none());
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn stop_on_idle_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let supervisor = spawn_with(dir.path(), ScriptLauncher::new("exec sleep 30"));

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::AlreadyIdle);
    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::AlreadyIdle);
    assert_eq!(
        supervisor.status().await.unwrap().status,
        SessionStatus::Idle
    );
}

#[tokio::test]
async fn stop_terminates_gracefully() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    supervisor.start("rtsp://host/cam1").await.unwrap();
    let pid = launcher.pids()[0];
    assert!(alive(pid));

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Graceful);
    assert!(!alive(pid));

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.status, SessionStatus::Idle);
    assert!(status.source.is_none());
    assert!(status.pid.is_none());
    assert!(status.hls_url().is_none());
}

#[tokio::test]
async fn stop_escalates_when_grace_period_expires() {
    let dir = TempDir::new().unwrap();
    let ready = dir.path().join("ready");
    let script = format!(
        "trap '' TERM; touch '{}'; while true; do sleep 1; done",
        ready.display()
    );
    let launcher = ScriptLauncher::new(script);
    let mut settings = settings(dir.path());
    settings.grace_period = Duration::from_millis(300);
    let (supervisor, _actor) = StreamSupervisor::spawn(settings, Some(launcher.clone()));

    supervisor.start("rtsp://host/stubborn").await.unwrap();
    wait_for_file(&ready).await;
    let pid = launcher.pids()[0];

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Forced);
    assert!(!alive(pid));
    assert_eq!(
        supervisor.status().await.unwrap().status,
        SessionStatus::Idle
    );
}

#[tokio::test]
async fn start_supersedes_running_session() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    supervisor.start("rtsp://host/cam1").await.unwrap();
    let second = supervisor.start("rtsp://host/cam2").await.unwrap();
    assert_eq!(second.superseded, Some(StopOutcome::Graceful));

    let pids = launcher.pids();
    assert_eq!(pids.len(), 2);
    assert!(!alive(pids[0]));
    assert!(alive(pids[1]));

    let status = supervisor.status().await.unwrap();
    assert!(status.is_running());
    assert_eq!(status.source.as_deref(), Some("rtsp://host/cam2"));
    assert_eq!(status.pid, Some(pids[1]));

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Graceful);
    let status = supervisor.status().await.unwrap();
    assert!(!status.is_running());
    assert!(status.source.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_track_exactly_one_process() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    let mut tasks = Vec::new();
    for index in 0..5 {
        let supervisor = supervisor.clone();
        tasks.push(tokio::spawn(async move {
            supervisor.start(format!("rtsp://host/cam{index}")).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let pids = launcher.pids();
    assert_eq!(pids.len(), 5);
    let live: Vec<u32> = pids.iter().copied().filter(|pid| alive(*pid)).collect();
    assert_eq!(live.len(), 1);

    let status = supervisor.status().await.unwrap();
    assert!(status.is_running());
    assert_eq!(status.pid, Some(live[0]));

    supervisor.stop().await.unwrap();
    assert!(pids.iter().all(|pid| !alive(*pid)));
}

#[tokio::test]
async fn restart_without_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    let err = supervisor.restart().await.unwrap_err();
    assert!(matches!(err, SupervisorError::NothingToRestart));
    assert_eq!(
        supervisor.status().await.unwrap().status,
        SessionStatus::Idle
    );
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn restart_relaunches_recorded_source() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    let first = supervisor.start("rtsp://host/cam1").await.unwrap();
    let restarted = supervisor.restart().await.unwrap();
    assert_eq!(restarted.source, "rtsp://host/cam1");
    assert_eq!(restarted.superseded, Some(StopOutcome::Graceful));
    assert_ne!(restarted.session_id, first.session_id);

    let pids = launcher.pids();
    assert_eq!(pids.len(), 2);
    assert!(!alive(pids[0]));
    assert!(alive(pids[1]));

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn externally_killed_process_is_reported_stopped() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let supervisor = spawn_with(dir.path(), launcher.clone());

    supervisor.start("rtsp://host/cam1").await.unwrap();
    let pid = launcher.pids()[0];
    // SAFETY: the pid belongs to a child the supervisor still holds unreaped.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }

    let mut status = supervisor.status().await.unwrap();
    for _ in 0..100 {
        if !status.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = supervisor.status().await.unwrap();
    }
    assert!(!status.is_running());
    assert_eq!(status.status, SessionStatus::Error);
    assert_eq!(status.source.as_deref(), Some("rtsp://host/cam1"));
    assert!(status.hls_url().is_none());
    assert!(status.last_exit.is_some());

    let restarted = supervisor.restart().await.unwrap();
    assert_eq!(restarted.source, "rtsp://host/cam1");
    assert_eq!(restarted.superseded, Some(StopOutcome::AlreadyIdle));
    assert!(supervisor.status().await.unwrap().is_running());

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn stop_after_crash_clears_the_session() {
    let dir = TempDir::new().unwrap();
    let supervisor = spawn_with(dir.path(), ScriptLauncher::new("exit 3"));

    supervisor.start("rtsp://host/flaky").await.unwrap();
    let mut status = supervisor.status().await.unwrap();
    for _ in 0..100 {
        if status.status == SessionStatus::Error {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = supervisor.status().await.unwrap();
    }
    assert_eq!(status.status, SessionStatus::Error);
    assert_eq!(
        status.last_exit.as_deref(),
        Some("transcoder exited with code 3")
    );

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::AlreadyIdle);
    let status = supervisor.status().await.unwrap();
    assert_eq!(status.status, SessionStatus::Idle);
    assert!(status.source.is_none());
}

#[tokio::test]
async fn missing_transcoder_binary_leaves_session_idle() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings(dir.path());
    settings.binary = dir.path().join("no-such-ffmpeg");
    let (supervisor, _actor) = StreamSupervisor::spawn(settings, None);

    let err = supervisor.start("rtsp://x").await.unwrap_err();
    assert!(matches!(err, SupervisorError::TranscoderMissing(_)));
    assert!(err.is_launch_failure());

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.status, SessionStatus::Idle);
    assert!(status.source.is_none());
}

#[tokio::test]
async fn other_launch_failures_leave_session_idle() {
    let dir = TempDir::new().unwrap();
    let supervisor = spawn_with(
        dir.path(),
        Arc::new(FailingLauncher(io::ErrorKind::PermissionDenied)),
    );

    let err = supervisor.start("rtsp://x").await.unwrap_err();
    assert!(matches!(err, SupervisorError::ProcessLaunch(_)));
    assert!(err.is_launch_failure());
    assert!(err.to_string().contains("launch refused"));
    assert_eq!(
        supervisor.status().await.unwrap().status,
        SessionStatus::Idle
    );
}

#[tokio::test]
async fn failed_replacement_stops_previous_session_and_stays_idle() {
    let dir = TempDir::new().unwrap();
    let launcher = Arc::new(FlakyLauncher::failing_on(1));
    let supervisor = spawn_with(dir.path(), launcher.clone());

    supervisor.start("rtsp://host/cam1").await.unwrap();
    let first = launcher.pids()[0];
    assert!(alive(first));

    let err = supervisor.start("rtsp://host/cam2").await.unwrap_err();
    assert!(matches!(err, SupervisorError::TranscoderMissing(_)));
    assert!(!alive(first));

    let status = supervisor.status().await.unwrap();
    assert_eq!(status.status, SessionStatus::Idle);
    assert!(status.source.is_none());
    assert!(status.pid.is_none());

    let third = supervisor.start("rtsp://host/cam3").await.unwrap();
    assert_eq!(third.source, "rtsp://host/cam3");
    assert!(third.superseded.is_none());
    assert!(supervisor.status().await.unwrap().is_running());

    assert_eq!(supervisor.stop().await.unwrap(), StopOutcome::Graceful);
    assert_eq!(launcher.pids().len(), 2);
}

#[tokio::test]
async fn shutdown_stops_stream_and_closes_supervisor() {
    let dir = TempDir::new().unwrap();
    let launcher = ScriptLauncher::new("exec sleep 30");
    let (supervisor, actor) =
        StreamSupervisor::spawn(settings(dir.path()), Some(launcher.clone()));

    supervisor.start("rtsp://host/cam1").await.unwrap();
    let pid = launcher.pids()[0];

    assert_eq!(supervisor.shutdown().await.unwrap(), StopOutcome::Graceful);
    actor.await.unwrap();
    assert!(!alive(pid));

    let err = supervisor.status().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Unavailable));
}

use std::path::Path;
use std::time::Duration;

use relay_core::server::ArtifactDirectory;
use relay_core::{router, AppState, OutcomeStatus, StreamSupervisor, SupervisorSettings};
use relayctl::commands::control::ControlClient;
use relayctl::AppError;
use tempfile::TempDir;

/// Serves a relay whose transcoder binary does not exist, so every start
/// fails but the rest of the control API behaves normally.
async fn spawn_relay(dir: &Path) -> String {
    let settings = SupervisorSettings {
        binary: dir.join("no-such-ffmpeg"),
        output_dir: dir.join("streams"),
        grace_period: Duration::from_secs(1),
        kill_timeout: Duration::from_secs(1),
        command_buffer: 8,
    };
    let (supervisor, _actor) = StreamSupervisor::spawn(settings, None);
    let state = AppState::new(supervisor, ArtifactDirectory::new(dir.join("streams")));
    let app = router(state, &["*".to_string()]);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn status_and_stop_against_idle_relay() {
    let temp = TempDir::new().unwrap();
    let client = ControlClient::new(&spawn_relay(temp.path()).await).unwrap();
    assert!(!client.base().ends_with('/'));

    let report = client.status().await.unwrap();
    assert!(!report.is_running);
    assert!(report.rtsp_url.is_none());
    assert!(report.hls_url.is_none());

    let response = client.stop().await.unwrap();
    assert_eq!(response.status, OutcomeStatus::Info);
    assert_eq!(response.message, "No stream is currently running");
}

#[tokio::test]
async fn rejected_requests_surface_relay_message() {
    let temp = TempDir::new().unwrap();
    let client = ControlClient::new(&spawn_relay(temp.path()).await).unwrap();

    match client.start("rtsp://cam.local/live").await {
        Err(AppError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("not found"), "message: {message}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    match client.restart().await {
        Err(AppError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "no stream to restart");
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    let report = client.status().await.unwrap();
    assert!(!report.is_running);
}

#[tokio::test]
async fn unreachable_relay_is_an_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ControlClient::new(&format!("http://{addr}")).unwrap();
    assert!(matches!(client.status().await, Err(AppError::Http(_))));
}

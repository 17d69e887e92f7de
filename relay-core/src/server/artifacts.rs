//! Read-only delivery of the transcoder's playlist and segments.
//!
//! This path never talks to the supervisor; it only maps request paths onto
//! files in the output directory.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use thiserror::Error;
use tokio_util::io::ReaderStream;

use crate::supervisor::invocation::PLAYLIST_FILE;

use super::AppState;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("playlist not available, start a stream first")]
    PlaylistMissing,
    #[error("segment not found: {0}")]
    SegmentMissing(String),
    #[error("not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ArtifactError {
    fn into_response(self) -> Response {
        let mut response = match &self {
            ArtifactError::PlaylistMissing => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "status": "error",
                    "message": self.to_string(),
                })),
            )
                .into_response(),
            ArtifactError::SegmentMissing(_) | ArtifactError::NotFound => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            ArtifactError::Io(err) => {
                tracing::warn!(%err, "artifact read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        };
        apply_delivery_headers(&mut response);
        response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Playlist,
    Segment,
}

impl ArtifactKind {
    fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Playlist => PLAYLIST_CONTENT_TYPE,
            ArtifactKind::Segment => SEGMENT_CONTENT_TYPE,
        }
    }
}

/// Maps request paths to files under the output directory.
#[derive(Debug, Clone)]
pub struct ArtifactDirectory {
    root: PathBuf,
    numbered_segment: Regex,
}

impl ArtifactDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            numbered_segment: Regex::new(r"^stream[0-9]+\.ts$").expect("valid regex"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `None` for anything that is not a plain relative `.m3u8`/`.ts` path.
    pub fn resolve(&self, request_path: &str) -> Option<(PathBuf, ArtifactKind)> {
        let relative = Path::new(request_path);
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if request_path.is_empty() || !plain {
            return None;
        }
        let kind = match relative.extension().and_then(|ext| ext.to_str()) {
            Some("m3u8") => ArtifactKind::Playlist,
            Some("ts") => ArtifactKind::Segment,
            _ => return None,
        };
        Some((self.root.join(relative), kind))
    }

    pub fn is_numbered_segment(&self, request_path: &str) -> bool {
        self.numbered_segment.is_match(request_path)
    }
}

pub(crate) async fn playlist(State(state): State<AppState>) -> Result<Response, ArtifactError> {
    let path = state.artifacts.root().join(PLAYLIST_FILE);
    match open(&path, ArtifactKind::Playlist).await? {
        Some(response) => Ok(response),
        None => Err(ArtifactError::PlaylistMissing),
    }
}

pub(crate) async fn artifact(
    State(state): State<AppState>,
    UrlPath(request_path): UrlPath<String>,
) -> Result<Response, ArtifactError> {
    let request_path = request_path.trim_start_matches('/').to_string();
    let Some((path, kind)) = state.artifacts.resolve(&request_path) else {
        return Err(ArtifactError::NotFound);
    };
    match open(&path, kind).await? {
        Some(response) => Ok(response),
        None if request_path == PLAYLIST_FILE => Err(ArtifactError::PlaylistMissing),
        None if state.artifacts.is_numbered_segment(&request_path) => {
            Err(ArtifactError::SegmentMissing(request_path))
        }
        None => Err(ArtifactError::NotFound),
    }
}

async fn open(path: &Path, kind: ArtifactKind) -> Result<Option<Response>, ArtifactError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ArtifactError::Io(err)),
    };
    if !file.metadata().await?.is_file() {
        return Ok(None);
    }
    let mut response = (
        [(header::CONTENT_TYPE, kind.content_type())],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();
    apply_delivery_headers(&mut response);
    Ok(Some(response))
}

fn apply_delivery_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

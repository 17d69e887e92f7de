//! Overlay definitions (text or image) that the player draws over the stream.
//!
//! Overlays live in memory for the lifetime of the service; they never touch
//! the supervisor or the transcoder.

use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::AppState;

const GET_MISSING: &str = "Overlay not found";
const UPDATE_MISSING: &str = "Overlay not found or update failed";
const DELETE_MISSING: &str = "Overlay not found or delete failed";

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Invalid overlay type. Must be \"text\" or \"image\"")]
    InvalidKind,
    #[error("Content is required")]
    MissingContent,
    #[error("{0}")]
    InvalidBody(String),
    #[error("{0}")]
    NotFound(&'static str),
}

impl IntoResponse for OverlayError {
    fn into_response(self) -> Response {
        let status = match self {
            OverlayError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(serde_json::json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Text,
    Image,
}

impl OverlayKind {
    fn parse(value: Option<&str>) -> Result<Self, OverlayError> {
        match value {
            Some("text") => Ok(OverlayKind::Text),
            Some("image") => Ok(OverlayKind::Image),
            _ => Err(OverlayError::InvalidKind),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: OverlayKind,
    /// Text to draw, or the image URL.
    pub content: String,
    pub position: Position,
    pub size: Size,
    pub style: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /api/overlays`.
#[derive(Debug, Default, Deserialize)]
pub struct NewOverlay {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub style: Map<String, Value>,
}

/// Body of `PUT /api/overlays/{id}`. Absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct OverlayUpdate {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    pub position: Option<Position>,
    pub size: Option<Size>,
    pub style: Option<Map<String, Value>>,
}

#[derive(Debug, Default)]
pub struct OverlayStore {
    overlays: RwLock<HashMap<Uuid, Overlay>>,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest first.
    pub async fn list(&self) -> Vec<Overlay> {
        let mut overlays: Vec<Overlay> = self.overlays.read().await.values().cloned().collect();
        overlays.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        overlays
    }

    pub async fn get(&self, id: Uuid) -> Option<Overlay> {
        self.overlays.read().await.get(&id).cloned()
    }

    pub async fn create(&self, draft: NewOverlay) -> Result<Overlay, OverlayError> {
        let kind = OverlayKind::parse(draft.kind.as_deref())?;
        let content = match draft.content {
            Some(content) if !content.is_empty() => content,
            _ => return Err(OverlayError::MissingContent),
        };
        let now = Utc::now();
        let overlay = Overlay {
            id: Uuid::new_v4(),
            kind,
            content,
            position: draft.position,
            size: draft.size,
            style: draft.style,
            created_at: now,
            updated_at: now,
        };
        self.overlays
            .write()
            .await
            .insert(overlay.id, overlay.clone());
        Ok(overlay)
    }

    pub async fn update(&self, id: Uuid, changes: OverlayUpdate) -> Result<Overlay, OverlayError> {
        let kind = match changes.kind.as_deref() {
            Some(kind) => Some(OverlayKind::parse(Some(kind))?),
            None => None,
        };
        if changes.content.as_deref() == Some("") {
            return Err(OverlayError::MissingContent);
        }

        let mut overlays = self.overlays.write().await;
        let overlay = overlays
            .get_mut(&id)
            .ok_or(OverlayError::NotFound(UPDATE_MISSING))?;
        if let Some(kind) = kind {
            overlay.kind = kind;
        }
        if let Some(content) = changes.content {
            overlay.content = content;
        }
        if let Some(position) = changes.position {
            overlay.position = position;
        }
        if let Some(size) = changes.size {
            overlay.size = size;
        }
        if let Some(style) = changes.style {
            overlay.style = style;
        }
        overlay.updated_at = Utc::now();
        Ok(overlay.clone())
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        self.overlays.write().await.remove(&id).is_some()
    }
}

#[derive(Debug, Serialize)]
struct OverlayReply<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

impl<T: Serialize> OverlayReply<T> {
    fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            count: None,
            message: None,
        }
    }

    fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

fn overlay_id(raw: &str, missing: &'static str) -> Result<Uuid, OverlayError> {
    Uuid::parse_str(raw).map_err(|_| OverlayError::NotFound(missing))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, OverlayError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| OverlayError::InvalidBody(rejection.body_text()))
}

pub(crate) async fn list_overlays(State(state): State<AppState>) -> Response {
    let overlays = state.overlays.list().await;
    let mut reply = OverlayReply::data(overlays);
    reply.count = reply.data.as_ref().map(Vec::len);
    (StatusCode::OK, Json(reply)).into_response()
}

pub(crate) async fn get_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, OverlayError> {
    let id = overlay_id(&id, GET_MISSING)?;
    let overlay = state
        .overlays
        .get(id)
        .await
        .ok_or(OverlayError::NotFound(GET_MISSING))?;
    Ok((StatusCode::OK, Json(OverlayReply::data(overlay))).into_response())
}

pub(crate) async fn create_overlay(
    State(state): State<AppState>,
    payload: Result<Json<NewOverlay>, JsonRejection>,
) -> Result<Response, OverlayError> {
    let overlay = state.overlays.create(body(payload)?).await?;
    info!(id = %overlay.id, kind = ?overlay.kind, "overlay created");
    let reply = OverlayReply::data(overlay).with_message("Overlay created successfully");
    Ok((StatusCode::CREATED, Json(reply)).into_response())
}

pub(crate) async fn update_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<OverlayUpdate>, JsonRejection>,
) -> Result<Response, OverlayError> {
    let id = overlay_id(&id, UPDATE_MISSING)?;
    let overlay = state.overlays.update(id, body(payload)?).await?;
    info!(%id, "overlay updated");
    let reply = OverlayReply::data(overlay).with_message("Overlay updated successfully");
    Ok((StatusCode::OK, Json(reply)).into_response())
}

pub(crate) async fn delete_overlay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, OverlayError> {
    let id = overlay_id(&id, DELETE_MISSING)?;
    if !state.overlays.delete(id).await {
        return Err(OverlayError::NotFound(DELETE_MISSING));
    }
    info!(%id, "overlay deleted");
    let reply = OverlayReply::<()> {
        success: true,
        data: None,
        count: None,
        message: Some("Overlay deleted successfully"),
    };
    Ok((StatusCode::OK, Json(reply)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> NewOverlay {
        NewOverlay {
            kind: Some("text".to_string()),
            content: Some(content.to_string()),
            ..NewOverlay::default()
        }
    }

    #[tokio::test]
    async fn create_fills_defaults() {
        let store = OverlayStore::new();
        let overlay = store.create(text("LIVE")).await.unwrap();
        assert_eq!(overlay.kind, OverlayKind::Text);
        assert_eq!(overlay.position, Position { x: 0.0, y: 0.0 });
        assert_eq!(
            overlay.size,
            Size {
                width: 100.0,
                height: 50.0
            }
        );
        assert!(overlay.style.is_empty());
        assert_eq!(overlay.created_at, overlay.updated_at);
        assert_eq!(store.get(overlay.id).await, Some(overlay));
    }

    #[tokio::test]
    async fn create_validates_kind_and_content() {
        let store = OverlayStore::new();
        let mut draft = text("LIVE");
        draft.kind = Some("video".to_string());
        assert!(matches!(
            store.create(draft).await,
            Err(OverlayError::InvalidKind)
        ));
        assert!(matches!(
            store.create(NewOverlay::default()).await,
            Err(OverlayError::InvalidKind)
        ));
        assert!(matches!(
            store.create(text("")).await,
            Err(OverlayError::MissingContent)
        ));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let store = OverlayStore::new();
        let overlay = store.create(text("LIVE")).await.unwrap();

        let updated = store
            .update(
                overlay.id,
                OverlayUpdate {
                    content: Some("ON AIR".to_string()),
                    position: Some(Position { x: 10.0, y: 20.0 }),
                    ..OverlayUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.content, "ON AIR");
        assert_eq!(updated.position, Position { x: 10.0, y: 20.0 });
        assert_eq!(updated.size, overlay.size);
        assert_eq!(updated.kind, OverlayKind::Text);
        assert_eq!(updated.created_at, overlay.created_at);
        assert!(updated.updated_at >= overlay.updated_at);

        let bad_kind = OverlayUpdate {
            kind: Some("gif".to_string()),
            ..OverlayUpdate::default()
        };
        assert!(matches!(
            store.update(overlay.id, bad_kind).await,
            Err(OverlayError::InvalidKind)
        ));
        assert!(matches!(
            store.update(Uuid::new_v4(), OverlayUpdate::default()).await,
            Err(OverlayError::NotFound(UPDATE_MISSING))
        ));
    }

    #[tokio::test]
    async fn delete_removes_once() {
        let store = OverlayStore::new();
        let overlay = store.create(text("LIVE")).await.unwrap();
        assert!(store.delete(overlay.id).await);
        assert!(!store.delete(overlay.id).await);
        assert!(store.get(overlay.id).await.is_none());
    }

    #[test]
    fn partial_position_and_size_take_defaults() {
        let draft: NewOverlay = serde_json::from_str(
            r#"{"type":"image","content":"https://cdn/logo.png","position":{"x":5},"size":{"height":20}}"#,
        )
        .unwrap();
        assert_eq!(draft.position, Position { x: 5.0, y: 0.0 });
        assert_eq!(
            draft.size,
            Size {
                width: 100.0,
                height: 20.0
            }
        );
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::controller::{Advance, Controller, PlaybackSnapshot};
use crate::error::ControlError;
use crate::player::{LoopMode, PlayerDriver};

pub struct AppState<D: PlayerDriver> {
    pub version: String,
    pub controller: Arc<Controller<D>>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

// Derived Clone would require `D: Clone`.
impl<D: PlayerDriver> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            controller: self.controller.clone(),
            upload_dir: self.upload_dir.clone(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

#[derive(Deserialize)]
struct PlayReq {
    filename: Option<String>,
}

#[derive(Deserialize)]
struct LoopModeReq {
    mode: LoopMode,
}

#[derive(Deserialize)]
struct FilenameReq {
    filename: String,
}

#[derive(Deserialize)]
struct ReorderReq {
    order: Vec<String>,
}

#[derive(Deserialize)]
struct ExitEditReq {
    order: Option<Vec<String>>,
}

type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// A missing body means "no arguments"; a present but malformed one is still
/// rejected.
fn optional_body<T>(body: JsonBody<T>) -> Result<Option<T>, ControlError> {
    match body {
        Ok(Json(req)) => Ok(Some(req)),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(None),
        Err(rejection) => Err(rejection.into()),
    }
}

pub fn build_router<D: PlayerDriver>(state: AppState<D>) -> Router {
    let uploads = ServeDir::new(&state.upload_dir);
    let max_upload = state.max_upload_bytes;

    Router::new()
        .route("/", get(root::<D>))
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/playlist-state", get(api_playlist_state::<D>))
        .route("/api/v1/control/play", post(api_control_play::<D>))
        .route("/api/v1/control/pause", post(api_control_pause::<D>))
        .route("/api/v1/control/toggle_pause", post(api_control_toggle_pause::<D>))
        .route("/api/v1/control/stop", post(api_control_stop::<D>))
        .route("/api/v1/control/next", post(api_control_next::<D>))
        .route("/api/v1/control/previous", post(api_control_previous::<D>))
        .route("/api/v1/control/set_loop_mode", post(api_control_set_loop_mode::<D>))
        .route(
            "/api/v1/playlist/upload",
            post(api_playlist_upload::<D>).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/api/v1/playlist/delete", post(api_playlist_delete::<D>))
        .route("/api/v1/playlist/reorder", post(api_playlist_reorder::<D>))
        .route("/api/v1/playlist/set_next", post(api_playlist_set_next::<D>))
        .route("/api/v1/edit/enter", post(api_edit_enter::<D>))
        .route("/api/v1/edit/exit", post(api_edit_exit::<D>))
        .route("/api/v1/player/restart", post(api_player_restart::<D>))
        // Legacy preview route for uploaded media.
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root<D: PlayerDriver>(State(state): State<AppState<D>>) -> String {
    format!("kioskplay engine v{} is running. Try /api/v1/playlist-state", state.version)
}

async fn api_playlist_state<D: PlayerDriver>(State(state): State<AppState<D>>) -> Json<PlaybackSnapshot> {
    Json(state.controller.snapshot().await)
}

// --- Transport ---

async fn api_control_play<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    body: JsonBody<PlayReq>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    let filename = optional_body(body)?.and_then(|req| req.filename);
    Ok(Json(state.controller.play(filename).await?))
}

async fn api_control_pause<D: PlayerDriver>(
    State(state): State<AppState<D>>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    Ok(Json(state.controller.pause().await?))
}

async fn api_control_toggle_pause<D: PlayerDriver>(
    State(state): State<AppState<D>>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    Ok(Json(state.controller.toggle_pause().await?))
}

async fn api_control_stop<D: PlayerDriver>(
    State(state): State<AppState<D>>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    Ok(Json(state.controller.stop().await?))
}

fn advance_response(adv: Advance) -> Response {
    match adv {
        Advance::Playing(snapshot) => Json(snapshot).into_response(),
        Advance::Boundary(status) => Json(json!({ "status": status })).into_response(),
    }
}

async fn api_control_next<D: PlayerDriver>(State(state): State<AppState<D>>) -> Result<Response, ControlError> {
    Ok(advance_response(state.controller.next().await?))
}

async fn api_control_previous<D: PlayerDriver>(
    State(state): State<AppState<D>>,
) -> Result<Response, ControlError> {
    Ok(advance_response(state.controller.previous().await?))
}

async fn api_control_set_loop_mode<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    body: JsonBody<LoopModeReq>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    let Json(req) = body?;
    Ok(Json(state.controller.set_loop_mode(req.mode).await?))
}

// --- Playlist ---

/// Accepts exactly one `file` (or legacy `mediaFiles`) part. The whole body
/// is read before the controller lock is taken, so a request carrying extra
/// file parts is refused without storing any of them.
async fn api_playlist_upload<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ControlError> {
    let mut multipart = multipart?;
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if !matches!(field.name(), Some("file") | Some("mediaFiles")) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        files.push((filename, field.bytes().await?));
    }

    let (filename, bytes) = match files.len() {
        0 => return Err(ControlError::NoFile),
        1 => files.remove(0),
        n => {
            warn!("upload with {n} file parts refused");
            return Err(ControlError::InvalidRequest(format!("expected one file part, got {n}")));
        }
    };
    let accepted = state.controller.upload(&filename, &bytes).await?;
    Ok(Json(json!({ "accepted": accepted })))
}

async fn api_playlist_delete<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    body: JsonBody<FilenameReq>,
) -> Result<Json<Value>, ControlError> {
    let Json(req) = body?;
    let playlist = state.controller.delete(&req.filename).await?;
    Ok(Json(json!({ "status": "deleted", "filename": req.filename, "playlist": playlist })))
}

async fn api_playlist_reorder<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    body: JsonBody<ReorderReq>,
) -> Result<Json<Value>, ControlError> {
    let Json(req) = body?;
    let playlist = state.controller.reorder(req.order).await?;
    Ok(Json(json!({ "status": "reordered", "playlist": playlist })))
}

async fn api_playlist_set_next<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    body: JsonBody<FilenameReq>,
) -> Result<Json<Value>, ControlError> {
    let Json(req) = body?;
    let playlist = state.controller.set_next(&req.filename).await?;
    Ok(Json(json!({ "status": "next_item_set", "nextFile": req.filename, "playlist": playlist })))
}

// --- Edit mode / player ---

async fn api_edit_enter<D: PlayerDriver>(
    State(state): State<AppState<D>>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    Ok(Json(state.controller.enter_edit().await?))
}

async fn api_edit_exit<D: PlayerDriver>(
    State(state): State<AppState<D>>,
    body: JsonBody<ExitEditReq>,
) -> Result<Json<PlaybackSnapshot>, ControlError> {
    let order = optional_body(body)?.and_then(|req| req.order);
    Ok(Json(state.controller.exit_edit(order).await?))
}

async fn api_player_restart<D: PlayerDriver>(State(state): State<AppState<D>>) -> Result<Json<Value>, ControlError> {
    let snapshot = state.controller.restart_player().await?;
    Ok(Json(json!({ "status": "restarted", "playerRunning": snapshot.player_running })))
}

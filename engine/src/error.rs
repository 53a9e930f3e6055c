use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures reported by a player driver (process, channel, protocol).
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("player is not running")]
    NotRunning,

    #[error("player did not open its control channel within {0:?}")]
    StartupTimeout(Duration),

    #[error("failed to start player: {0}")]
    Spawn(String),

    #[error("control channel error: {0}")]
    Channel(String),
}

/// Every way an intent against the playback core can be rejected.
///
/// `kind()` is the stable identifier clients switch on; the HTTP status is
/// derived from the error category.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("playlist is empty")]
    PlaylistEmpty,

    #[error("file '{0}' not found")]
    FileNotFound(String),

    #[error("file '{0}' is already in the playlist")]
    DuplicateEntry(String),

    #[error("invalid playlist order: {0}")]
    InvalidOrder(String),

    #[error("invalid filename '{0}'")]
    InvalidFilename(String),

    #[error("file type not allowed for '{0}'")]
    UnsupportedMediaType(String),

    #[error("no file in upload")]
    NoFile,

    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("upload exceeds the size limit")]
    PayloadTooLarge,

    #[error("not in edit mode")]
    NotEditing,

    #[error("nothing is playing")]
    NotPlaying,

    #[error("file '{0}' is currently playing")]
    FileInUse(String),

    #[error("playlist is being edited")]
    Editing,

    #[error("player is not running")]
    PlayerNotRunning,

    #[error("{0}")]
    Channel(String),

    #[error("player did not start within {0:?}")]
    StartupTimeout(Duration),

    #[error("{0}")]
    PlayerStart(String),

    #[error("failed to persist: {0}")]
    Persistence(String),
}

impl ControlError {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::PlaylistEmpty => "PlaylistEmptyError",
            ControlError::FileNotFound(_) => "FileNotFoundError",
            ControlError::DuplicateEntry(_) => "DuplicateEntryError",
            ControlError::InvalidOrder(_) => "InvalidOrderError",
            ControlError::InvalidFilename(_) => "InvalidFilenameError",
            ControlError::UnsupportedMediaType(_) => "UnsupportedMediaTypeError",
            ControlError::NoFile => "NoFileError",
            ControlError::InvalidRequest(_) => "InvalidRequestError",
            ControlError::PayloadTooLarge => "PayloadTooLargeError",
            ControlError::NotEditing => "NotEditingError",
            ControlError::NotPlaying => "NotPlayingError",
            ControlError::FileInUse(_) => "FileInUseError",
            ControlError::Editing => "EditModeActiveError",
            ControlError::PlayerNotRunning => "PlayerNotRunningError",
            ControlError::Channel(_) => "ChannelError",
            ControlError::StartupTimeout(_) => "StartupTimeoutError",
            ControlError::PlayerStart(_) => "PlayerStartError",
            ControlError::Persistence(_) => "PersistenceError",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ControlError::PlaylistEmpty
            | ControlError::FileNotFound(_)
            | ControlError::DuplicateEntry(_)
            | ControlError::InvalidOrder(_)
            | ControlError::InvalidFilename(_)
            | ControlError::UnsupportedMediaType(_)
            | ControlError::NoFile
            | ControlError::InvalidRequest(_)
            | ControlError::PayloadTooLarge
            | ControlError::NotEditing => "validation",
            ControlError::NotPlaying | ControlError::FileInUse(_) | ControlError::Editing => {
                "resource_busy"
            }
            ControlError::PlayerNotRunning
            | ControlError::Channel(_)
            | ControlError::StartupTimeout(_)
            | ControlError::PlayerStart(_) => "player",
            ControlError::Persistence(_) => "persistence",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ControlError::DuplicateEntry(_) => StatusCode::CONFLICT,
            ControlError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ControlError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ControlError::PlayerNotRunning | ControlError::PlayerStart(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ControlError::Channel(_) => StatusCode::BAD_GATEWAY,
            ControlError::StartupTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ControlError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => match self.category() {
                "resource_busy" => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl From<PlayerError> for ControlError {
    fn from(e: PlayerError) -> Self {
        match e {
            PlayerError::NotRunning => ControlError::PlayerNotRunning,
            PlayerError::StartupTimeout(d) => ControlError::StartupTimeout(d),
            PlayerError::Spawn(msg) => ControlError::PlayerStart(msg),
            PlayerError::Channel(msg) => ControlError::Channel(msg),
        }
    }
}

impl From<JsonRejection> for ControlError {
    fn from(rejection: JsonRejection) -> Self {
        ControlError::InvalidRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for ControlError {
    fn from(rejection: MultipartRejection) -> Self {
        ControlError::InvalidRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ControlError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ControlError::PayloadTooLarge;
        }
        ControlError::InvalidRequest(e.body_text())
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "category": self.category(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

//! Everything that talks to the external player process.
//!
//! The playback controller only sees the [`PlayerDriver`] trait; the mpv
//! implementation is [`supervisor::MpvSupervisor`], which speaks the JSON IPC
//! encoded by [`protocol`] over the channel in [`ipc`].

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod ipc;
pub mod protocol;
pub mod supervisor;

#[cfg(test)]
pub mod fake;

pub use crate::error::PlayerError;
pub use protocol::{Direction, Intent, LoadMode, Property, Reply};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    None,
    File,
    Playlist,
}

impl LoopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopMode::None => "none",
            LoopMode::File => "file",
            LoopMode::Playlist => "playlist",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoopMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LoopMode::None),
            "file" => Ok(LoopMode::File),
            "playlist" => Ok(LoopMode::Playlist),
            _ => Err(()),
        }
    }
}

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    /// RFC 3339.
    pub started_at: Option<String>,
    pub last_error: Option<String>,
}

/// Drives one external player. All methods take `&mut self`: the controller
/// holds the driver behind its lock, so the control channel never sees two
/// writers.
pub trait PlayerDriver: Send + 'static {
    /// Cheap process-level check; never a protocol round trip.
    fn is_alive(&mut self) -> bool;

    fn info(&self) -> PlayerInfo;

    /// No-op when already running.
    fn start(&mut self, loop_mode: LoopMode) -> impl Future<Output = Result<(), PlayerError>> + Send;

    /// Graceful quit, bounded grace period, then force. Never fails.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;

    fn execute(&mut self, intent: Intent) -> impl Future<Output = Result<Reply, PlayerError>> + Send;

    fn restart(&mut self, loop_mode: LoopMode) -> impl Future<Output = Result<(), PlayerError>> + Send {
        async move {
            self.stop().await;
            self.start(loop_mode).await
        }
    }

    /// Makes `mode` effective in the player. mpv only honours the loop hint
    /// reliably at startup, so the default stops output and restarts the
    /// process; a driver that can flip it live overrides this.
    fn apply_loop_mode(&mut self, mode: LoopMode) -> impl Future<Output = Result<(), PlayerError>> + Send {
        async move {
            if self.is_alive() {
                if let Err(e) = self.execute(Intent::Stop).await {
                    tracing::warn!("stop before loop-mode restart failed: {e}");
                }
            }
            self.restart(mode).await
        }
    }
}

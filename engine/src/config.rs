use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// --- Engine configuration -------------------------------------------------
//
// Everything is read from KIOSKPLAY_* environment variables once at startup.
// Paths default to the installer-managed shared directory so a fresh install
// runs without any configuration.

const DEFAULT_DATA_DIR: &str = "/opt/kioskplay/shared";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind: SocketAddr,
    pub upload_dir: PathBuf,
    pub playlist_path: PathBuf,
    pub db_path: PathBuf,
    pub player: PlayerConfig,
    pub poll_interval: Duration,
    pub desync_threshold: u32,
    pub max_upload_bytes: usize,
}

/// Everything the supervisor needs to launch and talk to mpv.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub binary: String,
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    /// mpv geometry, e.g. `240x320+0+0`. The size part also feeds `--autofit`.
    pub geometry: String,
    pub screen: Option<String>,
    pub video_output: Option<String>,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub command_timeout: Duration,
}

impl PlayerConfig {
    pub fn autofit(&self) -> &str {
        self.geometry
            .split(['+', '-'])
            .next()
            .unwrap_or(self.geometry.as_str())
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = PathBuf::from(get("KIOSKPLAY_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()));
        let path_or = |key: &str, fallback: &str| {
            get(key).map(PathBuf::from).unwrap_or_else(|| data_dir.join(fallback))
        };
        let millis_or = |key: &str, fallback: u64| Duration::from_millis(number_or(&get, key, fallback));

        let bind: SocketAddr = get("KIOSKPLAY_BIND")
            .unwrap_or_else(|| "127.0.0.1:5000".to_string())
            .parse()?;

        let player = PlayerConfig {
            binary: get("KIOSKPLAY_MPV").unwrap_or_else(|| "mpv".to_string()),
            socket_path: path_or("KIOSKPLAY_MPV_SOCKET", "mpvsocket"),
            log_path: path_or("KIOSKPLAY_MPV_LOG", "mpv.log"),
            geometry: get("KIOSKPLAY_GEOMETRY").unwrap_or_else(|| "240x320+0+0".to_string()),
            screen: get("KIOSKPLAY_SCREEN"),
            video_output: get("KIOSKPLAY_VO"),
            startup_timeout: millis_or("KIOSKPLAY_STARTUP_TIMEOUT_MS", 5_000),
            stop_grace: millis_or("KIOSKPLAY_STOP_GRACE_MS", 3_000),
            command_timeout: millis_or("KIOSKPLAY_COMMAND_TIMEOUT_MS", 1_000),
        };

        Ok(Self {
            bind,
            upload_dir: path_or("KIOSKPLAY_UPLOAD_DIR", "uploads"),
            playlist_path: path_or("KIOSKPLAY_PLAYLIST_PATH", "playlist.json"),
            db_path: path_or("KIOSKPLAY_DB_PATH", "kioskplay.db"),
            player,
            poll_interval: millis_or("KIOSKPLAY_POLL_INTERVAL_MS", 1_000),
            desync_threshold: number_or(&get, "KIOSKPLAY_DESYNC_THRESHOLD", 3u32).max(1),
            max_upload_bytes: number_or(&get, "KIOSKPLAY_MAX_UPLOAD_MB", 300usize).saturating_mul(1024 * 1024),
        })
    }
}

fn number_or<G, T>(get: &G, key: &str, fallback: T) -> T
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match get(key) {
        None => fallback,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("{key}={raw} is not a valid number, using {fallback}");
            fallback
        }),
    }
}

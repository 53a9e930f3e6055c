use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod config;
mod controller;
mod error;
mod media;
mod player;
mod playlist;
mod reconcile;
mod settings;

use api::{build_router, AppState};
use config::EngineConfig;
use controller::Controller;
use media::MediaLibrary;
use player::supervisor::MpvSupervisor;
use playlist::PlaylistStore;
use settings::SettingsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION").to_string();
    let cfg = EngineConfig::from_env()?;

    // Playlist and loop mode survive restarts; a missing or broken store is
    // never fatal, we just start empty / with defaults.
    let playlist = PlaylistStore::load(&cfg.playlist_path);
    let media = MediaLibrary::new(&cfg.upload_dir);
    if let Err(e) = tokio::fs::create_dir_all(media.dir()).await {
        warn!("failed to create upload dir {}: {e}", media.dir().display());
    }
    let settings = SettingsStore::new(&cfg.db_path);
    let loop_mode = settings.load_loop_mode_or_default().await;
    info!("loop mode {loop_mode}, {} playlist entries", playlist.len());

    let driver = MpvSupervisor::new(cfg.player.clone());
    let controller = Arc::new(Controller::new(
        playlist,
        media,
        settings,
        driver,
        loop_mode,
        cfg.desync_threshold,
    ));

    // The kiosk should show its window right away, but the API must come up
    // even when the player can't (operators restart it from the UI).
    if let Err(e) = controller.start_player().await {
        warn!("player did not start at boot: {e}");
    }

    let token = CancellationToken::new();
    let reconciler = reconcile::spawn(controller.clone(), cfg.poll_interval, token.clone());

    let state = AppState {
        version: version.clone(),
        controller: controller.clone(),
        upload_dir: cfg.upload_dir.clone(),
        max_upload_bytes: cfg.max_upload_bytes,
    };
    let app = build_router(state);

    // Bind loopback only; put Nginx/Caddy in front for LAN access.
    let addr = cfg.bind;
    info!("kioskplay engine v{version} starting on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    token.cancel();
    if let Err(e) = reconciler.await {
        warn!("reconciliation task ended abnormally: {e}");
    }
    controller.shutdown().await;
    info!("bye");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}

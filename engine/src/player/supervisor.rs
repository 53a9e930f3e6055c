use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use super::ipc::IpcChannel;
use super::{Intent, LoopMode, PlayerDriver, PlayerError, PlayerInfo, Reply, SupervisorState};
use crate::config::PlayerConfig;

const STARTUP_POLL: Duration = Duration::from_millis(100);
const SIGTERM_GRACE: Duration = Duration::from_secs(1);

/// Owns exactly one mpv process and the IPC channel to it.
pub struct MpvSupervisor {
    config: PlayerConfig,
    state: SupervisorState,
    child: Option<Child>,
    channel: Option<IpcChannel>,
    started_at: Option<OffsetDateTime>,
    last_error: Option<String>,
}

/// Full mpv command line (minus the binary) for the given loop mode.
pub fn mpv_args(config: &PlayerConfig, loop_mode: LoopMode) -> Vec<String> {
    let mut args: Vec<String> = [
        "--no-osc",
        "--no-osd-bar",
        "--no-border",
        "--ontop",
        "--really-quiet",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push(format!("--autofit={}", config.autofit()));
    args.push(format!("--geometry={}", config.geometry));
    args.push("--force-window=immediate".into());
    args.push(format!("--input-ipc-server={}", config.socket_path.display()));
    args.push("--idle=yes".into());
    args.push("--keep-open=no".into());
    args.push(format!("--log-file={}", config.log_path.display()));
    args.push("--msg-level=all=info".into());
    let loop_file = if loop_mode == LoopMode::File { "inf" } else { "no" };
    args.push(format!("--loop-file={loop_file}"));

    if let Some(screen) = &config.screen {
        args.push(format!("--screen={screen}"));
    }
    if let Some(vo) = &config.video_output {
        args.push(format!("--vo={vo}"));
    }
    args
}

fn remove_stale_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("removed stale control socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove control socket {}: {e}", path.display()),
    }
}

impl MpvSupervisor {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            state: SupervisorState::Stopped,
            child: None,
            channel: None,
            started_at: None,
            last_error: None,
        }
    }

    fn fail(&mut self, e: &PlayerError) {
        self.state = SupervisorState::Crashed;
        self.last_error = Some(e.to_string());
        self.channel = None;
        self.started_at = None;
    }

    /// Polls until the control socket accepts a connection, the child exits,
    /// or the startup timeout passes.
    async fn wait_for_channel(&mut self) -> Result<IpcChannel, PlayerError> {
        let started = Instant::now();
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(PlayerError::Spawn(format!("player exited during startup ({status})")));
                }
            }
            if self.config.socket_path.exists() {
                if let Ok(channel) = IpcChannel::connect(&self.config.socket_path, self.config.command_timeout).await {
                    return Ok(channel);
                }
            }
            if started.elapsed() >= self.config.startup_timeout {
                return Err(PlayerError::StartupTimeout(self.config.startup_timeout));
            }
            sleep(STARTUP_POLL).await;
        }
    }

    /// SIGTERM, short wait, then SIGKILL.
    async fn force_terminate(child: &mut Child) {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) on a pid we spawned and have not reaped.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 && timeout(SIGTERM_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
        warn!("player ignored SIGTERM, killing");
        let _ = child.kill().await;
    }
}

impl PlayerDriver for MpvSupervisor {
    fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if self.state == SupervisorState::Running {
                    warn!("player exited unexpectedly ({status})");
                    self.fail(&PlayerError::Spawn(format!("player exited ({status})")));
                }
                self.child = None;
                false
            }
            Err(e) => {
                warn!("player try_wait error: {e}");
                false
            }
        }
    }

    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            state: self.state,
            pid: self.child.as_ref().and_then(Child::id),
            started_at: self.started_at.and_then(|t| t.format(&Rfc3339).ok()),
            last_error: self.last_error.clone(),
        }
    }

    async fn start(&mut self, loop_mode: LoopMode) -> Result<(), PlayerError> {
        if self.state == SupervisorState::Running && self.is_alive() {
            return Ok(());
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        self.channel = None;
        remove_stale_socket(&self.config.socket_path);

        self.state = SupervisorState::Starting;
        let args = mpv_args(&self.config, loop_mode);
        info!("starting player: {} {}", self.config.binary, args.join(" "));

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = PlayerError::Spawn(format!("{}: {e}", self.config.binary));
                self.fail(&err);
                return Err(err);
            }
        };
        self.child = Some(child);

        match self.wait_for_channel().await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = SupervisorState::Running;
                self.started_at = Some(OffsetDateTime::now_utc());
                self.last_error = None;
                info!("player running (pid {:?})", self.child.as_ref().and_then(Child::id));
                Ok(())
            }
            Err(e) => {
                warn!("player failed to start: {e}");
                if let Some(mut child) = self.child.take() {
                    let _ = child.kill().await;
                }
                remove_stale_socket(&self.config.socket_path);
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            self.channel = None;
            remove_stale_socket(&self.config.socket_path);
            self.state = SupervisorState::Stopped;
            self.started_at = None;
            return;
        };

        self.state = SupervisorState::Stopping;
        if let Some(mut channel) = self.channel.take() {
            // mpv may drop the socket before acknowledging; that is fine.
            let _ = channel.send(&Intent::Quit).await;
        }

        match timeout(self.config.stop_grace, child.wait()).await {
            Ok(_) => info!("player exited"),
            Err(_) => {
                warn!("player still running after {:?}, terminating", self.config.stop_grace);
                Self::force_terminate(&mut child).await;
            }
        }

        remove_stale_socket(&self.config.socket_path);
        self.state = SupervisorState::Stopped;
        self.started_at = None;
    }

    async fn execute(&mut self, intent: Intent) -> Result<Reply, PlayerError> {
        if self.state != SupervisorState::Running || !self.is_alive() {
            return Err(PlayerError::NotRunning);
        }
        let channel = self.channel.as_mut().ok_or(PlayerError::NotRunning)?;
        channel.send(&intent).await.map_err(|e| {
            self.last_error = Some(e.to_string());
            e
        })
    }
}

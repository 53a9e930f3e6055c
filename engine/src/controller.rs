use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ControlError;
use crate::media::{self, MediaLibrary};
use crate::player::{
    Direction, Intent, LoadMode, LoopMode, PlayerDriver, PlayerInfo, Property, Reply,
};
use crate::playlist::{PlaylistError, PlaylistStore};
use crate::settings::SettingsStore;

// --- Playback state machine ---
//
// One `Inner` behind one async mutex. Every intent, the reconciliation poll,
// uploads and deletes all run as a critical section on it, so the player's
// control channel only ever has one writer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Idle,
    Playing,
    Paused,
    Editing,
}

impl Transport {
    fn is_active(self) -> bool {
        matches!(self, Transport::Playing | Transport::Paused)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub playlist: Vec<String>,
    pub current_file: Option<String>,
    pub current_index: Option<usize>,
    pub is_playing: bool,
    pub state: Transport,
    pub loop_mode: LoopMode,
    pub edit_mode: bool,
    pub player_running: bool,
    pub pending_next: Option<String>,
    pub player: PlayerInfo,
}

/// Outcome of `next` / `previous`.
#[derive(Debug)]
pub enum Advance {
    Playing(PlaybackSnapshot),
    /// Stopped at the end (`playlist_ended`) or start (`playlist_start`).
    Boundary(&'static str),
}

pub struct Controller<D: PlayerDriver> {
    inner: Mutex<Inner<D>>,
}

struct Inner<D> {
    playlist: PlaylistStore,
    media: MediaLibrary,
    settings: SettingsStore,
    driver: D,
    transport: Transport,
    current: Option<String>,
    loop_mode: LoopMode,
    pending_next: Option<String>,
    last_error: Option<String>,

    // Reconciliation bookkeeping for the loaded item.
    observed_active: bool,
    idle_polls: u32,
    failed_polls: u32,
    recovery_used: bool,
    desync_threshold: u32,
}

/// Persistence failures leave the in-memory mutation in place; everything
/// else means nothing changed.
fn split_persistence(res: Result<(), PlaylistError>) -> Result<Option<ControlError>, ControlError> {
    match res {
        Ok(()) => Ok(None),
        Err(e @ PlaylistError::Persistence { .. }) => {
            warn!("{e}");
            Ok(Some(e.into()))
        }
        Err(e) => Err(e.into()),
    }
}

impl<D: PlayerDriver> Controller<D> {
    pub fn new(
        playlist: PlaylistStore,
        media: MediaLibrary,
        settings: SettingsStore,
        driver: D,
        loop_mode: LoopMode,
        desync_threshold: u32,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                playlist,
                media,
                settings,
                driver,
                transport: Transport::Idle,
                current: None,
                loop_mode,
                pending_next: None,
                last_error: None,
                observed_active: false,
                idle_polls: 0,
                failed_polls: 0,
                recovery_used: false,
                desync_threshold: desync_threshold.max(1),
            }),
        }
    }

    /// Boot-time start of the player; callers decide whether failure is fatal.
    pub async fn start_player(&self) -> Result<(), ControlError> {
        let mut inner = self.inner.lock().await;
        let mode = inner.loop_mode;
        inner.driver.start(mode).await.map_err(|e| inner.record(e.into()))
    }

    pub async fn snapshot(&self) -> PlaybackSnapshot {
        self.inner.lock().await.snapshot()
    }

    pub async fn play(&self, file: Option<String>) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        inner.reject_while_editing()?;

        let target = match file {
            Some(name) => {
                if !inner.playlist.contains(&name) {
                    return Err(ControlError::FileNotFound(name));
                }
                name
            }
            None => inner
                .current
                .clone()
                .filter(|c| inner.playlist.contains(c))
                .or_else(|| inner.playlist.get(0).map(str::to_string))
                .ok_or(ControlError::PlaylistEmpty)?,
        };

        inner.play_explicit(target).await?;
        Ok(inner.snapshot())
    }

    pub async fn pause(&self) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        inner.require_active()?;
        inner.command(Intent::SetPause(true)).await?;
        inner.transport = Transport::Paused;
        inner.recovery_used = false;
        Ok(inner.snapshot())
    }

    pub async fn toggle_pause(&self) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        inner.require_active()?;
        inner.command(Intent::TogglePause).await?;

        // The toggle already took effect; a failed read-back falls back to
        // flipping the known state.
        let reported = match inner.command(Intent::Query(Property::Pause)).await {
            Ok(reply) => reply.flag(),
            Err(e) => {
                warn!("pause read-back failed: {e}");
                None
            }
        };
        let paused = reported.unwrap_or(inner.transport == Transport::Playing);
        inner.transport = if paused { Transport::Paused } else { Transport::Playing };
        inner.recovery_used = false;
        Ok(inner.snapshot())
    }

    pub async fn stop(&self) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        inner.reject_while_editing()?;
        inner.halt_output().await?;
        inner.transport = Transport::Idle;
        inner.current = None;
        inner.reset_tracking();
        info!("playback stopped");
        Ok(inner.snapshot())
    }

    pub async fn next(&self) -> Result<Advance, ControlError> {
        self.inner.lock().await.advance(Direction::Next).await
    }

    pub async fn previous(&self) -> Result<Advance, ControlError> {
        self.inner.lock().await.advance(Direction::Previous).await
    }

    /// Applies a new loop mode by restarting the player, then restores what
    /// was playing (and its pause state).
    pub async fn set_loop_mode(&self, mode: LoopMode) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        info!("loop mode {} -> {}", inner.loop_mode, mode);

        if let Err(e) = inner.driver.apply_loop_mode(mode).await {
            if inner.transport.is_active() {
                inner.transport = Transport::Idle;
            }
            return Err(inner.record(e.into()));
        }
        inner.loop_mode = mode;
        inner.settings.persist_loop_mode(mode).await;
        inner.last_error = None;

        // The new mode is in effect either way; a failed restore only loses
        // the item, which the snapshot reports.
        if inner.transport.is_active() {
            let resume_paused = inner.transport == Transport::Paused;
            if let Some(current) = inner.current.clone() {
                if let Err(e) = inner.load(&current, resume_paused).await {
                    warn!("could not restore '{current}' after loop mode change: {e}");
                    inner.transport = Transport::Idle;
                    inner.reset_tracking();
                    inner.record(e);
                }
            }
        }
        Ok(inner.snapshot())
    }

    pub async fn enter_edit(&self) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.transport != Transport::Editing {
            inner.halt_output().await?;
            inner.transport = Transport::Editing;
            inner.current = None;
            inner.pending_next = None;
            inner.reset_tracking();
            info!("entered edit mode");
        }
        Ok(inner.snapshot())
    }

    /// Leaves edit mode, applying `order` first when given. Playback is not
    /// resumed.
    pub async fn exit_edit(&self, order: Option<Vec<String>>) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.transport != Transport::Editing {
            return Err(ControlError::NotEditing);
        }
        let persist_err = match order {
            Some(order) => split_persistence(inner.playlist.reorder(order))?,
            None => None,
        };
        inner.transport = Transport::Idle;
        info!("left edit mode");
        match persist_err {
            Some(e) => Err(e),
            None => Ok(inner.snapshot()),
        }
    }

    /// Stores an uploaded asset and appends it to the playlist.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, ControlError> {
        media::validate_filename(filename)?;
        let mut inner = self.inner.lock().await;
        if inner.playlist.contains(filename) {
            return Err(ControlError::DuplicateEntry(filename.to_string()));
        }
        inner.media.store(filename, bytes).await?;
        if let Some(e) = split_persistence(inner.playlist.append(filename))? {
            return Err(e);
        }
        info!("accepted upload {filename}");
        Ok(filename.to_string())
    }

    pub async fn delete(&self, filename: &str) -> Result<Vec<String>, ControlError> {
        let mut inner = self.inner.lock().await;
        if !inner.playlist.contains(filename) {
            return Err(ControlError::FileNotFound(filename.to_string()));
        }
        if inner.current.as_deref() == Some(filename) && inner.transport.is_active() {
            return Err(ControlError::FileInUse(filename.to_string()));
        }

        let persist_err = split_persistence(inner.playlist.remove(filename))?;
        inner.media.remove(filename).await;
        if inner.current.as_deref() == Some(filename) {
            inner.current = None;
        }
        if inner.pending_next.as_deref() == Some(filename) {
            inner.pending_next = None;
        }
        info!("deleted '{filename}' from playlist");
        match persist_err {
            Some(e) => Err(e),
            None => Ok(inner.playlist.entries().to_vec()),
        }
    }

    pub async fn reorder(&self, order: Vec<String>) -> Result<Vec<String>, ControlError> {
        let mut inner = self.inner.lock().await;
        if let Some(e) = split_persistence(inner.playlist.reorder(order))? {
            return Err(e);
        }
        Ok(inner.playlist.entries().to_vec())
    }

    /// Moves `filename` right after the current entry and makes it the next
    /// `next()` target.
    pub async fn set_next(&self, filename: &str) -> Result<Vec<String>, ControlError> {
        let mut inner = self.inner.lock().await;
        inner.reject_while_editing()?;
        if !inner.playlist.contains(filename) {
            return Err(ControlError::FileNotFound(filename.to_string()));
        }
        if inner.current.as_deref() == Some(filename) {
            return Ok(inner.playlist.entries().to_vec());
        }

        let anchor = inner.current.clone();
        let res = inner.playlist.move_after(filename, anchor.as_deref()).map(|_| ());
        let persist_err = split_persistence(res)?;
        inner.pending_next = Some(filename.to_string());
        info!("'{filename}' queued to play next");
        match persist_err {
            Some(e) => Err(e),
            None => Ok(inner.playlist.entries().to_vec()),
        }
    }

    /// Explicit restart; what was playing keeps playing.
    pub async fn restart_player(&self) -> Result<PlaybackSnapshot, ControlError> {
        let mut inner = self.inner.lock().await;
        let mode = inner.loop_mode;
        warn!("player restart requested");
        if let Err(e) = inner.driver.restart(mode).await {
            if inner.transport.is_active() {
                inner.transport = Transport::Idle;
            }
            return Err(inner.record(e.into()));
        }

        if inner.transport.is_active() {
            let resume_paused = inner.transport == Transport::Paused;
            if let Some(current) = inner.current.clone() {
                if let Err(e) = inner.load(&current, resume_paused).await {
                    inner.transport = Transport::Idle;
                    return Err(inner.record(e));
                }
            }
        }
        inner.reset_tracking();
        inner.last_error = None;
        Ok(inner.snapshot())
    }

    /// One reconciliation pass: drop stale references, detect EOF and desync.
    pub async fn reconcile(&self) {
        self.inner.lock().await.reconcile().await
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        info!("stopping player");
        inner.driver.stop().await;
    }
}

impl<D: PlayerDriver> Inner<D> {
    fn snapshot(&mut self) -> PlaybackSnapshot {
        let player_running = self.driver.is_alive();
        let mut player = self.driver.info();
        if self.last_error.is_some() {
            player.last_error = self.last_error.clone();
        }
        PlaybackSnapshot {
            playlist: self.playlist.entries().to_vec(),
            current_index: self.current.as_deref().and_then(|c| self.playlist.position(c)),
            current_file: self.current.clone(),
            is_playing: self.transport == Transport::Playing,
            state: self.transport,
            loop_mode: self.loop_mode,
            edit_mode: self.transport == Transport::Editing,
            player_running,
            pending_next: self.pending_next.clone(),
            player,
        }
    }

    fn record(&mut self, e: ControlError) -> ControlError {
        self.last_error = Some(e.to_string());
        e
    }

    fn reject_while_editing(&self) -> Result<(), ControlError> {
        if self.transport == Transport::Editing {
            return Err(ControlError::Editing);
        }
        Ok(())
    }

    fn require_active(&self) -> Result<(), ControlError> {
        self.reject_while_editing()?;
        if !self.transport.is_active() {
            return Err(ControlError::NotPlaying);
        }
        Ok(())
    }

    fn reset_tracking(&mut self) {
        self.observed_active = false;
        self.idle_polls = 0;
        self.failed_polls = 0;
        self.recovery_used = false;
    }

    async fn command(&mut self, intent: Intent) -> Result<Reply, ControlError> {
        if !self.driver.is_alive() {
            return Err(ControlError::PlayerNotRunning);
        }
        self.driver.execute(intent).await.map_err(ControlError::from)
    }

    /// Blanks the output. A player that is not running has nothing to stop.
    async fn halt_output(&mut self) -> Result<(), ControlError> {
        match self.command(Intent::Stop).await {
            Ok(_) | Err(ControlError::PlayerNotRunning) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Starts the player if needed and loads `name`, leaving it paused or
    /// playing. Commits `current`/`transport` only once every command worked.
    async fn load(&mut self, name: &str, paused: bool) -> Result<(), ControlError> {
        if !self.media.exists(name) {
            return Err(ControlError::FileNotFound(name.to_string()));
        }
        if !self.driver.is_alive() {
            self.driver.start(self.loop_mode).await?;
        }

        let path = self.media.path_of(name).display().to_string();
        self.command(Intent::Load {
            path,
            mode: LoadMode::Replace,
            loop_file: self.loop_mode == LoopMode::File,
        })
        .await?;
        self.command(Intent::SetPause(paused)).await?;

        self.current = Some(name.to_string());
        self.transport = if paused { Transport::Paused } else { Transport::Playing };
        self.observed_active = false;
        self.idle_polls = 0;
        self.failed_polls = 0;
        if self.pending_next.as_deref() == Some(name) {
            self.pending_next = None;
        }
        info!("now playing '{name}'");
        Ok(())
    }

    async fn play_explicit(&mut self, name: String) -> Result<(), ControlError> {
        self.load(&name, false).await.map_err(|e| self.record(e))?;
        self.recovery_used = false;
        self.last_error = None;
        Ok(())
    }

    async fn advance(&mut self, direction: Direction) -> Result<Advance, ControlError> {
        self.reject_while_editing()?;
        if self.playlist.is_empty() {
            return Err(ControlError::PlaylistEmpty);
        }

        let len = self.playlist.len();
        let wrap = self.loop_mode == LoopMode::Playlist;
        let current_idx = self.current.as_deref().and_then(|c| self.playlist.position(c));
        let pending = self
            .pending_next
            .clone()
            .filter(|p| self.playlist.contains(p) && self.current.as_deref() != Some(p.as_str()));

        let target_idx = match (direction, pending, current_idx) {
            (Direction::Next, Some(p), _) => self.playlist.position(&p),
            (_, _, None) => Some(0),
            (Direction::Next, None, Some(i)) if i + 1 < len => Some(i + 1),
            (Direction::Next, None, Some(_)) => wrap.then_some(0),
            (Direction::Previous, _, Some(0)) => wrap.then_some(len - 1),
            (Direction::Previous, _, Some(i)) => Some(i - 1),
        };

        let Some(idx) = target_idx else {
            self.halt_output().await?;
            self.transport = Transport::Idle;
            self.reset_tracking();
            let status = match direction {
                Direction::Next => "playlist_ended",
                Direction::Previous => "playlist_start",
            };
            info!("{status}: stopping at '{}'", self.current.as_deref().unwrap_or("-"));
            return Ok(Advance::Boundary(status));
        };

        let name = self
            .playlist
            .get(idx)
            .map(str::to_string)
            .ok_or(ControlError::PlaylistEmpty)?;
        self.play_explicit(name).await?;
        if direction == Direction::Next {
            self.pending_next = None;
        }
        Ok(Advance::Playing(self.snapshot()))
    }

    async fn reconcile(&mut self) {
        if let Some(current) = self.current.clone() {
            if !self.playlist.contains(&current) {
                warn!("current file '{current}' is no longer in the playlist");
                self.current = None;
                if self.transport.is_active() {
                    if let Err(e) = self.halt_output().await {
                        warn!("failed to stop stale playback: {e}");
                    }
                    self.transport = Transport::Idle;
                }
            }
        }
        if let Some(pending) = self.pending_next.clone() {
            if !self.playlist.contains(&pending) {
                self.pending_next = None;
            }
        }

        if !self.transport.is_active() {
            return;
        }
        if !self.driver.is_alive() {
            self.recover("player process is gone").await;
            return;
        }

        let polled = match self.query(Property::EofReached).await {
            Ok(eof) => self.query(Property::IdleActive).await.map(|idle| (eof, idle)),
            Err(e) => Err(e),
        };
        let (eof, idle) = match polled {
            Ok(flags) => {
                if self.failed_polls > 0 {
                    info!("player answers again after {} failed polls", self.failed_polls);
                    self.failed_polls = 0;
                    self.last_error = None;
                }
                flags
            }
            Err(e) => {
                // A live process that stops answering is a hang; it shares the
                // desync threshold and recovery budget.
                self.failed_polls += 1;
                self.record(e);
                if self.failed_polls >= self.desync_threshold {
                    self.recover("player is not responding").await;
                }
                return;
            }
        };

        if idle == Some(false) && eof != Some(true) {
            self.observed_active = true;
            self.idle_polls = 0;
            self.recovery_used = false;
            return;
        }

        if eof == Some(true) || (idle == Some(true) && self.observed_active) {
            self.on_end_of_file().await;
        } else if idle == Some(true) {
            self.idle_polls += 1;
            if self.idle_polls >= self.desync_threshold {
                self.recover("player is idle while a file should be playing").await;
            }
        }
    }

    async fn query(&mut self, property: Property) -> Result<Option<bool>, ControlError> {
        match self.command(Intent::Query(property)).await {
            Ok(reply) => Ok(reply.flag()),
            Err(e) => {
                warn!("reconcile: reading {} failed: {e}", property.name());
                Err(e)
            }
        }
    }

    async fn on_end_of_file(&mut self) {
        let Some(current) = self.current.clone() else {
            return;
        };
        info!("end of '{current}'");

        let res = if self.loop_mode == LoopMode::File {
            self.load(&current, false).await.map(|_| ())
        } else {
            self.advance(Direction::Next).await.map(|_| ())
        };
        if let Err(e) = res {
            warn!("auto-advance failed: {e}");
            self.transport = Transport::Idle;
            self.reset_tracking();
            self.record(e);
        }
    }

    /// One-shot desync recovery: restart the player and reload the current
    /// item with its pause state. A second desync in the same episode gives up.
    async fn recover(&mut self, reason: &str) {
        if self.recovery_used {
            warn!("desync persists after recovery ({reason}), giving up");
            self.transport = Transport::Idle;
            self.observed_active = false;
            self.idle_polls = 0;
            self.failed_polls = 0;
            self.last_error = Some(reason.to_string());
            return;
        }
        self.recovery_used = true;
        warn!("desync detected ({reason}), restarting player");

        let paused = self.transport == Transport::Paused;
        let Some(current) = self.current.clone() else {
            self.transport = Transport::Idle;
            return;
        };

        let res: Result<(), ControlError> = match self.driver.restart(self.loop_mode).await {
            Ok(()) => self.load(&current, paused).await,
            Err(e) => Err(e.into()),
        };
        match res {
            Ok(()) => info!("recovered playback of '{current}'"),
            Err(e) => {
                warn!("recovery failed: {e}");
                self.transport = Transport::Idle;
                self.observed_active = false;
                self.idle_polls = 0;
                self.failed_polls = 0;
                self.record(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::fake::FakeDriver;

    struct Harness {
        ctl: Controller<FakeDriver>,
        driver: FakeDriver,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn playlist_on_disk(&self) -> Vec<String> {
            let raw = std::fs::read_to_string(self.dir.path().join("playlist.json")).unwrap();
            serde_json::from_str(&raw).unwrap()
        }
    }

    async fn harness(files: &[&str]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaLibrary::new(dir.path().join("uploads"));
        let mut playlist = PlaylistStore::load(dir.path().join("playlist.json"));
        for f in files {
            media.store(f, b"data").await.unwrap();
            playlist.append(f).unwrap();
        }
        let settings = SettingsStore::new(dir.path().join("kioskplay.db"));
        let driver = FakeDriver::default();
        let ctl = Controller::new(playlist, media, settings, driver.clone(), LoopMode::None, 3);
        Harness { ctl, driver, dir }
    }

    fn current(adv: Advance) -> Option<String> {
        match adv {
            Advance::Playing(s) => s.current_file,
            Advance::Boundary(b) => panic!("unexpected boundary {b}"),
        }
    }

    #[tokio::test]
    async fn play_defaults_to_first_entry_and_starts_player() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        let s = h.ctl.play(None).await.unwrap();
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert_eq!(s.current_index, Some(0));
        assert!(s.is_playing);
        assert!(s.player_running);

        let script = h.driver.script();
        assert_eq!(script.starts, vec![LoopMode::None]);
        assert_eq!(script.loaded(), ["a.mp4"]);
        assert!(!script.paused);
    }

    #[tokio::test]
    async fn play_on_empty_playlist_fails_and_stays_idle() {
        let h = harness(&[]).await;
        assert!(matches!(h.ctl.play(None).await, Err(ControlError::PlaylistEmpty)));
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Idle);
        assert!(s.current_file.is_none());
    }

    #[tokio::test]
    async fn play_unknown_or_missing_file_is_not_found() {
        let h = harness(&["a.mp4"]).await;
        assert!(matches!(h.ctl.play(Some("zz.mp4".into())).await, Err(ControlError::FileNotFound(_))));

        std::fs::remove_file(h.dir.path().join("uploads/a.mp4")).unwrap();
        assert!(matches!(h.ctl.play(Some("a.mp4".into())).await, Err(ControlError::FileNotFound(_))));
        assert_eq!(h.ctl.snapshot().await.state, Transport::Idle);
    }

    #[tokio::test]
    async fn failed_start_commits_nothing() {
        let h = harness(&["a.mp4"]).await;
        h.driver.script().failing_starts = 1;
        assert!(matches!(h.ctl.play(None).await, Err(ControlError::StartupTimeout(_))));
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Idle);
        assert!(s.current_file.is_none());
        assert!(s.player.last_error.is_some());
    }

    #[tokio::test]
    async fn next_then_previous_returns_to_start() {
        let h = harness(&["a.mp4", "b.mp4", "c.mp4"]).await;
        h.ctl.play(Some("b.mp4".into())).await.unwrap();
        assert_eq!(current(h.ctl.next().await.unwrap()).as_deref(), Some("c.mp4"));
        assert_eq!(current(h.ctl.previous().await.unwrap()).as_deref(), Some("b.mp4"));
    }

    #[tokio::test]
    async fn next_without_current_starts_at_first() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        assert_eq!(current(h.ctl.next().await.unwrap()).as_deref(), Some("a.mp4"));
    }

    #[tokio::test]
    async fn playlist_loop_wraps_forever() {
        let h = harness(&["a.mp4", "b.mp4", "c.mp4"]).await;
        h.ctl.set_loop_mode(LoopMode::Playlist).await.unwrap();
        h.ctl.play(Some("c.mp4".into())).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(current(h.ctl.next().await.unwrap()).unwrap());
        }
        assert_eq!(seen, ["a.mp4", "b.mp4", "c.mp4", "a.mp4"]);

        h.ctl.play(Some("a.mp4".into())).await.unwrap();
        assert_eq!(current(h.ctl.previous().await.unwrap()).as_deref(), Some("c.mp4"));
    }

    #[tokio::test]
    async fn end_of_playlist_without_loop_stops() {
        let h = harness(&["a.mp4", "b.mp4", "c.mp4"]).await;
        h.ctl.play(Some("c.mp4".into())).await.unwrap();

        let adv = h.ctl.next().await.unwrap();
        assert!(matches!(adv, Advance::Boundary("playlist_ended")));

        let s = h.ctl.snapshot().await;
        assert_eq!(s.current_file.as_deref(), Some("c.mp4"));
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(h.driver.script().intents.last(), Some(&Intent::Stop));
    }

    #[tokio::test]
    async fn previous_at_start_without_loop_stops() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        assert!(matches!(h.ctl.previous().await.unwrap(), Advance::Boundary("playlist_start")));
        assert_eq!(h.ctl.snapshot().await.current_file.as_deref(), Some("a.mp4"));
    }

    #[tokio::test]
    async fn pause_and_toggle_track_player_state() {
        let h = harness(&["a.mp4"]).await;
        assert!(matches!(h.ctl.pause().await, Err(ControlError::NotPlaying)));

        h.ctl.play(None).await.unwrap();
        assert_eq!(h.ctl.pause().await.unwrap().state, Transport::Paused);
        assert_eq!(h.ctl.toggle_pause().await.unwrap().state, Transport::Playing);
        assert_eq!(h.ctl.toggle_pause().await.unwrap().state, Transport::Paused);
        assert!(h.driver.script().paused);
    }

    #[tokio::test]
    async fn toggle_commits_even_when_read_back_fails() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.driver.script().fail_queries = true;

        let s = h.ctl.toggle_pause().await.unwrap();
        assert_eq!(s.state, Transport::Paused);
        assert!(h.driver.script().paused);

        let s = h.ctl.toggle_pause().await.unwrap();
        assert_eq!(s.state, Transport::Playing);
        assert!(!h.driver.script().paused);
    }

    #[tokio::test]
    async fn stop_clears_current_and_keeps_player() {
        let h = harness(&["a.mp4"]).await;
        // Nothing running yet: still fine.
        h.ctl.stop().await.unwrap();

        h.ctl.play(None).await.unwrap();
        let s = h.ctl.stop().await.unwrap();
        assert!(s.current_file.is_none());
        assert_eq!(s.state, Transport::Idle);
        assert!(s.player_running);
        assert_eq!(h.driver.script().stops, 0);
    }

    #[tokio::test]
    async fn channel_failure_is_surfaced_without_state_change() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.driver.script().fail_commands = true;

        assert!(matches!(h.ctl.next().await, Err(ControlError::Channel(_))));
        let s = h.ctl.snapshot().await;
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert_eq!(s.state, Transport::Playing);
    }

    #[tokio::test]
    async fn set_loop_mode_restarts_and_resumes() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(Some("b.mp4".into())).await.unwrap();
        h.ctl.pause().await.unwrap();

        let s = h.ctl.set_loop_mode(LoopMode::File).await.unwrap();
        assert_eq!(s.loop_mode, LoopMode::File);
        assert_eq!(s.current_file.as_deref(), Some("b.mp4"));
        assert_eq!(s.state, Transport::Paused);

        let script = h.driver.script();
        assert_eq!(script.starts, vec![LoopMode::None, LoopMode::File]);
        assert_eq!(script.stops, 1);
        assert_eq!(script.loaded(), ["b.mp4", "b.mp4"]);
        assert!(script.paused);
        assert!(script.intents.contains(&Intent::Load {
            path: h.dir.path().join("uploads/b.mp4").display().to_string(),
            mode: LoadMode::Replace,
            loop_file: true,
        }));
    }

    #[tokio::test]
    async fn loop_mode_sticks_when_restore_fails() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        std::fs::remove_file(h.dir.path().join("uploads/a.mp4")).unwrap();

        let s = h.ctl.set_loop_mode(LoopMode::File).await.unwrap();
        assert_eq!(s.loop_mode, LoopMode::File);
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert!(s.player.last_error.is_some());

        let stored = SettingsStore::new(h.dir.path().join("kioskplay.db"))
            .load_loop_mode_or_default()
            .await;
        assert_eq!(stored, LoopMode::File);
    }

    #[tokio::test]
    async fn loop_mode_is_persisted() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.set_loop_mode(LoopMode::Playlist).await.unwrap();
        let stored = SettingsStore::new(h.dir.path().join("kioskplay.db"))
            .load_loop_mode_or_default()
            .await;
        assert_eq!(stored, LoopMode::Playlist);
    }

    #[tokio::test]
    async fn edit_mode_stops_and_blocks_transport() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();

        let s = h.ctl.enter_edit().await.unwrap();
        assert!(s.edit_mode);
        assert!(s.current_file.is_none());
        assert!(!s.is_playing);
        assert_eq!(h.driver.script().intents.last(), Some(&Intent::Stop));

        assert!(matches!(h.ctl.play(None).await, Err(ControlError::Editing)));
        assert!(matches!(h.ctl.next().await, Err(ControlError::Editing)));
        assert!(matches!(h.ctl.set_next("b.mp4").await, Err(ControlError::Editing)));

        let s = h
            .ctl
            .exit_edit(Some(vec!["b.mp4".into(), "a.mp4".into()]))
            .await
            .unwrap();
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(s.playlist, ["b.mp4", "a.mp4"]);
        assert!(matches!(h.ctl.exit_edit(None).await, Err(ControlError::NotEditing)));
    }

    #[tokio::test]
    async fn exit_edit_with_bad_order_stays_editing() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.enter_edit().await.unwrap();
        let res = h.ctl.exit_edit(Some(vec!["a.mp4".into()])).await;
        assert!(matches!(res, Err(ControlError::InvalidOrder(_))));
        assert!(h.ctl.snapshot().await.edit_mode);
    }

    #[tokio::test]
    async fn delete_rules_follow_playback_state() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        assert!(matches!(h.ctl.delete("a.mp4").await, Err(ControlError::FileInUse(_))));
        h.ctl.pause().await.unwrap();
        assert!(matches!(h.ctl.delete("a.mp4").await, Err(ControlError::FileInUse(_))));

        // Idle after reaching the boundary, current still set.
        h.ctl.play(Some("b.mp4".into())).await.unwrap();
        h.ctl.next().await.unwrap();
        let left = h.ctl.delete("b.mp4").await.unwrap();
        assert_eq!(left, ["a.mp4"]);
        assert_eq!(h.playlist_on_disk(), ["a.mp4"]);
        assert!(!h.dir.path().join("uploads/b.mp4").exists());
        assert!(h.ctl.snapshot().await.current_file.is_none());

        h.ctl.enter_edit().await.unwrap();
        assert!(h.ctl.delete("a.mp4").await.unwrap().is_empty());
        assert!(h.playlist_on_disk().is_empty());
    }

    #[tokio::test]
    async fn upload_appends_and_rejects_duplicates() {
        let h = harness(&["a.mp4"]).await;
        assert!(matches!(h.ctl.upload("a.mp4", b"new").await, Err(ControlError::DuplicateEntry(_))));
        assert_eq!(std::fs::read(h.dir.path().join("uploads/a.mp4")).unwrap(), b"data");
        assert_eq!(h.ctl.snapshot().await.playlist, ["a.mp4"]);

        assert_eq!(h.ctl.upload("b.MP4", b"x").await.unwrap(), "b.MP4");
        assert_eq!(h.playlist_on_disk(), ["a.mp4", "b.MP4"]);
        assert!(matches!(h.ctl.upload("c.exe", b"x").await, Err(ControlError::UnsupportedMediaType(_))));
    }

    #[tokio::test]
    async fn reorder_with_wrong_set_leaves_playlist() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        let res = h.ctl.reorder(vec!["a.mp4".into(), "c.mp4".into()]).await;
        assert!(matches!(res, Err(ControlError::InvalidOrder(_))));
        assert_eq!(h.playlist_on_disk(), ["a.mp4", "b.mp4"]);
    }

    #[tokio::test]
    async fn set_next_overrides_successor_once() {
        let h = harness(&["a.mp4", "b.mp4", "c.mp4", "d.mp4"]).await;
        h.ctl.play(None).await.unwrap();

        let order = h.ctl.set_next("d.mp4").await.unwrap();
        assert_eq!(order, ["a.mp4", "d.mp4", "b.mp4", "c.mp4"]);
        assert_eq!(h.ctl.snapshot().await.pending_next.as_deref(), Some("d.mp4"));

        assert_eq!(current(h.ctl.next().await.unwrap()).as_deref(), Some("d.mp4"));
        assert!(h.ctl.snapshot().await.pending_next.is_none());
        assert_eq!(current(h.ctl.next().await.unwrap()).as_deref(), Some("b.mp4"));

        // Targeting the current entry changes nothing.
        let order = h.ctl.set_next("b.mp4").await.unwrap();
        assert_eq!(order, ["a.mp4", "d.mp4", "b.mp4", "c.mp4"]);
        assert!(h.ctl.snapshot().await.pending_next.is_none());
    }

    #[tokio::test]
    async fn reconcile_advances_on_eof() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.driver.script().eof_reached = Some(true);

        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert_eq!(s.current_file.as_deref(), Some("b.mp4"));
        assert!(s.is_playing);
    }

    #[tokio::test]
    async fn reconcile_treats_idle_after_activity_as_eof() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.ctl.reconcile().await; // observed active

        {
            let mut s = h.driver.script();
            s.idle_active = Some(true);
            s.eof_reached = None;
        }
        h.ctl.reconcile().await;
        assert_eq!(h.ctl.snapshot().await.current_file.as_deref(), Some("b.mp4"));

        // b is last: the next end stops at the boundary.
        h.ctl.reconcile().await;
        h.driver.script().eof_reached = Some(true);
        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(s.current_file.as_deref(), Some("b.mp4"));
    }

    #[tokio::test]
    async fn reconcile_reloads_current_in_file_loop() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.set_loop_mode(LoopMode::File).await.unwrap();
        h.ctl.play(None).await.unwrap();
        h.driver.script().eof_reached = Some(true);

        h.ctl.reconcile().await;
        assert_eq!(h.ctl.snapshot().await.current_file.as_deref(), Some("a.mp4"));
        assert_eq!(h.driver.script().loaded(), ["a.mp4", "a.mp4"]);
    }

    #[tokio::test]
    async fn persistent_idle_triggers_one_recovery() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();

        // Player never shows the item as active.
        let force_idle = || {
            let mut s = h.driver.script();
            s.idle_active = Some(true);
            s.eof_reached = None;
        };

        force_idle();
        for _ in 0..3 {
            h.ctl.reconcile().await;
            force_idle();
        }
        assert_eq!(h.driver.script().starts.len(), 2, "one automatic restart");
        assert_eq!(h.ctl.snapshot().await.state, Transport::Playing);

        for _ in 0..3 {
            h.ctl.reconcile().await;
            force_idle();
        }
        assert_eq!(h.driver.script().starts.len(), 2, "no second restart");
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert!(s.player.last_error.is_some());
    }

    #[tokio::test]
    async fn dead_player_is_recovered_with_pause_state() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.ctl.pause().await.unwrap();
        h.driver.script().alive = false;

        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Paused);
        assert!(s.player_running);
        assert!(h.driver.script().paused);
    }

    #[tokio::test]
    async fn failed_recovery_leaves_idle_with_error() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        {
            let mut s = h.driver.script();
            s.alive = false;
            s.failing_starts = 1;
        }
        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert!(s.player.last_error.is_some());
    }

    #[tokio::test]
    async fn hung_player_is_reported_then_recovered_once() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.driver.script().fail_commands = true;

        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Playing);
        assert!(s.player.last_error.is_some());
        assert_eq!(h.driver.script().starts.len(), 1);

        for _ in 0..20 {
            h.ctl.reconcile().await;
        }
        // One restart; the reload still fails, so playback gives up.
        assert_eq!(h.driver.script().starts.len(), 2);
        let s = h.ctl.snapshot().await;
        assert_eq!(s.state, Transport::Idle);
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert!(s.player.last_error.is_some());
    }

    #[tokio::test]
    async fn player_answering_again_clears_poll_error() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.driver.script().fail_queries = true;
        h.ctl.reconcile().await;
        assert!(h.ctl.snapshot().await.player.last_error.is_some());

        h.driver.script().fail_queries = false;
        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert!(s.player.last_error.is_none());
        assert_eq!(s.state, Transport::Playing);
        assert_eq!(h.driver.script().starts.len(), 1);
    }

    #[tokio::test]
    async fn reconcile_drops_stale_references() {
        let h = harness(&["a.mp4", "b.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        h.ctl.set_next("b.mp4").await.unwrap();
        {
            // Simulate an out-of-band edit of the store.
            let mut inner = h.ctl.inner.lock().await;
            inner.playlist.remove("a.mp4").unwrap();
            inner.playlist.remove("b.mp4").unwrap();
        }
        h.ctl.reconcile().await;
        let s = h.ctl.snapshot().await;
        assert!(s.current_file.is_none());
        assert!(s.pending_next.is_none());
        assert_eq!(s.state, Transport::Idle);
    }

    #[tokio::test]
    async fn restart_player_keeps_playback() {
        let h = harness(&["a.mp4"]).await;
        h.ctl.play(None).await.unwrap();
        let s = h.ctl.restart_player().await.unwrap();
        assert_eq!(s.current_file.as_deref(), Some("a.mp4"));
        assert!(s.is_playing);
        let script = h.driver.script();
        assert_eq!(script.stops, 1);
        assert_eq!(script.loaded(), ["a.mp4", "a.mp4"]);
    }
}

//! Scripted in-memory driver used by controller and router tests.

use std::sync::{Arc, Mutex};

use serde_json::json;

use super::{Intent, LoopMode, PlayerDriver, PlayerError, PlayerInfo, Property, Reply, SupervisorState};

#[derive(Debug, Default)]
pub struct FakeScript {
    pub alive: bool,
    pub intents: Vec<Intent>,
    pub starts: Vec<LoopMode>,
    pub stops: u32,
    pub paused: bool,
    pub eof_reached: Option<bool>,
    pub idle_active: Option<bool>,
    /// Number of upcoming `start` calls that fail.
    pub failing_starts: u32,
    pub fail_commands: bool,
    /// Property reads fail while other commands still go through.
    pub fail_queries: bool,
}

impl FakeScript {
    /// Files passed to `loadfile`, in order.
    pub fn loaded(&self) -> Vec<String> {
        self.intents
            .iter()
            .filter_map(|i| match i {
                Intent::Load { path, .. } => Some(path.rsplit('/').next().unwrap_or(path).to_string()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    pub script: Arc<Mutex<FakeScript>>,
}

impl FakeDriver {
    pub fn script(&self) -> std::sync::MutexGuard<'_, FakeScript> {
        self.script.lock().unwrap()
    }
}

impl PlayerDriver for FakeDriver {
    fn is_alive(&mut self) -> bool {
        self.script().alive
    }

    fn info(&self) -> PlayerInfo {
        let alive = self.script().alive;
        PlayerInfo {
            state: if alive { SupervisorState::Running } else { SupervisorState::Stopped },
            pid: alive.then_some(4242),
            started_at: None,
            last_error: None,
        }
    }

    async fn start(&mut self, loop_mode: LoopMode) -> Result<(), PlayerError> {
        let mut s = self.script();
        if s.alive {
            return Ok(());
        }
        s.starts.push(loop_mode);
        if s.failing_starts > 0 {
            s.failing_starts -= 1;
            return Err(PlayerError::StartupTimeout(std::time::Duration::from_secs(5)));
        }
        s.alive = true;
        s.paused = false;
        s.idle_active = Some(true);
        s.eof_reached = None;
        Ok(())
    }

    async fn stop(&mut self) {
        let mut s = self.script();
        s.stops += 1;
        s.alive = false;
    }

    async fn execute(&mut self, intent: Intent) -> Result<Reply, PlayerError> {
        let mut s = self.script();
        if !s.alive {
            return Err(PlayerError::NotRunning);
        }
        if s.fail_commands || (s.fail_queries && matches!(intent, Intent::Query(_))) {
            return Err(PlayerError::Channel("scripted failure".into()));
        }
        let mut reply = Reply::default();
        match &intent {
            Intent::Load { .. } => {
                s.idle_active = Some(false);
                s.eof_reached = Some(false);
            }
            Intent::SetPause(p) => s.paused = *p,
            Intent::TogglePause => s.paused = !s.paused,
            Intent::Stop => {
                s.idle_active = Some(true);
                s.eof_reached = None;
            }
            Intent::Query(Property::Pause) => reply.data = Some(json!(s.paused)),
            Intent::Query(Property::EofReached) => reply.data = s.eof_reached.map(|b| json!(b)),
            Intent::Query(Property::IdleActive) => reply.data = s.idle_active.map(|b| json!(b)),
            _ => {}
        }
        s.intents.push(intent);
        Ok(reply)
    }
}

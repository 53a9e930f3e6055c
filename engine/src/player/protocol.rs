use serde::Deserialize;
use serde_json::{json, Value};

// --- mpv JSON IPC ---
//
// Requests are single lines: {"command": [...], "request_id": N}
// Replies carry the same request_id plus "error" and optionally "data".
// Anything with an "event" key is an unsolicited notification.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    #[allow(dead_code)]
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    EofReached,
    IdleActive,
    Pause,
}

impl Property {
    pub fn name(&self) -> &'static str {
        match self {
            Property::EofReached => "eof-reached",
            Property::IdleActive => "idle-active",
            Property::Pause => "pause",
        }
    }
}

/// Abstract playback intents understood by every driver.
///
/// The controller keeps its own playlist and only ever hands mpv one file, so
/// it never sends mpv-side playlist navigation or loop flags directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `loop_file` is the value `loop-file` must hold after a replace.
    Load { path: String, mode: LoadMode, loop_file: bool },
    SetPause(bool),
    TogglePause,
    Stop,
    #[allow(dead_code)]
    Advance(Direction),
    #[allow(dead_code)]
    SetLoopFile(bool),
    #[allow(dead_code)]
    SetLoopPlaylist(bool),
    Query(Property),
    Quit,
}

fn inf_or_no(on: bool) -> &'static str {
    if on {
        "inf"
    } else {
        "no"
    }
}

/// Translates an intent into the command arrays sent, in order, each waiting
/// for its own acknowledgment.
pub fn encode(intent: &Intent) -> Vec<Vec<Value>> {
    match intent {
        Intent::Load { path, mode, loop_file } => {
            let flag = match mode {
                LoadMode::Replace => "replace",
                LoadMode::Append => "append",
            };
            let mut cmds = vec![vec![json!("loadfile"), json!(path), json!(flag)]];
            if *mode == LoadMode::Replace {
                cmds.push(vec![json!("set_property"), json!("loop-file"), json!(inf_or_no(*loop_file))]);
            }
            cmds
        }
        Intent::SetPause(paused) => vec![vec![json!("set_property"), json!("pause"), json!(paused)]],
        Intent::TogglePause => vec![vec![json!("cycle"), json!("pause")]],
        Intent::Stop => vec![vec![json!("stop")]],
        Intent::Advance(dir) => {
            let cmd = match dir {
                Direction::Next => "playlist-next",
                Direction::Previous => "playlist-prev",
            };
            vec![vec![json!(cmd), json!("weak")]]
        }
        Intent::SetLoopFile(on) => vec![vec![json!("set_property"), json!("loop-file"), json!(inf_or_no(*on))]],
        Intent::SetLoopPlaylist(on) => {
            vec![vec![json!("set_property"), json!("loop-playlist"), json!(inf_or_no(*on))]]
        }
        Intent::Query(prop) => vec![vec![json!("get_property"), json!(prop.name())]],
        Intent::Quit => vec![vec![json!("quit")]],
    }
}

pub fn request_line(command: &[Value], request_id: u64) -> String {
    let mut line = json!({ "command": command, "request_id": request_id }).to_string();
    line.push('\n');
    line
}

/// Result of the last acknowledged message of an intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub data: Option<Value>,
}

impl Reply {
    /// Boolean property value; `None` when the property had no value.
    pub fn flag(&self) -> Option<bool> {
        self.data.as_ref().and_then(Value::as_bool)
    }
}

#[derive(Debug, PartialEq)]
pub enum Incoming {
    Event(String),
    Reply { request_id: u64, outcome: Result<Reply, String> },
    Unrecognized,
}

#[derive(Deserialize)]
struct RawMessage {
    event: Option<String>,
    request_id: Option<u64>,
    error: Option<String>,
    data: Option<Value>,
}

/// Classifies one line read from the channel.
pub fn parse_line(line: &str) -> Incoming {
    let Ok(raw) = serde_json::from_str::<RawMessage>(line) else {
        return Incoming::Unrecognized;
    };
    if let Some(event) = raw.event {
        return Incoming::Event(event);
    }
    let Some(request_id) = raw.request_id else {
        return Incoming::Unrecognized;
    };

    let outcome = match raw.error.as_deref() {
        None | Some("success") => Ok(Reply { data: raw.data.filter(|d| !d.is_null()) }),
        // Reading e.g. eof-reached while idle: no value, not a failure.
        Some("property unavailable") => Ok(Reply { data: None }),
        Some(other) => Err(other.to_string()),
    };
    Incoming::Reply { request_id, outcome }
}

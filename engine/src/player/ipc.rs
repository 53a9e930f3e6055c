use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::protocol::{self, Incoming, Intent, Reply};
use super::PlayerError;

/// Request/response channel to mpv's `--input-ipc-server` socket.
///
/// One request is in flight at a time: every message waits for its own
/// acknowledgment (bounded by `timeout`) before the next is written.
pub struct IpcChannel {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
    timeout: Duration,
}

impl IpcChannel {
    pub async fn connect(path: &Path, timeout: Duration) -> Result<Self, PlayerError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| PlayerError::Channel(format!("connect {}: {e}", path.display())))?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            writer,
            next_id: 1,
            timeout,
        })
    }

    /// Sends every message an intent encodes to; returns the last reply.
    pub async fn send(&mut self, intent: &Intent) -> Result<Reply, PlayerError> {
        let mut reply = Reply::default();
        for command in protocol::encode(intent) {
            reply = self.command(&command).await?;
        }
        Ok(reply)
    }

    pub async fn command(&mut self, command: &[Value]) -> Result<Reply, PlayerError> {
        let request_id = self.next_id;
        self.next_id += 1;

        let line = protocol::request_line(command, request_id);
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PlayerError::Channel(format!("send failed: {e}")))?;

        let name = command.first().and_then(Value::as_str).unwrap_or("?").to_string();
        let limit = self.timeout;
        match tokio::time::timeout(limit, self.await_reply(request_id)).await {
            Ok(res) => res.map_err(|e| match e {
                PlayerError::Channel(msg) => PlayerError::Channel(format!("{name}: {msg}")),
                other => other,
            }),
            Err(_) => Err(PlayerError::Channel(format!("{name}: no reply within {limit:?}"))),
        }
    }

    async fn await_reply(&mut self, request_id: u64) -> Result<Reply, PlayerError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| PlayerError::Channel(format!("read failed: {e}")))?
                .ok_or_else(|| PlayerError::Channel("player closed the control channel".into()))?;

            match protocol::parse_line(&line) {
                Incoming::Reply { request_id: id, outcome } if id == request_id => {
                    return outcome.map_err(PlayerError::Channel);
                }
                Incoming::Reply { request_id: id, .. } => {
                    tracing::debug!("skipping reply for stale request {id}");
                }
                Incoming::Event(event) => tracing::debug!("mpv event: {event}"),
                Incoming::Unrecognized => tracing::debug!("ignoring unrecognized ipc line: {line}"),
            }
        }
    }
}

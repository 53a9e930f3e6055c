use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ControlError;

// --- Playlist store ---
//
// The playlist is an ordered list of unique media filenames. The durable copy
// is a pretty-printed JSON array (same shape the legacy UI wrote), replaced
// atomically on every mutation.

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("file '{0}' is already in the playlist")]
    Duplicate(String),

    #[error("file '{0}' not found")]
    NotFound(String),

    #[error("invalid playlist order: {0}")]
    InvalidOrder(String),

    #[error("failed to write {path}: {reason}")]
    Persistence { path: String, reason: String },
}

impl From<PlaylistError> for ControlError {
    fn from(e: PlaylistError) -> Self {
        match e {
            PlaylistError::Duplicate(name) => ControlError::DuplicateEntry(name),
            PlaylistError::NotFound(name) => ControlError::FileNotFound(name),
            PlaylistError::InvalidOrder(why) => ControlError::InvalidOrder(why),
            e @ PlaylistError::Persistence { .. } => ControlError::Persistence(e.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct PlaylistStore {
    path: PathBuf,
    entries: Vec<String>,
}

impl PlaylistStore {
    /// Loads the playlist from `path`. Never fails: a missing or unreadable
    /// file yields an empty playlist.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => parse_entries(&path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no playlist at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("failed to read playlist {}: {e}", path.display());
                Vec::new()
            }
        };
        tracing::info!("loaded {} playlist entries", entries.len());
        Self { path, entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    /// Writes the durable copy: temp file in the same directory, then rename.
    pub fn save(&self) -> Result<(), PlaylistError> {
        let fail = |reason: String| PlaylistError::Persistence {
            path: self.path.display().to_string(),
            reason,
        };

        let bytes = encode_entries(&self.entries).map_err(|e| fail(e.to_string()))?;
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;

        let tmp = dir.join(format!(".playlist-{}.tmp", Uuid::new_v4()));
        if let Err(e) = write_synced(&tmp, &bytes) {
            let _ = std::fs::remove_file(&tmp);
            return Err(fail(e.to_string()));
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(fail(e.to_string()));
        }
        Ok(())
    }

    pub fn append(&mut self, entry: &str) -> Result<(), PlaylistError> {
        if self.contains(entry) {
            return Err(PlaylistError::Duplicate(entry.to_string()));
        }
        self.entries.push(entry.to_string());
        self.save()
    }

    pub fn remove(&mut self, entry: &str) -> Result<(), PlaylistError> {
        let idx = self
            .position(entry)
            .ok_or_else(|| PlaylistError::NotFound(entry.to_string()))?;
        self.entries.remove(idx);
        self.save()
    }

    /// Replaces the order wholesale. `new_order` must be a permutation of the
    /// current entries; anything else is rejected without touching the list.
    pub fn reorder(&mut self, new_order: Vec<String>) -> Result<(), PlaylistError> {
        let mut seen = HashSet::with_capacity(new_order.len());
        for name in &new_order {
            if !seen.insert(name.as_str()) {
                return Err(PlaylistError::InvalidOrder(format!("'{name}' appears more than once")));
            }
            if !self.contains(name) {
                return Err(PlaylistError::InvalidOrder(format!("'{name}' is not in the playlist")));
            }
        }
        if new_order.len() != self.entries.len() {
            return Err(PlaylistError::InvalidOrder(format!(
                "expected {} entries, got {}",
                self.entries.len(),
                new_order.len()
            )));
        }
        self.entries = new_order;
        self.save()
    }

    /// Moves `entry` so it sits right after `anchor`, or at the front when
    /// there is no anchor. Returns the entry's new index.
    pub fn move_after(&mut self, entry: &str, anchor: Option<&str>) -> Result<usize, PlaylistError> {
        let from = self
            .position(entry)
            .ok_or_else(|| PlaylistError::NotFound(entry.to_string()))?;
        if anchor == Some(entry) {
            return Ok(from);
        }

        let moved = self.entries.remove(from);
        let to = anchor
            .and_then(|a| self.position(a))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.entries.insert(to, moved);
        self.save()?;
        Ok(to)
    }
}

fn parse_entries(path: &Path, raw: &str) -> Vec<String> {
    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            tracing::warn!("playlist {} is not a JSON array, starting empty", path.display());
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!("playlist {} is corrupt, starting empty: {e}", path.display());
            return Vec::new();
        }
    };

    let mut entries: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let Value::String(name) = item else {
            tracing::warn!("playlist {} holds a non-string entry, starting empty", path.display());
            return Vec::new();
        };
        if entries.contains(&name) {
            tracing::warn!("dropping duplicate playlist entry '{name}'");
            continue;
        }
        entries.push(name);
    }
    entries
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn encode_entries(entries: &[String]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    entries.serialize(&mut ser)?;
    Ok(out)
}

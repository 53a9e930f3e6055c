use std::path::PathBuf;

use rusqlite::{params, Connection};

use crate::player::LoopMode;

// --- Persistence (SQLite) ---
//
// Only the settings that must survive a restart of the engine live here; the
// playlist keeps its own JSON file. rusqlite is synchronous, so every call
// goes through spawn_blocking.

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

fn db_init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS player_settings (
            id         INTEGER PRIMARY KEY CHECK (id = 1),
            loop_mode  TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn db_load_loop_mode(conn: &Connection) -> anyhow::Result<LoopMode> {
    db_init(conn)?;

    let row = conn.query_row("SELECT loop_mode FROM player_settings WHERE id = 1", [], |row| {
        row.get::<_, String>(0)
    });

    match row {
        Ok(raw) => raw
            .parse::<LoopMode>()
            .map_err(|_| anyhow::anyhow!("unknown loop mode '{raw}' in settings")),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(LoopMode::default()),
        Err(e) => Err(e.into()),
    }
}

fn db_save_loop_mode(conn: &mut Connection, mode: LoopMode) -> anyhow::Result<()> {
    db_init(conn)?;
    conn.execute(
        "INSERT INTO player_settings (id, loop_mode)
         VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET
           loop_mode=excluded.loop_mode",
        params![mode.as_str()],
    )?;
    Ok(())
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load_loop_mode_or_default(&self) -> LoopMode {
        let path = self.path.clone();
        let res = tokio::task::spawn_blocking(move || -> anyhow::Result<LoopMode> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let conn = Connection::open(path)?;
            db_load_loop_mode(&conn)
        })
        .await;

        match res {
            Ok(Ok(mode)) => mode,
            Ok(Err(e)) => {
                tracing::warn!("failed to load player settings, using defaults: {e}");
                LoopMode::default()
            }
            Err(e) => {
                tracing::warn!("failed to join settings load task, using defaults: {e}");
                LoopMode::default()
            }
        }
    }

    /// Best-effort: a failed write is logged, never surfaced.
    pub async fn persist_loop_mode(&self, mode: LoopMode) {
        let path = self.path.clone();
        let _ = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut conn = Connection::open(path)?;
            db_save_loop_mode(&mut conn, mode)?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .and_then(|x| x)
        .map_err(|e| tracing::warn!("failed to persist loop mode to sqlite: {e}"));
    }
}

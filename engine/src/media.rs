use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::ControlError;

// --- Media library ---
//
// Uploaded assets live flat in one directory; the playlist refers to them by
// bare filename.

pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "mp4", "mov", "avi", "mkv"];

#[derive(Debug, Clone)]
pub struct MediaLibrary {
    dir: PathBuf,
}

impl MediaLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path handed to the player for `name`.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    /// Writes an uploaded asset via temp file + rename so the player never
    /// sees a half-written file.
    pub async fn store(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ControlError> {
        validate_filename(name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ControlError::Persistence(format!("create {}: {e}", self.dir.display())))?;

        let target = self.path_of(name);
        let tmp = self.dir.join(format!(".upload-{}.tmp", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ControlError::Persistence(format!("write {name}: {e}")));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ControlError::Persistence(format!("write {name}: {e}")));
        }
        tracing::info!("stored media asset {} ({} bytes)", target.display(), bytes.len());
        Ok(target)
    }

    /// Removes the asset backing `name`. A missing asset is only logged.
    pub async fn remove(&self, name: &str) {
        let path = self.path_of(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!("deleted media asset {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("media asset {} already gone", path.display())
            }
            Err(e) => tracing::warn!("failed to delete media asset {}: {e}", path.display()),
        }
    }
}

/// Accepts bare filenames with an allowed media extension.
pub fn validate_filename(name: &str) -> Result<(), ControlError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0');
    if bad {
        return Err(ControlError::InvalidFilename(name.to_string()));
    }

    let allowed = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false);
    if !allowed {
        return Err(ControlError::UnsupportedMediaType(name.to_string()));
    }
    Ok(())
}

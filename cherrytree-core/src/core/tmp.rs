//! Hidden working copies of encrypted documents.

use crate::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Name of the unencrypted container hidden behind `visible`.
///
/// `notes.ctx` maps to `notes.ctb` and `notes.ctz` to `notes.ctd`; other
/// names are kept as they are.
pub fn hidden_file_name(visible: &Path) -> String {
    let stem = visible
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let ext = visible
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ctx" => format!("{stem}.ctb"),
        "ctz" => format!("{stem}.ctd"),
        "" => stem,
        other => format!("{stem}.{other}"),
    }
}

struct Entry {
    dir: TempDir,
    users: usize,
}

/// Owns one private temporary directory per visible document path.
///
/// Directories are reference counted by visible path and removed when the
/// count drops to zero or when the manager is dropped.
#[derive(Default)]
pub struct TempManager {
    entries: HashMap<PathBuf, Entry>,
}

impl TempManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a reference on the directory of `visible`, creating it on first use.
    pub fn acquire(&mut self, visible: &Path) -> Result<PathBuf> {
        if let Some(entry) = self.entries.get_mut(visible) {
            entry.users += 1;
            return Ok(entry.dir.path().to_path_buf());
        }
        let dir = tempfile::Builder::new().prefix("ct_").tempdir()?;
        let path = dir.path().to_path_buf();
        log::debug!("temp dir {} for {}", path.display(), visible.display());
        self.entries
            .insert(visible.to_path_buf(), Entry { dir, users: 1 });
        Ok(path)
    }

    /// Path of the hidden container for `visible`, acquiring its directory if needed.
    pub fn hidden_path(&mut self, visible: &Path) -> Result<PathBuf> {
        let dir = match self.entries.get(visible) {
            Some(entry) => entry.dir.path().to_path_buf(),
            None => self.acquire(visible)?,
        };
        Ok(dir.join(hidden_file_name(visible)))
    }

    pub fn dir_of(&self, visible: &Path) -> Option<&Path> {
        self.entries.get(visible).map(|e| e.dir.path())
    }

    /// Drops one reference; the directory is deleted with the last one.
    pub fn release(&mut self, visible: &Path) {
        let remove = match self.entries.get_mut(visible) {
            Some(entry) => {
                entry.users = entry.users.saturating_sub(1);
                entry.users == 0
            }
            None => false,
        };
        if remove {
            if let Some(entry) = self.entries.remove(visible) {
                if let Err(e) = entry.dir.close() {
                    log::warn!("failed to remove temp dir of {}: {e}", visible.display());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TempManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempManager")
            .field("visible_paths", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

//! Engine settings persistence.
//!
//! Only the keys the storage and state engine consume live here; appearance
//! and dialog preferences belong to the GUI layer.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings consumed by the storage and undo engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum number of undo snapshots kept per node.
    pub limit_undoable_steps: usize,
    /// Whether every save of a SQLite container also compacts it.
    pub vacuum_on_save: bool,
    /// Column width given to new table columns.
    pub table_col_width_default: i32,
    /// Whether a save keeps rotated copies of the previous file.
    pub backup_copy: bool,
    /// Number of rotated copies kept when `backup_copy` is on.
    pub backup_num: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limit_undoable_steps: 20,
            vacuum_on_save: false,
            table_col_width_default: 60,
            backup_copy: true,
            backup_num: 3,
        }
    }
}

/// Loads settings from `path`; returns defaults if the file is missing or corrupt.
pub fn load_config(path: &Path) -> EngineConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("ignoring corrupt settings file {}: {e}", path.display());
            EngineConfig::default()
        }),
        Err(_) => EngineConfig::default(),
    }
}

/// Saves settings to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`crate::CherryTreeError::Io`] if the directory or file cannot be
/// written, or [`crate::CherryTreeError::Json`] if serialisation fails.
pub fn save_config(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config(&dir.path().join("nope.json"));
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.limit_undoable_steps, 20);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let cfg = EngineConfig {
            limit_undoable_steps: 5,
            vacuum_on_save: true,
            ..EngineConfig::default()
        };
        save_config(&path, &cfg).unwrap();
        assert_eq!(load_config(&path), cfg);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"backupNum": 7}"#).unwrap();
        let cfg = load_config(&path);
        assert_eq!(cfg.backup_num, 7);
        assert_eq!(cfg.table_col_width_default, 60);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(load_config(&path), EngineConfig::default());
    }
}

//! Content-addressed blob directory used by the multi-file container.
//!
//! Every payload is stored once under the lowercase hex SHA-256 of its bytes.

use crate::{CherryTreeError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A directory of immutable blobs keyed by their hash.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    /// Stores `bytes` unless an identical blob exists and returns its hash.
    pub fn put(&self, bytes: &[u8]) -> Result<String> {
        let hash = sha256_hex(bytes);
        let target = self.blob_path(&hash);
        if target.is_file() {
            return Ok(hash);
        }
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&target).map_err(|e| CherryTreeError::Io(e.error))?;
        Ok(hash)
    }

    /// Reads the blob stored under `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::MissingBlob`] when no such blob exists.
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(hash);
        if hash.is_empty() || !path.is_file() {
            return Err(CherryTreeError::MissingBlob(hash.to_string()));
        }
        Ok(fs::read(path)?)
    }

    pub fn contains(&self, hash: &str) -> bool {
        !hash.is_empty() && self.blob_path(hash).is_file()
    }

    /// Hashes of all stored blobs, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        if !self.dir.is_dir() {
            return Ok(hashes);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
                        hashes.push(name.to_string());
                    }
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Deletes blobs not in `referenced` and returns how many were removed.
    pub fn collect_garbage(&self, referenced: &HashSet<String>) -> Result<usize> {
        let mut removed = 0;
        for hash in self.list()? {
            if !referenced.contains(&hash) {
                fs::remove_file(self.blob_path(&hash))?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("removed {removed} unreferenced blobs from {}", self.dir.display());
        }
        Ok(removed)
    }
}

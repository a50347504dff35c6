//! Owns the active storage backend of an open document and drives saving.

use crate::core::archive::Archiver;
use crate::core::config::EngineConfig;
use crate::core::node::NodeId;
use crate::core::storage::{
    ensure_content_loaded, open_backend, parent_dir, CancelFlag, DocKind, DocType, ExportScope,
    StorageBackend,
};
use crate::core::sync::SyncPending;
use crate::core::tmp::{hidden_file_name, TempManager};
use crate::core::tree::TreeStore;
use crate::{CherryTreeError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix of the copy taken before a save; it becomes `file~` on success.
const MAIN_BACKUP_SUFFIX: &str = "!";

/// The storage side of one open document.
///
/// For encrypted documents the backend works on a hidden unencrypted
/// container owned by the internal [`TempManager`]; every successful save
/// archives it over the visible file.
pub struct StorageControl {
    file_path: Option<PathBuf>,
    kind: Option<DocKind>,
    password: Option<String>,
    extracted_path: Option<PathBuf>,
    backend: Option<Box<dyn StorageBackend>>,
    archiver: Box<dyn Archiver>,
    temps: TempManager,
    pending: SyncPending,
    config: EngineConfig,
    needs_full_save: bool,
}

impl StorageControl {
    /// A document that has never been saved.
    pub fn new_document(archiver: Box<dyn Archiver>, config: EngineConfig) -> Self {
        Self {
            file_path: None,
            kind: None,
            password: None,
            extracted_path: None,
            backend: None,
            archiver,
            temps: TempManager::new(),
            pending: SyncPending::new(),
            config,
            needs_full_save: true,
        }
    }

    /// Opens the document at `path` and loads its structure into `tree`.
    ///
    /// Encrypted documents are extracted with `archiver` into a private
    /// temporary directory first.
    ///
    /// # Errors
    ///
    /// Fails with [`CherryTreeError::ArchiveTool`] on a wrong password, and
    /// with the backend's error when the container cannot be read.
    pub fn load_from(
        path: &Path,
        password: Option<&str>,
        archiver: Box<dyn Archiver>,
        config: EngineConfig,
        tree: &mut TreeStore,
    ) -> Result<Self> {
        let kind = DocKind::from_path(path)?;
        let mut temps = TempManager::new();
        let extracted = if kind.encrypted {
            let password = password.ok_or_else(|| {
                CherryTreeError::InvalidDocument(format!("{} needs a password", path.display()))
            })?;
            extract_file(archiver.as_ref(), &mut temps, path, password, &kind)?
        } else {
            path.to_path_buf()
        };
        let mut backend = open_backend(kind.doc_type, &extracted)?;
        backend.populate_tree(tree)?;
        log::info!("opened {} ({} nodes)", path.display(), tree.len());

        Ok(Self {
            file_path: Some(path.to_path_buf()),
            kind: Some(kind),
            password: password.filter(|_| kind.encrypted).map(str::to_string),
            extracted_path: Some(extracted),
            backend: Some(backend),
            archiver,
            temps,
            pending: SyncPending::new(),
            config,
            needs_full_save: false,
        })
    }

    /// Visible path of the document, `None` until first saved.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn doc_kind(&self) -> Option<DocKind> {
        self.kind
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pending(&self) -> &SyncPending {
        &self.pending
    }

    /// True when the next [`StorageControl::save`] has something to write.
    pub fn is_dirty(&self) -> bool {
        self.needs_full_save || !self.pending.is_empty()
    }

    pub fn pending_edit_db_node_prop(&mut self, node_id: NodeId) {
        self.pending.pending_edit_db_node_prop(node_id);
    }

    pub fn pending_edit_db_node_buff(&mut self, node_id: NodeId) {
        self.pending.pending_edit_db_node_buff(node_id);
    }

    pub fn pending_edit_db_node_hier(&mut self, node_id: NodeId) {
        self.pending.pending_edit_db_node_hier(node_id);
    }

    pub fn pending_new_db_node(&mut self, node_id: NodeId) {
        self.pending.pending_new_db_node(node_id);
    }

    pub fn pending_rm_db_nodes(&mut self, node_ids: &[NodeId]) {
        self.pending.pending_rm_db_nodes(node_ids);
    }

    pub fn pending_edit_db_bookmarks(&mut self) {
        self.pending.pending_edit_db_bookmarks();
    }

    /// Materialises a node's buffer from the backend if it is not loaded yet.
    pub fn load_node_content(&mut self, tree: &mut TreeStore, node_id: NodeId) -> Result<()> {
        match self.backend.as_mut() {
            Some(backend) => ensure_content_loaded(backend.as_mut(), tree, &[node_id]),
            None => Ok(()),
        }
    }

    /// Writes pending changes to the document's own path.
    ///
    /// New documents and XML containers are always rewritten in full;
    /// otherwise only the sync-pending set is written. Pending intents are
    /// cleared only after everything, encryption included, succeeded.
    ///
    /// # Errors
    ///
    /// Fails with [`CherryTreeError::InvalidDocument`] when the document has
    /// no path yet; any backend or archiver failure leaves the visible file
    /// as it was before the call.
    pub fn save(&mut self, tree: &mut TreeStore, vacuum: bool, cancel: &CancelFlag) -> Result<()> {
        let (Some(file_path), Some(kind)) = (self.file_path.clone(), self.kind) else {
            return Err(CherryTreeError::InvalidDocument(
                "document has never been saved".to_string(),
            ));
        };
        if !self.is_dirty() && !vacuum {
            log::debug!("nothing to save for {}", file_path.display());
            return Ok(());
        }
        let main_backup = self.prepare_backup(&file_path)?;

        let result = self.write_and_package(tree, &file_path, &kind, vacuum, cancel);
        match result {
            Ok(()) => {
                self.pending.clear();
                self.needs_full_save = false;
                if let Some(backup) = main_backup {
                    if let Err(e) = rotate_backups(&file_path, &backup, self.config.backup_num) {
                        log::warn!("backup rotation failed for {}: {e}", file_path.display());
                    }
                }
                log::info!("saved {}", file_path.display());
                Ok(())
            }
            Err(e) => {
                if let Some(backup) = main_backup {
                    if let Err(cleanup) = std::fs::remove_file(&backup) {
                        log::warn!("could not remove {}: {cleanup}", backup.display());
                    }
                }
                log::error!("save of {} failed: {e}", file_path.display());
                Err(e)
            }
        }
    }

    /// Writes `scope` of `tree` as a new container at `path`.
    ///
    /// With [`ExportScope::All`] the document is rebound to `path` and further
    /// saves go there; any other scope is an export and leaves the document
    /// bound where it was.
    pub fn save_as(
        &mut self,
        path: &Path,
        password: Option<&str>,
        tree: &mut TreeStore,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let kind = DocKind::from_path(path)?;
        let password = password.filter(|p| !p.is_empty());
        if kind.encrypted && password.is_none() {
            return Err(CherryTreeError::InvalidDocument(format!(
                "{} needs a password",
                path.display()
            )));
        }
        if let Some(backend) = self.backend.as_mut() {
            let ids = scope.node_ids(tree);
            ensure_content_loaded(backend.as_mut(), tree, &ids)?;
        }
        let rebinding = matches!(scope, ExportScope::All);
        let same_target = self.file_path.as_deref() == Some(path);

        let fresh_temp = kind.encrypted && self.temps.dir_of(path).is_none();
        let inner = if kind.encrypted {
            self.temps.hidden_path(path)?
        } else {
            path.to_path_buf()
        };

        let reuse = same_target
            && self
                .backend
                .as_ref()
                .map_or(false, |b| b.doc_type() == kind.doc_type);
        let mut fresh = None;
        let result = (|| -> Result<()> {
            if !reuse {
                fresh = Some(open_backend(kind.doc_type, &inner)?);
            }
            let Some(backend) = fresh.as_mut().or(self.backend.as_mut()) else {
                return Err(CherryTreeError::InvalidDocument(
                    "document has no open storage".to_string(),
                ));
            };
            backend.save_full(&inner, tree, scope, cancel)?;
            if kind.encrypted {
                backend.close();
                let packaged =
                    package_with(self.archiver.as_ref(), &inner, path, password.unwrap_or_default());
                let reopened = backend.reopen(&inner);
                packaged?;
                reopened?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            if fresh_temp {
                self.temps.release(path);
            }
            log::error!("save as {} failed: {e}", path.display());
            return Err(e);
        }
        if rebinding {
            if let Some(backend) = fresh {
                self.backend = Some(backend);
            }
            if let Some(old) = self.file_path.take() {
                if old != path && self.kind.map_or(false, |k| k.encrypted) {
                    self.temps.release(&old);
                }
            }
            self.file_path = Some(path.to_path_buf());
            self.kind = Some(kind);
            self.password = password.filter(|_| kind.encrypted).map(str::to_string);
            self.extracted_path = Some(inner);
            self.pending.clear();
            self.needs_full_save = false;
        } else if fresh_temp {
            self.temps.release(path);
        }
        log::info!("saved {} as {}", scope_name(scope), path.display());
        Ok(())
    }

    /// Imports every top-level node of another document under `parent`.
    ///
    /// Imported nodes get fresh ids and are marked new for the next save.
    /// Returns the new ids in pre-order.
    pub fn add_nodes_from_storage(
        &mut self,
        path: &Path,
        password: Option<&str>,
        tree: &mut TreeStore,
        parent: Option<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let kind = DocKind::from_path(path)?;
        let mut temps = TempManager::new();
        let source_path = if kind.encrypted {
            let password = password.ok_or_else(|| {
                CherryTreeError::InvalidDocument(format!("{} needs a password", path.display()))
            })?;
            extract_file(self.archiver.as_ref(), &mut temps, path, password, &kind)?
        } else {
            path.to_path_buf()
        };

        let mut backend = open_backend(kind.doc_type, &source_path)?;
        let imported = backend.import_nodes(tree, parent)?;
        backend.close();

        for id in &imported {
            self.pending.pending_new_db_node(*id);
        }
        for renumbered in tree.nodes_sequences_fix(parent) {
            self.pending.pending_edit_db_node_hier(renumbered);
        }
        log::info!("imported {} nodes from {}", imported.len(), path.display());
        Ok(imported)
    }

    fn write_and_package(
        &mut self,
        tree: &mut TreeStore,
        file_path: &Path,
        kind: &DocKind,
        vacuum: bool,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let inner = self
            .extracted_path
            .clone()
            .unwrap_or_else(|| file_path.to_path_buf());
        let Some(backend) = self.backend.as_mut() else {
            return Err(CherryTreeError::InvalidDocument(
                "document has no open storage".to_string(),
            ));
        };

        let full = self.needs_full_save || kind.doc_type == DocType::Xml;
        let mut wrote = false;
        if !full && !self.pending.is_empty() {
            match backend.save_incremental(tree, &self.pending, cancel) {
                Ok(()) => wrote = true,
                Err(CherryTreeError::UnsupportedOperation(reason)) => {
                    log::info!("incremental save not possible ({reason}), writing in full");
                }
                Err(e) => return Err(e),
            }
        }
        if !wrote && (full || !self.pending.is_empty()) {
            let all = tree.iter_depth_first();
            ensure_content_loaded(backend.as_mut(), tree, &all)?;
            backend.save_full(&inner, tree, &ExportScope::All, cancel)?;
            wrote = true;
        }
        if vacuum || self.config.vacuum_on_save {
            backend.vacuum()?;
        }

        if kind.encrypted && (wrote || vacuum) {
            let password = self.password.clone().unwrap_or_default();
            backend.close();
            let packaged = package_with(self.archiver.as_ref(), &inner, file_path, &password);
            let reopened = backend.reopen(&inner);
            if packaged.is_err() {
                // The hidden container is ahead of the visible file now.
                self.needs_full_save = true;
            }
            packaged?;
            reopened?;
        }
        Ok(())
    }

    /// Copies the current file aside so it can become `file~` after the save.
    fn prepare_backup(&self, file_path: &Path) -> Result<Option<PathBuf>> {
        if !self.config.backup_copy || self.config.backup_num == 0 || !file_path.is_file() {
            return Ok(None);
        }
        let backup = with_suffix(file_path, MAIN_BACKUP_SUFFIX);
        std::fs::copy(file_path, &backup)?;
        Ok(Some(backup))
    }
}

impl std::fmt::Debug for StorageControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageControl")
            .field("file_path", &self.file_path)
            .field("kind", &self.kind)
            .field("extracted_path", &self.extracted_path)
            .field("pending", &self.pending)
            .field("needs_full_save", &self.needs_full_save)
            .finish()
    }
}

fn scope_name(scope: &ExportScope) -> &'static str {
    match scope {
        ExportScope::All => "document",
        ExportScope::CurrentNode(_) => "node",
        ExportScope::NodeAndSubnodes(_) => "node and subnodes",
        ExportScope::SelectedText { .. } => "selection",
    }
}

/// Extracts `archive` into the private directory of `temps` and returns the
/// hidden container path.
fn extract_file(
    archiver: &dyn Archiver,
    temps: &mut TempManager,
    archive: &Path,
    password: &str,
    kind: &DocKind,
) -> Result<PathBuf> {
    let dir = temps.acquire(archive)?;
    let extracted = (|| -> Result<PathBuf> {
        archiver.extract(archive, password, &dir)?.into_result()?;
        let expected = dir.join(hidden_file_name(archive));
        if expected.is_file() {
            return Ok(expected);
        }
        let wanted = kind.inner_extension();
        for entry in std::fs::read_dir(&dir)? {
            let found = entry?.path();
            let matches = found
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case(wanted));
            if found.is_file() && matches {
                std::fs::rename(&found, &expected)?;
                return Ok(expected);
            }
        }
        Err(CherryTreeError::InvalidDocument(format!(
            "no .{wanted} container inside {}",
            archive.display()
        )))
    })();
    if extracted.is_err() {
        temps.release(archive);
    }
    extracted
}

/// Archives `inner` to a temporary sibling of `visible`, then renames it into place.
fn package_with(archiver: &dyn Archiver, inner: &Path, visible: &Path, password: &str) -> Result<()> {
    let staging = tempfile::Builder::new()
        .prefix(".ct_")
        .tempdir_in(parent_dir(visible))?;
    let file_name = visible
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("document"));
    let staged = staging.path().join(file_name);
    archiver.archive(inner, password, &staged)?.into_result()?;
    if !staged.is_file() {
        return Err(CherryTreeError::InvalidDocument(
            "archiver produced no output".to_string(),
        ));
    }
    std::fs::rename(&staged, visible)?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Shifts `file~` to `file~~` and so on up to `backup_num` tildes, then moves
/// `main_backup` to `file~`.
fn rotate_backups(file_path: &Path, main_backup: &Path, backup_num: usize) -> Result<()> {
    for tildes in (1..backup_num).rev() {
        let older = with_suffix(file_path, &"~".repeat(tildes));
        if older.is_file() {
            std::fs::rename(&older, with_suffix(file_path, &"~".repeat(tildes + 1)))?;
        }
    }
    std::fs::rename(main_backup, with_suffix(file_path, "~"))?;
    Ok(())
}

//! Storage backends: XML document, SQLite database and multi-file directory.

pub mod merge;
pub mod multifile;
pub mod sqlite;
pub mod xml;

use crate::core::content::NodeContent;
use crate::core::node::{NodeId, Syntax};
use crate::core::sync::SyncPending;
use crate::core::tree::TreeStore;
use crate::core::xml_dom::XmlElement;
use crate::{CherryTreeError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use multifile::MultiFileStorage;
pub use sqlite::SqliteStorage;
pub use xml::XmlStorage;

/// On-disk format family of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Xml,
    Sqlite,
    MultiFile,
}

/// Format and encryption of a document path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocKind {
    pub doc_type: DocType,
    pub encrypted: bool,
}

impl DocKind {
    /// Derives the kind from the extension (`.ctd`, `.ctb`, `.ctz`, `.ctx`) or
    /// from the path being a directory.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::InvalidDocument`] for any other path.
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Ok(Self {
                doc_type: DocType::MultiFile,
                encrypted: false,
            });
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let (doc_type, encrypted) = match ext.as_str() {
            "ctd" => (DocType::Xml, false),
            "ctz" => (DocType::Xml, true),
            "ctb" => (DocType::Sqlite, false),
            "ctx" => (DocType::Sqlite, true),
            "" => (DocType::MultiFile, false),
            _ => {
                return Err(CherryTreeError::InvalidDocument(format!(
                    "unrecognised extension: {}",
                    path.display()
                )))
            }
        };
        Ok(Self { doc_type, encrypted })
    }

    /// Extension of the real container hidden inside an encrypted archive.
    pub fn inner_extension(&self) -> &'static str {
        match self.doc_type {
            DocType::Xml => "ctd",
            DocType::Sqlite => "ctb",
            DocType::MultiFile => "",
        }
    }
}

/// Which part of the tree a full save writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportScope {
    /// Every node plus bookmarks.
    All,
    /// One node without its descendants.
    CurrentNode(NodeId),
    /// One node and all of its descendants.
    NodeAndSubnodes(NodeId),
    /// Chars `[start, end)` of one node's buffer; `end < 0` means the buffer end.
    SelectedText { node_id: NodeId, start: i64, end: i64 },
}

impl ExportScope {
    /// Top-level ids written for this scope.
    pub fn roots(&self, tree: &TreeStore) -> Vec<NodeId> {
        match self {
            Self::All => tree.roots().to_vec(),
            Self::CurrentNode(id) | Self::NodeAndSubnodes(id) => vec![*id],
            Self::SelectedText { node_id, .. } => vec![*node_id],
        }
    }

    pub fn includes_descendants(&self) -> bool {
        matches!(self, Self::All | Self::NodeAndSubnodes(_))
    }

    /// Buffer range written for every node in scope.
    pub fn range(&self) -> (i64, i64) {
        match self {
            Self::SelectedText { start, end, .. } => (*start, *end),
            _ => (0, -1),
        }
    }

    /// Every id written for this scope, in pre-order.
    pub fn node_ids(&self, tree: &TreeStore) -> Vec<NodeId> {
        if !self.includes_descendants() {
            return self.roots(tree).into_iter().filter(|id| tree.contains(*id)).collect();
        }
        self.roots(tree)
            .into_iter()
            .flat_map(|id| tree.subtree_ids(id))
            .collect()
    }
}

/// Cooperative cancellation, polled between node work units.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`CherryTreeError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CherryTreeError::Cancelled);
        }
        Ok(())
    }
}

/// A container format able to load and persist a [`TreeStore`].
///
/// Every write is atomic: a failed save leaves the previous container intact.
pub trait StorageBackend {
    fn doc_type(&self) -> DocType;

    /// Path of the container this backend reads and updates.
    fn path(&self) -> &Path;

    /// Loads structure, properties and bookmarks into `tree`.
    ///
    /// Buffers may stay unloaded until [`StorageBackend::load_node_content`].
    fn populate_tree(&mut self, tree: &mut TreeStore) -> Result<()>;

    /// Materialises the buffer of a node created by [`StorageBackend::populate_tree`].
    fn load_node_content(&mut self, node_id: NodeId, syntax: &Syntax) -> Result<NodeContent>;

    /// Writes a complete new container at `path` for `scope`.
    ///
    /// Every node in scope must have its content loaded.
    fn save_full(
        &mut self,
        path: &Path,
        tree: &TreeStore,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<()>;

    /// Writes only what `pending` marks dirty into this backend's container.
    fn save_incremental(
        &mut self,
        tree: &TreeStore,
        pending: &SyncPending,
        cancel: &CancelFlag,
    ) -> Result<()>;

    /// Compacts the container.
    fn vacuum(&mut self) -> Result<()>;

    /// Releases open handles to the container.
    fn close(&mut self);

    /// Binds the backend to `path`, reopening handles there.
    fn reopen(&mut self, path: &Path) -> Result<()>;

    /// Copies every top-level node of this container, with its subtree,
    /// under `parent` in `tree`. Copies get fresh ids; returns them in pre-order.
    fn import_nodes(&mut self, tree: &mut TreeStore, parent: Option<NodeId>) -> Result<Vec<NodeId>> {
        let mut source = TreeStore::new();
        self.populate_tree(&mut source)?;
        let all = source.iter_depth_first();
        for id in &all {
            let Some(syntax) = source.get_node_from_id(*id).map(|d| d.syntax.clone()) else {
                continue;
            };
            let content = self.load_node_content(*id, &syntax)?;
            source.set_content(*id, content);
        }
        let mut imported = Vec::new();
        for root in source.roots().to_vec() {
            imported.extend(tree.import_subtree(&source, root, parent)?);
        }
        Ok(imported)
    }
}

/// Creates the backend for `doc_type` bound to `path`.
pub fn open_backend(doc_type: DocType, path: &Path) -> Result<Box<dyn StorageBackend>> {
    Ok(match doc_type {
        DocType::Xml => Box::new(XmlStorage::new(path)),
        DocType::Sqlite => Box::new(SqliteStorage::new(path)),
        DocType::MultiFile => Box::new(MultiFileStorage::new(path)),
    })
}

/// Loads every unloaded buffer among `ids` through `backend`.
pub fn ensure_content_loaded(
    backend: &mut dyn StorageBackend,
    tree: &mut TreeStore,
    ids: &[NodeId],
) -> Result<()> {
    for id in ids {
        if tree.is_content_loaded(*id) {
            continue;
        }
        let syntax = match tree.get_node_from_id(*id) {
            Some(data) => data.syntax.clone(),
            None => continue,
        };
        let content = backend.load_node_content(*id, &syntax)?;
        tree.set_content(*id, content);
    }
    Ok(())
}

/// The part of `content` inside `range`, widget offsets rebased to the range start.
pub fn scoped_content(content: &NodeContent, range: (i64, i64)) -> Result<NodeContent> {
    if range == (0, -1) {
        return Ok(content.clone());
    }
    let mut holder = XmlElement::new("node");
    content.write_elements(&mut holder, range.0, range.1, None)?;
    NodeContent::from_element(&holder, None)
}

/// Writes `bytes` to a temporary sibling of `path` and renames it into place.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CherryTreeError::Io(e.error))?;
    Ok(())
}

/// Directory containing `path`, or the current directory for bare names.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

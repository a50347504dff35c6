//! Multi-file container: one directory per node plus a shared blob directory.
//!
//! ```text
//! doc/
//!   subnodes.lst        top-level ids, one per line
//!   bookmarks.lst
//!   last_node_id.lst
//!   blobs/<sha256>
//!   12/node.xml
//!   12/subnodes.lst
//!   12/40/node.xml
//! ```

use super::xml::{node_data_from_element, node_element};
use super::{
    atomic_write, parent_dir, scoped_content, CancelFlag, DocType, ExportScope, StorageBackend,
};
use crate::core::blob_store::BlobStore;
use crate::core::content::NodeContent;
use crate::core::node::{NodeData, NodeId, Syntax};
use crate::core::sync::SyncPending;
use crate::core::tree::{DuplicateIdPolicy, TreeStore};
use crate::core::xml_dom;
use crate::{CherryTreeError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

const NODE_FILE: &str = "node.xml";
const SUBNODES_FILE: &str = "subnodes.lst";
const BOOKMARKS_FILE: &str = "bookmarks.lst";
const LAST_NODE_ID_FILE: &str = "last_node_id.lst";
const BLOBS_DIR: &str = "blobs";

fn read_id_list(path: &Path) -> Result<Vec<NodeId>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(super::xml::parse_id_list(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_id_list(path: &Path, ids: &[NodeId]) -> Result<()> {
    let mut text: String = ids.iter().map(|id| format!("{id}\n")).collect();
    if text.is_empty() {
        text.push('\n');
    }
    atomic_write(path, text.as_bytes())
}

fn node_document(
    data: &NodeData,
    content: &NodeContent,
    blobs: &BlobStore,
) -> Result<String> {
    let mut el = node_element(data);
    content.write_elements(&mut el, 0, -1, Some(blobs))?;
    xml_dom::write_document(&el)
}

/// A node found while walking the directory, before it joins the tree.
struct DiskNode {
    rel: PathBuf,
    /// Index of the parent entry.
    parent: Option<usize>,
    disk_id: NodeId,
    sequence: i64,
}

fn read_node_file(file: &Path, blobs: &BlobStore) -> Result<(NodeData, NodeContent)> {
    let bytes = std::fs::read(file)?;
    let el = xml_dom::parse_with_recovery(&bytes)?;
    let content = NodeContent::from_element(&el, Some(blobs))?;
    Ok((node_data_from_element(&el), content))
}

/// Backend for multi-file document directories.
pub struct MultiFileStorage {
    path: PathBuf,
    delayed: HashMap<NodeId, NodeContent>,
    /// Directory of every node on disk, relative to the document root.
    locations: HashMap<NodeId, PathBuf>,
    renumbered: bool,
}

impl MultiFileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delayed: HashMap::new(),
            locations: HashMap::new(),
            renumbered: false,
        }
    }

    fn blobs(&self) -> BlobStore {
        BlobStore::new(self.path.join(BLOBS_DIR))
    }

    /// Rebuilds the id to directory map from the `subnodes.lst` files.
    fn scan_locations(&mut self) -> Result<()> {
        self.locations.clear();
        let mut stack: Vec<PathBuf> = vec![PathBuf::new()];
        while let Some(rel) = stack.pop() {
            for id in read_id_list(&self.path.join(&rel).join(SUBNODES_FILE))? {
                let child = rel.join(id.to_string());
                if self.locations.insert(id, child.clone()).is_some() {
                    log::warn!("node {id} is listed more than once");
                    continue;
                }
                stack.push(child);
            }
        }
        Ok(())
    }

    /// Writes `node_id` and, for scopes with descendants, its subtree under `dir`.
    fn write_subtree(
        dir: &Path,
        tree: &TreeStore,
        node_id: NodeId,
        scope: &ExportScope,
        blobs: &BlobStore,
        cancel: &CancelFlag,
    ) -> Result<()> {
        cancel.check()?;
        let data = tree
            .get_node_from_id(node_id)
            .ok_or(CherryTreeError::NodeNotFound(node_id))?;
        let content = tree.content(node_id).ok_or_else(|| {
            CherryTreeError::InvalidDocument(format!("content of node {node_id} is not loaded"))
        })?;
        let content = scoped_content(content, scope.range())?;
        let node_dir = dir.join(node_id.to_string());
        std::fs::create_dir_all(&node_dir)?;
        std::fs::write(node_dir.join(NODE_FILE), node_document(data, &content, blobs)?)?;

        let children: &[NodeId] = if scope.includes_descendants() {
            tree.children_of(Some(node_id))
        } else {
            &[]
        };
        write_id_list(&node_dir.join(SUBNODES_FILE), children)?;
        for child in children {
            Self::write_subtree(&node_dir, tree, *child, scope, blobs, cancel)?;
        }
        Ok(())
    }

    fn location_of(&self, parent: Option<NodeId>) -> Result<PathBuf> {
        match parent {
            None => Ok(PathBuf::new()),
            Some(pid) => self.locations.get(&pid).cloned().ok_or_else(|| {
                CherryTreeError::InvalidDocument(format!("node {pid} has no directory"))
            }),
        }
    }

    /// Parent id encoded in a relative node directory, `None` for top level.
    fn parent_from_location(rel: &Path) -> Option<NodeId> {
        rel.parent()
            .and_then(|p| p.file_name())
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse().ok())
    }

    /// Moves a node directory and rewrites the locations below it.
    fn relocate(&mut self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(self.path.join(from), self.path.join(to))?;
        for location in self.locations.values_mut() {
            if let Ok(rest) = location.strip_prefix(from) {
                *location = to.join(rest);
            }
        }
        Ok(())
    }

    fn write_node_file(
        &self,
        rel: &Path,
        tree: &TreeStore,
        node_id: NodeId,
        blobs: &BlobStore,
    ) -> Result<()> {
        let data = tree
            .get_node_from_id(node_id)
            .ok_or(CherryTreeError::NodeNotFound(node_id))?;
        let file = self.path.join(rel).join(NODE_FILE);
        let text = match tree.content(node_id) {
            Some(content) => node_document(data, content, blobs)?,
            None => {
                let mut existing = xml_dom::parse_with_recovery(&std::fs::read(&file)?)?;
                existing.attrs = node_element(data).attrs;
                xml_dom::write_document(&existing)?
            }
        };
        atomic_write(&file, text.as_bytes())
    }

    fn write_subnodes(&self, tree: &TreeStore, parent: Option<NodeId>) -> Result<()> {
        let rel = self.location_of(parent)?;
        write_id_list(
            &self.path.join(rel).join(SUBNODES_FILE),
            tree.children_of(parent),
        )
    }

    /// Every blob hash referenced from a `node.xml` below the document root.
    fn referenced_blobs(&self) -> Result<HashSet<String>> {
        let mut referenced = HashSet::new();
        for rel in self.locations.values() {
            let file = self.path.join(rel).join(NODE_FILE);
            let root = match std::fs::read(&file) {
                Ok(bytes) => xml_dom::parse_with_recovery(&bytes)?,
                Err(e) => {
                    log::warn!("cannot read {}: {e}", file.display());
                    continue;
                }
            };
            for el in root.elements() {
                if let Some(hash) = el.attr("sha256sum") {
                    referenced.insert(hash.to_string());
                }
            }
        }
        Ok(referenced)
    }
}

impl StorageBackend for MultiFileStorage {
    fn doc_type(&self) -> DocType {
        DocType::MultiFile
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn populate_tree(&mut self, tree: &mut TreeStore) -> Result<()> {
        if !self.path.is_dir() {
            return Err(CherryTreeError::InvalidDocument(format!(
                "{} is not a directory",
                self.path.display()
            )));
        }
        let last_node_id = std::fs::read_to_string(self.path.join(LAST_NODE_ID_FILE))
            .ok()
            .and_then(|t| t.trim().parse().ok())
            .unwrap_or(0);
        tree.note_issued_id(last_node_id);

        let blobs = self.blobs();
        self.delayed.clear();
        self.locations.clear();
        self.renumbered = false;

        // Walk the whole directory first so repaired duplicates are numbered
        // above every id present on disk.
        let mut entries: Vec<DiskNode> = Vec::new();
        let mut stack: Vec<(PathBuf, Option<usize>)> = vec![(PathBuf::new(), None)];
        while let Some((rel, parent)) = stack.pop() {
            let ids = read_id_list(&self.path.join(&rel).join(SUBNODES_FILE))?;
            let mut pushed = Vec::new();
            for (index, disk_id) in ids.into_iter().enumerate() {
                let node_rel = rel.join(disk_id.to_string());
                let file = self.path.join(&node_rel).join(NODE_FILE);
                if !file.is_file() {
                    log::warn!("skipping node {disk_id}: {} is missing", file.display());
                    continue;
                }
                pushed.push((node_rel.clone(), Some(entries.len())));
                entries.push(DiskNode {
                    rel: node_rel,
                    parent,
                    disk_id,
                    sequence: index as i64 + 1,
                });
            }
            stack.extend(pushed.into_iter().rev());
        }
        if let Some(highest) = entries.iter().map(|e| e.disk_id).max() {
            tree.note_issued_id(highest);
        }

        let mut tree_ids: Vec<NodeId> = Vec::with_capacity(entries.len());
        for entry in entries {
            let file = self.path.join(&entry.rel).join(NODE_FILE);
            let (mut data, content) = match read_node_file(&file, &blobs) {
                Ok(node) => node,
                Err(e) => {
                    log::warn!(
                        "node {} is unreadable ({e}), loading it empty",
                        entry.disk_id
                    );
                    (
                        NodeData::new(entry.disk_id.to_string(), Syntax::RichText),
                        NodeContent::new(),
                    )
                }
            };
            data.node_id = entry.disk_id;
            data.sequence = entry.sequence;
            let parent = entry.parent.and_then(|index| tree_ids.get(index).copied());
            let node_id = tree.append_node(data, parent, DuplicateIdPolicy::Reassign)?;
            if node_id != entry.disk_id {
                self.renumbered = true;
            }
            self.delayed.insert(node_id, content);
            self.locations.insert(node_id, entry.rel);
            tree_ids.push(node_id);
        }

        let bookmarks = read_id_list(&self.path.join(BOOKMARKS_FILE))?;
        tree.set_bookmarks(bookmarks);
        log::info!("loaded {} nodes from {}", tree.len(), self.path.display());
        Ok(())
    }

    fn load_node_content(&mut self, node_id: NodeId, _syntax: &Syntax) -> Result<NodeContent> {
        self.delayed
            .remove(&node_id)
            .ok_or(CherryTreeError::NodeNotFound(node_id))
    }

    fn save_full(
        &mut self,
        path: &Path,
        tree: &TreeStore,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let parent = parent_dir(path);
        std::fs::create_dir_all(&parent)?;
        let staging = tempfile::Builder::new().prefix(".ct_").tempdir_in(&parent)?;
        let blobs = BlobStore::new(staging.path().join(BLOBS_DIR));
        std::fs::create_dir_all(blobs.dir())?;

        let tops = scope.roots(tree);
        write_id_list(&staging.path().join(SUBNODES_FILE), &tops)?;
        for top in &tops {
            Self::write_subtree(staging.path(), tree, *top, scope, &blobs, cancel)?;
        }
        let bookmarks: &[NodeId] = if matches!(scope, ExportScope::All) {
            tree.bookmarks()
        } else {
            &[]
        };
        write_id_list(&staging.path().join(BOOKMARKS_FILE), bookmarks)?;
        std::fs::write(
            staging.path().join(LAST_NODE_ID_FILE),
            format!("{}\n", tree.max_issued_id()),
        )?;
        cancel.check()?;

        let previous = if path.exists() {
            let aside = tempfile::Builder::new().prefix(".ct_old_").tempdir_in(&parent)?;
            let aside_path = aside.path().join("doc");
            std::fs::rename(path, &aside_path)?;
            Some((aside, aside_path))
        } else {
            None
        };
        let staged = staging.into_path();
        if let Err(e) = std::fs::rename(&staged, path) {
            if let Some((_, aside_path)) = &previous {
                std::fs::rename(aside_path, path)?;
            }
            if let Err(cleanup) = std::fs::remove_dir_all(&staged) {
                log::warn!("could not remove {}: {cleanup}", staged.display());
            }
            return Err(e.into());
        }
        drop(previous);

        if path == self.path {
            self.scan_locations()?;
            self.renumbered = false;
        }
        log::debug!("wrote multi-file document {}", path.display());
        Ok(())
    }

    fn save_incremental(
        &mut self,
        tree: &TreeStore,
        pending: &SyncPending,
        cancel: &CancelFlag,
    ) -> Result<()> {
        if self.renumbered {
            return Err(CherryTreeError::UnsupportedOperation(
                "renumbered nodes require a full save".to_string(),
            ));
        }
        let blobs = self.blobs();
        std::fs::create_dir_all(blobs.dir())?;
        let mut dirty_parents: BTreeSet<Option<NodeId>> = BTreeSet::new();

        for node_id in tree.iter_depth_first() {
            let Some(state) = pending.write_state(node_id) else {
                continue;
            };
            cancel.check()?;
            let parent = tree.parent_of(node_id);
            let desired = self.location_of(parent)?.join(node_id.to_string());
            match self.locations.get(&node_id).cloned() {
                Some(current) if current != desired => {
                    dirty_parents.insert(Self::parent_from_location(&current));
                    dirty_parents.insert(parent);
                    self.relocate(&current, &desired)?;
                }
                Some(_) => {
                    if state.hier {
                        dirty_parents.insert(parent);
                    }
                }
                None => {
                    std::fs::create_dir_all(self.path.join(&desired))?;
                    write_id_list(
                        &self.path.join(&desired).join(SUBNODES_FILE),
                        tree.children_of(Some(node_id)),
                    )?;
                    self.locations.insert(node_id, desired.clone());
                    dirty_parents.insert(parent);
                }
            }
            if state.prop || state.buff {
                self.write_node_file(&desired, tree, node_id, &blobs)?;
            }
        }

        for node_id in pending.nodes_to_rm() {
            let Some(rel) = self.locations.remove(node_id) else {
                continue;
            };
            dirty_parents.insert(Self::parent_from_location(&rel));
            let dir = self.path.join(&rel);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        for parent in dirty_parents {
            if let Some(pid) = parent {
                if !tree.contains(pid) || !self.locations.contains_key(&pid) {
                    continue;
                }
            }
            self.write_subnodes(tree, parent)?;
        }
        if pending.bookmarks_to_write() {
            write_id_list(&self.path.join(BOOKMARKS_FILE), tree.bookmarks())?;
        }
        atomic_write(
            &self.path.join(LAST_NODE_ID_FILE),
            format!("{}\n", tree.max_issued_id()).as_bytes(),
        )?;
        Ok(())
    }

    fn vacuum(&mut self) -> Result<()> {
        if self.locations.is_empty() {
            self.scan_locations()?;
        }
        let referenced = self.referenced_blobs()?;
        let removed = self.blobs().collect_garbage(&referenced)?;
        log::info!("removed {removed} unreferenced blobs from {}", self.path.display());
        Ok(())
    }

    fn close(&mut self) {
        self.delayed.clear();
    }

    fn reopen(&mut self, path: &Path) -> Result<()> {
        self.path = path.to_path_buf();
        self.delayed.clear();
        self.renumbered = false;
        self.scan_locations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::widget::{AnchoredWidget, ImageEmbFile, ImagePng, Justification, WidgetKind};
    use tempfile::TempDir;

    fn png(bytes: &[u8]) -> AnchoredWidget {
        AnchoredWidget::new(
            0,
            Justification::Left,
            WidgetKind::ImagePng(ImagePng {
                raw_blob: bytes.to_vec(),
                link: String::new(),
            }),
        )
    }

    fn sample_tree() -> TreeStore {
        let mut tree = TreeStore::new();
        let a = tree
            .append_node(NodeData::new("a", Syntax::RichText), None, DuplicateIdPolicy::Strict)
            .unwrap();
        let b = tree
            .append_node(NodeData::new("b", Syntax::RichText), Some(a), DuplicateIdPolicy::Strict)
            .unwrap();
        let c = tree
            .append_node(NodeData::new("c", Syntax::PlainText), None, DuplicateIdPolicy::Strict)
            .unwrap();
        let mut shared = NodeContent::from_plain_text("pic");
        shared.insert_widget(png(b"same bytes"));
        tree.set_content(a, shared.clone());
        let mut with_file = shared;
        with_file.insert_widget(AnchoredWidget::new(
            3,
            Justification::Right,
            WidgetKind::ImageEmbFile(ImageEmbFile::new("a.bin", vec![9; 32], 5)),
        ));
        tree.set_content(b, with_file);
        tree.set_content(c, NodeContent::from_plain_text("plain"));
        tree.bookmarks_add(b);
        tree
    }

    fn load(path: &Path) -> (MultiFileStorage, TreeStore) {
        let mut storage = MultiFileStorage::new(path);
        let mut tree = TreeStore::new();
        storage.populate_tree(&mut tree).unwrap();
        for id in tree.iter_depth_first() {
            let syntax = tree.get_node_from_id(id).unwrap().syntax.clone();
            let content = storage.load_node_content(id, &syntax).unwrap();
            tree.set_content(id, content);
        }
        (storage, tree)
    }

    fn save(path: &Path, tree: &TreeStore) -> MultiFileStorage {
        let mut storage = MultiFileStorage::new(path);
        storage
            .save_full(path, tree, &ExportScope::All, &CancelFlag::new())
            .unwrap();
        storage.reopen(path).unwrap();
        storage
    }

    #[test]
    fn test_round_trip_and_blob_dedup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let tree = sample_tree();
        save(&path, &tree);

        assert!(path.join("1").join("2").join(NODE_FILE).exists());
        assert_eq!(BlobStore::new(path.join(BLOBS_DIR)).list().unwrap().len(), 2);

        let (_, loaded) = load(&path);
        assert_eq!(loaded.iter_depth_first(), tree.iter_depth_first());
        for id in tree.iter_depth_first() {
            assert_eq!(loaded.get_node_from_id(id), tree.get_node_from_id(id));
            assert_eq!(loaded.content(id), tree.content(id));
        }
        assert_eq!(loaded.bookmarks(), &[2]);
    }

    #[test]
    fn test_missing_blob_skips_only_that_widget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let tree = sample_tree();
        save(&path, &tree);
        let blobs = BlobStore::new(path.join(BLOBS_DIR));
        let lost = crate::core::blob_store::sha256_hex(&[9; 32]);
        std::fs::remove_file(blobs.dir().join(&lost)).unwrap();

        let (_, loaded) = load(&path);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.content(2).unwrap().widgets().len(), 1);
        assert_eq!(loaded.content(2).unwrap().text(), "pic");
    }

    #[test]
    fn test_incremental_move_edit_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let mut tree = sample_tree();
        let mut storage = save(&path, &tree);

        let mut pending = SyncPending::new();
        for id in tree.move_node(2, Some(3), 0).unwrap() {
            pending.pending_edit_db_node_hier(id);
        }
        tree.get_node_mut(3).unwrap().name = "c2".to_string();
        pending.pending_edit_db_node_prop(3);
        let d = tree
            .append_node(NodeData::new("d", Syntax::RichText), Some(2), DuplicateIdPolicy::Strict)
            .unwrap();
        tree.set_content(d, NodeContent::from_plain_text("deep"));
        pending.pending_new_db_node(d);
        let removed = tree.remove_node_and_descendants(1).unwrap();
        pending.pending_rm_db_nodes(&removed.deleted_ids);

        storage
            .save_incremental(&tree, &pending, &CancelFlag::new())
            .unwrap();

        assert!(!path.join("1").exists());
        assert!(path.join("3").join("2").join(d.to_string()).join(NODE_FILE).exists());
        let (_, loaded) = load(&path);
        assert_eq!(loaded.roots(), &[3]);
        assert_eq!(loaded.children_of(Some(3)), &[2]);
        assert_eq!(loaded.children_of(Some(2)), &[d]);
        assert_eq!(loaded.get_node_from_id(3).unwrap().name, "c2");
        assert_eq!(loaded.content(d).unwrap().text(), "deep");
        assert_eq!(loaded.content(2), tree.content(2));
    }

    #[test]
    fn test_vacuum_collects_orphaned_blobs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let mut tree = sample_tree();
        let mut storage = save(&path, &tree);

        tree.set_content(2, NodeContent::from_plain_text("no images"));
        let mut pending = SyncPending::new();
        pending.pending_edit_db_node_buff(2);
        storage
            .save_incremental(&tree, &pending, &CancelFlag::new())
            .unwrap();
        let blobs = BlobStore::new(path.join(BLOBS_DIR));
        assert_eq!(blobs.list().unwrap().len(), 2);

        storage.vacuum().unwrap();
        assert_eq!(blobs.list().unwrap(), vec![crate::core::blob_store::sha256_hex(b"same bytes")]);
    }

    #[test]
    fn test_unreadable_node_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let tree = sample_tree();
        save(&path, &tree);
        std::fs::write(path.join("1").join(NODE_FILE), "<node name=\"a\"><rich_text>cut off").unwrap();

        let (_, loaded) = load(&path);
        assert_eq!(loaded.iter_depth_first(), vec![1, 2, 3]);
        assert_eq!(loaded.get_node_from_id(1).unwrap().name, "1");
        assert_eq!(loaded.content(1).unwrap().text(), "");
        assert_eq!(loaded.content(2), tree.content(2));
        assert_eq!(loaded.content(3).unwrap().text(), "plain");
    }

    #[test]
    fn test_duplicate_repair_keeps_later_ids_and_bookmarks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let node = |rel: &str, name: &str, id: i64| {
            let node_dir = path.join(rel);
            std::fs::create_dir_all(&node_dir).unwrap();
            std::fs::write(
                node_dir.join(NODE_FILE),
                format!(r#"<node name="{name}" unique_id="{id}" prog_lang="custom-colors"/>"#),
            )
            .unwrap();
        };
        node("1", "a", 1);
        node("3", "x", 3);
        node("3/1", "b", 1);
        node("4", "c", 4);
        std::fs::write(path.join(SUBNODES_FILE), "1\n3\n4\n").unwrap();
        std::fs::write(path.join("3").join(SUBNODES_FILE), "1\n").unwrap();
        std::fs::write(path.join(BOOKMARKS_FILE), "4\n").unwrap();

        let (mut storage, tree) = load(&path);
        assert_eq!(tree.get_node_from_name("a"), Some(1));
        assert_eq!(tree.get_node_from_name("c"), Some(4));
        let b = tree.get_node_from_name("b").unwrap();
        assert_eq!(b, 5);
        assert_eq!(tree.parent_of(b), Some(3));
        assert_eq!(tree.bookmarks(), &[4]);
        assert_eq!(tree.get_node_from_id(4).unwrap().name, "c");

        let err = storage
            .save_incremental(&tree, &SyncPending::new(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, CherryTreeError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_full_save_replaces_existing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc");
        let mut tree = sample_tree();
        save(&path, &tree);
        tree.remove_node_and_descendants(3).unwrap();
        save(&path, &tree);
        assert!(!path.join("3").exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}

//! High-level operations over one open CherryTree document.

use crate::core::archive::Archiver;
use crate::core::config::EngineConfig;
use crate::core::content::NodeContent;
use crate::core::delete::DeleteResult;
use crate::core::node::{NodeData, NodeId, Syntax};
use crate::core::queue::DiagnosticsQueue;
use crate::core::state_machine::StateMachine;
use crate::core::storage::{CancelFlag, ExportScope};
use crate::core::storage_control::StorageControl;
use crate::core::tree::{DuplicateIdPolicy, TreeStore};
use crate::{CherryTreeError, Result};
use std::path::Path;

/// Capacity of the status message queue.
const STATUS_QUEUE_SLOTS: usize = 64;

/// Where a new node goes relative to a reference node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddPosition {
    /// Last child of the reference node, or last root without one.
    AsChild,
    /// Right after the reference node among its siblings.
    AsSibling,
}

/// An open document: its tree, storage and undo history.
///
/// Every mutation goes through here so that the sync-pending set and the
/// undo history stay consistent with the tree.
pub struct Document {
    tree: TreeStore,
    storage: StorageControl,
    states: StateMachine,
    status: DiagnosticsQueue<String>,
}

impl Document {
    /// An empty document that has never been saved.
    pub fn create(archiver: Box<dyn Archiver>, config: EngineConfig) -> Self {
        let states = StateMachine::new(&config);
        Self {
            tree: TreeStore::new(),
            storage: StorageControl::new_document(archiver, config),
            states,
            status: DiagnosticsQueue::new(STATUS_QUEUE_SLOTS),
        }
    }

    /// Opens the document at `path`.
    ///
    /// # Errors
    ///
    /// See [`StorageControl::load_from`].
    pub fn open<P: AsRef<Path>>(
        path: P,
        password: Option<&str>,
        archiver: Box<dyn Archiver>,
        config: EngineConfig,
    ) -> Result<Self> {
        let mut tree = TreeStore::new();
        let states = StateMachine::new(&config);
        let storage = StorageControl::load_from(path.as_ref(), password, archiver, config, &mut tree)?;
        Ok(Self {
            tree,
            storage,
            states,
            status: DiagnosticsQueue::new(STATUS_QUEUE_SLOTS),
        })
    }

    pub fn tree(&self) -> &TreeStore {
        &self.tree
    }

    pub fn storage(&self) -> &StorageControl {
        &self.storage
    }

    pub fn states(&self) -> &StateMachine {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut StateMachine {
        &mut self.states
    }

    /// Status messages for the user, newest last.
    pub fn status(&self) -> &DiagnosticsQueue<String> {
        &self.status
    }

    pub fn is_dirty(&self) -> bool {
        self.storage.is_dirty()
    }

    /// Creates an empty node next to or under `reference`.
    pub fn add_node(
        &mut self,
        name: &str,
        syntax: Syntax,
        reference: Option<NodeId>,
        position: AddPosition,
    ) -> Result<NodeId> {
        let parent = match position {
            AddPosition::AsChild => reference,
            AddPosition::AsSibling => reference.and_then(|r| self.tree.parent_of(r)),
        };
        let id = self
            .tree
            .append_node(NodeData::new(name, syntax), parent, DuplicateIdPolicy::Strict)?;
        self.tree.set_content(id, NodeContent::new());
        self.storage.pending_new_db_node(id);

        if let (AddPosition::AsSibling, Some(sibling)) = (position, reference) {
            let at = self
                .tree
                .children_of(parent)
                .iter()
                .position(|c| *c == sibling)
                .map_or(0, |i| i + 1);
            for changed in self.tree.move_node(id, parent, at)? {
                if changed != id {
                    self.storage.pending_edit_db_node_hier(changed);
                }
            }
        }
        log::debug!("added node {id} under {parent:?}");
        Ok(id)
    }

    /// Makes `node_id` the current node: loads its buffer and records the visit.
    pub fn select_node(&mut self, node_id: NodeId) -> Result<&NodeContent> {
        if !self.tree.contains(node_id) {
            return Err(CherryTreeError::NodeNotFound(node_id));
        }
        self.storage.load_node_content(&mut self.tree, node_id)?;
        self.states.node_selected_changed(&self.tree, node_id);
        self.tree
            .content(node_id)
            .ok_or(CherryTreeError::NodeNotFound(node_id))
    }

    /// Reports text about to be inserted or removed, for undo coalescing.
    pub fn text_variation(&mut self, node_id: NodeId, varied_text: &str) {
        self.states.text_variation(&self.tree, node_id, varied_text);
    }

    /// Replaces the buffer of `node_id` and marks it for writing.
    pub fn set_node_content(&mut self, node_id: NodeId, content: NodeContent) -> Result<()> {
        let data = self
            .tree
            .get_node_mut(node_id)
            .ok_or(CherryTreeError::NodeNotFound(node_id))?;
        data.ts_lastsave = chrono::Utc::now().timestamp();
        self.tree.set_content(node_id, content);
        self.storage.pending_edit_db_node_buff(node_id);
        Ok(())
    }

    /// Applies `edit` to the properties of `node_id` and marks them for writing.
    pub fn update_node<F: FnOnce(&mut NodeData)>(&mut self, node_id: NodeId, edit: F) -> Result<()> {
        let data = self
            .tree
            .get_node_mut(node_id)
            .ok_or(CherryTreeError::NodeNotFound(node_id))?;
        let id = data.node_id;
        edit(data);
        // the id is the arena key
        data.node_id = id;
        self.storage.pending_edit_db_node_prop(node_id);
        Ok(())
    }

    /// Re-parents `node_id`; every node whose parent or sequence changed is marked.
    pub fn move_node(
        &mut self,
        node_id: NodeId,
        new_parent: Option<NodeId>,
        position: usize,
    ) -> Result<()> {
        for changed in self.tree.move_node(node_id, new_parent, position)? {
            self.storage.pending_edit_db_node_hier(changed);
        }
        Ok(())
    }

    /// Deletes `node_id` with its descendants, their undo history and bookmarks.
    pub fn delete_node(&mut self, node_id: NodeId) -> Result<DeleteResult> {
        let result = self.tree.remove_node_and_descendants(node_id)?;
        self.storage.pending_rm_db_nodes(&result.deleted_ids);
        for id in &result.deleted_ids {
            self.states.delete_states(*id);
        }
        if result.bookmarks_changed {
            self.storage.pending_edit_db_bookmarks();
        }
        log::info!("deleted {} nodes under {node_id}", result.deleted_count);
        Ok(result)
    }

    pub fn bookmarks_add(&mut self, node_id: NodeId) -> bool {
        let added = self.tree.bookmarks_add(node_id);
        if added {
            self.storage.pending_edit_db_bookmarks();
        }
        added
    }

    pub fn bookmarks_remove(&mut self, node_id: NodeId) -> bool {
        let removed = self.tree.bookmarks_remove(node_id);
        if removed {
            self.storage.pending_edit_db_bookmarks();
        }
        removed
    }

    /// Restores the previous undo entry of `node_id`. Returns false when there is none.
    pub fn undo(&mut self, node_id: NodeId) -> Result<bool> {
        if !self.states.can_undo(node_id) {
            return Ok(false);
        }
        let content = match self.states.requested_state_previous(&self.tree, node_id) {
            Some(entry) => entry.to_content()?,
            None => return Ok(false),
        };
        self.set_node_content(node_id, content)?;
        Ok(true)
    }

    /// Restores the next undo entry of `node_id`. Returns false when there is none.
    pub fn redo(&mut self, node_id: NodeId) -> Result<bool> {
        if !self.states.can_redo(node_id) {
            return Ok(false);
        }
        let content = match self.states.requested_state_subsequent(node_id) {
            Some(entry) => entry.to_content()?,
            None => return Ok(false),
        };
        self.set_node_content(node_id, content)?;
        Ok(true)
    }

    /// Saves to the document's own path.
    pub fn save(&mut self, vacuum: bool, cancel: &CancelFlag) -> Result<()> {
        let result = self.storage.save(&mut self.tree, vacuum, cancel);
        self.report(&result, "Document saved");
        result
    }

    /// Saves `scope` to `path`; with [`ExportScope::All`] the document moves there.
    pub fn save_as<P: AsRef<Path>>(
        &mut self,
        path: P,
        password: Option<&str>,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let result = self
            .storage
            .save_as(path.as_ref(), password, &mut self.tree, scope, cancel);
        self.report(&result, "Document saved");
        result
    }

    /// Imports another document's nodes under `parent`.
    pub fn import_from<P: AsRef<Path>>(
        &mut self,
        path: P,
        password: Option<&str>,
        parent: Option<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let result = self
            .storage
            .add_nodes_from_storage(path.as_ref(), password, &mut self.tree, parent);
        self.report(&result, "Nodes imported");
        result
    }

    fn report<T>(&self, result: &Result<T>, success: &str) {
        let message = match result {
            Ok(_) => success.to_string(),
            Err(e) => e.user_message(),
        };
        // overflow is logged by the queue
        let _ = self.status.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::ZipAesArchiver;
    use tempfile::TempDir;

    fn new_doc() -> Document {
        let config = EngineConfig {
            backup_copy: false,
            ..EngineConfig::default()
        };
        Document::create(Box::new(ZipAesArchiver), config)
    }

    #[test]
    fn test_add_node_as_sibling() {
        let mut doc = new_doc();
        let a = doc.add_node("a", Syntax::RichText, None, AddPosition::AsChild).unwrap();
        let c = doc.add_node("c", Syntax::RichText, None, AddPosition::AsChild).unwrap();
        let b = doc.add_node("b", Syntax::RichText, Some(a), AddPosition::AsSibling).unwrap();
        assert_eq!(doc.tree().roots(), &[a, b, c]);
        assert_eq!(doc.tree().get_node_from_id(c).unwrap().sequence, 3);
        assert!(doc.storage().pending().write_state(c).unwrap().hier);
    }

    #[test]
    fn test_delete_marks_removal_and_bookmarks() {
        let mut doc = new_doc();
        let a = doc.add_node("a", Syntax::RichText, None, AddPosition::AsChild).unwrap();
        let b = doc.add_node("b", Syntax::PlainText, Some(a), AddPosition::AsChild).unwrap();
        assert!(doc.bookmarks_add(b));
        doc.select_node(a).unwrap();

        let result = doc.delete_node(a).unwrap();
        assert_eq!(result.deleted_ids, vec![b, a]);
        let pending = doc.storage().pending();
        assert!(pending.nodes_to_rm().contains(&a) && pending.nodes_to_rm().contains(&b));
        assert!(pending.write_state(a).is_none());
        assert!(pending.bookmarks_to_write());
        assert_eq!(doc.states().history_len(a), 0);
        assert!(doc.tree().bookmarks().is_empty());
    }

    #[test]
    fn test_undo_and_redo_update_buffer() {
        let mut doc = new_doc();
        let a = doc.add_node("a", Syntax::RichText, None, AddPosition::AsChild).unwrap();
        doc.select_node(a).unwrap();
        doc.text_variation(a, "\n");
        doc.set_node_content(a, NodeContent::from_plain_text("line\n")).unwrap();
        doc.text_variation(a, "\n");

        assert!(doc.undo(a).unwrap());
        assert_eq!(doc.tree().content(a).unwrap().text(), "");
        assert!(doc.redo(a).unwrap());
        assert_eq!(doc.tree().content(a).unwrap().text(), "line\n");
        assert!(!doc.redo(a).unwrap());
    }

    #[test]
    fn test_save_reports_status() {
        let dir = TempDir::new().unwrap();
        let mut doc = new_doc();
        doc.add_node("a", Syntax::RichText, None, AddPosition::AsChild).unwrap();
        assert!(doc.save(false, &CancelFlag::new()).is_err());
        assert_eq!(doc.status().try_pop().unwrap(), "Could not open document file");

        doc.save_as(dir.path().join("doc.ctb"), None, &ExportScope::All, &CancelFlag::new())
            .unwrap();
        assert_eq!(doc.status().try_pop().unwrap(), "Document saved");
        assert!(!doc.is_dirty());
    }
}

//! Tracking of what changed since the last successful save.

use crate::core::node::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// Which parts of a node must be written on the next incremental save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeWriteState {
    /// Properties (name, syntax, tags, flags) changed.
    pub prop: bool,
    /// Buffer text or widgets changed.
    pub buff: bool,
    /// Parent or sequence changed.
    pub hier: bool,
    /// The node already exists in the container, so old rows must be replaced.
    pub upd: bool,
}

/// The dirty set of one open document.
///
/// An id is never in both the write map and the removal set.
#[derive(Debug, Clone, Default)]
pub struct SyncPending {
    bookmarks_to_write: bool,
    nodes_to_write: BTreeMap<NodeId, NodeWriteState>,
    nodes_to_rm: BTreeSet<NodeId>,
}

impl SyncPending {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(&mut self, node_id: NodeId, mark: impl FnOnce(&mut NodeWriteState)) {
        if self.nodes_to_rm.contains(&node_id) {
            log::debug!("ignoring edit of removed node {node_id}");
            return;
        }
        let state = self.nodes_to_write.entry(node_id).or_insert(NodeWriteState {
            upd: true,
            ..NodeWriteState::default()
        });
        mark(state);
    }

    pub fn pending_edit_db_node_prop(&mut self, node_id: NodeId) {
        self.edit(node_id, |s| s.prop = true);
    }

    pub fn pending_edit_db_node_buff(&mut self, node_id: NodeId) {
        self.edit(node_id, |s| s.buff = true);
    }

    pub fn pending_edit_db_node_hier(&mut self, node_id: NodeId) {
        self.edit(node_id, |s| s.hier = true);
    }

    /// Marks a node that does not exist in the container yet.
    pub fn pending_new_db_node(&mut self, node_id: NodeId) {
        self.nodes_to_rm.remove(&node_id);
        self.nodes_to_write.insert(
            node_id,
            NodeWriteState {
                prop: true,
                buff: true,
                hier: true,
                upd: false,
            },
        );
    }

    /// Marks nodes for removal, dropping any pending writes for them.
    pub fn pending_rm_db_nodes(&mut self, node_ids: &[NodeId]) {
        for node_id in node_ids {
            self.nodes_to_write.remove(node_id);
            self.nodes_to_rm.insert(*node_id);
        }
    }

    pub fn pending_edit_db_bookmarks(&mut self) {
        self.bookmarks_to_write = true;
    }

    pub fn bookmarks_to_write(&self) -> bool {
        self.bookmarks_to_write
    }

    pub fn nodes_to_write(&self) -> &BTreeMap<NodeId, NodeWriteState> {
        &self.nodes_to_write
    }

    pub fn nodes_to_rm(&self) -> &BTreeSet<NodeId> {
        &self.nodes_to_rm
    }

    pub fn write_state(&self, node_id: NodeId) -> Option<NodeWriteState> {
        self.nodes_to_write.get(&node_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        !self.bookmarks_to_write && self.nodes_to_write.is_empty() && self.nodes_to_rm.is_empty()
    }

    pub fn clear(&mut self) {
        self.bookmarks_to_write = false;
        self.nodes_to_write.clear();
        self.nodes_to_rm.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exclusive(pending: &SyncPending) -> bool {
        pending
            .nodes_to_write()
            .keys()
            .all(|id| !pending.nodes_to_rm().contains(id))
    }

    #[test]
    fn test_edit_creates_update_entry() {
        let mut pending = SyncPending::new();
        pending.pending_edit_db_node_prop(4);
        pending.pending_edit_db_node_buff(4);
        assert_eq!(
            pending.write_state(4),
            Some(NodeWriteState {
                prop: true,
                buff: true,
                hier: false,
                upd: true
            })
        );
    }

    #[test]
    fn test_new_node_writes_everything_without_update() {
        let mut pending = SyncPending::new();
        pending.pending_new_db_node(9);
        pending.pending_edit_db_node_buff(9);
        let state = pending.write_state(9).unwrap();
        assert!(state.prop && state.buff && state.hier);
        assert!(!state.upd);
    }

    #[test]
    fn test_remove_drops_writes() {
        let mut pending = SyncPending::new();
        pending.pending_new_db_node(1);
        pending.pending_edit_db_node_hier(2);
        pending.pending_rm_db_nodes(&[1, 2, 3]);
        assert!(pending.nodes_to_write().is_empty());
        assert_eq!(pending.nodes_to_rm().len(), 3);
        pending.pending_edit_db_node_prop(2);
        assert!(exclusive(&pending));
    }

    #[test]
    fn test_mutual_exclusion_over_mixed_sequence() {
        let mut pending = SyncPending::new();
        for step in 0..60i64 {
            let id = step % 7;
            match step % 5 {
                0 => pending.pending_edit_db_node_prop(id),
                1 => pending.pending_new_db_node(id),
                2 => pending.pending_rm_db_nodes(&[id, id + 1]),
                3 => pending.pending_edit_db_node_buff(id),
                _ => pending.pending_edit_db_node_hier(id),
            }
            assert!(exclusive(&pending), "violated after step {step}");
        }
    }

    #[test]
    fn test_clear() {
        let mut pending = SyncPending::new();
        assert!(pending.is_empty());
        pending.pending_edit_db_bookmarks();
        assert!(!pending.is_empty());
        pending.clear();
        assert!(pending.is_empty());
    }
}

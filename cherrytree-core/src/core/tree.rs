//! The in-memory node tree.
//!
//! Nodes live in a single arena keyed by id. Parent and child links are plain
//! ids, never owning references.

use crate::core::content::NodeContent;
use crate::core::delete::DeleteResult;
use crate::core::node::{NodeData, NodeId, Syntax};
use crate::core::widget::WidgetKind;
use crate::{CherryTreeError, Result};
use std::collections::{BTreeSet, HashMap};

/// What [`TreeStore::append_node`] does when the incoming id is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateIdPolicy {
    /// Fail with [`CherryTreeError::DuplicateId`].
    Strict,
    /// Keep the existing node and give the newcomer a fresh id.
    Reassign,
}

/// Node and widget counts of a tree.
///
/// Widgets are counted only in nodes whose content is loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub nodes_rich_text: usize,
    pub nodes_plain_text: usize,
    pub nodes_code: usize,
    pub images: usize,
    pub latex: usize,
    pub embedded_files: usize,
    pub anchors: usize,
    pub tables: usize,
    pub codeboxes: usize,
}

#[derive(Debug, Clone)]
struct TreeNode {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    content: Option<NodeContent>,
}

/// Arena of nodes with ordered roots and bookmarks.
#[derive(Debug, Clone, Default)]
pub struct TreeStore {
    nodes: HashMap<NodeId, TreeNode>,
    roots: Vec<NodeId>,
    bookmarks: Vec<NodeId>,
    max_issued_id: NodeId,
}

impl TreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns an id never issued before in this document.
    ///
    /// The result exceeds both the highest live id and every id issued
    /// earlier, including ids of deleted nodes.
    pub fn node_id_get(&mut self) -> NodeId {
        let live_max = self.nodes.keys().copied().max().unwrap_or(0);
        let id = self.max_issued_id.max(live_max) + 1;
        self.max_issued_id = id;
        id
    }

    /// Highest id ever issued; backends persist it so ids survive reopening.
    pub fn max_issued_id(&self) -> NodeId {
        let live_max = self.nodes.keys().copied().max().unwrap_or(0);
        self.max_issued_id.max(live_max)
    }

    /// Raises the issued-id watermark, typically from a persisted value.
    pub fn note_issued_id(&mut self, id: NodeId) {
        self.max_issued_id = self.max_issued_id.max(id);
    }

    /// Appends a node as the last child of `parent` (or as the last root).
    ///
    /// A non-positive `node_id` is replaced by a fresh id. A non-positive
    /// `sequence` becomes one past the last sibling's. Returns the id the
    /// node was stored under.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::DuplicateId`] under [`DuplicateIdPolicy::Strict`]
    /// when the id is live, and [`CherryTreeError::NodeNotFound`] for an
    /// unknown parent.
    pub fn append_node(
        &mut self,
        mut data: NodeData,
        parent: Option<NodeId>,
        policy: DuplicateIdPolicy,
    ) -> Result<NodeId> {
        if let Some(pid) = parent {
            if !self.nodes.contains_key(&pid) {
                return Err(CherryTreeError::NodeNotFound(pid));
            }
        }
        if data.node_id <= 0 {
            data.node_id = self.node_id_get();
        } else if self.nodes.contains_key(&data.node_id) {
            match policy {
                DuplicateIdPolicy::Strict => return Err(CherryTreeError::DuplicateId(data.node_id)),
                DuplicateIdPolicy::Reassign => {
                    let fresh = self.node_id_get();
                    log::warn!("duplicate node id {}, reassigned to {fresh}", data.node_id);
                    data.node_id = fresh;
                }
            }
        }
        let id = data.node_id;
        self.max_issued_id = self.max_issued_id.max(id);

        let siblings = match parent {
            Some(pid) => &self.nodes[&pid].children,
            None => &self.roots,
        };
        if data.sequence <= 0 {
            data.sequence = siblings
                .last()
                .map(|last| self.nodes[last].data.sequence + 1)
                .unwrap_or(1);
        }
        self.nodes.insert(
            id,
            TreeNode {
                data,
                parent,
                children: Vec::new(),
                content: None,
            },
        );
        self.siblings_mut(parent).push(id);
        Ok(id)
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> &mut Vec<NodeId> {
        match parent {
            Some(pid) => match self.nodes.get_mut(&pid) {
                Some(node) => &mut node.children,
                None => &mut self.roots,
            },
            None => &mut self.roots,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get_node_from_id(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&id).map(|n| &n.data)
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(&id).map(|n| &mut n.data)
    }

    /// First node named `name` in depth-first order.
    pub fn get_node_from_name(&self, name: &str) -> Option<NodeId> {
        self.iter_depth_first()
            .into_iter()
            .find(|id| self.nodes[id].data.name == name)
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Children of `parent` in display order; `None` gives the roots.
    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(pid) => self.nodes.get(&pid).map(|n| n.children.as_slice()).unwrap_or(&[]),
            None => &self.roots,
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of ancestors of `id`.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent_of(id);
        while let Some(pid) = current {
            depth += 1;
            current = self.parent_of(pid);
        }
        depth
    }

    /// All ids in pre-order.
    pub fn iter_depth_first(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// `id` and all of its descendants in pre-order.
    pub fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(current);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    pub fn content(&self, id: NodeId) -> Option<&NodeContent> {
        self.nodes.get(&id).and_then(|n| n.content.as_ref())
    }

    pub fn content_mut(&mut self, id: NodeId) -> Option<&mut NodeContent> {
        self.nodes.get_mut(&id).and_then(|n| n.content.as_mut())
    }

    pub fn is_content_loaded(&self, id: NodeId) -> bool {
        self.content(id).is_some()
    }

    /// Stores the buffer of `id`; returns false when the node is unknown.
    pub fn set_content(&mut self, id: NodeId, content: NodeContent) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.content = Some(content);
                true
            }
            None => false,
        }
    }

    /// Removes `id` and all its descendants, leaves first.
    ///
    /// Bookmarks pointing into the subtree are dropped as well.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::NodeNotFound`] if `id` is not in the tree.
    pub fn remove_node_and_descendants(&mut self, id: NodeId) -> Result<DeleteResult> {
        let parent = match self.nodes.get(&id) {
            Some(node) => node.parent,
            None => return Err(CherryTreeError::NodeNotFound(id)),
        };
        let mut deleted_ids = self.subtree_ids(id);
        deleted_ids.reverse();
        for removed in &deleted_ids {
            self.nodes.remove(removed);
        }
        self.siblings_mut(parent).retain(|c| *c != id);

        let before = self.bookmarks.len();
        self.bookmarks.retain(|b| !deleted_ids.contains(b));
        Ok(DeleteResult {
            deleted_count: deleted_ids.len(),
            bookmarks_changed: before != self.bookmarks.len(),
            deleted_ids,
        })
    }

    /// Moves `id` under `new_parent` at `position` among its new siblings.
    ///
    /// Sibling sequences of the old and new parent are renumbered. Returns
    /// the ids whose parent or sequence changed, the moved node first.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::InvalidMove`] when the move would make a node
    /// its own ancestor, and [`CherryTreeError::NodeNotFound`] for unknown ids.
    pub fn move_node(
        &mut self,
        id: NodeId,
        new_parent: Option<NodeId>,
        position: usize,
    ) -> Result<Vec<NodeId>> {
        let old_parent = match self.nodes.get(&id) {
            Some(node) => node.parent,
            None => return Err(CherryTreeError::NodeNotFound(id)),
        };
        if new_parent == Some(id) {
            return Err(CherryTreeError::InvalidMove(
                "A node cannot be its own parent".to_string(),
            ));
        }
        if let Some(target) = new_parent {
            if !self.nodes.contains_key(&target) {
                return Err(CherryTreeError::NodeNotFound(target));
            }
            let mut current = self.parent_of(target);
            while let Some(ancestor) = current {
                if ancestor == id {
                    return Err(CherryTreeError::InvalidMove(
                        "Move would create a cycle".to_string(),
                    ));
                }
                current = self.parent_of(ancestor);
            }
        }

        self.siblings_mut(old_parent).retain(|c| *c != id);
        let siblings = self.siblings_mut(new_parent);
        let at = position.min(siblings.len());
        siblings.insert(at, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = new_parent;
        }

        let mut changed = vec![id];
        for renumbered in self.nodes_sequences_fix(old_parent) {
            if !changed.contains(&renumbered) {
                changed.push(renumbered);
            }
        }
        if old_parent != new_parent {
            for renumbered in self.nodes_sequences_fix(new_parent) {
                if !changed.contains(&renumbered) {
                    changed.push(renumbered);
                }
            }
        }
        Ok(changed)
    }

    /// Renumbers the children of `parent` to 1..n and returns the ids whose sequence changed.
    pub fn nodes_sequences_fix(&mut self, parent: Option<NodeId>) -> Vec<NodeId> {
        let children = self.children_of(parent).to_vec();
        let mut changed = Vec::new();
        for (index, child) in children.into_iter().enumerate() {
            let sequence = index as i64 + 1;
            if let Some(node) = self.nodes.get_mut(&child) {
                if node.data.sequence != sequence {
                    node.data.sequence = sequence;
                    changed.push(child);
                }
            }
        }
        changed
    }

    pub fn bookmarks(&self) -> &[NodeId] {
        &self.bookmarks
    }

    /// Adds a bookmark; returns false if already bookmarked or unknown.
    pub fn bookmarks_add(&mut self, id: NodeId) -> bool {
        if !self.nodes.contains_key(&id) || self.bookmarks.contains(&id) {
            return false;
        }
        self.bookmarks.push(id);
        true
    }

    pub fn bookmarks_remove(&mut self, id: NodeId) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|b| *b != id);
        before != self.bookmarks.len()
    }

    /// Replaces the bookmark list, dropping duplicates and unknown ids.
    pub fn set_bookmarks(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.bookmarks.clear();
        for id in ids {
            if !self.bookmarks_add(id) {
                log::debug!("ignoring bookmark {id}");
            }
        }
    }

    /// Every distinct tag token used in the tree, sorted.
    pub fn used_tags(&self) -> BTreeSet<String> {
        self.nodes
            .values()
            .flat_map(|n| n.data.tag_list())
            .map(str::to_string)
            .collect()
    }

    pub fn summary(&self) -> TreeSummary {
        let mut summary = TreeSummary::default();
        for node in self.nodes.values() {
            match node.data.syntax {
                Syntax::RichText => summary.nodes_rich_text += 1,
                Syntax::PlainText => summary.nodes_plain_text += 1,
                Syntax::Code(_) => summary.nodes_code += 1,
            }
            let Some(content) = &node.content else { continue };
            for widget in content.widgets() {
                match widget.kind {
                    WidgetKind::ImagePng(_) => summary.images += 1,
                    WidgetKind::ImageLatex(_) => summary.latex += 1,
                    WidgetKind::ImageEmbFile(_) => summary.embedded_files += 1,
                    WidgetKind::ImageAnchor(_) => summary.anchors += 1,
                    WidgetKind::TableLight(_) | WidgetKind::TableHeavy(_) => summary.tables += 1,
                    WidgetKind::CodeBox(_) => summary.codeboxes += 1,
                }
            }
        }
        summary
    }

    /// Copies the subtree of `source` rooted at `source_id` under `parent`,
    /// giving every copied node a fresh id. Returns the new ids in pre-order.
    pub fn import_subtree(
        &mut self,
        source: &TreeStore,
        source_id: NodeId,
        parent: Option<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let mut imported = Vec::new();
        let mut stack = vec![(source_id, parent)];
        while let Some((src, dst_parent)) = stack.pop() {
            let Some(node) = source.nodes.get(&src) else {
                return Err(CherryTreeError::NodeNotFound(src));
            };
            let mut data = node.data.clone();
            data.node_id = 0;
            data.sequence = 0;
            let new_id = self.append_node(data, dst_parent, DuplicateIdPolicy::Strict)?;
            if let Some(content) = &node.content {
                self.set_content(new_id, content.clone());
            }
            imported.push(new_id);
            stack.extend(node.children.iter().rev().map(|c| (*c, Some(new_id))));
        }
        Ok(imported)
    }
}

//! Per-node undo/redo history and visited-node navigation.
//!
//! History is kept for rich-text nodes only. Snapshot failures are logged and
//! skipped; nothing here returns an error to the caller.

use crate::core::config::EngineConfig;
use crate::core::content::NodeContent;
use crate::core::node::NodeId;
use crate::core::tree::TreeStore;
use crate::core::widget::WidgetState;
use crate::Result;
use std::collections::{HashMap, VecDeque};

/// One undo snapshot of a node buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Text runs serialised under a `<node>` root, widgets excluded.
    pub buffer_xml: String,
    pub widget_states: Vec<WidgetState>,
    pub cursor_pos: i64,
    pub v_adj_val: i64,
}

impl HistoryEntry {
    fn capture(content: &NodeContent) -> Result<Self> {
        Ok(Self {
            buffer_xml: content.runs_to_xml_string()?,
            widget_states: content.widgets().iter().map(|w| w.get_state()).collect(),
            cursor_pos: 0,
            v_adj_val: 0,
        })
    }

    fn same_buffer(&self, other: &Self) -> bool {
        self.buffer_xml == other.buffer_xml && self.widget_states == other.widget_states
    }

    /// Rebuilds the node buffer this entry was taken from.
    pub fn to_content(&self) -> Result<NodeContent> {
        let mut content = NodeContent::from_runs_xml_string(&self.buffer_xml)?;
        for state in &self.widget_states {
            content.insert_widget(state.to_widget());
        }
        Ok(content)
    }
}

/// Where the typing since the last snapshot stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indicator {
    /// The current buffer is the last snapshot.
    Saved,
    NonAlphanumeric,
    /// Inside a word.
    Alphanumeric,
    /// One non-alphanumeric char right after a word.
    WordBoundary,
}

#[derive(Debug)]
struct NodeHistory {
    entries: VecDeque<HistoryEntry>,
    index: usize,
    indicator: Indicator,
}

impl NodeHistory {
    fn current(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.index)
    }

    fn is_at_last(&self) -> bool {
        self.entries.is_empty() || self.index + 1 == self.entries.len()
    }
}

/// Undo/redo snapshots per node plus the back/forward list of visited nodes.
#[derive(Debug)]
pub struct StateMachine {
    limit: usize,
    histories: HashMap<NodeId, NodeHistory>,
    visited: Vec<NodeId>,
    visited_idx: Option<usize>,
    go_bk_fw_click: bool,
    not_undoable_timeslot: bool,
}

impl StateMachine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limit: config.limit_undoable_steps.max(1),
            histories: HashMap::new(),
            visited: Vec::new(),
            visited_idx: None,
            go_bk_fw_click: false,
            not_undoable_timeslot: false,
        }
    }

    /// Forgets every history and the visited list.
    pub fn reset(&mut self) {
        self.histories.clear();
        self.visited.clear();
        self.visited_idx = None;
    }

    /// Marks the next selection change as coming from back/forward navigation,
    /// which must not alter the visited list.
    pub fn set_go_bk_fw_click(&mut self, value: bool) {
        self.go_bk_fw_click = value;
    }

    /// While set, no snapshot is taken and cursor updates are ignored.
    pub fn not_undoable_timeslot_set(&mut self, value: bool) {
        self.not_undoable_timeslot = value;
    }

    pub fn not_undoable_timeslot_get(&self) -> bool {
        self.not_undoable_timeslot
    }

    pub fn visited_nodes(&self) -> &[NodeId] {
        &self.visited
    }

    /// Replaces the visited list, e.g. with one restored from a previous session.
    pub fn set_visited_nodes(&mut self, nodes: Vec<NodeId>) {
        self.visited_idx = nodes.len().checked_sub(1);
        self.visited = nodes;
    }

    pub fn requested_visited_previous(&mut self) -> Option<NodeId> {
        match self.visited_idx {
            Some(idx) if idx > 0 => {
                self.visited_idx = Some(idx - 1);
                self.visited.get(idx - 1).copied()
            }
            _ => None,
        }
    }

    pub fn requested_visited_next(&mut self) -> Option<NodeId> {
        match self.visited_idx {
            Some(idx) if idx + 1 < self.visited.len() => {
                self.visited_idx = Some(idx + 1);
                self.visited.get(idx + 1).copied()
            }
            _ => None,
        }
    }

    /// Records a visit to `node_id` and takes its baseline snapshot on first visit.
    pub fn node_selected_changed(&mut self, tree: &TreeStore, node_id: NodeId) {
        if !self.go_bk_fw_click {
            if let Some(idx) = self.visited_idx {
                self.visited.truncate(idx + 1);
            }
            self.visited.retain(|v| *v != node_id);
            self.visited.push(node_id);
            self.visited_idx = Some(self.visited.len() - 1);
        }
        self.go_bk_fw_click = false;
        self.ensure_baseline(tree, node_id);
    }

    fn ensure_baseline(&mut self, tree: &TreeStore, node_id: NodeId) -> bool {
        if self.histories.contains_key(&node_id) {
            return true;
        }
        let Some(content) = snapshot_source(tree, node_id) else {
            return false;
        };
        match HistoryEntry::capture(content) {
            Ok(entry) => {
                self.histories.insert(
                    node_id,
                    NodeHistory {
                        entries: VecDeque::from([entry]),
                        index: 0,
                        indicator: Indicator::Saved,
                    },
                );
                true
            }
            Err(e) => {
                log::warn!("skipping baseline snapshot of node {node_id}: {e}");
                false
            }
        }
    }

    /// Called before `varied_text` is inserted into or removed from the buffer.
    ///
    /// A newline snapshots at once. Otherwise typing is coalesced: a word
    /// followed by one non-alphanumeric char is snapshotted when the next
    /// char arrives, whatever that char is. `"abc  "` commits `"abc "` before
    /// the second space, and `"abc d"` commits `"abc "` before the `d`.
    pub fn text_variation(&mut self, tree: &TreeStore, node_id: NodeId, varied_text: &str) {
        if !self.ensure_baseline(tree, node_id) {
            return;
        }
        if !self.histories.get(&node_id).map_or(true, NodeHistory::is_at_last) {
            let saved = self.not_undoable_timeslot;
            self.not_undoable_timeslot = false;
            self.update_state(tree, node_id);
            self.not_undoable_timeslot = saved;
            return;
        }
        if varied_text.contains('\n') {
            self.update_state(tree, node_id);
            return;
        }

        let is_alphanumeric = varied_text.chars().any(char::is_alphanumeric);
        let indicator = match self.histories.get(&node_id) {
            Some(history) => history.indicator,
            None => return,
        };
        if indicator == Indicator::WordBoundary {
            self.update_state(tree, node_id);
        }
        let next = match (indicator, is_alphanumeric) {
            (Indicator::Alphanumeric, false) => Indicator::WordBoundary,
            (_, true) => Indicator::Alphanumeric,
            (_, false) => Indicator::NonAlphanumeric,
        };
        if let Some(history) = self.histories.get_mut(&node_id) {
            history.indicator = next;
        }
    }

    /// Snapshots the current buffer of `node_id`.
    ///
    /// Entries after the current index are dropped first. Returns false when
    /// nothing was recorded: the buffer and widgets equal the last entry, the
    /// node has no rich-text content, the timeslot is not undoable, or the
    /// snapshot failed.
    pub fn update_state(&mut self, tree: &TreeStore, node_id: NodeId) -> bool {
        if self.not_undoable_timeslot {
            return false;
        }
        let Some(content) = snapshot_source(tree, node_id) else {
            return false;
        };
        let entry = match HistoryEntry::capture(content) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("skipping undo snapshot of node {node_id}: {e}");
                return false;
            }
        };
        let history = self.histories.entry(node_id).or_insert_with(|| NodeHistory {
            entries: VecDeque::new(),
            index: 0,
            indicator: Indicator::Saved,
        });
        if !history.is_at_last() {
            history.entries.truncate(history.index + 1);
        }
        if history.entries.back().map_or(false, |last| last.same_buffer(&entry)) {
            return false;
        }
        history.entries.push_back(entry);
        while history.entries.len() > self.limit {
            history.entries.pop_front();
        }
        history.index = history.entries.len() - 1;
        history.indicator = Indicator::Saved;
        true
    }

    /// Steps back one entry, first snapshotting unsaved typing when at the end.
    ///
    /// At the oldest entry the current entry is returned unchanged.
    pub fn requested_state_previous(&mut self, tree: &TreeStore, node_id: NodeId) -> Option<&HistoryEntry> {
        if self.histories.get(&node_id).map_or(false, NodeHistory::is_at_last) {
            self.update_state(tree, node_id);
        }
        let history = self.histories.get_mut(&node_id)?;
        history.index = history.index.saturating_sub(1);
        history.current()
    }

    pub fn requested_state_current(&self, node_id: NodeId) -> Option<&HistoryEntry> {
        self.histories.get(&node_id)?.current()
    }

    /// Steps forward one entry; at the newest entry it is returned unchanged.
    pub fn requested_state_subsequent(&mut self, node_id: NodeId) -> Option<&HistoryEntry> {
        let history = self.histories.get_mut(&node_id)?;
        if history.index + 1 < history.entries.len() {
            history.index += 1;
        }
        history.current()
    }

    pub fn can_undo(&self, node_id: NodeId) -> bool {
        self.histories.get(&node_id).map_or(false, |h| {
            h.index > 0 || (h.is_at_last() && h.indicator != Indicator::Saved)
        })
    }

    pub fn can_redo(&self, node_id: NodeId) -> bool {
        self.histories
            .get(&node_id)
            .map_or(false, |h| h.index + 1 < h.entries.len())
    }

    pub fn history_len(&self, node_id: NodeId) -> usize {
        self.histories.get(&node_id).map_or(0, |h| h.entries.len())
    }

    /// Purges the history and visited entries of a destroyed node.
    pub fn delete_states(&mut self, node_id: NodeId) {
        self.histories.remove(&node_id);
        if self.visited.contains(&node_id) {
            self.visited.retain(|v| *v != node_id);
            self.visited_idx = self.visited.len().checked_sub(1);
        }
    }

    /// Stores the cursor and scroll position in the current entry, as long as
    /// the buffer has not changed since it was taken.
    pub fn update_curr_state_cursor_pos(&mut self, node_id: NodeId, cursor_pos: i64, v_adj_val: i64) {
        if self.not_undoable_timeslot {
            return;
        }
        let Some(history) = self.histories.get_mut(&node_id) else {
            return;
        };
        if history.indicator != Indicator::Saved {
            return;
        }
        let index = history.index;
        if let Some(entry) = history.entries.get_mut(index) {
            entry.cursor_pos = cursor_pos;
            entry.v_adj_val = v_adj_val;
        }
    }
}

fn snapshot_source(tree: &TreeStore, node_id: NodeId) -> Option<&NodeContent> {
    let data = tree.get_node_from_id(node_id)?;
    if !data.syntax.is_rich_text() {
        return None;
    }
    tree.content(node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{NodeData, Syntax};
    use crate::core::tree::DuplicateIdPolicy;
    use crate::core::widget::{AnchoredWidget, CodeBox, Justification, WidgetKind};

    fn setup(limit: usize) -> (StateMachine, TreeStore, NodeId) {
        let config = EngineConfig {
            limit_undoable_steps: limit,
            ..EngineConfig::default()
        };
        let mut tree = TreeStore::new();
        let id = tree
            .append_node(NodeData::new("n", Syntax::RichText), None, DuplicateIdPolicy::Strict)
            .unwrap();
        tree.set_content(id, NodeContent::new());
        (StateMachine::new(&config), tree, id)
    }

    fn type_text(sm: &mut StateMachine, tree: &mut TreeStore, id: NodeId, typed: &str) {
        for ch in typed.chars() {
            let piece = ch.to_string();
            sm.text_variation(tree, id, &piece);
            let text = format!("{}{}", tree.content(id).unwrap().text(), piece);
            tree.set_content(id, NodeContent::from_plain_text(text));
        }
    }

    fn entry_text(entry: &HistoryEntry) -> String {
        entry.to_content().unwrap().text()
    }

    #[test]
    fn test_word_is_one_entry() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        type_text(&mut sm, &mut tree, id, "abc");
        assert_eq!(sm.history_len(id), 1);
        type_text(&mut sm, &mut tree, id, " ");
        assert_eq!(sm.history_len(id), 1);
    }

    #[test]
    fn test_second_separator_commits_before_it_is_applied() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        type_text(&mut sm, &mut tree, id, "abc  ");
        assert_eq!(sm.history_len(id), 2);
        assert_eq!(entry_text(sm.requested_state_current(id).unwrap()), "abc ");
    }

    #[test]
    fn test_next_word_commits_previous_one() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        type_text(&mut sm, &mut tree, id, "one two three");
        assert_eq!(sm.history_len(id), 3);
        assert_eq!(entry_text(sm.requested_state_current(id).unwrap()), "one two ");
    }

    #[test]
    fn test_letter_after_single_separator_commits_word() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        type_text(&mut sm, &mut tree, id, "abc ");
        assert_eq!(sm.history_len(id), 1);
        type_text(&mut sm, &mut tree, id, "d");
        assert_eq!(sm.history_len(id), 2);
        assert_eq!(entry_text(sm.requested_state_current(id).unwrap()), "abc ");
        type_text(&mut sm, &mut tree, id, "ef");
        assert_eq!(sm.history_len(id), 2);
    }

    #[test]
    fn test_newline_commits_immediately() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        type_text(&mut sm, &mut tree, id, "ab\n");
        assert_eq!(sm.history_len(id), 2);
        assert_eq!(entry_text(sm.requested_state_current(id).unwrap()), "ab");
    }

    #[test]
    fn test_update_state_skips_identical_snapshot() {
        let (mut sm, tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        assert!(!sm.update_state(&tree, id));
        assert_eq!(sm.history_len(id), 1);
    }

    #[test]
    fn test_widget_change_is_a_new_state() {
        let (mut sm, mut tree, id) = setup(20);
        tree.set_content(id, NodeContent::from_plain_text("text"));
        sm.node_selected_changed(&tree, id);
        let mut content = NodeContent::from_plain_text("text");
        content.insert_widget(AnchoredWidget::new(
            4,
            Justification::Left,
            WidgetKind::CodeBox(CodeBox::new("x = 1", "python")),
        ));
        tree.set_content(id, content);
        assert!(sm.update_state(&tree, id));
        let restored = sm.requested_state_current(id).unwrap().to_content().unwrap();
        assert_eq!(restored.widgets().len(), 1);
        assert_eq!(restored.widgets()[0].char_offset, 4);
    }

    #[test]
    fn test_cap_drops_oldest() {
        let (mut sm, mut tree, id) = setup(3);
        sm.node_selected_changed(&tree, id);
        for i in 0..10 {
            tree.set_content(id, NodeContent::from_plain_text(format!("v{i}")));
            sm.update_state(&tree, id);
            assert!(sm.history_len(id) <= 3);
        }
        assert_eq!(sm.history_len(id), 3);
        let mut oldest = String::new();
        while let Some(entry) = sm.requested_state_previous(&tree, id) {
            let text = entry_text(entry);
            if text == oldest {
                break;
            }
            oldest = text;
        }
        assert_eq!(oldest, "v7");
    }

    #[test]
    fn test_undo_redo_bounds() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        tree.set_content(id, NodeContent::from_plain_text("one"));
        sm.update_state(&tree, id);

        assert_eq!(entry_text(sm.requested_state_previous(&tree, id).unwrap()), "");
        assert_eq!(entry_text(sm.requested_state_previous(&tree, id).unwrap()), "");
        assert!(sm.can_redo(id));
        assert_eq!(entry_text(sm.requested_state_subsequent(id).unwrap()), "one");
        assert_eq!(entry_text(sm.requested_state_subsequent(id).unwrap()), "one");
        assert!(sm.requested_state_current(999).is_none());
    }

    #[test]
    fn test_edit_after_undo_discards_redo_tail() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        tree.set_content(id, NodeContent::from_plain_text("one"));
        sm.update_state(&tree, id);
        tree.set_content(id, NodeContent::from_plain_text("two"));
        sm.update_state(&tree, id);

        let restored = sm.requested_state_previous(&tree, id).unwrap().to_content().unwrap();
        tree.set_content(id, restored);
        type_text(&mut sm, &mut tree, id, "x");
        assert_eq!(sm.history_len(id), 2);
        assert!(!sm.can_redo(id));
    }

    #[test]
    fn test_not_undoable_timeslot() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        sm.not_undoable_timeslot_set(true);
        tree.set_content(id, NodeContent::from_plain_text("pasted"));
        assert!(!sm.update_state(&tree, id));
        sm.not_undoable_timeslot_set(false);
        assert!(sm.update_state(&tree, id));
    }

    #[test]
    fn test_plain_text_nodes_have_no_history() {
        let (mut sm, mut tree, _) = setup(20);
        let plain = tree
            .append_node(NodeData::new("p", Syntax::PlainText), None, DuplicateIdPolicy::Strict)
            .unwrap();
        tree.set_content(plain, NodeContent::from_plain_text("text"));
        sm.node_selected_changed(&tree, plain);
        sm.text_variation(&tree, plain, "\n");
        assert_eq!(sm.history_len(plain), 0);
        assert_eq!(sm.visited_nodes(), &[plain]);
    }

    #[test]
    fn test_visited_navigation() {
        let (mut sm, tree, _) = setup(20);
        for id in [1, 2, 3] {
            sm.node_selected_changed(&tree, id);
        }
        assert_eq!(sm.requested_visited_previous(), Some(2));
        assert_eq!(sm.requested_visited_previous(), Some(1));
        assert_eq!(sm.requested_visited_previous(), None);
        assert_eq!(sm.requested_visited_next(), Some(2));

        // a new visit after going back drops the forward tail
        sm.node_selected_changed(&tree, 4);
        assert_eq!(sm.visited_nodes(), &[1, 2, 4]);
        assert_eq!(sm.requested_visited_next(), None);

        sm.set_go_bk_fw_click(true);
        sm.node_selected_changed(&tree, 1);
        assert_eq!(sm.visited_nodes(), &[1, 2, 4]);

        sm.node_selected_changed(&tree, 2);
        assert_eq!(sm.visited_nodes(), &[1, 4, 2]);
    }

    #[test]
    fn test_delete_states_purges_history_and_visits() {
        let (mut sm, tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        assert_eq!(sm.history_len(id), 1);
        sm.delete_states(id);
        assert_eq!(sm.history_len(id), 0);
        assert!(sm.visited_nodes().is_empty());
        assert_eq!(sm.requested_visited_previous(), None);
    }

    #[test]
    fn test_cursor_kept_only_while_saved() {
        let (mut sm, mut tree, id) = setup(20);
        sm.node_selected_changed(&tree, id);
        sm.update_curr_state_cursor_pos(id, 5, 12);
        assert_eq!(sm.requested_state_current(id).unwrap().cursor_pos, 5);
        type_text(&mut sm, &mut tree, id, "a");
        sm.update_curr_state_cursor_pos(id, 9, 0);
        assert_eq!(sm.requested_state_current(id).unwrap().cursor_pos, 5);
        assert_eq!(sm.requested_state_current(id).unwrap().v_adj_val, 12);
    }
}

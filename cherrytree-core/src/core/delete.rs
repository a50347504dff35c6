//! Result type for subtree removal.

use crate::core::node::NodeId;
use serde::{Deserialize, Serialize};

/// The outcome of removing a node together with all of its descendants.
///
/// Serialises in camelCase (`deletedCount`, `deletedIds`, `bookmarksChanged`).
///
/// # Examples
///
/// ```rust
/// use cherrytree_core::DeleteResult;
///
/// let result = DeleteResult {
///     deleted_count: 2,
///     deleted_ids: vec![7, 3],
///     bookmarks_changed: false,
/// };
/// let json = serde_json::to_string(&result).unwrap();
/// assert!(json.contains("deletedIds"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// The total number of nodes removed.
    pub deleted_count: usize,

    /// Every removed id, leaves first and the subtree root last.
    pub deleted_ids: Vec<NodeId>,

    /// Whether any removed node was bookmarked.
    pub bookmarks_changed: bool,
}

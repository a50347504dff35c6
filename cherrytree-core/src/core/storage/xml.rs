//! Single-document XML container (`.ctd`).

use super::{atomic_write, CancelFlag, DocType, ExportScope, StorageBackend};
use crate::core::blob_store::BlobStore;
use crate::core::content::NodeContent;
use crate::core::node::{NodeData, NodeId, Syntax};
use crate::core::sync::SyncPending;
use crate::core::tree::{DuplicateIdPolicy, TreeStore};
use crate::core::xml_dom::{self, XmlElement};
use crate::{CherryTreeError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the document root element.
pub const ROOT_ELEMENT: &str = "cherrytree";

/// Reads node properties from the attributes of a `<node>` element.
pub(crate) fn node_data_from_element(el: &XmlElement) -> NodeData {
    let mut data = NodeData::new(
        el.attr_or_empty("name"),
        Syntax::from_id(el.attr_or_empty("prog_lang")),
    );
    data.node_id = el.attr_i64("unique_id", 0);
    data.tags = el.attr_or_empty("tags").to_string();
    data.is_ro = el.attr_bool("readonly");
    data.exclude_me_from_search = el.attr_bool("nosearch_me");
    data.exclude_children_from_search = el.attr_bool("nosearch_ch");
    data.custom_icon_id = u32::try_from(el.attr_i64("custom_icon_id", 0)).unwrap_or(0);
    data.is_bold = el.attr_bool("is_bold");
    data.foreground = el
        .attr("foreground")
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    data.ts_creation = el.attr_i64("ts_creation", 0);
    data.ts_lastsave = el.attr_i64("ts_lastsave", 0);
    data
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Builds a childless `<node>` element carrying the properties of `data`.
pub(crate) fn node_element(data: &NodeData) -> XmlElement {
    let mut el = XmlElement::new("node");
    el.set_attr("name", data.name.as_str());
    el.set_attr("unique_id", data.node_id.to_string());
    el.set_attr("prog_lang", data.syntax.as_id());
    el.set_attr("tags", data.tags.as_str());
    el.set_attr("readonly", py_bool(data.is_ro));
    el.set_attr("nosearch_me", py_bool(data.exclude_me_from_search));
    el.set_attr("nosearch_ch", py_bool(data.exclude_children_from_search));
    el.set_attr("custom_icon_id", data.custom_icon_id.to_string());
    el.set_attr("is_bold", py_bool(data.is_bold));
    el.set_attr("foreground", data.foreground.clone().unwrap_or_default());
    el.set_attr("ts_creation", data.ts_creation.to_string());
    el.set_attr("ts_lastsave", data.ts_lastsave.to_string());
    el
}

/// Appends the properties and the in-range buffer of `node_id` as a `<node>` under `parent`.
///
/// Returns the new element so callers can nest children below it.
pub(crate) fn write_node<'a>(
    parent: &'a mut XmlElement,
    tree: &TreeStore,
    node_id: NodeId,
    range: (i64, i64),
    blobs: Option<&BlobStore>,
) -> Result<&'a mut XmlElement> {
    let data = tree
        .get_node_from_id(node_id)
        .ok_or(CherryTreeError::NodeNotFound(node_id))?;
    let content = tree.content(node_id).ok_or_else(|| {
        CherryTreeError::InvalidDocument(format!("content of node {node_id} is not loaded"))
    })?;
    let el = parent.add_child(node_element(data));
    content.write_elements(el, range.0, range.1, blobs)?;
    Ok(el)
}

/// Parses a bookmark list (`"3,7,12"`), ignoring malformed entries.
pub(crate) fn parse_id_list(list: &str) -> Vec<NodeId> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter_map(|t| match t.parse::<NodeId>() {
            Ok(id) => Some(id),
            Err(_) => {
                log::warn!("ignoring malformed node id {t:?}");
                None
            }
        })
        .collect()
}

pub(crate) fn format_id_list(ids: &[NodeId]) -> String {
    ids.iter().map(NodeId::to_string).collect::<Vec<_>>().join(",")
}

/// Backend for `.ctd` files.
///
/// The whole document is parsed on [`StorageBackend::populate_tree`]; buffers
/// are parked until [`StorageBackend::load_node_content`] asks for them.
pub struct XmlStorage {
    path: PathBuf,
    delayed: HashMap<NodeId, NodeContent>,
}

impl XmlStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delayed: HashMap::new(),
        }
    }

    fn append_element(
        &mut self,
        tree: &mut TreeStore,
        el: &XmlElement,
        parent: Option<NodeId>,
    ) -> Result<()> {
        let mut stack = vec![(el, parent)];
        while let Some((current, parent)) = stack.pop() {
            let data = node_data_from_element(current);
            let node_id = tree.append_node(data, parent, DuplicateIdPolicy::Reassign)?;
            self.delayed
                .insert(node_id, NodeContent::from_element(current, None)?);
            let children: Vec<&XmlElement> = current.elements_named("node").collect();
            stack.extend(children.into_iter().rev().map(|c| (c, Some(node_id))));
        }
        Ok(())
    }

    /// Builds the document for `scope` without touching the disk.
    fn build_document(
        &self,
        tree: &TreeStore,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<XmlElement> {
        let mut root = XmlElement::new(ROOT_ELEMENT);
        root.set_attr("last_node_id", tree.max_issued_id().to_string());
        let range = scope.range();
        for top in scope.roots(tree) {
            cancel.check()?;
            if !scope.includes_descendants() {
                write_node(&mut root, tree, top, range, None)?;
                continue;
            }
            write_subtree(&mut root, tree, top, cancel)?;
        }
        if matches!(scope, ExportScope::All) && !tree.bookmarks().is_empty() {
            let bookmarks = root.add_child(XmlElement::new("bookmarks"));
            bookmarks.set_attr("list", format_id_list(tree.bookmarks()));
        }
        Ok(root)
    }
}

/// Largest `unique_id` of any `<node>` below `root`.
fn highest_unique_id(root: &XmlElement) -> NodeId {
    let mut highest = 0;
    let mut stack: Vec<&XmlElement> = root.elements_named("node").collect();
    while let Some(el) = stack.pop() {
        highest = highest.max(el.attr_i64("unique_id", 0));
        stack.extend(el.elements_named("node"));
    }
    highest
}

fn write_subtree(
    parent: &mut XmlElement,
    tree: &TreeStore,
    node_id: NodeId,
    cancel: &CancelFlag,
) -> Result<()> {
    cancel.check()?;
    let el = write_node(parent, tree, node_id, (0, -1), None)?;
    for child in tree.children_of(Some(node_id)) {
        write_subtree(el, tree, *child, cancel)?;
    }
    Ok(())
}

impl StorageBackend for XmlStorage {
    fn doc_type(&self) -> DocType {
        DocType::Xml
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn populate_tree(&mut self, tree: &mut TreeStore) -> Result<()> {
        let bytes = std::fs::read(&self.path)?;
        let root = xml_dom::parse_with_recovery(&bytes)?;
        if root.name != ROOT_ELEMENT {
            return Err(CherryTreeError::InvalidDocument(format!(
                "unexpected root element <{}>",
                root.name
            )));
        }
        tree.note_issued_id(root.attr_i64("last_node_id", 0));
        tree.note_issued_id(highest_unique_id(&root));
        let mut bookmarks = Vec::new();
        for child in root.elements() {
            match child.name.as_str() {
                "node" => self.append_element(tree, child, None)?,
                "bookmarks" => bookmarks = parse_id_list(child.attr_or_empty("list")),
                other => log::debug!("ignoring <{other}> under document root"),
            }
        }
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
        let root = self.build_document(tree, scope, cancel)?;
        let text = xml_dom::write_document(&root)?;
        cancel.check()?;
        atomic_write(path, text.as_bytes())?;
        log::debug!("wrote xml document {}", path.display());
        Ok(())
    }

    fn save_incremental(
        &mut self,
        _tree: &TreeStore,
        _pending: &SyncPending,
        _cancel: &CancelFlag,
    ) -> Result<()> {
        Err(CherryTreeError::UnsupportedOperation(
            "xml documents are always rewritten in full".to_string(),
        ))
    }

    fn vacuum(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.delayed.clear();
    }

    fn reopen(&mut self, path: &Path) -> Result<()> {
        self.path = path.to_path_buf();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content::TextAttributes;
    use crate::core::widget::{AnchoredWidget, CodeBox, ImagePng, Justification, WidgetKind};
    use tempfile::TempDir;

    fn sample_tree() -> (TreeStore, NodeId, NodeId, NodeId) {
        let mut tree = TreeStore::new();
        let mut data = NodeData::new("Root & <stuff>", Syntax::RichText);
        data.tags = "alpha beta".to_string();
        data.is_bold = true;
        data.foreground = Some("#ff0000".to_string());
        data.custom_icon_id = 12;
        let root = tree.append_node(data, None, DuplicateIdPolicy::Strict).unwrap();
        let child = tree
            .append_node(NodeData::new("code", Syntax::Code("python".to_string())), Some(root), DuplicateIdPolicy::Strict)
            .unwrap();
        let second = tree
            .append_node(NodeData::new("plain", Syntax::PlainText), None, DuplicateIdPolicy::Strict)
            .unwrap();

        let mut content = NodeContent::new();
        content.push_text("hello ", TextAttributes::new());
        content.push_text("bold", [("weight".to_string(), "heavy".to_string())].into_iter().collect());
        content.insert_widget(AnchoredWidget::new(
            2,
            Justification::Center,
            WidgetKind::ImagePng(ImagePng {
                raw_blob: vec![0x89, b'P', b'N', b'G', 0, 1],
                link: "webs https://example.com".to_string(),
            }),
        ));
        content.insert_widget(AnchoredWidget::new(
            11,
            Justification::Left,
            WidgetKind::CodeBox(CodeBox::new("print(1)", "python")),
        ));
        tree.set_content(root, content);
        tree.set_content(child, NodeContent::from_plain_text("def f():\n    pass\n"));
        tree.set_content(second, NodeContent::from_plain_text("just text"));
        tree.bookmarks_add(second);
        (tree, root, child, second)
    }

    fn load(path: &Path) -> (XmlStorage, TreeStore) {
        let mut storage = XmlStorage::new(path);
        let mut tree = TreeStore::new();
        storage.populate_tree(&mut tree).unwrap();
        let ids = tree.iter_depth_first();
        for id in ids {
            let syntax = tree.get_node_from_id(id).unwrap().syntax.clone();
            let content = storage.load_node_content(id, &syntax).unwrap();
            tree.set_content(id, content);
        }
        (storage, tree)
    }

    #[test]
    fn test_round_trip_full_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ctd");
        let (tree, root, child, second) = sample_tree();
        let mut storage = XmlStorage::new(&path);
        storage
            .save_full(&path, &tree, &ExportScope::All, &CancelFlag::new())
            .unwrap();

        let (_, loaded) = load(&path);
        assert_eq!(loaded.roots(), &[root, second]);
        assert_eq!(loaded.children_of(Some(root)), &[child]);
        assert_eq!(loaded.get_node_from_id(root), tree.get_node_from_id(root));
        assert_eq!(loaded.content(root), tree.content(root));
        assert_eq!(loaded.content(child).unwrap().text(), "def f():\n    pass\n");
        assert_eq!(loaded.bookmarks(), &[second]);
        assert_eq!(loaded.max_issued_id(), tree.max_issued_id());
    }

    #[test]
    fn test_watermark_survives_deleted_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ctd");
        let (mut tree, _, _, second) = sample_tree();
        tree.remove_node_and_descendants(second).unwrap();
        let mut storage = XmlStorage::new(&path);
        storage
            .save_full(&path, &tree, &ExportScope::All, &CancelFlag::new())
            .unwrap();
        let (_, mut loaded) = load(&path);
        assert!(loaded.node_id_get() > second);
    }

    #[test]
    fn test_duplicate_ids_are_reassigned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.ctd");
        std::fs::write(
            &path,
            r#"<?xml version="1.0"?><cherrytree><node name="a" unique_id="1" prog_lang="custom-colors"><rich_text>first</rich_text></node><node name="b" unique_id="1" prog_lang="custom-colors"><rich_text>second</rich_text><node name="c" unique_id="2" prog_lang="plain-text"/></node></cherrytree>"#,
        )
        .unwrap();
        let (_, tree) = load(&path);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get_node_from_id(1).unwrap().name, "a");
        let b = tree.get_node_from_name("b").unwrap();
        assert_ne!(b, 1);
        assert_eq!(tree.content(b).unwrap().text(), "second");
        let c = tree.get_node_from_name("c").unwrap();
        assert_eq!(tree.parent_of(c), Some(b));
    }

    #[test]
    fn test_duplicate_repair_keeps_later_ids_and_bookmarks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.ctd");
        std::fs::write(
            &path,
            r#"<?xml version="1.0"?><cherrytree><node name="a" unique_id="1" prog_lang="custom-colors"/><node name="b" unique_id="1" prog_lang="custom-colors"/><node name="c" unique_id="2" prog_lang="custom-colors"/><bookmarks list="2"/></cherrytree>"#,
        )
        .unwrap();
        let (_, tree) = load(&path);
        assert_eq!(tree.get_node_from_name("c"), Some(2));
        assert_eq!(tree.get_node_from_name("b"), Some(3));
        assert_eq!(tree.bookmarks(), &[2]);
        assert_eq!(tree.get_node_from_id(2).unwrap().name, "c");
    }

    #[test]
    fn test_selected_text_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("part.ctd");
        let (tree, root, _, _) = sample_tree();
        let mut storage = XmlStorage::new(&path);
        let scope = ExportScope::SelectedText {
            node_id: root,
            start: 0,
            end: 4,
        };
        storage.save_full(&path, &tree, &scope, &CancelFlag::new()).unwrap();
        let (_, loaded) = load(&path);
        assert_eq!(loaded.len(), 1);
        let content = loaded.content(root).unwrap();
        assert_eq!(content.text(), "hel");
        assert_eq!(content.widgets().len(), 1);
        assert!(loaded.bookmarks().is_empty());
    }

    #[test]
    fn test_current_node_scope_skips_children() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.ctd");
        let (tree, root, _, _) = sample_tree();
        let mut storage = XmlStorage::new(&path);
        storage
            .save_full(&path, &tree, &ExportScope::CurrentNode(root), &CancelFlag::new())
            .unwrap();
        let (_, loaded) = load(&path);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_cancelled_save_leaves_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.ctd");
        std::fs::write(&path, "previous").unwrap();
        let (tree, _, _, _) = sample_tree();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut storage = XmlStorage::new(&path);
        let err = storage.save_full(&path, &tree, &ExportScope::All, &cancel).unwrap_err();
        assert!(matches!(err, CherryTreeError::Cancelled));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous");
    }

    #[test]
    fn test_incremental_unsupported_and_bad_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.ctd");
        std::fs::write(&path, "<other/>").unwrap();
        let mut storage = XmlStorage::new(&path);
        let mut tree = TreeStore::new();
        assert!(matches!(
            storage.populate_tree(&mut tree),
            Err(CherryTreeError::InvalidDocument(_))
        ));
        assert!(matches!(
            storage.save_incremental(&tree, &SyncPending::new(), &CancelFlag::new()),
            Err(CherryTreeError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_id_list_parsing() {
        assert_eq!(parse_id_list("3,7, 12,x,"), vec![3, 7, 12]);
        assert_eq!(format_id_list(&[1, 2]), "1,2");
        assert!(parse_id_list("").is_empty());
    }
}

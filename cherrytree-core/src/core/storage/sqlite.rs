//! SQLite container (`.ctb`).

use super::merge::merge_by_key;
use super::{parent_dir, scoped_content, CancelFlag, DocType, ExportScope, StorageBackend};
use crate::core::content::NodeContent;
use crate::core::node::{
    pack_is_richtxt, pack_is_ro, pack_level, unpack_is_richtxt, unpack_is_ro, unpack_level,
    NodeData, NodeId, Syntax,
};
use crate::core::sync::SyncPending;
use crate::core::tree::{DuplicateIdPolicy, TreeStore};
use crate::core::widget::{
    AnchoredWidget, CodeBox, ImageAnchor, ImageEmbFile, ImageLatex, ImagePng, Justification,
    Table, WidgetKind, LATEX_SPECIAL_FILENAME,
};
use crate::core::xml_dom;
use crate::{CherryTreeError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const REQUIRED_TABLES: [&str; 6] = ["node", "codebox", "grid", "image", "children", "bookmark"];

/// Columns added after the first file format revision, with their declarations.
const LATE_COLUMNS: [(&str, &str, &str); 5] = [
    ("node", "ts_creation", "INTEGER DEFAULT 0"),
    ("node", "ts_lastsave", "INTEGER DEFAULT 0"),
    ("image", "filename", "TEXT DEFAULT ''"),
    ("image", "link", "TEXT DEFAULT ''"),
    ("image", "time", "INTEGER DEFAULT 0"),
];

const META_LAST_NODE_ID: &str = "last_node_id";

/// Creates a fresh database with the full schema.
fn create_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(conn)
}

/// Opens an existing database, validating its tables and adding missing columns.
fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    let table_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master
         WHERE type='table'
         AND name IN ('node', 'codebox', 'grid', 'image', 'children', 'bookmark')",
        [],
        |row| row.get(0),
    )?;
    if table_count != REQUIRED_TABLES.len() as i64 {
        return Err(CherryTreeError::InvalidDocument(
            "Not a valid CherryTree database".to_string(),
        ));
    }

    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        log::error!("integrity check of {} failed: {check}", path.display());
        return Err(CherryTreeError::InvalidDocument(format!(
            "integrity check failed: {check}"
        )));
    }

    for (table, column, decl) in LATE_COLUMNS {
        let column_exists: bool = conn.query_row(
            &format!("SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name=?"),
            [column],
            |row| row.get::<_, i64>(0).map(|count| count > 0),
        )?;
        if !column_exists {
            log::info!("adding missing column {table}.{column}");
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
        }
    }
    Ok(conn)
}

fn node_txt(data: &NodeData, content: &NodeContent) -> Result<String> {
    if data.syntax.is_rich_text() {
        content.runs_to_xml_string()
    } else {
        Ok(content.text())
    }
}

fn missing_content(node_id: NodeId) -> CherryTreeError {
    CherryTreeError::InvalidDocument(format!("content of node {node_id} is not loaded"))
}

fn insert_node_row(conn: &Connection, data: &NodeData, content: &NodeContent) -> Result<()> {
    let txt = node_txt(data, content)?;
    conn.execute(
        "INSERT INTO node VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?)",
        params![
            data.node_id,
            data.name,
            txt,
            data.syntax.as_id(),
            data.tags,
            pack_is_ro(data.is_ro, data.custom_icon_id),
            pack_is_richtxt(data),
            content.has_codebox(),
            content.has_table(),
            content.has_image(),
            pack_level(data),
            data.ts_creation,
            data.ts_lastsave
        ],
    )?;
    Ok(())
}

fn update_node_buffer(conn: &Connection, data: &NodeData, content: &NodeContent) -> Result<()> {
    let txt = node_txt(data, content)?;
    conn.execute(
        "UPDATE node SET txt=?, syntax=?, is_richtxt=?, has_codebox=?, has_table=?, has_image=?, ts_lastsave=? WHERE node_id=?",
        params![
            txt,
            data.syntax.as_id(),
            pack_is_richtxt(data),
            content.has_codebox(),
            content.has_table(),
            content.has_image(),
            data.ts_lastsave,
            data.node_id
        ],
    )?;
    Ok(())
}

fn update_node_props(conn: &Connection, data: &NodeData) -> Result<()> {
    conn.execute(
        "UPDATE node SET name=?, syntax=?, tags=?, is_ro=?, is_richtxt=?, level=? WHERE node_id=?",
        params![
            data.name,
            data.syntax.as_id(),
            data.tags,
            pack_is_ro(data.is_ro, data.custom_icon_id),
            pack_is_richtxt(data),
            pack_level(data),
            data.node_id
        ],
    )?;
    Ok(())
}

fn insert_widgets(conn: &Connection, node_id: NodeId, content: &NodeContent) -> Result<()> {
    for widget in content.widgets() {
        if !widget.to_sqlite(conn, node_id, 0) {
            return Err(CherryTreeError::WidgetWrite(node_id));
        }
    }
    Ok(())
}

fn delete_widgets(conn: &Connection, node_id: NodeId) -> Result<()> {
    conn.execute("DELETE FROM codebox WHERE node_id=?", [node_id])?;
    conn.execute("DELETE FROM grid WHERE node_id=?", [node_id])?;
    conn.execute("DELETE FROM image WHERE node_id=?", [node_id])?;
    Ok(())
}

fn write_bookmarks(conn: &Connection, bookmarks: &[NodeId]) -> Result<()> {
    conn.execute("DELETE FROM bookmark", [])?;
    for (index, node_id) in bookmarks.iter().enumerate() {
        conn.execute(
            "INSERT INTO bookmark VALUES(?,?)",
            params![node_id, index as i64 + 1],
        )?;
    }
    Ok(())
}

fn write_watermark(conn: &Connection, last_node_id: NodeId) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT)",
        [],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![META_LAST_NODE_ID, last_node_id.to_string()],
    )?;
    Ok(())
}

/// Files written by other tools have no `meta` table; they read as zero.
fn read_watermark(conn: &Connection) -> Result<NodeId> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='meta'",
        [],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )?;
    if !has_meta {
        return Ok(0);
    }
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key=?",
            [META_LAST_NODE_ID],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn read_codeboxes(conn: &Connection, node_id: NodeId) -> Result<Vec<AnchoredWidget>> {
    let mut stmt = conn.prepare(
        "SELECT offset, justification, txt, syntax, width, height, is_width_pix, do_highl_bra, do_show_linenum
         FROM codebox WHERE node_id=? ORDER BY offset ASC",
    )?;
    let rows = stmt.query_map([node_id], |row| {
        let justification: String = row.get(1)?;
        Ok(AnchoredWidget::new(
            row.get(0)?,
            Justification::from_id(&justification),
            WidgetKind::CodeBox(CodeBox {
                text: row.get(2)?,
                syntax: row.get(3)?,
                frame_width: row.get(4)?,
                frame_height: row.get(5)?,
                width_in_pixels: row.get(6)?,
                highlight_brackets: row.get(7)?,
                show_line_numbers: row.get(8)?,
            }),
        ))
    })?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

fn read_grids(conn: &Connection, node_id: NodeId) -> Result<Vec<AnchoredWidget>> {
    let mut stmt = conn.prepare(
        "SELECT offset, justification, txt, col_max FROM grid WHERE node_id=? ORDER BY offset ASC",
    )?;
    let rows: Vec<(i64, String, String, i64)> = stmt
        .query_map([node_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<_, _>>()?;

    let mut grids = Vec::with_capacity(rows.len());
    for (offset, justification, txt, col_max) in rows {
        let el = match xml_dom::parse_with_recovery(txt.as_bytes()) {
            Ok(el) => el,
            Err(e) => {
                log::warn!("skipping unreadable table of node {node_id} at {offset}: {e}");
                continue;
            }
        };
        let kind = if el.attr_bool("is_light") {
            WidgetKind::TableLight(Table::from_element(&el, col_max))
        } else {
            WidgetKind::TableHeavy(Table::from_element(&el, col_max))
        };
        grids.push(AnchoredWidget::new(
            offset,
            Justification::from_id(&justification),
            kind,
        ));
    }
    Ok(grids)
}

fn read_images(conn: &Connection, node_id: NodeId) -> Result<Vec<AnchoredWidget>> {
    let mut stmt = conn.prepare(
        "SELECT offset, justification, anchor, png, filename, link, time
         FROM image WHERE node_id=? ORDER BY offset ASC",
    )?;
    let rows = stmt.query_map([node_id], |row| {
        let justification: String = row.get(1)?;
        let anchor: Option<String> = row.get(2)?;
        let png: Option<Vec<u8>> = row.get(3)?;
        let filename: Option<String> = row.get(4)?;
        let link: Option<String> = row.get(5)?;
        let time: Option<i64> = row.get(6)?;
        let anchor = anchor.unwrap_or_default();
        let png = png.unwrap_or_default();
        let filename = filename.unwrap_or_default();
        let kind = if !anchor.is_empty() {
            WidgetKind::ImageAnchor(ImageAnchor {
                anchor_name: anchor,
            })
        } else if filename == LATEX_SPECIAL_FILENAME {
            WidgetKind::ImageLatex(ImageLatex::new(String::from_utf8_lossy(&png)))
        } else if !filename.is_empty() {
            WidgetKind::ImageEmbFile(ImageEmbFile::new(filename, png, time.unwrap_or(0)))
        } else {
            WidgetKind::ImagePng(ImagePng {
                raw_blob: png,
                link: link.unwrap_or_default(),
            })
        };
        Ok(AnchoredWidget::new(
            row.get(0)?,
            Justification::from_id(&justification),
            kind,
        ))
    })?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

/// Backend for `.ctb` files. Buffers are read lazily, one node at a time.
pub struct SqliteStorage {
    path: PathBuf,
    conn: Option<Connection>,
    /// Tree id to database id, for nodes renumbered by duplicate-id repair.
    db_ids: HashMap<NodeId, NodeId>,
}

impl SqliteStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
            db_ids: HashMap::new(),
        }
    }

    pub fn connection(&mut self) -> Result<&Connection> {
        if self.conn.is_none() {
            self.conn = Some(open_connection(&self.path)?);
        }
        self.conn
            .as_ref()
            .ok_or_else(|| CherryTreeError::InvalidDocument("database is closed".to_string()))
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.connection()?;
        self.conn
            .as_mut()
            .ok_or_else(|| CherryTreeError::InvalidDocument("database is closed".to_string()))
    }

    fn db_id(&self, node_id: NodeId) -> NodeId {
        self.db_ids.get(&node_id).copied().unwrap_or(node_id)
    }

    fn write_all(
        conn: &mut Connection,
        tree: &TreeStore,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let tx = conn.transaction()?;
        let range = scope.range();
        let ids = scope.node_ids(tree);
        let in_scope: HashSet<NodeId> = ids.iter().copied().collect();
        let tops = scope.roots(tree);
        for node_id in &ids {
            cancel.check()?;
            let data = tree
                .get_node_from_id(*node_id)
                .ok_or(CherryTreeError::NodeNotFound(*node_id))?;
            let content = tree.content(*node_id).ok_or_else(|| missing_content(*node_id))?;
            let content = scoped_content(content, range)?;
            insert_node_row(&tx, data, &content)?;
            insert_widgets(&tx, *node_id, &content)?;

            let (father_id, sequence) = match tops.iter().position(|t| t == node_id) {
                Some(index) if !matches!(scope, ExportScope::All) => (0, index as i64 + 1),
                _ => {
                    let father = tree
                        .parent_of(*node_id)
                        .filter(|p| in_scope.contains(p))
                        .unwrap_or(0);
                    (father, data.sequence)
                }
            };
            tx.execute(
                "INSERT INTO children (node_id, father_id, sequence) VALUES(?,?,?)",
                params![node_id, father_id, sequence],
            )?;
        }
        if matches!(scope, ExportScope::All) {
            write_bookmarks(&tx, tree.bookmarks())?;
        }
        write_watermark(&tx, tree.max_issued_id())?;
        cancel.check()?;
        tx.commit()?;
        Ok(())
    }
}

impl StorageBackend for SqliteStorage {
    fn doc_type(&self) -> DocType {
        DocType::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn populate_tree(&mut self, tree: &mut TreeStore) -> Result<()> {
        let conn = self.connection()?;
        let watermark = read_watermark(conn)?;

        let mut nodes: HashMap<NodeId, NodeData> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT node_id, name, syntax, tags, is_ro, is_richtxt, level, ts_creation, ts_lastsave FROM node",
            )?;
            let rows = stmt.query_map([], |row| {
                let syntax: Option<String> = row.get(2)?;
                let mut data = NodeData::new(
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    Syntax::from_id(syntax.as_deref().unwrap_or_default()),
                );
                data.node_id = row.get(0)?;
                data.tags = row.get::<_, Option<String>>(3)?.unwrap_or_default();
                let (is_ro, custom_icon_id) = unpack_is_ro(row.get::<_, Option<i64>>(4)?.unwrap_or(0));
                data.is_ro = is_ro;
                data.custom_icon_id = custom_icon_id;
                let (is_bold, foreground) =
                    unpack_is_richtxt(row.get::<_, Option<i64>>(5)?.unwrap_or(0));
                data.is_bold = is_bold;
                data.foreground = foreground;
                let (exclude_me, exclude_children) =
                    unpack_level(row.get::<_, Option<i64>>(6)?.unwrap_or(0));
                data.exclude_me_from_search = exclude_me;
                data.exclude_children_from_search = exclude_children;
                data.ts_creation = row.get::<_, Option<i64>>(7)?.unwrap_or(0);
                data.ts_lastsave = row.get::<_, Option<i64>>(8)?.unwrap_or(0);
                Ok(data)
            })?;
            for data in rows {
                let data = data?;
                nodes.insert(data.node_id, data);
            }
        }

        let mut children: HashMap<NodeId, Vec<(NodeId, i64)>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT node_id, father_id, sequence FROM children ORDER BY father_id ASC, sequence ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, NodeId>(0)?,
                    row.get::<_, Option<NodeId>>(1)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                ))
            })?;
            for row in rows {
                let (node_id, father_id, sequence) = row?;
                children.entry(father_id).or_default().push((node_id, sequence));
            }
        }

        let bookmarks: Vec<NodeId> = {
            let mut stmt = conn.prepare("SELECT node_id FROM bookmark ORDER BY sequence ASC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        tree.note_issued_id(watermark);
        let mut visited = HashSet::new();
        let mut stack: Vec<(NodeId, i64, Option<NodeId>)> = children
            .get(&0)
            .map(|c| c.iter().rev().map(|(id, seq)| (*id, *seq, None)).collect())
            .unwrap_or_default();
        self.db_ids.clear();
        while let Some((db_id, sequence, parent)) = stack.pop() {
            if !visited.insert(db_id) {
                log::warn!("node {db_id} is linked more than once, ignoring repeat");
                continue;
            }
            let Some(mut data) = nodes.remove(&db_id) else {
                log::warn!("children row references missing node {db_id}");
                continue;
            };
            data.sequence = sequence;
            let node_id = tree.append_node(data, parent, DuplicateIdPolicy::Reassign)?;
            if node_id != db_id {
                self.db_ids.insert(node_id, db_id);
            }
            if let Some(kids) = children.get(&db_id) {
                stack.extend(kids.iter().rev().map(|(id, seq)| (*id, *seq, Some(node_id))));
            }
        }
        if !nodes.is_empty() {
            log::warn!("{} nodes are not linked into the tree", nodes.len());
        }
        tree.set_bookmarks(bookmarks);
        log::info!("loaded {} nodes from {}", tree.len(), self.path.display());
        Ok(())
    }

    fn load_node_content(&mut self, node_id: NodeId, syntax: &Syntax) -> Result<NodeContent> {
        let db_id = self.db_id(node_id);
        let conn = self.connection()?;
        let row: Option<(Option<String>, bool, bool, bool)> = conn
            .query_row(
                "SELECT txt, has_codebox, has_table, has_image FROM node WHERE node_id=?",
                [db_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get::<_, Option<bool>>(1)?.unwrap_or(false),
                        row.get::<_, Option<bool>>(2)?.unwrap_or(false),
                        row.get::<_, Option<bool>>(3)?.unwrap_or(false),
                    ))
                },
            )
            .optional()?;
        let Some((txt, has_codebox, has_table, has_image)) = row else {
            return Err(CherryTreeError::NodeNotFound(node_id));
        };
        let txt = txt.unwrap_or_default();
        if !syntax.is_rich_text() {
            return Ok(NodeContent::from_plain_text(txt));
        }

        let mut content = if txt.trim().is_empty() {
            NodeContent::new()
        } else {
            NodeContent::from_runs_xml_string(&txt)?
        };
        let codeboxes = if has_codebox { read_codeboxes(conn, db_id)? } else { Vec::new() };
        let grids = if has_table { read_grids(conn, db_id)? } else { Vec::new() };
        let images = if has_image { read_images(conn, db_id)? } else { Vec::new() };
        for widget in merge_by_key(vec![codeboxes, grids, images], |w| w.char_offset) {
            content.insert_widget(widget);
        }
        Ok(content)
    }

    fn save_full(
        &mut self,
        path: &Path,
        tree: &TreeStore,
        scope: &ExportScope,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let dir = parent_dir(path);
        std::fs::create_dir_all(&dir)?;
        let tmp = tempfile::Builder::new()
            .prefix(".ct_")
            .suffix(".ctb")
            .tempfile_in(&dir)?;
        {
            let mut conn = create_connection(tmp.path())?;
            Self::write_all(&mut conn, tree, scope, cancel)?;
        }
        cancel.check()?;

        let rebind = path == self.path && self.conn.is_some();
        if rebind {
            self.close();
        }
        tmp.persist(path).map_err(|e| CherryTreeError::Io(e.error))?;
        if rebind {
            self.conn = Some(open_connection(path)?);
        }
        log::debug!("wrote sqlite document {}", path.display());
        Ok(())
    }

    fn save_incremental(
        &mut self,
        tree: &TreeStore,
        pending: &SyncPending,
        cancel: &CancelFlag,
    ) -> Result<()> {
        if !self.db_ids.is_empty() {
            return Err(CherryTreeError::UnsupportedOperation(
                "renumbered nodes require a full save".to_string(),
            ));
        }
        let conn = self.connection_mut()?;
        let tx = conn.transaction()?;

        for node_id in pending.nodes_to_rm() {
            delete_widgets(&tx, *node_id)?;
            tx.execute("DELETE FROM node WHERE node_id=?", [node_id])?;
            tx.execute("DELETE FROM children WHERE node_id=?", [node_id])?;
        }

        for (node_id, state) in pending.nodes_to_write() {
            cancel.check()?;
            let Some(data) = tree.get_node_from_id(*node_id) else {
                log::warn!("pending write for unknown node {node_id}");
                continue;
            };
            if state.buff {
                let content = tree.content(*node_id).ok_or_else(|| missing_content(*node_id))?;
                if state.upd {
                    delete_widgets(&tx, *node_id)?;
                }
                if state.prop {
                    if state.upd {
                        tx.execute("DELETE FROM node WHERE node_id=?", [node_id])?;
                    }
                    insert_node_row(&tx, data, content)?;
                } else {
                    update_node_buffer(&tx, data, content)?;
                }
                insert_widgets(&tx, *node_id, content)?;
            } else if state.prop {
                update_node_props(&tx, data)?;
            }
            if state.hier {
                if state.upd {
                    tx.execute("DELETE FROM children WHERE node_id=?", [node_id])?;
                }
                tx.execute(
                    "INSERT INTO children (node_id, father_id, sequence) VALUES(?,?,?)",
                    params![node_id, tree.parent_of(*node_id).unwrap_or(0), data.sequence],
                )?;
            }
        }

        if pending.bookmarks_to_write() {
            write_bookmarks(&tx, tree.bookmarks())?;
        }
        write_watermark(&tx, tree.max_issued_id())?;
        cancel.check()?;
        tx.commit()?;
        log::debug!(
            "flushed {} writes and {} removals to {}",
            pending.nodes_to_write().len(),
            pending.nodes_to_rm().len(),
            self.path.display()
        );
        Ok(())
    }

    fn vacuum(&mut self) -> Result<()> {
        self.connection()?.execute_batch("VACUUM; REINDEX;")?;
        Ok(())
    }

    fn close(&mut self) {
        self.conn = None;
    }

    fn reopen(&mut self, path: &Path) -> Result<()> {
        self.close();
        self.path = path.to_path_buf();
        self.db_ids.clear();
        self.conn = Some(open_connection(path)?);
        Ok(())
    }
}

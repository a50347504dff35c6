//! Anchored widgets: non-text objects embedded at a char offset of a node buffer.
//!
//! Each widget occupies exactly one placeholder character of the buffer. The
//! set of kinds is closed; every serialisation site matches on [`WidgetKind`]
//! exhaustively.

use crate::core::blob_store::BlobStore;
use crate::core::xml_dom::XmlElement;
use crate::{CherryTreeError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// File name marking an image row or element that carries latex source.
pub const LATEX_SPECIAL_FILENAME: &str = "__ct_special.tex";

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique, monotonically increasing widget id.
pub fn next_unique_id() -> u64 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Horizontal placement of a widget within its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Justification {
    #[default]
    Left,
    Center,
    Right,
    Fill,
}

impl Justification {
    /// Parses a persisted value; empty or unknown values mean left.
    pub fn from_id(id: &str) -> Self {
        match id {
            "center" => Self::Center,
            "right" => Self::Right,
            "fill" => Self::Fill,
            _ => Self::Left,
        }
    }

    pub fn as_id(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
            Self::Fill => "fill",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePng {
    pub raw_blob: Vec<u8>,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnchor {
    pub anchor_name: String,
}

/// A file attached inside the buffer.
#[derive(Debug, Clone)]
pub struct ImageEmbFile {
    pub file_name: String,
    pub raw_blob: Vec<u8>,
    /// Seconds since the epoch when the file was embedded.
    pub time: i64,
    unique_id: u64,
}

impl ImageEmbFile {
    pub fn new(file_name: impl Into<String>, raw_blob: Vec<u8>, time: i64) -> Self {
        Self {
            file_name: file_name.into(),
            raw_blob,
            time,
            unique_id: next_unique_id(),
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }
}

impl PartialEq for ImageEmbFile {
    fn eq(&self, other: &Self) -> bool {
        self.file_name == other.file_name && self.raw_blob == other.raw_blob && self.time == other.time
    }
}

/// A latex formula; the persisted form is the source text.
#[derive(Debug, Clone)]
pub struct ImageLatex {
    pub latex_text: String,
    unique_id: u64,
}

impl ImageLatex {
    pub fn new(latex_text: impl Into<String>) -> Self {
        Self {
            latex_text: latex_text.into(),
            unique_id: next_unique_id(),
        }
    }

    /// Key of the rendered raster in a [`LatexRenderCache`].
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }
}

impl PartialEq for ImageLatex {
    fn eq(&self, other: &Self) -> bool {
        self.latex_text == other.latex_text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBox {
    pub text: String,
    pub syntax: String,
    pub frame_width: i64,
    pub frame_height: i64,
    pub width_in_pixels: bool,
    pub highlight_brackets: bool,
    pub show_line_numbers: bool,
}

impl CodeBox {
    pub fn new(text: impl Into<String>, syntax: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            syntax: syntax.into(),
            frame_width: 500,
            frame_height: 100,
            width_in_pixels: true,
            highlight_brackets: true,
            show_line_numbers: false,
        }
    }
}

/// A cell type a [`Table`] can hold.
pub trait TableCell: Clone + PartialEq + std::fmt::Debug {
    fn text(&self) -> &str;
    fn from_text(text: &str) -> Self;
}

impl TableCell for String {
    fn text(&self) -> &str {
        self
    }

    fn from_text(text: &str) -> Self {
        text.to_string()
    }
}

/// A cell of a heavy table, edited as its own small buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RichCell {
    pub text: String,
}

impl TableCell for RichCell {
    fn text(&self) -> &str {
        &self.text
    }

    fn from_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

/// A matrix of cells whose first row is the header.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<C: TableCell> {
    rows: Vec<Vec<C>>,
    col_width_default: i64,
    col_widths: Vec<i64>,
}

impl<C: TableCell> Table<C> {
    /// Builds a table from rows whose first entry is the header.
    ///
    /// Short rows are padded with empty cells to the widest row.
    pub fn new(mut rows: Vec<Vec<C>>, col_width_default: i64, col_widths: Vec<i64>) -> Self {
        if rows.is_empty() {
            rows.push(vec![C::from_text("")]);
        }
        let cols = rows.iter().map(Vec::len).max().unwrap_or(1).max(1);
        for row in &mut rows {
            row.resize_with(cols, || C::from_text(""));
        }
        Self {
            rows,
            col_width_default,
            col_widths,
        }
    }

    /// An empty `rows` x `cols` table.
    pub fn with_size(rows: usize, cols: usize, col_width_default: i64) -> Self {
        let matrix = (0..rows.max(1))
            .map(|_| (0..cols.max(1)).map(|_| C::from_text("")).collect())
            .collect();
        Self::new(matrix, col_width_default, Vec::new())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn rows(&self) -> &[Vec<C>] {
        &self.rows
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&C> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn set_cell_text(&mut self, row: usize, col: usize, text: &str) -> bool {
        match self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = C::from_text(text);
                true
            }
            None => false,
        }
    }

    pub fn col_width_default(&self) -> i64 {
        self.col_width_default
    }

    /// Per-column overrides; may be shorter than the column count.
    pub fn col_widths(&self) -> &[i64] {
        &self.col_widths
    }

    /// Effective width of `col`: its override when non-zero, else the default.
    pub fn col_width(&self, col: usize) -> i64 {
        match self.col_widths.get(col) {
            Some(&w) if w > 0 => w,
            _ => self.col_width_default,
        }
    }

    pub fn set_col_width(&mut self, col: usize, width: i64) {
        if col >= self.num_columns() {
            return;
        }
        if self.col_widths.len() <= col {
            self.col_widths.resize(self.num_columns(), 0);
        }
        self.col_widths[col] = width;
    }

    /// Inserts an empty row after `after` (or at the end when out of range).
    pub fn row_add(&mut self, after: usize) {
        let row = (0..self.num_columns()).map(|_| C::from_text("")).collect();
        let at = (after + 1).min(self.rows.len());
        self.rows.insert(at, row);
    }

    /// Deletes a row; the last remaining row is kept.
    pub fn row_delete(&mut self, row: usize) -> bool {
        if row >= self.rows.len() || self.rows.len() == 1 {
            return false;
        }
        self.rows.remove(row);
        true
    }

    pub fn row_move_up(&mut self, row: usize) -> bool {
        if row == 0 || row >= self.rows.len() {
            return false;
        }
        self.rows.swap(row - 1, row);
        true
    }

    pub fn row_move_down(&mut self, row: usize) -> bool {
        if row + 1 >= self.rows.len() {
            return false;
        }
        self.rows.swap(row, row + 1);
        true
    }

    /// Inserts an empty column after `after` (or at the end when out of range).
    pub fn column_add(&mut self, after: usize) {
        let at = (after + 1).min(self.num_columns());
        for row in &mut self.rows {
            row.insert(at, C::from_text(""));
        }
        if at < self.col_widths.len() {
            self.col_widths.insert(at, 0);
        }
    }

    /// Deletes a column; the last remaining column is kept.
    pub fn column_delete(&mut self, col: usize) -> bool {
        if col >= self.num_columns() || self.num_columns() == 1 {
            return false;
        }
        for row in &mut self.rows {
            row.remove(col);
        }
        if col < self.col_widths.len() {
            self.col_widths.remove(col);
        }
        true
    }

    pub fn column_move_left(&mut self, col: usize) -> bool {
        if col == 0 || col >= self.num_columns() {
            return false;
        }
        self.swap_columns(col - 1, col);
        true
    }

    pub fn column_move_right(&mut self, col: usize) -> bool {
        if col + 1 >= self.num_columns() {
            return false;
        }
        self.swap_columns(col, col + 1);
        true
    }

    fn swap_columns(&mut self, a: usize, b: usize) {
        for row in &mut self.rows {
            row.swap(a, b);
        }
        if a < self.col_widths.len() && b < self.col_widths.len() {
            self.col_widths.swap(a, b);
        }
    }

    /// Serialised `<table>` body; the header row is written last.
    pub fn to_element(&self, is_light: bool) -> XmlElement {
        let mut table = XmlElement::new("table");
        table.set_attr("col_widths", join_numbers(&self.col_widths));
        if is_light {
            table.set_attr("is_light", "1");
        }
        for row in self.rows.iter().skip(1).chain(self.rows.first()) {
            let row_el = table.add_child(XmlElement::new("row"));
            for cell in row {
                row_el.add_child(XmlElement::new("cell")).add_text(cell.text());
            }
        }
        table
    }

    /// Inverse of [`Table::to_element`]: the last `<row>` becomes the header.
    pub fn from_element(el: &XmlElement, col_width_default: i64) -> Self {
        let mut rows: Vec<Vec<C>> = el
            .elements_named("row")
            .map(|row| row.elements_named("cell").map(|c| C::from_text(&c.text())).collect())
            .collect();
        if let Some(header) = rows.pop() {
            rows.insert(0, header);
        }
        let col_widths = split_numbers(el.attr_or_empty("col_widths"));
        Self::new(rows, col_width_default, col_widths)
    }
}

fn join_numbers(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_numbers(csv: &str) -> Vec<i64> {
    csv.split(',')
        .filter_map(|v| v.trim().parse().ok())
        .collect()
}

/// The payload of an anchored widget.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetKind {
    ImagePng(ImagePng),
    ImageAnchor(ImageAnchor),
    ImageEmbFile(ImageEmbFile),
    ImageLatex(ImageLatex),
    CodeBox(CodeBox),
    TableLight(Table<String>),
    TableHeavy(Table<RichCell>),
}

/// A widget placed at a char offset of its owning node's buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchoredWidget {
    pub char_offset: i64,
    pub justification: Justification,
    pub kind: WidgetKind,
}

impl AnchoredWidget {
    pub fn new(char_offset: i64, justification: Justification, kind: WidgetKind) -> Self {
        Self {
            char_offset,
            justification,
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            WidgetKind::ImagePng(_) => "ImagePng",
            WidgetKind::ImageAnchor(_) => "ImageAnchor",
            WidgetKind::ImageEmbFile(_) => "ImageEmbFile",
            WidgetKind::ImageLatex(_) => "ImageLatex",
            WidgetKind::CodeBox(_) => "CodeBox",
            WidgetKind::TableLight(_) => "TableLight",
            WidgetKind::TableHeavy(_) => "TableHeavy",
        }
    }

    /// True for every kind persisted in the `image` table.
    pub fn is_image(&self) -> bool {
        matches!(
            self.kind,
            WidgetKind::ImagePng(_)
                | WidgetKind::ImageAnchor(_)
                | WidgetKind::ImageEmbFile(_)
                | WidgetKind::ImageLatex(_)
        )
    }

    pub fn is_table(&self) -> bool {
        matches!(self.kind, WidgetKind::TableLight(_) | WidgetKind::TableHeavy(_))
    }

    pub fn is_codebox(&self) -> bool {
        matches!(self.kind, WidgetKind::CodeBox(_))
    }

    /// Immutable snapshot for undo history.
    pub fn get_state(&self) -> WidgetState {
        WidgetState(self.clone())
    }

    /// Appends this widget as a child element of `parent`.
    ///
    /// With a blob store, binary payloads are written to it and referenced by
    /// hash; without one they are inlined as base64.
    pub fn to_xml(
        &self,
        parent: &mut XmlElement,
        offset_adjustment: i64,
        blobs: Option<&BlobStore>,
    ) -> Result<()> {
        let offset = (self.char_offset + offset_adjustment).to_string();
        let justification = self.justification.as_id();
        match &self.kind {
            WidgetKind::ImagePng(png) => {
                let el = parent.add_child(XmlElement::new("encoded_png"));
                el.set_attr("char_offset", offset);
                el.set_attr("justification", justification);
                el.set_attr("link", png.link.as_str());
                put_payload(el, &png.raw_blob, blobs)?;
            }
            WidgetKind::ImageAnchor(anchor) => {
                let el = parent.add_child(XmlElement::new("encoded_png"));
                el.set_attr("char_offset", offset);
                el.set_attr("justification", justification);
                el.set_attr("anchor", anchor.anchor_name.as_str());
            }
            WidgetKind::ImageEmbFile(file) => {
                let el = parent.add_child(XmlElement::new("encoded_png"));
                el.set_attr("char_offset", offset);
                el.set_attr("justification", justification);
                el.set_attr("filename", file.file_name.as_str());
                el.set_attr("time", file.time.to_string());
                put_payload(el, &file.raw_blob, blobs)?;
            }
            WidgetKind::ImageLatex(latex) => {
                let el = parent.add_child(XmlElement::new("encoded_png"));
                el.set_attr("char_offset", offset);
                el.set_attr("justification", justification);
                el.set_attr("filename", LATEX_SPECIAL_FILENAME);
                el.add_text(latex.latex_text.as_str());
            }
            WidgetKind::CodeBox(codebox) => {
                let el = parent.add_child(XmlElement::new("codebox"));
                el.set_attr("char_offset", offset);
                el.set_attr("justification", justification);
                el.set_attr("frame_width", codebox.frame_width.to_string());
                el.set_attr("frame_height", codebox.frame_height.to_string());
                el.set_attr("width_in_pixels", bool_attr(codebox.width_in_pixels));
                el.set_attr("syntax_highlighting", codebox.syntax.as_str());
                el.set_attr("highlight_brackets", bool_attr(codebox.highlight_brackets));
                el.set_attr("show_line_numbers", bool_attr(codebox.show_line_numbers));
                el.add_text(codebox.text.as_str());
            }
            WidgetKind::TableLight(table) => {
                parent.add_child(table_element(table, true, &offset, justification));
            }
            WidgetKind::TableHeavy(table) => {
                parent.add_child(table_element(table, false, &offset, justification));
            }
        }
        Ok(())
    }

    /// Parses a widget element; returns `None` for elements that are not widgets.
    ///
    /// # Errors
    ///
    /// Returns [`CherryTreeError::MissingBlob`] when a hash-referenced payload
    /// is absent and [`CherryTreeError::Parse`] for undecodable base64.
    pub fn from_xml(el: &XmlElement, blobs: Option<&BlobStore>) -> Result<Option<Self>> {
        let char_offset = el.attr_i64("char_offset", 0);
        let justification = Justification::from_id(el.attr_or_empty("justification"));
        let kind = match el.name.as_str() {
            "encoded_png" => image_from_xml(el, blobs)?,
            "codebox" => WidgetKind::CodeBox(CodeBox {
                text: el.text(),
                syntax: el.attr_or_empty("syntax_highlighting").to_string(),
                frame_width: el.attr_i64("frame_width", 500),
                frame_height: el.attr_i64("frame_height", 100),
                width_in_pixels: el.attr_bool("width_in_pixels"),
                highlight_brackets: el.attr_bool("highlight_brackets"),
                show_line_numbers: el.attr_bool("show_line_numbers"),
            }),
            "table" => {
                let col_width_default = el.attr_i64("col_max", 60);
                if el.attr_bool("is_light") {
                    WidgetKind::TableLight(Table::from_element(el, col_width_default))
                } else {
                    WidgetKind::TableHeavy(Table::from_element(el, col_width_default))
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(Self::new(char_offset, justification, kind)))
    }

    /// Inserts this widget's row for `node_id`; returns false when the insert fails.
    pub fn to_sqlite(&self, conn: &Connection, node_id: i64, offset_adjustment: i64) -> bool {
        let offset = self.char_offset + offset_adjustment;
        let justification = self.justification.as_id();
        let outcome = match &self.kind {
            WidgetKind::ImagePng(png) => conn.execute(
                "INSERT INTO image VALUES(?,?,?,?,?,?,?,?)",
                rusqlite::params![node_id, offset, justification, "", png.raw_blob, "", png.link, 0],
            ),
            WidgetKind::ImageAnchor(anchor) => conn.execute(
                "INSERT INTO image VALUES(?,?,?,?,?,?,?,?)",
                rusqlite::params![
                    node_id,
                    offset,
                    justification,
                    anchor.anchor_name,
                    Vec::<u8>::new(),
                    "",
                    "",
                    0
                ],
            ),
            WidgetKind::ImageEmbFile(file) => conn.execute(
                "INSERT INTO image VALUES(?,?,?,?,?,?,?,?)",
                rusqlite::params![
                    node_id,
                    offset,
                    justification,
                    "",
                    file.raw_blob,
                    file.file_name,
                    "",
                    file.time
                ],
            ),
            WidgetKind::ImageLatex(latex) => conn.execute(
                "INSERT INTO image VALUES(?,?,?,?,?,?,?,?)",
                rusqlite::params![
                    node_id,
                    offset,
                    justification,
                    "",
                    latex.latex_text.as_bytes(),
                    LATEX_SPECIAL_FILENAME,
                    "",
                    0
                ],
            ),
            WidgetKind::CodeBox(codebox) => conn.execute(
                "INSERT INTO codebox VALUES(?,?,?,?,?,?,?,?,?,?)",
                rusqlite::params![
                    node_id,
                    offset,
                    justification,
                    codebox.text,
                    codebox.syntax,
                    codebox.frame_width,
                    codebox.frame_height,
                    codebox.width_in_pixels,
                    codebox.highlight_brackets,
                    codebox.show_line_numbers
                ],
            ),
            WidgetKind::TableLight(table) => insert_grid(conn, node_id, offset, justification, table, true),
            WidgetKind::TableHeavy(table) => insert_grid(conn, node_id, offset, justification, table, false),
        };
        match outcome {
            Ok(_) => true,
            Err(e) => {
                log::error!("failed to write {} of node {node_id}: {e}", self.type_name());
                false
            }
        }
    }
}

fn bool_attr(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn table_element<C: TableCell>(
    table: &Table<C>,
    is_light: bool,
    offset: &str,
    justification: &str,
) -> XmlElement {
    let body = table.to_element(is_light);
    let mut el = XmlElement::new("table");
    el.set_attr("char_offset", offset);
    el.set_attr("justification", justification);
    el.set_attr("col_min", table.col_width_default().to_string());
    el.set_attr("col_max", table.col_width_default().to_string());
    el.attrs.extend(body.attrs);
    el.children = body.children;
    el
}

fn insert_grid<C: TableCell>(
    conn: &Connection,
    node_id: i64,
    offset: i64,
    justification: &str,
    table: &Table<C>,
    is_light: bool,
) -> rusqlite::Result<usize> {
    let txt = crate::core::xml_dom::write_document(&table.to_element(is_light))
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO grid VALUES(?,?,?,?,?,?)",
        rusqlite::params![
            node_id,
            offset,
            justification,
            txt,
            table.col_width_default(),
            table.col_width_default()
        ],
    )
}

fn put_payload(el: &mut XmlElement, bytes: &[u8], blobs: Option<&BlobStore>) -> Result<()> {
    match blobs {
        Some(store) => {
            let hash = store.put(bytes)?;
            el.set_attr("sha256sum", hash);
        }
        None => el.add_text(BASE64.encode(bytes)),
    }
    Ok(())
}

fn get_payload(el: &XmlElement, blobs: Option<&BlobStore>) -> Result<Vec<u8>> {
    match blobs {
        Some(store) => store.get(el.attr_or_empty("sha256sum")),
        None => {
            let encoded: String = el.text().chars().filter(|c| !c.is_whitespace()).collect();
            BASE64
                .decode(encoded)
                .map_err(|e| CherryTreeError::Parse(format!("bad base64 payload: {e}")))
        }
    }
}

fn image_from_xml(el: &XmlElement, blobs: Option<&BlobStore>) -> Result<WidgetKind> {
    let anchor_name = el.attr_or_empty("anchor");
    if !anchor_name.is_empty() {
        return Ok(WidgetKind::ImageAnchor(ImageAnchor {
            anchor_name: anchor_name.to_string(),
        }));
    }
    let file_name = el.attr_or_empty("filename");
    if file_name == LATEX_SPECIAL_FILENAME {
        return Ok(WidgetKind::ImageLatex(ImageLatex::new(el.text())));
    }
    let raw_blob = get_payload(el, blobs)?;
    if !file_name.is_empty() {
        return Ok(WidgetKind::ImageEmbFile(ImageEmbFile::new(
            file_name,
            raw_blob,
            el.attr_i64("time", 0),
        )));
    }
    Ok(WidgetKind::ImagePng(ImagePng {
        raw_blob,
        link: el.attr_or_empty("link").to_string(),
    }))
}

/// A comparable, immutable snapshot of a widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetState(AnchoredWidget);

impl WidgetState {
    /// Reconstitutes a live widget equal to the one snapshotted.
    pub fn to_widget(&self) -> AnchoredWidget {
        self.0.clone()
    }

    pub fn char_offset(&self) -> i64 {
        self.0.char_offset
    }
}

/// External renderer turning latex source into a raster image.
pub trait LatexRenderer {
    fn render(&self, latex_text: &str) -> Result<Vec<u8>>;
}

/// Rendered latex rasters keyed by widget unique id.
///
/// A cached raster is reused while the source text is unchanged and is never
/// rendered again speculatively.
#[derive(Debug, Default)]
pub struct LatexRenderCache {
    entries: HashMap<u64, (String, Vec<u8>)>,
}

impl LatexRenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_render(&mut self, latex: &ImageLatex, renderer: &dyn LatexRenderer) -> Result<&[u8]> {
        let fresh = matches!(
            self.entries.get(&latex.unique_id()),
            Some((source, _)) if *source == latex.latex_text
        );
        if !fresh {
            let raster = renderer.render(&latex.latex_text)?;
            self.entries
                .insert(latex.unique_id(), (latex.latex_text.clone(), raster));
        }
        match self.entries.get(&latex.unique_id()) {
            Some((_, raster)) => Ok(raster.as_slice()),
            None => Err(CherryTreeError::Parse("latex cache entry vanished".to_string())),
        }
    }

    pub fn evict(&mut self, unique_id: u64) {
        self.entries.remove(&unique_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

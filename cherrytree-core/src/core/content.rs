//! Node buffers: attributed text runs interleaved with anchored widgets.
//!
//! Offsets are buffer offsets in chars, where every widget counts as one
//! placeholder char. Run text never contains those placeholders.

use crate::core::blob_store::BlobStore;
use crate::core::widget::AnchoredWidget;
use crate::core::xml_dom::{self, XmlElement};
use crate::{CherryTreeError, Result};
use std::collections::BTreeMap;

/// Attribute names a `<rich_text>` element may carry.
pub const TAG_PROPERTIES: [&str; 11] = [
    "weight",
    "foreground",
    "background",
    "style",
    "underline",
    "strikethrough",
    "scale",
    "family",
    "justification",
    "link",
    "indent",
];

pub type TextAttributes = BTreeMap<String, String>;

/// A span of text sharing one attribute set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextRun {
    pub text: String,
    pub attrs: TextAttributes,
}

/// The serialisation-ready snapshot of one node buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeContent {
    runs: Vec<TextRun>,
    widgets: Vec<AnchoredWidget>,
}

fn char_slice(s: &str, start: usize, end: usize) -> &str {
    let mut indices = s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len()));
    let from = indices.nth(start).unwrap_or(s.len());
    let to = if end > start {
        indices.nth(end - start - 1).unwrap_or(s.len())
    } else {
        from
    };
    &s[from..to]
}

impl NodeContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer holding `text` with no attributes, as used by plain and code nodes.
    pub fn from_plain_text(text: impl Into<String>) -> Self {
        let mut content = Self::new();
        content.push_text(text, TextAttributes::new());
        content
    }

    /// Appends text, merging with the last run when the attributes match.
    pub fn push_text(&mut self, text: impl Into<String>, attrs: TextAttributes) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        match self.runs.last_mut() {
            Some(last) if last.attrs == attrs => last.text.push_str(&text),
            _ => self.runs.push(TextRun { text, attrs }),
        }
    }

    /// Inserts a widget keeping widgets ordered by offset; ties keep insertion order.
    pub fn insert_widget(&mut self, widget: AnchoredWidget) {
        let at = self
            .widgets
            .partition_point(|w| w.char_offset <= widget.char_offset);
        self.widgets.insert(at, widget);
    }

    pub fn runs(&self) -> &[TextRun] {
        &self.runs
    }

    pub fn widgets(&self) -> &[AnchoredWidget] {
        &self.widgets
    }

    pub fn widgets_mut(&mut self) -> &mut Vec<AnchoredWidget> {
        &mut self.widgets
    }

    /// Text of all runs, without widget placeholders.
    pub fn text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }

    pub fn text_char_count(&self) -> usize {
        self.runs.iter().map(|r| r.text.chars().count()).sum()
    }

    /// Buffer length including one placeholder per widget.
    pub fn char_count(&self) -> usize {
        self.text_char_count() + self.widgets.len()
    }

    pub fn has_codebox(&self) -> bool {
        self.widgets.iter().any(AnchoredWidget::is_codebox)
    }

    pub fn has_table(&self) -> bool {
        self.widgets.iter().any(AnchoredWidget::is_table)
    }

    pub fn has_image(&self) -> bool {
        self.widgets.iter().any(AnchoredWidget::is_image)
    }

    /// Maps a buffer offset to an offset into the run text.
    fn text_offset(&self, buffer_offset: i64) -> usize {
        let before = self
            .widgets
            .iter()
            .filter(|w| w.char_offset < buffer_offset)
            .count() as i64;
        (buffer_offset - before).max(0) as usize
    }

    /// Widgets whose placeholder lies in `[start, end)`; `end < 0` means buffer end.
    pub fn widgets_in_range(&self, start: i64, end: i64) -> impl Iterator<Item = &AnchoredWidget> {
        self.widgets
            .iter()
            .filter(move |w| w.char_offset >= start && (end < 0 || w.char_offset < end))
    }

    /// Appends `<rich_text>` and widget elements for `[start, end)` in buffer order.
    ///
    /// `end < 0` means the end of the buffer. Widget offsets are written
    /// relative to `start`.
    pub fn write_elements(
        &self,
        parent: &mut XmlElement,
        start: i64,
        end: i64,
        blobs: Option<&BlobStore>,
    ) -> Result<()> {
        let end = if end < 0 { self.char_count() as i64 } else { end };
        let t_start = self.text_offset(start);
        let t_end = self.text_offset(end);
        let anchored: Vec<(usize, &AnchoredWidget)> = self
            .widgets
            .iter()
            .enumerate()
            .filter(|(_, w)| w.char_offset >= start && w.char_offset < end)
            .map(|(i, w)| ((w.char_offset - i as i64).max(0) as usize, w))
            .collect();
        let mut next = 0;
        let mut pos = 0;
        for run in &self.runs {
            let run_len = run.text.chars().count();
            let run_end = pos + run_len;
            let mut cur = pos.max(t_start);
            let stop = run_end.min(t_end);
            while cur < stop {
                while next < anchored.len() && anchored[next].0 <= cur {
                    anchored[next].1.to_xml(parent, -start, blobs)?;
                    next += 1;
                }
                let brk = anchored
                    .get(next)
                    .map(|(p, _)| *p)
                    .filter(|p| *p < stop)
                    .unwrap_or(stop);
                let el = parent.add_child(rich_text_element(&run.attrs));
                el.add_text(char_slice(&run.text, cur - pos, brk - pos));
                cur = brk;
            }
            pos = run_end;
        }
        for (_, widget) in &anchored[next..] {
            widget.to_xml(parent, -start, blobs)?;
        }
        Ok(())
    }

    /// Builds a buffer from the `<rich_text>` and widget children of `el`.
    ///
    /// Widgets whose blob is missing are skipped with a warning.
    pub fn from_element(el: &XmlElement, blobs: Option<&BlobStore>) -> Result<Self> {
        let mut content = Self::new();
        for child in el.elements() {
            if child.name == "rich_text" {
                let attrs = child
                    .attrs
                    .iter()
                    .filter(|(k, v)| TAG_PROPERTIES.contains(&k.as_str()) && !v.is_empty())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                content.push_text(child.text(), attrs);
                continue;
            }
            match AnchoredWidget::from_xml(child, blobs) {
                Ok(Some(widget)) => content.insert_widget(widget),
                Ok(None) => {}
                Err(CherryTreeError::MissingBlob(hash)) => {
                    log::warn!("skipping {} widget, blob {hash} not found", child.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(content)
    }

    /// The runs alone serialised under a `<node>` root; widgets are not included.
    pub fn runs_to_xml_string(&self) -> Result<String> {
        let mut root = XmlElement::new("node");
        for run in &self.runs {
            root.add_child(rich_text_element(&run.attrs)).add_text(run.text.as_str());
        }
        xml_dom::write_document(&root)
    }

    /// Inverse of [`NodeContent::runs_to_xml_string`].
    pub fn from_runs_xml_string(xml: &str) -> Result<Self> {
        let root = xml_dom::parse_with_recovery(xml.as_bytes())?;
        Self::from_element(&root, None)
    }
}

fn rich_text_element(attrs: &TextAttributes) -> XmlElement {
    let mut el = XmlElement::new("rich_text");
    for (k, v) in attrs {
        if !v.is_empty() {
            el.set_attr(k, v.as_str());
        }
    }
    el
}

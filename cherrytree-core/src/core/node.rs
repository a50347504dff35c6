//! Node properties and the packed integer encodings used by the SQLite container.

use serde::{Deserialize, Serialize};

/// Identifier of a node, unique within one document and never reused.
pub type NodeId = i64;

/// Syntax id persisted for rich-text nodes.
pub const SYNTAX_RICH_TEXT: &str = "custom-colors";
/// Syntax id persisted for plain-text nodes.
pub const SYNTAX_PLAIN_TEXT: &str = "plain-text";

/// How a node's buffer is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Syntax {
    /// Formatted text runs interleaved with anchored widgets.
    RichText,
    /// Unformatted text.
    PlainText,
    /// Source code highlighted with the named language.
    Code(String),
}

impl Syntax {
    /// Parses a persisted syntax id; empty ids fall back to rich text.
    pub fn from_id(id: &str) -> Self {
        match id {
            SYNTAX_RICH_TEXT | "" => Self::RichText,
            SYNTAX_PLAIN_TEXT => Self::PlainText,
            other => Self::Code(other.to_string()),
        }
    }

    pub fn as_id(&self) -> &str {
        match self {
            Self::RichText => SYNTAX_RICH_TEXT,
            Self::PlainText => SYNTAX_PLAIN_TEXT,
            Self::Code(lang) => lang,
        }
    }

    pub fn is_rich_text(&self) -> bool {
        matches!(self, Self::RichText)
    }
}

/// The properties of one tree node, excluding its buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub node_id: NodeId,
    pub name: String,
    pub syntax: Syntax,
    /// Space separated tag tokens.
    pub tags: String,
    pub is_ro: bool,
    pub is_bold: bool,
    /// `#rrggbb`, when the node name has a custom colour.
    pub foreground: Option<String>,
    pub custom_icon_id: u32,
    pub ts_creation: i64,
    pub ts_lastsave: i64,
    /// 1-based position among siblings; gaps are tolerated.
    pub sequence: i64,
    pub exclude_me_from_search: bool,
    pub exclude_children_from_search: bool,
}

impl NodeData {
    /// Creates node properties stamped with the current time. The id is assigned on append.
    pub fn new(name: impl Into<String>, syntax: Syntax) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            node_id: 0,
            name: name.into(),
            syntax,
            tags: String::new(),
            is_ro: false,
            is_bold: false,
            foreground: None,
            custom_icon_id: 0,
            ts_creation: now,
            ts_lastsave: now,
            sequence: 0,
            exclude_me_from_search: false,
            exclude_children_from_search: false,
        }
    }

    /// Tag tokens in their stored order.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags.split_whitespace().collect()
    }
}

/// Packs the read-only flag with the custom icon id (`is_ro` column).
pub fn pack_is_ro(is_ro: bool, custom_icon_id: u32) -> i64 {
    i64::from(is_ro) | (i64::from(custom_icon_id) << 1)
}

/// Inverse of [`pack_is_ro`].
pub fn unpack_is_ro(packed: i64) -> (bool, u32) {
    (packed & 0x01 != 0, ((packed >> 1) & 0xffff_ffff) as u32)
}

/// Packs rich-text, bold and foreground colour (`is_richtxt` column).
///
/// Bit 0 rich text, bit 1 bold, bit 2 foreground present, bits 3.. the rgb24 value.
pub fn pack_is_richtxt(data: &NodeData) -> i64 {
    let mut packed = i64::from(data.syntax.is_rich_text());
    if data.is_bold {
        packed |= 0x02;
    }
    if let Some(rgb) = data.foreground.as_deref().and_then(rgb24_from_hex) {
        packed |= 0x04;
        packed |= i64::from(rgb) << 3;
    }
    packed
}

/// Inverse of [`pack_is_richtxt`]: `(is_bold, foreground)`.
pub fn unpack_is_richtxt(packed: i64) -> (bool, Option<String>) {
    let is_bold = (packed >> 1) & 0x01 != 0;
    let foreground = if (packed >> 2) & 0x01 != 0 {
        Some(hex_from_rgb24(((packed >> 3) & 0xff_ffff) as u32))
    } else {
        None
    };
    (is_bold, foreground)
}

/// Packs the exclude-from-search flags (`level` column).
pub fn pack_level(data: &NodeData) -> i64 {
    let mut packed = i64::from(data.exclude_me_from_search);
    if data.exclude_children_from_search {
        packed |= 0x02;
    }
    packed
}

/// Inverse of [`pack_level`]: `(exclude_me, exclude_children)`.
pub fn unpack_level(packed: i64) -> (bool, bool) {
    (packed & 0x01 != 0, packed & 0x02 != 0)
}

/// Parses `#rrggbb` (or `#rrrrggggbbbb`, keeping the high bytes) into an rgb24 integer.
pub fn rgb24_from_hex(color: &str) -> Option<u32> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    match hex.len() {
        6 => u32::from_str_radix(hex, 16).ok(),
        12 => {
            let r = u32::from_str_radix(hex.get(0..2)?, 16).ok()?;
            let g = u32::from_str_radix(hex.get(4..6)?, 16).ok()?;
            let b = u32::from_str_radix(hex.get(8..10)?, 16).ok()?;
            Some((r << 16) | (g << 8) | b)
        }
        _ => None,
    }
}

pub fn hex_from_rgb24(rgb: u32) -> String {
    format!("#{:06x}", rgb & 0xff_ffff)
}

//! Minimal owned XML tree built on `quick-xml`, shared by every backend.

use crate::{CherryTreeError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// A child of an [`XmlElement`].
#[derive(Debug, Clone, PartialEq)]
pub enum XmlChild {
    Element(XmlElement),
    Text(String),
}

/// An element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlChild>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Sets an attribute, replacing any previous value for the same key.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, or the empty string when absent.
    pub fn attr_or_empty(&self, key: &str) -> &str {
        self.attr(key).unwrap_or("")
    }

    /// Integer attribute; absent or malformed values give `default`.
    pub fn attr_i64(&self, key: &str, default: i64) -> i64 {
        self.attr(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Boolean attribute written as `0`/`1` or `False`/`True`.
    pub fn attr_bool(&self, key: &str) -> bool {
        matches!(
            self.attr(key).map(str::trim),
            Some("1") | Some("True") | Some("true")
        )
    }

    /// Appends a child element and returns a handle to it.
    pub fn add_child(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(XmlChild::Element(child));
        match self.children.last_mut() {
            Some(XmlChild::Element(el)) => el,
            _ => unreachable!("an element was just pushed"),
        }
    }

    pub fn add_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(XmlChild::Text(text));
        }
    }

    /// Concatenated direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlChild::Text(t) => Some(t.as_str()),
                XmlChild::Element(_) => None,
            })
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlChild::Element(el) => Some(el),
            XmlChild::Text(_) => None,
        })
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |el| el.name == name)
    }

    pub fn first_named(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.name == name)
    }
}

fn is_forbidden_char(c: char) -> bool {
    (c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r')) || c == '\u{FFFE}' || c == '\u{FFFF}'
}

/// Removes characters that XML 1.0 cannot carry.
pub fn strip_forbidden_chars(text: &str) -> String {
    text.chars().filter(|c| !is_forbidden_char(*c)).collect()
}

fn checked_text(text: &str, lenient: bool) -> Result<String> {
    if text.chars().any(is_forbidden_char) {
        if lenient {
            return Ok(strip_forbidden_chars(text));
        }
        return Err(CherryTreeError::Parse(
            "control character not allowed in XML".to_string(),
        ));
    }
    Ok(text.to_string())
}

fn element_from_start(start: &BytesStart, lenient: bool) -> Result<XmlElement> {
    let mut el = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = checked_text(&attr.unescape_value()?, lenient)?;
        el.attrs.push((key, value));
    }
    Ok(el)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, el: XmlElement) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlChild::Element(el));
        return Ok(());
    }
    if root.is_some() {
        return Err(CherryTreeError::Parse("more than one root element".to_string()));
    }
    *root = Some(el);
    Ok(())
}

/// Parses a whole document and returns its root element.
///
/// With `lenient` set, forbidden control characters are dropped instead of
/// failing the parse.
pub fn parse_document(text: &str, lenient: bool) -> Result<XmlElement> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(element_from_start(&e, lenient)?),
            Event::Empty(e) => {
                let el = element_from_start(&e, lenient)?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack.pop().ok_or_else(|| {
                    CherryTreeError::Parse("unbalanced closing tag".to_string())
                })?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                match stack.last_mut() {
                    Some(parent) => parent.add_text(checked_text(&text, lenient)?),
                    None if text.trim().is_empty() => {}
                    None => {
                        return Err(CherryTreeError::Parse(
                            "text outside the root element".to_string(),
                        ))
                    }
                }
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.add_text(checked_text(&text, lenient)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(CherryTreeError::Parse("unclosed element".to_string()));
    }
    root.ok_or_else(|| CherryTreeError::Parse("no root element".to_string()))
}

/// Parses raw bytes, retrying with forced-valid UTF-8 and then with
/// control characters stripped.
pub fn parse_with_recovery(bytes: &[u8]) -> Result<XmlElement> {
    let first_err = match std::str::from_utf8(bytes) {
        Ok(text) => match parse_document(text, false) {
            Ok(root) => return Ok(root),
            Err(e) => e,
        },
        Err(e) => CherryTreeError::Parse(format!("invalid UTF-8: {e}")),
    };
    log::warn!("xml parse failed ({first_err}), retrying with forced valid UTF-8");
    let lossy = String::from_utf8_lossy(bytes);
    match parse_document(&lossy, false) {
        Ok(root) => return Ok(root),
        Err(e) => log::warn!("xml parse failed ({e}), retrying without control characters"),
    }
    parse_document(&strip_forbidden_chars(&lossy), true)
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, el: &XmlElement) -> Result<()> {
    let mut start = BytesStart::new(el.name.as_str());
    for (key, value) in &el.attrs {
        let value = strip_forbidden_chars(value);
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if el.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in &el.children {
        match child {
            XmlChild::Element(c) => write_element(writer, c)?,
            XmlChild::Text(t) => {
                let t = strip_forbidden_chars(t);
                writer.write_event(Event::Text(BytesText::new(&t)))?;
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(el.name.as_str())))?;
    Ok(())
}

/// Serialises `root` as a complete UTF-8 document with an XML declaration.
pub fn write_document(root: &XmlElement) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_element(&mut writer, root)?;
    let mut out = String::from_utf8_lossy(&writer.into_inner()).into_owned();
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_parse_keeps_text_exact() {
        let mut root = XmlElement::new("node");
        root.set_attr("name", "a < b & \"c\"");
        root.add_child(XmlElement::new("rich_text"))
            .add_text("  leading and\ntrailing  ");
        root.add_child(XmlElement::new("rich_text"));
        let xml = write_document(&root).unwrap();
        let parsed = parse_document(&xml, false).unwrap();
        assert_eq!(parsed.attr("name"), Some("a < b & \"c\""));
        let texts: Vec<String> = parsed.elements_named("rich_text").map(|e| e.text()).collect();
        assert_eq!(texts, vec!["  leading and\ntrailing  ".to_string(), String::new()]);
    }

    #[test]
    fn test_unclosed_element_is_parse_error() {
        let err = parse_document("<a><b></b>", false).unwrap_err();
        assert!(matches!(err, CherryTreeError::Parse(_)));
    }

    #[test]
    fn test_attribute_helpers() {
        let root = parse_document(r#"<n id="42" ro="1" bold="False" bad="x"/>"#, false).unwrap();
        assert_eq!(root.attr_i64("id", 0), 42);
        assert_eq!(root.attr_i64("bad", -1), -1);
        assert!(root.attr_bool("ro"));
        assert!(!root.attr_bool("bold"));
        assert_eq!(root.attr_or_empty("missing"), "");
    }

    #[test]
    fn test_recovery_from_invalid_utf8() {
        let mut bytes = b"<root><t>ok ".to_vec();
        bytes.push(0xff);
        bytes.extend_from_slice(b"</t></root>");
        let root = parse_with_recovery(&bytes).unwrap();
        assert!(root.first_named("t").unwrap().text().starts_with("ok "));
    }

    #[test]
    fn test_recovery_from_control_chars() {
        let bytes = "<root><t>a\u{1}b</t></root>".as_bytes();
        assert!(parse_document(std::str::from_utf8(bytes).unwrap(), false).is_err());
        let root = parse_with_recovery(bytes).unwrap();
        assert_eq!(root.first_named("t").unwrap().text(), "ab");
    }

    #[test]
    fn test_writer_drops_control_chars() {
        let mut root = XmlElement::new("r");
        root.add_text("x\u{7}y");
        let xml = write_document(&root).unwrap();
        assert_eq!(parse_document(&xml, false).unwrap().text(), "xy");
    }
}

//! Conversion of XML documents into JSON mappings.
//!
//! Tags lose their namespace prefix, attributes become `@name` keys, text becomes `#text` (or the
//! bare string for leaf elements without attributes) and repeated children are folded into lists.

use quick_xml::Reader as XmlReader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while parsing an XML document.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("unclosed element `{0}`")]
    Unclosed(String),

    #[error("document has no root element")]
    Empty,
}

/// A parsed XML element, namespace prefixes stripped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: Option<String>,
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }

            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            attributes.push((key, attr.unescape_value()?.into_owned()));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            children: Vec::new(),
            text: None,
        })
    }

    fn push_text(&mut self, text: &str) {
        self.text.get_or_insert_with(String::new).push_str(text);
    }

    /// Returns the trimmed text of the element, empty when there is none.
    pub fn trimmed_text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or_default()
    }

    /// Converts this element's content (not including its own tag) into JSON.
    pub fn to_value(&self) -> Value {
        if self.children.is_empty() && self.attributes.is_empty() {
            return match self.text {
                Some(_) => Value::String(self.trimmed_text().to_string()),
                None => Value::Null,
            };
        }

        let mut grouped: Vec<(&str, Vec<Value>)> = Vec::new();
        for child in &self.children {
            let value = child.to_value();
            match grouped.iter_mut().find(|(name, _)| *name == child.name) {
                Some((_, values)) => values.push(value),
                None => grouped.push((child.name.as_str(), vec![value])),
            }
        }

        let mut map = Map::new();
        for (name, mut values) in grouped {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            map.insert(name.to_string(), value);
        }

        for (key, value) in &self.attributes {
            map.insert(format!("@{key}"), Value::String(value.clone()));
        }

        let text = self.trimmed_text();
        if !text.is_empty() {
            map.insert("#text".to_string(), Value::String(text.to_string()));
        }

        Value::Object(map)
    }

    /// Converts the element into a single-key mapping `{name: content}`.
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.name.clone(), self.to_value());

        Value::Object(map)
    }

    /// Returns the outermost descendants (or self) named `name`, in document order.
    pub fn find_all<'a>(&'a self, name: &str) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_named(name, &mut found);

        found
    }

    fn collect_named<'a>(&'a self, name: &str, found: &mut Vec<&'a XmlElement>) {
        if self.name == name {
            found.push(self);
            return;
        }

        for child in &self.children {
            child.collect_named(name, found);
        }
    }
}

/// Parses a document and returns its root element.
pub fn parse_document(text: &str) -> Result<XmlElement, XmlError> {
    let mut reader = XmlReader::from_str(text);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.push_text(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = stack.pop() {
        return Err(XmlError::Unclosed(unclosed.name));
    }

    root.ok_or(XmlError::Empty)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

use async_stream::stream;
use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use serde_json::{Map, Value, json};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::readers::archive::{gunzip, is_gzip};
use crate::readers::base::{Reader, ReaderCapabilities, ReaderStream, load_blob};
use crate::readers::formats::FileReaderArgs;
use crate::types::{Blob, Payload};
use crate::xml::XmlError;

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const SKOS_CONCEPT: &str = "http://www.w3.org/2004/02/skos/core#Concept";
const XML_LANG: &str = "http://www.w3.org/XML/1998/namespacelang";

/// An RDF/XML element with namespace-qualified names.
#[derive(Debug, Default)]
struct RdfNode {
    uri: String,
    attributes: Vec<(String, String)>,
    children: Vec<RdfNode>,
    text: String,
}

impl RdfNode {
    fn attribute(&self, uri: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == uri)
            .map(|(_, value)| value.as_str())
    }

    fn rdf_attribute(&self, local: &str) -> Option<&str> {
        self.attribute(&format!("{RDF_NS}{local}"))
    }

    fn lang(&self) -> Option<&str> {
        self.attribute(XML_LANG).or_else(|| self.attribute("lang"))
    }

    fn subject(&self) -> Option<String> {
        self.rdf_attribute("about")
            .map(str::to_string)
            .or_else(|| self.rdf_attribute("nodeID").map(|id| format!("_:{id}")))
    }
}

/// Triples of a document grouped by subject, subjects in document order.
///
/// A subject described by several node elements gets a single graph holding all its triples.
#[derive(Debug, Default)]
struct Graph {
    subjects: Map<String, Value>,
    blank_nodes: usize,
}

impl Graph {
    fn from_document(root: &RdfNode) -> Self {
        let mut graph = Graph::default();
        if root.uri == format!("{RDF_NS}RDF") {
            for node in &root.children {
                graph.add_node(node);
            }
        } else {
            graph.add_node(root);
        }

        graph
    }

    fn add(&mut self, subject: &str, predicate: &str, object: Value) {
        let properties = self
            .subjects
            .entry(subject.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(properties) = properties {
            let objects = properties
                .entry(predicate.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(objects) = objects {
                objects.push(object);
            }
        }
    }

    /// Adds the triples of a node element and returns its subject.
    fn add_node(&mut self, node: &RdfNode) -> String {
        let subject = node.subject().unwrap_or_else(|| {
            self.blank_nodes += 1;
            format!("_:b{}", self.blank_nodes)
        });

        if node.uri != format!("{RDF_NS}Description") {
            self.add(&subject, &format!("{RDF_NS}type"), json!({ "resource": node.uri }));
        }

        for property in &node.children {
            let object = if let Some(resource) = property.rdf_attribute("resource") {
                json!({ "resource": resource })
            } else if let Some(id) = property.rdf_attribute("nodeID") {
                json!({ "resource": format!("_:{id}") })
            } else if let Some(nested) = property.children.first() {
                json!({ "resource": self.add_node(nested) })
            } else {
                json!({ "value": property.text.trim(), "lang": property.lang() })
            };
            self.add(&subject, &property.uri, object);
        }

        subject
    }

    /// Returns the `{subject, graph}` view of every subject typed as a SKOS concept.
    fn into_concepts(self) -> Vec<Value> {
        let rdf_type = format!("{RDF_NS}type");
        let concept = json!({ "resource": SKOS_CONCEPT });

        self.subjects
            .into_iter()
            .filter(|(_, graph)| {
                graph
                    .get(&rdf_type)
                    .and_then(Value::as_array)
                    .is_some_and(|types| types.contains(&concept))
            })
            .map(|(subject, graph)| json!({ "subject": subject, "graph": graph }))
            .collect()
    }
}

fn qualified(ns: ResolveResult<'_>, local: &[u8]) -> String {
    let local = String::from_utf8_lossy(local);
    match ns {
        ResolveResult::Bound(Namespace(uri)) => format!("{}{local}", String::from_utf8_lossy(uri)),
        _ => local.into_owned(),
    }
}

fn resolved_node(
    reader: &NsReader<&[u8]>,
    uri: String,
    start: &BytesStart<'_>,
) -> Result<RdfNode, XmlError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }

        let (ns, local) = reader.resolve_attribute(attr.key);
        let key = qualified(ns, local.as_ref());
        attributes.push((key, attr.unescape_value()?.into_owned()));
    }

    Ok(RdfNode {
        uri,
        attributes,
        ..Default::default()
    })
}

fn parse_rdf(text: &str) -> Result<RdfNode, XmlError> {
    let mut reader = NsReader::from_str(text);
    let mut stack: Vec<RdfNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_resolved_event()? {
            (ns, Event::Start(start)) => {
                let uri = qualified(ns, start.local_name().as_ref());
                stack.push(resolved_node(&reader, uri, &start)?);
            }
            (ns, Event::Empty(start)) => {
                let uri = qualified(ns, start.local_name().as_ref());
                let node = resolved_node(&reader, uri, &start)?;
                attach(&mut stack, &mut root, node);
            }
            (_, Event::End(_)) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            (_, Event::Text(text)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            (_, Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    if let Some(unclosed) = stack.pop() {
        return Err(XmlError::Unclosed(unclosed.uri));
    }

    root.ok_or(XmlError::Empty)
}

fn attach(stack: &mut [RdfNode], root: &mut Option<RdfNode>, node: RdfNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

fn decoding_error(blob: &Blob, err: impl std::fmt::Display) -> EtlError {
    etl_error!(
        ErrorKind::DecodingError,
        "Could not parse RDF graph",
        format!("{}: {err}", blob.display_name())
    )
}

fn concepts(blob: &Blob) -> EtlResult<Vec<Value>> {
    let data = if is_gzip(&blob.data) {
        gunzip(blob.display_name(), &blob.data)?
    } else {
        blob.data.to_vec()
    };

    let root = parse_rdf(&String::from_utf8_lossy(&data)).map_err(|err| decoding_error(blob, err))?;

    Ok(Graph::from_document(&root).into_concepts())
}

/// Yields one `{subject, graph}` mapping per SKOS concept of an RDF/XML document.
///
/// The document may be gzip compressed. Objects in the graph are either
/// `{"resource": uri}` or `{"value": text, "lang": lang}`.
#[derive(Debug, Clone)]
pub struct RdfReader {
    origin: Option<String>,
}

impl RdfReader {
    pub const NAME: &'static str = "RdfReader";

    pub fn new(args: FileReaderArgs) -> Self {
        Self {
            origin: args.origin,
        }
    }
}

impl Reader for RdfReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::ROOT_AND_CHAIN
    }

    fn read(&self, item: Option<Payload>) -> ReaderStream {
        let origin = self.origin.clone();

        Box::pin(stream! {
            let concepts = match load_blob(Self::NAME, origin, item).await {
                Ok(blob) => concepts(&blob),
                Err(err) => Err(err),
            };

            match concepts {
                Ok(concepts) => {
                    for concept in concepts {
                        yield Ok(Payload::Value(concept));
                    }
                }
                Err(err) => yield Err(err),
            }
        })
    }
}

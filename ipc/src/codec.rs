//! Value codecs
//!
//! Values are transparent by default: a [`Payload::Json`] goes on the wire
//! as is. A call may instead ask for [`Serialization::ReferenceSafe`], in
//! which case every value travels as one JSON string that keeps shared and
//! circular references intact.
//!
//! ## Reference-safe text
//!
//! The graph is walked depth first from the root. The first visit of an
//! array or object writes it inline; every later visit writes a marker
//! `{"$ref": [segment, ...]}` holding the path of that first visit (object
//! keys as strings, array positions as numbers, `[]` for the root). Object
//! keys starting with `$` get one more `$` so they can never be read back
//! as a marker.

use crate::graph::{GraphError, Node, NodeId, ValueGraph};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

const REF_KEY: &str = "$ref";

/// Codec tag negotiated per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Serialization {
    /// Shared and circular references survive the trip
    #[serde(rename = "reference-safe", alias = "jsan")]
    ReferenceSafe,
}

impl Serialization {
    /// Parses a wire tag; unknown tags yield `None`
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "reference-safe" | "jsan" => Some(Serialization::ReferenceSafe),
            _ => None,
        }
    }

    /// Returns the wire tag
    pub fn as_tag(&self) -> &'static str {
        match self {
            Serialization::ReferenceSafe => "reference-safe",
        }
    }
}

/// A value handed to or produced by an action
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain tree-shaped JSON
    Json(Value),
    /// Value with shared or circular references
    Graph(ValueGraph),
}

impl Payload {
    /// Returns the JSON value, if this is a plain payload
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Graph(_) => None,
        }
    }

    /// Returns the graph, if this is a graph payload
    pub fn as_graph(&self) -> Option<&ValueGraph> {
        match self {
            Payload::Json(_) => None,
            Payload::Graph(graph) => Some(graph),
        }
    }

    /// Converts into a graph, wrapping plain JSON as a tree
    pub fn into_graph(self) -> ValueGraph {
        match self {
            Payload::Json(value) => ValueGraph::from_json(&value),
            Payload::Graph(graph) => graph,
        }
    }

    /// Converts into plain JSON, expanding graphs
    pub fn into_json(self) -> Result<Value, GraphError> {
        match self {
            Payload::Json(value) => Ok(value),
            Payload::Graph(graph) => graph.to_json(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<ValueGraph> for Payload {
    fn from(graph: ValueGraph) -> Self {
        Payload::Graph(graph)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Json(Value::String(text.to_string()))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Json(Value::String(text))
    }
}

/// Errors raised by value codecs
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value cannot be represented by the selected codec
    #[error("Value graph error: {0}")]
    Graph(#[from] GraphError),

    /// Reference-safe data must arrive as a JSON string
    #[error("Reference-safe data must be a string, got {0}")]
    ExpectedText(&'static str),

    /// Reference-safe text is not valid JSON
    #[error("Invalid reference-safe text: {0}")]
    Syntax(#[from] serde_json::Error),

    /// A `$ref` marker is not a list of keys and positions
    #[error("Malformed reference marker: {0}")]
    MalformedRef(String),

    /// A `$ref` marker points to no inline container
    #[error("Reference {0} does not resolve")]
    DanglingRef(String),
}

/// Value codec selected by a call's serialization tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueCodec {
    /// Values pass through unchanged
    #[default]
    Transparent,
    /// Values travel as reference-preserving text
    ReferenceSafe,
}

impl ValueCodec {
    /// Picks the codec for an optional tag
    pub fn for_mode(mode: Option<Serialization>) -> Self {
        match mode {
            Some(Serialization::ReferenceSafe) => ValueCodec::ReferenceSafe,
            None => ValueCodec::Transparent,
        }
    }

    /// Turns a payload into its wire value
    pub fn encode(&self, payload: &Payload) -> Result<Value, CodecError> {
        match (self, payload) {
            (ValueCodec::Transparent, Payload::Json(value)) => Ok(value.clone()),
            (ValueCodec::Transparent, Payload::Graph(graph)) => Ok(graph.to_json()?),
            (ValueCodec::ReferenceSafe, Payload::Json(value)) => {
                encode_graph(&ValueGraph::from_json(value))
            }
            (ValueCodec::ReferenceSafe, Payload::Graph(graph)) => encode_graph(graph),
        }
    }

    /// Turns a wire value back into a payload
    pub fn decode(&self, value: Value) -> Result<Payload, CodecError> {
        match self {
            ValueCodec::Transparent => Ok(Payload::Json(value)),
            ValueCodec::ReferenceSafe => Ok(Payload::Graph(decode_graph(value)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn to_value(&self) -> Value {
        match self {
            Segment::Key(key) => Value::String(key.clone()),
            Segment::Index(index) => Value::from(*index),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(key) => Some(Segment::Key(key.clone())),
            Value::Number(n) => n
                .as_u64()
                .and_then(|index| usize::try_from(index).ok())
                .map(Segment::Index),
            _ => None,
        }
    }
}

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${}", key)
    } else {
        key.to_string()
    }
}

fn unescape_key(key: &str) -> String {
    match key.strip_prefix("$$") {
        Some(rest) => format!("${}", rest),
        None => key.to_string(),
    }
}

fn encode_graph(graph: &ValueGraph) -> Result<Value, CodecError> {
    let mut first_visits = HashMap::new();
    let mut path = Vec::new();
    let tree = write_node(graph, graph.root(), &mut path, &mut first_visits)?;
    Ok(Value::String(serde_json::to_string(&tree)?))
}

fn write_node(
    graph: &ValueGraph,
    id: NodeId,
    path: &mut Vec<Segment>,
    first_visits: &mut HashMap<NodeId, Vec<Segment>>,
) -> Result<Value, CodecError> {
    let node = graph.node(id).ok_or(GraphError::UnknownNode(id))?;

    match node {
        Node::Null => Ok(Value::Null),
        Node::Bool(b) => Ok(Value::Bool(*b)),
        Node::Number(n) => Ok(Value::Number(n.clone())),
        Node::String(s) => Ok(Value::String(s.clone())),
        Node::Array(items) => {
            if let Some(marker) = ref_marker(first_visits, id) {
                return Ok(marker);
            }
            first_visits.insert(id, path.clone());

            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(Segment::Index(index));
                out.push(write_node(graph, *item, path, first_visits)?);
                path.pop();
            }
            Ok(Value::Array(out))
        }
        Node::Object(entries) => {
            if let Some(marker) = ref_marker(first_visits, id) {
                return Ok(marker);
            }
            first_visits.insert(id, path.clone());

            let mut out = Map::new();
            for (key, item) in entries {
                path.push(Segment::Key(key.clone()));
                out.insert(escape_key(key), write_node(graph, *item, path, first_visits)?);
                path.pop();
            }
            Ok(Value::Object(out))
        }
    }
}

fn ref_marker(first_visits: &HashMap<NodeId, Vec<Segment>>, id: NodeId) -> Option<Value> {
    let target = first_visits.get(&id)?;
    let mut marker = Map::new();
    marker.insert(
        REF_KEY.to_string(),
        Value::Array(target.iter().map(Segment::to_value).collect()),
    );
    Some(Value::Object(marker))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A child slot waiting for its `$ref` target
struct PendingRef {
    parent: NodeId,
    position: usize,
    target: Vec<Segment>,
}

enum Slot {
    Node(NodeId),
    Ref(Vec<Segment>),
}

/// Rebuilds a graph in two passes: inline containers first, then markers
struct GraphReader {
    graph: ValueGraph,
    paths: HashMap<Vec<Segment>, NodeId>,
    pending: Vec<PendingRef>,
}

impl GraphReader {
    fn new() -> Self {
        Self {
            graph: ValueGraph::new(Node::Null),
            paths: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn read(&mut self, value: &Value, path: &mut Vec<Segment>) -> Result<Slot, CodecError> {
        match value {
            Value::Object(map) if map.len() == 1 && map.contains_key(REF_KEY) => {
                let segments = match map.get(REF_KEY) {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(Segment::from_value)
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| CodecError::MalformedRef(value.to_string()))?,
                    _ => return Err(CodecError::MalformedRef(value.to_string())),
                };
                Ok(Slot::Ref(segments))
            }
            Value::Array(items) => {
                let id = self.graph.add(Node::array());
                self.paths.insert(path.clone(), id);

                let mut children = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    path.push(Segment::Index(index));
                    let slot = self.read(item, path)?;
                    path.pop();
                    children.push(self.place(slot, id, index));
                }
                self.graph.replace(id, Node::Array(children))?;
                Ok(Slot::Node(id))
            }
            Value::Object(map) => {
                let id = self.graph.add(Node::object());
                self.paths.insert(path.clone(), id);

                let mut entries = Vec::with_capacity(map.len());
                for (position, (raw_key, item)) in map.iter().enumerate() {
                    let key = unescape_key(raw_key);
                    path.push(Segment::Key(key.clone()));
                    let slot = self.read(item, path)?;
                    path.pop();
                    entries.push((key, self.place(slot, id, position)));
                }
                self.graph.replace(id, Node::Object(entries))?;
                Ok(Slot::Node(id))
            }
            scalar => Ok(Slot::Node(self.graph.add_json(scalar))),
        }
    }

    /// Unresolved children temporarily point at their parent
    fn place(&mut self, slot: Slot, parent: NodeId, position: usize) -> NodeId {
        match slot {
            Slot::Node(id) => id,
            Slot::Ref(target) => {
                self.pending.push(PendingRef {
                    parent,
                    position,
                    target,
                });
                parent
            }
        }
    }

    fn finish(mut self, root: NodeId) -> Result<ValueGraph, CodecError> {
        for pending in std::mem::take(&mut self.pending) {
            let target = *self
                .paths
                .get(&pending.target)
                .ok_or_else(|| CodecError::DanglingRef(render_path(&pending.target)))?;

            let patched = match self.graph.node(pending.parent).cloned() {
                Some(Node::Array(mut items)) => {
                    items[pending.position] = target;
                    Node::Array(items)
                }
                Some(Node::Object(mut entries)) => {
                    entries[pending.position].1 = target;
                    Node::Object(entries)
                }
                _ => return Err(GraphError::UnknownNode(pending.parent).into()),
            };
            self.graph.replace(pending.parent, patched)?;
        }

        self.graph.set_root(root);
        Ok(self.graph)
    }
}

fn render_path(segments: &[Segment]) -> String {
    Value::Array(segments.iter().map(Segment::to_value).collect()).to_string()
}

fn decode_graph(value: Value) -> Result<ValueGraph, CodecError> {
    let text = match value {
        Value::String(text) => text,
        other => return Err(CodecError::ExpectedText(value_kind(&other))),
    };
    let tree: Value = serde_json::from_str(&text)?;

    let mut reader = GraphReader::new();
    let mut path = Vec::new();
    match reader.read(&tree, &mut path)? {
        Slot::Node(root) => reader.finish(root),
        Slot::Ref(target) => Err(CodecError::DanglingRef(render_path(&target))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn round_trip(graph: &ValueGraph) -> ValueGraph {
        let codec = ValueCodec::ReferenceSafe;
        let wire = codec.encode(&Payload::Graph(graph.clone())).unwrap();
        match codec.decode(wire).unwrap() {
            Payload::Graph(decoded) => decoded,
            other => panic!("expected a graph, got {:?}", other),
        }
    }

    #[test]
    fn test_transparent_passes_json_through() {
        let codec = ValueCodec::for_mode(None);
        let value = json!({"a": [1, "b"]});

        assert_eq!(codec.encode(&Payload::Json(value.clone())).unwrap(), value);
        assert_eq!(codec.decode(value.clone()).unwrap(), Payload::Json(value));
    }

    #[test]
    fn test_transparent_rejects_cycles() {
        let mut graph = ValueGraph::new(Node::array());
        let root = graph.root();
        graph.push_item(root, root).unwrap();

        let err = ValueCodec::Transparent
            .encode(&Payload::Graph(graph))
            .unwrap_err();
        assert!(matches!(err, CodecError::Graph(GraphError::Cyclic(_))));
    }

    #[test]
    fn test_reference_safe_travels_as_text() {
        let codec = ValueCodec::for_mode(Some(Serialization::ReferenceSafe));
        let wire = codec.encode(&Payload::Json(json!({"a": 1}))).unwrap();

        assert_eq!(wire, json!(r#"{"a":1}"#));
    }

    #[test]
    fn test_self_reference_round_trip() {
        let mut graph = ValueGraph::new(Node::object());
        let root = graph.root();
        let name = graph.add_json(&json!("node"));
        graph.set_entry(root, "name", name).unwrap();
        graph.set_entry(root, "parent", root).unwrap();

        let wire = ValueCodec::ReferenceSafe
            .encode(&Payload::Graph(graph.clone()))
            .unwrap();
        assert_eq!(wire, json!(r#"{"name":"node","parent":{"$ref":[]}}"#));

        let decoded = round_trip(&graph);
        assert!(decoded.structurally_eq(&graph));
        assert_eq!(decoded.entry(decoded.root(), "parent"), Some(decoded.root()));
    }

    #[test]
    fn test_shared_reference_stays_shared() {
        let mut graph = ValueGraph::new(Node::object());
        let root = graph.root();
        let shared = graph.add_json(&json!({"x": [1, 2]}));
        graph.set_entry(root, "a", shared).unwrap();
        graph.set_entry(root, "b", shared).unwrap();

        let decoded = round_trip(&graph);
        let a = decoded.entry(decoded.root(), "a").unwrap();
        let b = decoded.entry(decoded.root(), "b").unwrap();
        assert_eq!(a, b);
        assert!(decoded.structurally_eq(&graph));
    }

    #[test]
    fn test_dollar_keys_are_not_markers() {
        let value = json!({"$ref": ["looks", "like", "a", "marker"], "$$x": 1, "$": 2});
        let graph = ValueGraph::from_json(&value);

        let decoded = round_trip(&graph);
        assert_eq!(decoded.to_json().unwrap(), value);
    }

    #[test]
    fn test_json_payload_decodes_as_graph() {
        let codec = ValueCodec::ReferenceSafe;
        let wire = codec.encode(&Payload::from("hello")).unwrap();
        let decoded = codec.decode(wire).unwrap();

        assert_eq!(decoded.into_json().unwrap(), json!("hello"));
    }

    #[test]
    fn test_decode_requires_text() {
        let err = ValueCodec::ReferenceSafe.decode(json!({"a": 1})).unwrap_err();
        assert!(matches!(err, CodecError::ExpectedText("object")));
    }

    #[test]
    fn test_decode_rejects_bad_text() {
        let err = ValueCodec::ReferenceSafe.decode(json!("{not json")).unwrap_err();
        assert!(matches!(err, CodecError::Syntax(_)));
    }

    #[test]
    fn test_dangling_reference() {
        let err = ValueCodec::ReferenceSafe
            .decode(json!(r#"{"a":{"$ref":["missing"]}}"#))
            .unwrap_err();
        assert!(matches!(err, CodecError::DanglingRef(path) if path == r#"["missing"]"#));

        let err = ValueCodec::ReferenceSafe
            .decode(json!(r#"{"$ref":[]}"#))
            .unwrap_err();
        assert!(matches!(err, CodecError::DanglingRef(_)));
    }

    #[test]
    fn test_malformed_reference() {
        let err = ValueCodec::ReferenceSafe
            .decode(json!(r#"{"a":{"$ref":"a.b"}}"#))
            .unwrap_err();
        assert!(matches!(err, CodecError::MalformedRef(_)));
    }

    #[test]
    fn test_serialization_tags() {
        assert_eq!(
            Serialization::from_tag("reference-safe"),
            Some(Serialization::ReferenceSafe)
        );
        assert_eq!(Serialization::from_tag("jsan"), Some(Serialization::ReferenceSafe));
        assert_eq!(Serialization::from_tag("cbor"), None);
        assert_eq!(Serialization::ReferenceSafe.as_tag(), "reference-safe");
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z$]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z$]{0,4}", inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_reference_safe_round_trip(
            value in arb_json(),
            links in prop::collection::vec(
                (any::<prop::sample::Index>(), any::<prop::sample::Index>()),
                0..4,
            ),
        ) {
            let mut graph = ValueGraph::from_json(&value);
            let containers: Vec<NodeId> = graph
                .ids()
                .filter(|id| matches!(graph.node(*id), Some(Node::Array(_) | Node::Object(_))))
                .collect();

            if !containers.is_empty() {
                for (n, (from, to)) in links.iter().enumerate() {
                    let from = containers[from.index(containers.len())];
                    let to = containers[to.index(containers.len())];
                    match graph.node(from) {
                        Some(Node::Array(_)) => graph.push_item(from, to).unwrap(),
                        _ => graph.set_entry(from, format!("link{}", n), to).unwrap(),
                    }
                }
            }

            let decoded = round_trip(&graph);
            prop_assert!(decoded.structurally_eq(&graph));
        }

        #[test]
        fn prop_transparent_matches_tree(value in arb_json()) {
            let graph = ValueGraph::from_json(&value);
            let wire = ValueCodec::Transparent.encode(&Payload::Graph(graph)).unwrap();
            prop_assert_eq!(wire, value);
        }
    }
}

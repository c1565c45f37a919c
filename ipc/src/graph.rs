//! Value graphs
//!
//! A [`ValueGraph`] is a JSON-like value stored as an arena of nodes.
//! Arrays and objects refer to their children by [`NodeId`], so one node
//! may be reachable from several parents and a node may reach itself.
//! Plain JSON cannot express either, which is what the reference-safe
//! codec exists for.

use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Index of a node inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the arena index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// One node of a value graph
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<NodeId>),
    /// Entries keep insertion order; keys are unique
    Object(Vec<(String, NodeId)>),
}

impl Node {
    /// Empty array node
    pub fn array() -> Self {
        Node::Array(Vec::new())
    }

    /// Empty object node
    pub fn object() -> Self {
        Node::Object(Vec::new())
    }

    fn is_container(&self) -> bool {
        matches!(self, Node::Array(_) | Node::Object(_))
    }
}

/// Errors raised by graph construction and traversal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("{0} does not exist")]
    UnknownNode(NodeId),

    #[error("{0} is not an array")]
    NotArray(NodeId),

    #[error("{0} is not an object")]
    NotObject(NodeId),

    /// A cycle was met while expanding the graph into a tree
    #[error("value contains a reference cycle at {0}")]
    Cyclic(NodeId),
}

/// Arena-backed value with shared and cyclic references
#[derive(Debug, Clone, PartialEq)]
pub struct ValueGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl ValueGraph {
    /// Creates a graph whose root is `root`
    pub fn new(root: Node) -> Self {
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Builds a tree-shaped graph from a JSON value
    pub fn from_json(value: &Value) -> Self {
        let mut graph = Self::new(Node::Null);
        let root = graph.add_json(value);
        graph.root = root;
        graph
    }

    /// Root node id
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes in the arena, reachable or not
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Checks if the arena is empty (never true for a constructed graph)
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Ids of every node in the arena
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Adds a detached node and returns its id
    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Adds a JSON value as a detached subtree
    pub fn add_json(&mut self, value: &Value) -> NodeId {
        match value {
            Value::Null => self.add(Node::Null),
            Value::Bool(b) => self.add(Node::Bool(*b)),
            Value::Number(n) => self.add(Node::Number(n.clone())),
            Value::String(s) => self.add(Node::String(s.clone())),
            Value::Array(items) => {
                let children = items.iter().map(|item| self.add_json(item)).collect();
                self.add(Node::Array(children))
            }
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(key, item)| (key.clone(), self.add_json(item)))
                    .collect();
                self.add(Node::Object(entries))
            }
        }
    }

    /// Appends `item` to the array `array`
    pub fn push_item(&mut self, array: NodeId, item: NodeId) -> Result<(), GraphError> {
        self.check(item)?;
        match self.nodes.get_mut(array.0) {
            Some(Node::Array(items)) => {
                items.push(item);
                Ok(())
            }
            Some(_) => Err(GraphError::NotArray(array)),
            None => Err(GraphError::UnknownNode(array)),
        }
    }

    /// Sets `key` of the object `object` to `item`, replacing any previous entry
    pub fn set_entry(
        &mut self,
        object: NodeId,
        key: impl Into<String>,
        item: NodeId,
    ) -> Result<(), GraphError> {
        self.check(item)?;
        let key = key.into();
        match self.nodes.get_mut(object.0) {
            Some(Node::Object(entries)) => {
                match entries.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(entry) => entry.1 = item,
                    None => entries.push((key, item)),
                }
                Ok(())
            }
            Some(_) => Err(GraphError::NotObject(object)),
            None => Err(GraphError::UnknownNode(object)),
        }
    }

    /// Child of an object by key
    pub fn entry(&self, object: NodeId, key: &str) -> Option<NodeId> {
        match self.node(object)? {
            Node::Object(entries) => entries
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, id)| *id),
            _ => None,
        }
    }

    /// Child of an array by position
    pub fn item(&self, array: NodeId, index: usize) -> Option<NodeId> {
        match self.node(array)? {
            Node::Array(items) => items.get(index).copied(),
            _ => None,
        }
    }

    /// Replaces the node stored under `id`
    pub(crate) fn replace(&mut self, id: NodeId, node: Node) -> Result<(), GraphError> {
        let slot = self.nodes.get_mut(id.0).ok_or(GraphError::UnknownNode(id))?;
        *slot = node;
        Ok(())
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }

    /// Expands the graph into a JSON tree
    ///
    /// Shared nodes are copied at every place they appear. Fails with
    /// [`GraphError::Cyclic`] if a node is reachable from itself.
    pub fn to_json(&self) -> Result<Value, GraphError> {
        let mut on_path = HashSet::new();
        self.expand(self.root, &mut on_path)
    }

    fn expand(&self, id: NodeId, on_path: &mut HashSet<NodeId>) -> Result<Value, GraphError> {
        let node = self.node(id).ok_or(GraphError::UnknownNode(id))?;
        if node.is_container() && !on_path.insert(id) {
            return Err(GraphError::Cyclic(id));
        }

        let value = match node {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.expand(*item, on_path))
                    .collect::<Result<_, _>>()?,
            ),
            Node::Object(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    map.insert(key.clone(), self.expand(*item, on_path)?);
                }
                Value::Object(map)
            }
        };

        on_path.remove(&id);
        Ok(value)
    }

    /// Checks if two graphs have the same shape and leaves
    ///
    /// Node identity is ignored: a graph and its tree expansion are not
    /// equal if the graph is cyclic, but two cyclic graphs unrolling to the
    /// same infinite tree are. Object entries are compared by key.
    pub fn structurally_eq(&self, other: &ValueGraph) -> bool {
        let mut assumed = HashSet::new();
        let mut stack = vec![(self.root, other.root)];

        while let Some((left, right)) = stack.pop() {
            if !assumed.insert((left, right)) {
                continue;
            }

            let (Some(a), Some(b)) = (self.node(left), other.node(right)) else {
                return false;
            };

            match (a, b) {
                (Node::Array(xs), Node::Array(ys)) => {
                    if xs.len() != ys.len() {
                        return false;
                    }
                    stack.extend(xs.iter().copied().zip(ys.iter().copied()));
                }
                (Node::Object(xs), Node::Object(ys)) => {
                    if xs.len() != ys.len() {
                        return false;
                    }
                    for (key, x) in xs {
                        match ys.iter().find(|(other_key, _)| other_key == key) {
                            Some((_, y)) => stack.push((*x, *y)),
                            None => return false,
                        }
                    }
                }
                (a, b) => {
                    if a != b {
                        return false;
                    }
                }
            }
        }

        true
    }
}

impl From<&Value> for ValueGraph {
    fn from(value: &Value) -> Self {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// `{"name": "loop", "self": <root>}`
    fn self_loop() -> ValueGraph {
        let mut graph = ValueGraph::new(Node::object());
        let root = graph.root();
        let name = graph.add(Node::String("loop".to_string()));
        graph.set_entry(root, "name", name).unwrap();
        graph.set_entry(root, "self", root).unwrap();
        graph
    }

    #[test]
    fn test_from_json_round_trip() {
        let value = json!({"a": [1, 2, {"b": null}], "c": "d", "e": true});
        let graph = ValueGraph::from_json(&value);
        assert_eq!(graph.to_json().unwrap(), value);
    }

    #[test]
    fn test_shared_node_is_duplicated_on_expansion() {
        let mut graph = ValueGraph::new(Node::array());
        let root = graph.root();
        let shared = graph.add_json(&json!({"x": 1}));
        graph.push_item(root, shared).unwrap();
        graph.push_item(root, shared).unwrap();

        assert_eq!(graph.to_json().unwrap(), json!([{"x": 1}, {"x": 1}]));
    }

    #[test]
    fn test_cycle_cannot_expand() {
        let graph = self_loop();
        assert_eq!(graph.to_json(), Err(GraphError::Cyclic(graph.root())));
    }

    #[test]
    fn test_set_entry_replaces_existing_key() {
        let mut graph = ValueGraph::new(Node::object());
        let root = graph.root();
        let one = graph.add_json(&json!(1));
        let two = graph.add_json(&json!(2));
        graph.set_entry(root, "k", one).unwrap();
        graph.set_entry(root, "k", two).unwrap();

        assert_eq!(graph.entry(root, "k"), Some(two));
        assert_eq!(graph.to_json().unwrap(), json!({"k": 2}));
    }

    #[test]
    fn test_wiring_errors() {
        let mut graph = ValueGraph::new(Node::Null);
        let root = graph.root();
        let array = graph.add(Node::array());

        assert_eq!(graph.push_item(root, array), Err(GraphError::NotArray(root)));
        assert_eq!(graph.set_entry(array, "k", root), Err(GraphError::NotObject(array)));
        assert_eq!(
            graph.push_item(array, NodeId(99)),
            Err(GraphError::UnknownNode(NodeId(99)))
        );
    }

    #[test]
    fn test_structural_equality_ignores_identity() {
        let mut shared = ValueGraph::new(Node::array());
        let root = shared.root();
        let item = shared.add_json(&json!({"x": 1}));
        shared.push_item(root, item).unwrap();
        shared.push_item(root, item).unwrap();

        let tree = ValueGraph::from_json(&json!([{"x": 1}, {"x": 1}]));
        assert!(shared.structurally_eq(&tree));
        assert!(tree.structurally_eq(&shared));
    }

    #[test]
    fn test_structural_equality_of_cycles() {
        assert!(self_loop().structurally_eq(&self_loop()));

        let tree = ValueGraph::from_json(&json!({"name": "loop", "self": {}}));
        assert!(!self_loop().structurally_eq(&tree));
    }

    #[test]
    fn test_structural_equality_detects_leaf_difference() {
        let a = ValueGraph::from_json(&json!({"a": [1, 2]}));
        let b = ValueGraph::from_json(&json!({"a": [1, 3]}));
        let c = ValueGraph::from_json(&json!({"b": [1, 2]}));

        assert!(!a.structurally_eq(&b));
        assert!(!a.structurally_eq(&c));
    }
}

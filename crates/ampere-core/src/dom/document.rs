//! Arena document tree
//!
//! Nodes live in generation-checked slots. Detaching a node keeps it alive so
//! it can be re-attached; [`Document::release`] frees a subtree and its slots
//! are reused. A [`NodeId`] whose slot was freed never resolves again, even
//! after the slot is reused.

use serde_json::{Map, Value};

use super::path;
use super::DomError;

/// Handle to a node in its [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

/// Tag of the synthetic root element
const ROOT_TAG: &str = "#root";

/// Elements serialized without a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        properties: Map<String, Value>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Mutable element tree with attributes and live properties
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document holding only the root
    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Element {
                tag: ROOT_TAG.to_string(),
                attributes: Vec::new(),
                properties: Map::new(),
            },
            parent: None,
            children: Vec::new(),
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(root),
            }],
            free: Vec::new(),
        }
    }

    /// Parse an HTML fragment into a new document
    pub fn parse(html: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.root();
        let nodes = super::parse::fragment(&mut doc, html);
        for node in nodes {
            doc.append_child(root, node);
        }
        doc
    }

    pub fn root(&self) -> NodeId {
        NodeId {
            index: 0,
            generation: 0,
        }
    }

    /// Number of live nodes, attached or not
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of allocated slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            properties: Map::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
        };

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)?
            .node
            .as_ref()
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?
            .node
            .as_mut()
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.slot_mut(id).ok_or(DomError::UnknownNode)
    }

    /// Whether `id` refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Append a node under `parent`, detaching it first
    ///
    /// Does nothing if either node is unknown.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.contains(parent) || !self.contains(child) || parent == child {
            return;
        }
        self.detach(child);
        if let Some(node) = self.slot_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.slot_mut(parent) {
            node.children.push(child);
        }
    }

    /// Detach a node from its parent
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.slot_mut(node).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(parent) = self.slot_mut(parent) {
            parent.children.retain(|c| *c != node);
        }
    }

    /// Detach and return all children of `parent`
    pub fn remove_children(&mut self, parent: NodeId) -> Vec<NodeId> {
        let children = self
            .slot_mut(parent)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default();
        for child in &children {
            if let Some(node) = self.slot_mut(*child) {
                node.parent = None;
            }
        }
        children
    }

    /// Free `node` and everything below it
    ///
    /// Returns the number of nodes freed. The root is never freed.
    pub fn release(&mut self, node: NodeId) -> usize {
        if node == self.root() || !self.contains(node) {
            return 0;
        }
        self.detach(node);

        let doomed = self.descendants(node);
        for id in &doomed {
            let slot = &mut self.slots[id.index];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
        }
        doomed.len()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.node(node)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// Whether the node is reachable from the root
    pub fn is_attached(&self, node: NodeId) -> bool {
        self.ancestors(node).last().copied() == Some(self.root())
    }

    /// The node and its ancestors, innermost first
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.node(node).map(|_| node);
        while let Some(id) = current {
            out.push(id);
            current = self.node(id).and_then(|n| n.parent);
        }
        out
    }

    /// The node and everything below it, in document order
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        if !self.contains(node) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    /// Element tag, `None` for text nodes
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.tag(node).is_some()
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.node(node)?.kind {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element { .. } => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.attributes(node)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attributes in source order
    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        match self.node(node).map(|n| &n.kind) {
            Some(NodeKind::Element { attributes, .. }) => attributes,
            _ => &[],
        }
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let attributes = match &mut self.node_mut(node)?.kind {
            NodeKind::Element { attributes, .. } => attributes,
            NodeKind::Text(_) => return Err(DomError::NotAnElement),
        };
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Live property at a dotted path
    pub fn property(&self, node: NodeId, path: &str) -> Option<&Value> {
        match &self.node(node)?.kind {
            NodeKind::Element { properties, .. } => path::get(properties, path),
            NodeKind::Text(_) => None,
        }
    }

    pub fn set_property(&mut self, node: NodeId, path: &str, value: Value) -> Result<(), DomError> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Element { properties, .. } => path::set(properties, path, value),
            NodeKind::Text(_) => Err(DomError::NotAnElement),
        }
    }

    /// Serialized children of `node`
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_html(*child, &mut out);
        }
        out
    }

    /// Serialized `node` including its own tag
    pub fn outer_html(&self, node: NodeId) -> String {
        if node == self.root() {
            return self.inner_html(node);
        }
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        enum Step<'a> {
            Open(NodeId),
            Close(&'a str),
        }

        let mut stack = vec![Step::Open(node)];
        while let Some(step) = stack.pop() {
            let id = match step {
                Step::Close(tag) => {
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                    continue;
                }
                Step::Open(id) => id,
            };
            let Some(current) = self.node(id) else {
                continue;
            };

            match &current.kind {
                NodeKind::Text(text) => escape(text, false, out),
                NodeKind::Element { tag, attributes, .. } => {
                    out.push('<');
                    out.push_str(tag);
                    for (name, value) in attributes {
                        out.push(' ');
                        out.push_str(name);
                        out.push_str("=\"");
                        escape(value, true, out);
                        out.push('"');
                    }
                    out.push('>');
                    if VOID_ELEMENTS.contains(&tag.as_str()) {
                        continue;
                    }
                    stack.push(Step::Close(tag));
                    stack.extend(current.children.iter().rev().map(|c| Step::Open(*c)));
                }
            }
        }
    }
}

fn escape(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

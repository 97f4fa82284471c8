//! In-memory document tree
//!
//! An arena-backed tree of elements and text nodes covering the slice of the
//! browser DOM the console components rely on:
//! - attributes and class lists
//! - text content (concatenated descendant text)
//! - a hidden flag standing in for `style.display = 'none'`
//! - selector queries (see [`selector`])
//!
//! Node ids are only meaningful for the document that created them. Children
//! dropped by [`Document::set_text_content`] are released and their ids may
//! be handed out again.

pub mod selector;

pub use selector::{Selector, SelectorError};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Document shared between components on the UI thread
pub type SharedDocument = Rc<RefCell<Document>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone, Default)]
struct ElementData {
    tag: String,
    attributes: BTreeMap<String, String>,
    classes: Vec<String>,
    hidden: bool,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    // Released slots, reused by `push`
    free: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document with a `body` root element
    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Element(ElementData {
                tag: "body".to_string(),
                ..Default::default()
            }),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            free: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedDocument {
        Rc::new(RefCell::new(self))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = node;
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Return a detached subtree's slots to the free list
    fn release(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let slot = &mut self.nodes[id.0];
            stack.append(&mut slot.children);
            slot.parent = None;
            slot.kind = NodeKind::Text(String::new());
            self.free.push(id);
        }
    }

    /// Append `child` as the last child of `parent`, moving it if it is
    /// already attached somewhere (same as `appendChild`).
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.is_inclusive_ancestor(child, parent) {
            tracing::warn!("Refusing to append {:?} into its own subtree", child);
            return;
        }
        if !self.is_element(parent) {
            return;
        }
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Remove a node from its parent. The node and its subtree stay valid.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != node);
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Element children only, skipping text nodes
    pub fn element_children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes[node.0]
            .children
            .iter()
            .copied()
            .filter(|&c| self.is_element(c))
            .collect()
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Element(_))
    }

    fn element(&self, node: NodeId) -> Option<&ElementData> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(data) => Some(data),
            NodeKind::Text(_) => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Option<&mut ElementData> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Element(data) => Some(data),
            NodeKind::Text(_) => None,
        }
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    /// Attribute lookup. The `class` attribute lives in the class list,
    /// use [`Document::class_name`] for it.
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)
            .and_then(|e| e.attributes.get(name))
            .map(String::as_str)
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if name == "class" {
            self.set_class_name(node, value);
            return;
        }
        if let Some(e) = self.element_mut(node) {
            e.attributes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn classes(&self, node: NodeId) -> &[String] {
        self.element(node).map(|e| e.classes.as_slice()).unwrap_or(&[])
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.classes(node).iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) {
        if let Some(e) = self.element_mut(node) {
            if !e.classes.iter().any(|c| c == class) {
                e.classes.push(class.to_string());
            }
        }
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) {
        if let Some(e) = self.element_mut(node) {
            e.classes.retain(|c| c != class);
        }
    }

    pub fn class_name(&self, node: NodeId) -> String {
        self.classes(node).join(" ")
    }

    /// Replace the whole class list, like assigning `className`
    pub fn set_class_name(&mut self, node: NodeId, value: &str) {
        if let Some(e) = self.element_mut(node) {
            e.classes.clear();
            for class in value.split_whitespace() {
                if !e.classes.iter().any(|c| c == class) {
                    e.classes.push(class.to_string());
                }
            }
        }
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.element(node).map(|e| e.hidden).unwrap_or(false)
    }

    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) {
        if let Some(e) = self.element_mut(node) {
            e.hidden = hidden;
        }
    }

    /// Concatenated text of every descendant text node, in document order
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(_) => {
                for &child in &self.nodes[node.0].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Replace all children with a single text node (none when `text` is
    /// empty). A lone text child is rewritten in place; anything else is
    /// released.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) {
        if let NodeKind::Text(existing) = &mut self.nodes[node.0].kind {
            *existing = text.to_string();
            return;
        }
        if let &[only] = self.nodes[node.0].children.as_slice() {
            if !text.is_empty() {
                if let NodeKind::Text(existing) = &mut self.nodes[only.0].kind {
                    *existing = text.to_string();
                    return;
                }
            }
        }
        for child in std::mem::take(&mut self.nodes[node.0].children) {
            self.release(child);
        }
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.append_child(node, text_node);
        }
    }

    /// Descendants of `scope` in document order, `scope` excluded
    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[scope.0].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        out
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector.matches(self, node)
    }

    /// All elements below `scope` matching `selector`
    pub fn query_selector_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&id| self.is_element(id) && selector.matches(self, id))
            .collect()
    }

    pub fn query_selector(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|&id| self.is_element(id) && selector.matches(self, id))
    }

    /// Nearest inclusive ancestor matching `selector`
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.is_element(id) && selector.matches(self, id) {
                return Some(id);
            }
            current = self.nodes[id.0].parent;
        }
        None
    }
}

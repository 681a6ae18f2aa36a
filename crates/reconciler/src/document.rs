//! The foreign document the engine annotates but does not own.
//!
//! [`NodeId`] handles come from a scan and are only meaningful until the owner mutates the
//! tree again. The engine never keeps them across passes; every pass re-scans.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute carried by every engine-owned node. Its value names the annotation kind.
pub const MARKER_ATTR: &str = "data-overlay";
/// Attribute naming the action an annotation triggers when the operator interacts with it.
pub const ACTION_ATTR: &str = "data-overlay-action";

/// Slot index plus the generation the slot had when the node was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

/// What the engine inserts next to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub marker: &'static str,
    pub classes: Vec<String>,
    pub text: String,
    pub title: Option<String>,
    pub action: Option<&'static str>,
}

/// Primitive access to an externally owned tree.
///
/// Reads on a node that no longer exists return `None` or empty collections.
pub trait ForeignDocument: Send {
    fn root(&self) -> NodeId;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    fn tag(&self, node: NodeId) -> Option<&str>;

    fn attr(&self, node: NodeId, name: &str) -> Option<&str>;

    /// Text owned directly by `node`, excluding descendants.
    fn own_text(&self, node: NodeId) -> Option<&str>;

    /// Appends an engine-owned node as the last child of `parent`.
    fn append_annotation(&mut self, parent: NodeId, annotation: &Annotation) -> Option<NodeId>;

    fn remove_node(&mut self, node: NodeId) -> bool;

    fn contains(&self, node: NodeId) -> bool {
        self.tag(node).is_some()
    }

    fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// `true` when an inline style hides the node.
    fn is_hidden(&self, node: NodeId) -> bool {
        self.attr(node, "style").is_some_and(|style| {
            let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
            compact.to_ascii_lowercase().contains("display:none")
        })
    }

    fn is_annotation(&self, node: NodeId) -> bool {
        self.attr(node, MARKER_ATTR).is_some()
    }
}

/// Concatenated text of `node` and its descendants, skipping engine-owned nodes.
pub fn text_content(doc: &dyn ForeignDocument, node: NodeId) -> String {
    let mut out = String::new();
    collect_text(doc, node, &mut out);
    out
}

fn collect_text(doc: &dyn ForeignDocument, node: NodeId, out: &mut String) {
    if doc.is_annotation(node) {
        return;
    }
    if let Some(text) = doc.own_text(node) {
        out.push_str(text);
    }
    for child in doc.children(node) {
        collect_text(doc, child, out);
    }
}

/// Serializable description of a subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

fn default_tag() -> String {
    "div".to_string()
}

impl NodeSpec {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn class(self, classes: impl Into<String>) -> Self {
        self.attr("class", classes)
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = NodeSpec>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// In-memory arena implementation of [`ForeignDocument`].
///
/// Freed slots go on a free list and are reused. Each reuse bumps the slot generation, so a
/// handle to a removed node stays dead instead of aliasing the newer node.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: NodeId,
}

impl DocumentTree {
    #[must_use]
    pub fn from_spec(spec: &NodeSpec) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        };
        tree.root = tree.insert_spec(None, spec);
        tree
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let spec: NodeSpec = serde_json::from_str(raw)?;
        Ok(Self::from_spec(&spec))
    }

    #[must_use]
    pub fn to_spec(&self) -> NodeSpec {
        self.spec_of(self.root)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_spec())
    }

    /// Appends a foreign subtree under `parent`.
    pub fn append(&mut self, parent: NodeId, spec: &NodeSpec) -> Option<NodeId> {
        if !self.contains(parent) {
            return None;
        }
        let id = self.insert_spec(Some(parent), spec);
        if let Some(node) = self.live_mut(parent) {
            node.children.push(id);
        }
        Some(id)
    }

    /// Discards every child of `parent` and builds fresh ones, like a framework re-render.
    pub fn replace_children(&mut self, parent: NodeId, specs: &[NodeSpec]) -> Vec<NodeId> {
        let Some(node) = self.live_mut(parent) else {
            return Vec::new();
        };
        for child in std::mem::take(&mut node.children) {
            self.kill(child);
        }
        specs
            .iter()
            .filter_map(|spec| self.append(parent, spec))
            .collect()
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        match self.live_mut(node) {
            Some(n) => {
                n.attrs.insert(name.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) -> bool {
        match self.live_mut(node) {
            Some(n) => {
                n.text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Live nodes in document order.
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).into_iter().rev());
        }
        out
    }

    /// Allocated slots, live or free.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn live(&self, node: NodeId) -> Option<&Node> {
        self.slots
            .get(node.index)
            .filter(|slot| slot.generation == node.generation)?
            .node
            .as_ref()
    }

    fn live_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(node.index)
            .filter(|slot| slot.generation == node.generation)?
            .node
            .as_mut()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    fn insert_spec(&mut self, parent: Option<NodeId>, spec: &NodeSpec) -> NodeId {
        let id = self.alloc(Node {
            tag: spec.tag.clone(),
            attrs: spec.attrs.clone(),
            text: spec.text.clone(),
            parent,
            children: Vec::new(),
        });
        let children: Vec<NodeId> = spec
            .children
            .iter()
            .map(|child| self.insert_spec(Some(id), child))
            .collect();
        if let Some(node) = self.live_mut(id) {
            node.children = children;
        }
        id
    }

    /// Frees `node` and its subtree.
    fn kill(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(next) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(next.index)
                .filter(|slot| slot.generation == next.generation)
            else {
                continue;
            };
            let Some(freed) = slot.node.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(next.index);
            stack.extend(freed.children);
        }
    }

    fn spec_of(&self, node: NodeId) -> NodeSpec {
        let Some(n) = self.live(node) else {
            return NodeSpec::default();
        };
        NodeSpec {
            tag: n.tag.clone(),
            attrs: n.attrs.clone(),
            text: n.text.clone(),
            children: n
                .children
                .iter()
                .filter(|c| self.contains(**c))
                .map(|c| self.spec_of(*c))
                .collect(),
        }
    }
}

impl ForeignDocument for DocumentTree {
    fn root(&self) -> NodeId {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.live(node)?.parent
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.live(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn tag(&self, node: NodeId) -> Option<&str> {
        self.live(node).map(|n| n.tag.as_str())
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.live(node)?.attrs.get(name).map(String::as_str)
    }

    fn own_text(&self, node: NodeId) -> Option<&str> {
        self.live(node).map(|n| n.text.as_str())
    }

    fn append_annotation(&mut self, parent: NodeId, annotation: &Annotation) -> Option<NodeId> {
        let mut spec = NodeSpec::new("span")
            .attr(MARKER_ATTR, annotation.marker)
            .text(annotation.text.clone());
        if !annotation.classes.is_empty() {
            spec = spec.class(annotation.classes.join(" "));
        }
        if let Some(title) = &annotation.title {
            spec = spec.attr("title", title.clone());
        }
        if let Some(action) = annotation.action {
            spec = spec.attr(ACTION_ATTR, action);
        }
        self.append(parent, &spec)
    }

    fn remove_node(&mut self, node: NodeId) -> bool {
        let Some(parent) = self.live(node).map(|n| n.parent) else {
            return false;
        };
        if let Some(parent) = parent.and_then(|p| self.live_mut(p)) {
            parent.children.retain(|c| *c != node);
        }
        self.kill(node);
        true
    }
}

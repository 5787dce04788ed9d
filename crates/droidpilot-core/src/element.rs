//! UI element tree snapshots.
//!
//! A screen capture is stored as a flat arena ([`UiTree`]) in which every node is
//! addressed by a [`NodeId`] and parent/children links are indices into the arena.
//! The arena owns all nodes; no node owns another. Trees are immutable once built.
//!
//! Steps never see the arena directly. Queries hand out [`UiElement`] handles, which
//! pair a node with the snapshot it came from so that navigation (`parent`,
//! `children`, `next_sibling`, ...) stays consistent with that capture.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Rectangle covered by an element, in screen pixels.
///
/// Width and height are derived. Drivers are expected to report `right >= left`
/// and `bottom >= top`; this is not validated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Center point, used as the tap target for element gestures.
    pub fn center(&self) -> (i32, i32) {
        (self.left + self.width() / 2, self.top + self.height() / 2)
    }
}

/// Attributes of a single on-screen element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiNode {
    pub index: i32,
    pub text: String,
    /// Resource identifier (e.g. `com.android.settings:id/title`).
    pub id: String,
    pub class_name: String,
    pub package_name: String,
    pub content_description: String,
    pub checkable: bool,
    pub checked: bool,
    pub clickable: bool,
    pub enabled: bool,
    pub focusable: bool,
    pub focused: bool,
    pub scrollable: bool,
    pub long_clickable: bool,
    pub password: bool,
    pub selected: bool,
    pub bounds: Bounds,
}

impl Default for UiNode {
    fn default() -> Self {
        Self {
            index: 0,
            text: String::new(),
            id: String::new(),
            class_name: String::new(),
            package_name: String::new(),
            content_description: String::new(),
            checkable: false,
            checked: false,
            clickable: false,
            enabled: true,
            focusable: false,
            focused: false,
            scrollable: false,
            long_clickable: false,
            password: false,
            selected: false,
            bounds: Bounds::default(),
        }
    }
}

impl fmt::Display for UiNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[index: {}; text: {}; id: {}; className: {}; contentDescription: {}]",
            self.index, self.text, self.id, self.class_name, self.content_description
        )
    }
}

/// Nested form of a tree, as produced by hierarchy dumps.
///
/// Drivers that parse a nested hierarchy can deserialize into this type and
/// convert with [`UiTree::from_nested`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiNodeDef {
    #[serde(flatten)]
    pub node: UiNode,
    #[serde(default)]
    pub children: Vec<UiNodeDef>,
}

/// Index of a node inside a [`UiTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot {
    node: UiNode,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Immutable arena holding one snapshot of the screen.
#[derive(Debug, Clone, Default)]
pub struct UiTree {
    slots: Vec<Slot>,
    roots: Vec<NodeId>,
    /// Pre-order depth-first linearization.
    order: Vec<NodeId>,
    /// Position of each slot inside `order`.
    rank: Vec<usize>,
}

impl UiTree {
    /// Builds a tree from nested definitions, preserving child order.
    pub fn from_nested(roots: Vec<UiNodeDef>) -> Self {
        let mut builder = UiTreeBuilder::new();
        let mut pending: Vec<(Option<NodeId>, UiNodeDef)> =
            roots.into_iter().rev().map(|def| (None, def)).collect();

        while let Some((parent, def)) = pending.pop() {
            let id = match parent {
                Some(parent) => builder.child(parent, def.node),
                None => builder.root(def.node),
            };
            pending.extend(def.children.into_iter().rev().map(|c| (Some(id), c)));
        }
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &UiNode {
        &self.slots[id.0].node
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    /// All nodes in traversal order (pre-order, parent before children).
    pub fn traversal(&self) -> &[NodeId] {
        &self.order
    }

    /// Position of `id` in [`traversal`](Self::traversal).
    pub fn rank(&self, id: NodeId) -> usize {
        self.rank[id.0]
    }

    /// Returns true when both trees hold identical nodes with the same shape.
    ///
    /// This is the stability criterion used to detect the end of a scroll.
    pub fn same_content(&self, other: &UiTree) -> bool {
        self.order.len() == other.order.len()
            && self.order.iter().zip(&other.order).all(|(&a, &b)| {
                self.node(a) == other.node(b)
                    && self.parent(a).map(|p| self.rank(p)) == other.parent(b).map(|p| other.rank(p))
            })
    }

    /// Siblings of `id`, including itself.
    fn siblings(&self, id: NodeId) -> &[NodeId] {
        match self.parent(id) {
            Some(parent) => self.children(parent),
            None => &self.roots,
        }
    }

    fn sibling_offset(&self, id: NodeId, offset: isize) -> Option<NodeId> {
        let siblings = self.siblings(id);
        let pos = siblings.iter().position(|&s| s == id)?;
        let target = pos.checked_add_signed(offset)?;
        siblings.get(target).copied()
    }
}

/// Incremental constructor for [`UiTree`].
///
/// Children can only be attached to nodes already created by the same builder,
/// so the result is always a strict forest.
#[derive(Debug, Default)]
pub struct UiTreeBuilder {
    slots: Vec<Slot>,
    roots: Vec<NodeId>,
}

impl UiTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level node.
    pub fn root(&mut self, node: UiNode) -> NodeId {
        let id = self.push(node, None);
        self.roots.push(id);
        id
    }

    /// Appends `node` as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` was not produced by this builder.
    pub fn child(&mut self, parent: NodeId, node: UiNode) -> NodeId {
        let id = self.push(node, Some(parent));
        self.slots[parent.0].children.push(id);
        id
    }

    fn push(&mut self, node: UiNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot { node, parent, children: Vec::new() });
        id
    }

    /// Freezes the builder, computing the traversal order.
    pub fn build(self) -> UiTree {
        let mut order = Vec::with_capacity(self.slots.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.slots[id.0].children.iter().rev().copied());
        }

        let mut rank = vec![0; self.slots.len()];
        for (pos, id) in order.iter().enumerate() {
            rank[id.0] = pos;
        }

        UiTree {
            slots: self.slots,
            roots: self.roots,
            order,
            rank,
        }
    }
}

/// Handle to one element of a snapshot.
///
/// Dereferences to the element's [`UiNode`] attributes. Cloning is cheap; the
/// snapshot is shared.
#[derive(Clone)]
pub struct UiElement {
    tree: Arc<UiTree>,
    node: NodeId,
}

impl UiElement {
    pub(crate) fn new(tree: Arc<UiTree>, node: NodeId) -> Self {
        Self { tree, node }
    }

    fn at(&self, node: NodeId) -> UiElement {
        UiElement::new(Arc::clone(&self.tree), node)
    }

    /// Arena index of this element within its snapshot.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The snapshot this element belongs to.
    pub fn tree(&self) -> &Arc<UiTree> {
        &self.tree
    }

    /// Position in traversal order.
    pub fn position(&self) -> usize {
        self.tree.rank(self.node)
    }

    pub fn parent(&self) -> Option<UiElement> {
        self.tree.parent(self.node).map(|p| self.at(p))
    }

    pub fn children(&self) -> Vec<UiElement> {
        self.tree.children(self.node).iter().map(|&c| self.at(c)).collect()
    }

    /// The element that follows this one in traversal order.
    pub fn next_element(&self) -> Option<UiElement> {
        let next = self.position() + 1;
        self.tree.traversal().get(next).map(|&id| self.at(id))
    }

    /// The element that precedes this one in traversal order: the deepest last
    /// descendant of the previous sibling, or the parent.
    pub fn previous_element(&self) -> Option<UiElement> {
        let pos = self.position().checked_sub(1)?;
        self.tree.traversal().get(pos).map(|&id| self.at(id))
    }

    /// The next sibling, or the next sibling of the nearest ancestor that has one.
    pub fn next_sibling(&self) -> Option<UiElement> {
        let mut current = self.node;
        loop {
            if let Some(sibling) = self.tree.sibling_offset(current, 1) {
                return Some(self.at(sibling));
            }
            current = self.tree.parent(current)?;
        }
    }

    /// The previous sibling, or the parent when this is the first child.
    pub fn previous_sibling(&self) -> Option<UiElement> {
        self.tree
            .sibling_offset(self.node, -1)
            .or_else(|| self.tree.parent(self.node))
            .map(|id| self.at(id))
    }
}

impl Deref for UiElement {
    type Target = UiNode;

    fn deref(&self) -> &UiNode {
        self.tree.node(self.node)
    }
}

impl PartialEq for UiElement {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tree, &other.tree) && self.node == other.node
    }
}

impl fmt::Debug for UiElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiElement")
            .field("node", &self.node)
            .field("attributes", self.tree.node(self.node))
            .finish()
    }
}

impl fmt::Display for UiElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.tree.node(self.node), f)
    }
}

//! Predicate queries over a single screen snapshot.
//!
//! All queries walk the snapshot in pre-order (parent before children, children
//! in order), so "first" always means first in that traversal.

use std::sync::Arc;

use crate::element::{UiElement, UiNode, UiTree};
use crate::error::{Result, ScriptError};

/// One captured screen, ready to be queried.
#[derive(Debug, Clone)]
pub struct Snapshot {
    tree: Arc<UiTree>,
}

impl Snapshot {
    pub fn new(tree: UiTree) -> Self {
        Self { tree: Arc::new(tree) }
    }

    pub fn tree(&self) -> &Arc<UiTree> {
        &self.tree
    }

    /// All elements in traversal order.
    pub fn elements(&self) -> impl Iterator<Item = UiElement> + '_ {
        self.tree
            .traversal()
            .iter()
            .map(move |&id| UiElement::new(Arc::clone(&self.tree), id))
    }

    pub fn find_first<P>(&self, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool,
    {
        self.find_first_or_none(predicate)
            .ok_or_else(|| ScriptError::PredicateNotFound.into())
    }

    pub fn find_first_or_none<P>(&self, predicate: P) -> Option<UiElement>
    where
        P: Fn(&UiElement) -> bool,
    {
        self.elements().find(|e| predicate(e))
    }

    pub fn find_all<P>(&self, predicate: P) -> Vec<UiElement>
    where
        P: Fn(&UiElement) -> bool,
    {
        self.elements().filter(|e| predicate(e)).collect()
    }

    pub fn exists<P>(&self, predicate: P) -> bool
    where
        P: Fn(&UiElement) -> bool,
    {
        self.elements().any(|e| predicate(&e))
    }

    /// Returns true when an element with exactly these attributes is on screen.
    pub fn contains(&self, node: &UiNode) -> bool {
        self.tree
            .traversal()
            .iter()
            .any(|&id| self.tree.node(id) == node)
    }

    /// Finds the first match strictly after `start` in traversal order.
    ///
    /// The search runs over the snapshot `start` belongs to.
    pub fn find_first_after<P>(start: &UiElement, predicate: P) -> Result<UiElement>
    where
        P: Fn(&UiElement) -> bool,
    {
        let tree = start.tree();
        tree.traversal()[start.position() + 1..]
            .iter()
            .map(|&id| UiElement::new(Arc::clone(tree), id))
            .find(|e| predicate(e))
            .ok_or_else(|| ScriptError::PredicateNotFound.into())
    }

    /// Finds the first element matching `start`, then the first element after it
    /// matching `predicate`. Fails if either search comes up empty.
    pub fn find_first_after_match<S, P>(&self, start: S, predicate: P) -> Result<UiElement>
    where
        S: Fn(&UiElement) -> bool,
        P: Fn(&UiElement) -> bool,
    {
        let anchor = self.find_first(start)?;
        Self::find_first_after(&anchor, predicate)
    }

    /// Same nodes and same structure as `other`.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.tree.same_content(&other.tree)
    }
}

impl From<UiTree> for Snapshot {
    fn from(tree: UiTree) -> Self {
        Self::new(tree)
    }
}

/// Predicate constructors for the common element attributes.
pub mod by {
    use crate::element::UiElement;

    pub fn text(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into();
        move |e| e.text == value
    }

    pub fn text_ignore_case(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into().to_lowercase();
        move |e| e.text.to_lowercase() == value
    }

    pub fn text_contains(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into();
        move |e| e.text.contains(&value)
    }

    pub fn id(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into();
        move |e| e.id == value
    }

    pub fn class_name(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into();
        move |e| e.class_name == value
    }

    pub fn description(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into();
        move |e| e.content_description == value
    }

    pub fn package(value: impl Into<String>) -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        let value = value.into();
        move |e| e.package_name == value
    }

    pub fn checkable() -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        |e| e.checkable
    }

    pub fn scrollable() -> impl Fn(&UiElement) -> bool + Send + Sync + Clone {
        |e| e.scrollable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{UiNode, UiTreeBuilder};

    fn node(text: &str, id: &str) -> UiNode {
        UiNode {
            text: text.to_string(),
            id: id.to_string(),
            ..UiNode::default()
        }
    }

    /// screen
    /// ├── header "Wi-Fi"
    /// ├── list
    /// │   ├── row "Office"  (checkable)
    /// │   └── row "Home"
    /// └── footer "Wi-Fi"
    fn snapshot() -> Snapshot {
        let mut b = UiTreeBuilder::new();
        let screen = b.root(node("", "screen"));
        b.child(screen, node("Wi-Fi", "header"));
        let list = b.child(screen, UiNode { scrollable: true, ..node("", "list") });
        b.child(list, UiNode { checkable: true, ..node("Office", "row") });
        b.child(list, node("Home", "row"));
        b.child(screen, node("Wi-Fi", "footer"));
        Snapshot::new(b.build())
    }

    #[test]
    fn test_find_first_returns_earliest_in_traversal() {
        let snap = snapshot();
        let found = snap.find_first(by::text("Wi-Fi")).unwrap();
        assert_eq!(found.id, "header");
    }

    #[test]
    fn test_find_first_not_found() {
        let snap = snapshot();
        let err = snap.find_first(by::text("Bluetooth")).unwrap_err();
        assert_eq!(err.as_script(), Some(&ScriptError::PredicateNotFound));
        assert!(snap.find_first_or_none(by::text("Bluetooth")).is_none());
    }

    #[test]
    fn test_find_all_preserves_order() {
        let snap = snapshot();
        let rows: Vec<String> = snap.find_all(by::id("row")).iter().map(|e| e.text.clone()).collect();
        assert_eq!(rows, vec!["Office", "Home"]);
        assert!(snap.find_all(by::id("missing")).is_empty());
    }

    #[test]
    fn test_exists_and_contains() {
        let snap = snapshot();
        assert!(snap.exists(by::checkable()));
        assert!(snap.exists(by::text_ignore_case("HOME")));
        assert!(!snap.exists(by::text_contains("Guest")));
        assert!(snap.contains(&node("Home", "row")));
        assert!(!snap.contains(&node("Home", "header")));
    }

    #[test]
    fn test_find_first_after_skips_start_and_earlier() {
        let snap = snapshot();
        let header = snap.find_first(by::id("header")).unwrap();
        let after = Snapshot::find_first_after(&header, by::text("Wi-Fi")).unwrap();
        assert_eq!(after.id, "footer");

        let footer = snap.find_first(by::id("footer")).unwrap();
        assert!(Snapshot::find_first_after(&footer, |_| true).is_err());
    }

    #[test]
    fn test_find_first_after_match() {
        let snap = snapshot();
        let found = snap
            .find_first_after_match(by::scrollable(), by::id("row"))
            .unwrap();
        assert_eq!(found.text, "Office");
        assert!(snap.find_first_after_match(by::text("nope"), |_| true).is_err());
    }

    #[test]
    fn test_elements_remember_their_snapshot() {
        let snap = snapshot();
        let office = snap.find_first(by::text("Office")).unwrap();
        assert_eq!(office.parent().unwrap().id, "list");
        assert!(Arc::ptr_eq(office.tree(), snap.tree()));
    }
}

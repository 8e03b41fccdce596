//! Multi-select state and the highlight overlay derived from it.
//!
//! Selecting friends shows what they have in common: the visible set is the
//! selection plus every friend that is a neighbor of all selected friends.
//! Everything else is dimmed.

use crate::index::EdgeSet;
use crate::model::Graph;
use std::collections::{HashMap, HashSet};

pub const FULL_OPACITY: f32 = 1.0;
pub const DIMMED_OPACITY: f32 = 0.12;

pub const EMPHASIZED_EDGE: EdgeStyle = EdgeStyle {
    color: "#5865f2",
    width: 2,
};
pub const MUTED_EDGE: EdgeStyle = EdgeStyle {
    color: "rgba(68, 68, 68, 0.08)",
    width: 1,
};
pub const DEFAULT_EDGE: EdgeStyle = EdgeStyle {
    color: "#444",
    width: 1,
};

/// Selected ids in selection order, no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    ids: Vec<String>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects `id` if it is in the graph. A selected id is deselected when
    /// `toggle` is set, otherwise moved to the most recent position.
    /// Returns whether the selection changed.
    pub fn add(&mut self, id: &str, toggle: bool, graph: &Graph) -> bool {
        if !graph.contains(id) {
            return false;
        }
        if let Some(pos) = self.ids.iter().position(|selected| selected == id) {
            let existing = self.ids.remove(pos);
            if toggle {
                return true;
            }
            self.ids.push(existing);
            return pos + 1 != self.ids.len();
        }
        self.ids.push(id.to_string());
        true
    }

    pub fn remove_last(&mut self) -> bool {
        self.ids.pop().is_some()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn last(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|selected| selected == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Neighbors shared by every selected id, excluding the selection itself.
    pub fn shared_neighbors<'g>(&self, graph: &'g Graph) -> HashSet<&'g str> {
        let mut sets = self.ids.iter().map(|id| graph.filtered_neighbors(id));
        let Some(first) = sets.next() else {
            return HashSet::new();
        };
        let mut shared = sets.fold(first, |acc, next| {
            acc.into_iter().filter(|id| next.contains(id)).collect()
        });
        shared.retain(|id| !self.contains(id));
        shared
    }

    /// `None` when nothing is selected.
    pub fn visible_set(&self, graph: &Graph) -> Option<HashSet<String>> {
        if self.ids.is_empty() {
            return None;
        }
        let mut visible: HashSet<String> = self
            .shared_neighbors(graph)
            .into_iter()
            .map(str::to_string)
            .collect();
        visible.extend(self.ids.iter().cloned());
        Some(visible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeStyle {
    pub color: &'static str,
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOverlay {
    pub id: String,
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeOverlay {
    pub key: String,
    pub from: String,
    pub to: String,
    pub style: EdgeStyle,
}

/// Visual state for every node and edge, in graph order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    pub nodes: Vec<NodeOverlay>,
    pub edges: Vec<EdgeOverlay>,
}

impl Overlay {
    /// Everything visible, nothing emphasized.
    pub fn reset(graph: &Graph, edges: &EdgeSet) -> Self {
        Self::build(graph, edges, None)
    }

    pub fn for_selection(selection: &SelectionState, graph: &Graph, edges: &EdgeSet) -> Self {
        Self::build(graph, edges, selection.visible_set(graph).as_ref())
    }

    fn build(graph: &Graph, edges: &EdgeSet, visible: Option<&HashSet<String>>) -> Self {
        let nodes = graph
            .ids()
            .map(|id| NodeOverlay {
                id: id.to_string(),
                opacity: match visible {
                    Some(visible) if !visible.contains(id) => DIMMED_OPACITY,
                    _ => FULL_OPACITY,
                },
            })
            .collect();

        let edges = edges
            .iter()
            .map(|edge| EdgeOverlay {
                key: edge.key(),
                from: edge.a.clone(),
                to: edge.b.clone(),
                style: match visible {
                    None => DEFAULT_EDGE,
                    Some(visible) if visible.contains(&edge.a) && visible.contains(&edge.b) => {
                        EMPHASIZED_EDGE
                    }
                    Some(_) => MUTED_EDGE,
                },
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&NodeOverlay> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, key: &str) -> Option<&EdgeOverlay> {
        self.edges.iter().find(|edge| edge.key == key)
    }

    /// Entries of `self` that differ from `previous`. Everything differs from `None`.
    pub fn diff(&self, previous: Option<&Overlay>) -> OverlayDiff {
        let Some(previous) = previous else {
            return OverlayDiff {
                nodes: self.nodes.clone(),
                edges: self.edges.clone(),
            };
        };

        let old_nodes: HashMap<&str, f32> = previous
            .nodes
            .iter()
            .map(|node| (node.id.as_str(), node.opacity))
            .collect();
        let old_edges: HashMap<&str, EdgeStyle> = previous
            .edges
            .iter()
            .map(|edge| (edge.key.as_str(), edge.style))
            .collect();

        OverlayDiff {
            nodes: self
                .nodes
                .iter()
                .filter(|node| old_nodes.get(node.id.as_str()) != Some(&node.opacity))
                .cloned()
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|edge| old_edges.get(edge.key.as_str()) != Some(&edge.style))
                .cloned()
                .collect(),
        }
    }
}

/// Per-node and per-edge updates for the renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayDiff {
    pub nodes: Vec<NodeOverlay>,
    pub edges: Vec<EdgeOverlay>,
}

impl OverlayDiff {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Selection plus the overlay last handed to the renderer.
#[derive(Debug, Clone, Default)]
pub struct SelectionHighlightEngine {
    selection: SelectionState,
    applied: Option<Overlay>,
}

impl SelectionHighlightEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn add(&mut self, id: &str, toggle: bool, graph: &Graph) -> bool {
        self.selection.add(id, toggle, graph)
    }

    pub fn remove_last(&mut self) -> bool {
        self.selection.remove_last()
    }

    pub fn clear(&mut self) {
        self.selection.clear();
    }

    /// Forgets the applied overlay, e.g. after the graph was reloaded.
    pub fn invalidate(&mut self) {
        self.applied = None;
    }

    pub fn applied(&self) -> Option<&Overlay> {
        self.applied.as_ref()
    }

    /// Re-derives the overlay and returns only what changed since the last call.
    pub fn refresh(&mut self, graph: &Graph, edges: &EdgeSet) -> OverlayDiff {
        let overlay = Overlay::for_selection(&self.selection, graph, edges);
        let diff = overlay.diff(self.applied.as_ref());
        self.applied = Some(overlay);
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::GraphIndexBuilder;
    use crate::model::Entity;

    // a-b, a-c, b-c, c-d; e isolated
    fn sample() -> Graph {
        vec![
            Entity::new("a", "a").with_neighbors(["b", "c"]),
            Entity::new("b", "b").with_neighbors(["a", "c"]),
            Entity::new("c", "c").with_neighbors(["a", "b", "d"]),
            Entity::new("d", "d").with_neighbors(["c", "unknown"]),
            Entity::new("e", "e"),
        ]
        .into()
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_ignores_unknown_ids() {
        let graph = sample();
        let mut selection = SelectionState::new();
        assert!(!selection.add("zzz", false, &graph));
        assert!(selection.is_empty());
    }

    #[test]
    fn test_toggle_and_bump() {
        let graph = sample();
        let mut selection = SelectionState::new();
        selection.add("a", true, &graph);
        selection.add("b", true, &graph);

        selection.add("a", false, &graph);
        assert_eq!(selection.ids(), ["b", "a"]);

        selection.add("b", true, &graph);
        assert_eq!(selection.ids(), ["a"]);
    }

    #[test]
    fn test_remove_last_reports_removal() {
        let graph = sample();
        let mut selection = SelectionState::new();
        assert!(!selection.remove_last());
        selection.add("a", false, &graph);
        selection.add("c", false, &graph);
        assert!(selection.remove_last());
        assert_eq!(selection.last(), Some("a"));
    }

    #[test]
    fn test_visible_set_single_selection() {
        let graph = sample();
        let mut selection = SelectionState::new();
        assert!(selection.visible_set(&graph).is_none());

        selection.add("d", false, &graph);
        assert_eq!(selection.visible_set(&graph), Some(set(&["d", "c"])));
    }

    #[test]
    fn test_visible_set_is_intersection() {
        let graph = sample();
        let mut selection = SelectionState::new();
        selection.add("a", false, &graph);
        selection.add("b", false, &graph);
        assert_eq!(selection.visible_set(&graph), Some(set(&["a", "b", "c"])));

        selection.remove_last();
        selection.add("d", false, &graph);
        assert_eq!(selection.visible_set(&graph), Some(set(&["a", "c", "d"])));

        selection.add("e", false, &graph);
        assert_eq!(selection.visible_set(&graph), Some(set(&["a", "d", "e"])));
    }

    #[test]
    fn test_overlay_styles() {
        let graph = sample();
        let edges = GraphIndexBuilder::build_edges(&graph);
        let mut selection = SelectionState::new();
        selection.add("d", false, &graph);

        let overlay = Overlay::for_selection(&selection, &graph, &edges);
        assert_eq!(overlay.node("d").unwrap().opacity, FULL_OPACITY);
        assert_eq!(overlay.node("c").unwrap().opacity, FULL_OPACITY);
        assert_eq!(overlay.node("a").unwrap().opacity, DIMMED_OPACITY);
        assert_eq!(overlay.node("e").unwrap().opacity, DIMMED_OPACITY);
        assert_eq!(overlay.edge("c-d").unwrap().style, EMPHASIZED_EDGE);
        // Only one endpoint visible
        assert_eq!(overlay.edge("a-c").unwrap().style, MUTED_EDGE);
    }

    #[test]
    fn test_reset_overlay() {
        let graph = sample();
        let edges = GraphIndexBuilder::build_edges(&graph);
        let overlay = Overlay::reset(&graph, &edges);
        assert!(overlay.nodes.iter().all(|n| n.opacity == FULL_OPACITY));
        assert!(overlay.edges.iter().all(|e| e.style == DEFAULT_EDGE));
        assert_eq!(overlay, Overlay::for_selection(&SelectionState::new(), &graph, &edges));
    }

    #[test]
    fn test_refresh_emits_only_changes() {
        let graph = sample();
        let edges = GraphIndexBuilder::build_edges(&graph);
        let mut engine = SelectionHighlightEngine::new();

        let first = engine.refresh(&graph, &edges);
        assert_eq!(first.nodes.len(), 5);
        assert_eq!(first.edges.len(), 4);
        assert!(engine.refresh(&graph, &edges).is_empty());

        engine.add("d", false, &graph);
        let diff = engine.refresh(&graph, &edges);
        let dimmed: HashSet<&str> = diff.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(dimmed, HashSet::from(["a", "b", "e"]));
        assert_eq!(diff.edges.len(), 4);
        assert!(engine.refresh(&graph, &edges).is_empty());
    }
}

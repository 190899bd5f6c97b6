//! Responsible for transforming the `AppState` into a `UiState` view model.
//!
//! The presentation consumer only ever sees these serializable snapshots,
//! never the live nodes that background tasks keep mutating.

use crate::core::node::NodeId;
use crate::core::{LoadState, NodeKind, NodeRef, SearchMatch, SearchProgress};
use serde::Serialize;

use super::state::AppState;

/// A serializable snapshot of one node and its subtree.
#[derive(Serialize, Clone, Debug)]
pub struct NodeView {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub label: String,
    pub description: Option<String>,
    pub is_visible: bool,
    pub opacity: f32,
    pub load_state: LoadState,
    pub supports_children: bool,
    pub is_wrapper: bool,
    pub children: Vec<NodeView>,
}

/// A search match as shown in the result list.
#[derive(Serialize, Clone, Debug)]
pub struct SearchResultView {
    pub node: NodeView,
    pub resource_type: String,
    /// "identity / tenant / subscription".
    pub scope: String,
}

impl SearchResultView {
    pub fn from_match(found: &SearchMatch) -> Self {
        Self {
            node: snapshot(&found.node),
            resource_type: found.resource_type.clone(),
            scope: found.scope.to_string(),
        }
    }
}

/// A serializable representation of the application state for the UI.
#[derive(Serialize, Clone, Debug)]
pub struct UiState {
    pub tree: NodeView,
    pub show_all: bool,
    pub search_query: String,
    pub is_searching: bool,
    pub search_results: Vec<SearchResultView>,
    pub search_progress: Option<SearchProgress>,
    pub status_message: String,
    pub last_search_at: Option<String>,
}

/// Creates the complete `UiState` from the current `AppState`.
pub fn generate_ui_state(state: &AppState) -> UiState {
    UiState {
        tree: snapshot(&state.root),
        show_all: state.config.show_all,
        search_query: state.search_query.clone(),
        is_searching: state.is_searching,
        search_results: state
            .search_results
            .iter()
            .map(SearchResultView::from_match)
            .collect(),
        search_progress: state.search_progress,
        status_message: state.status_message.clone(),
        last_search_at: state
            .last_search_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

/// Snapshots `node` and everything below it.
///
/// A wrapper shows its own label and description but the children and load
/// state of the node it resolves to.
pub fn snapshot(node: &NodeRef) -> NodeView {
    let actual = node.resolve();
    NodeView {
        id: node.id(),
        kind: node.kind().clone(),
        label: node.label(),
        description: node.description(),
        is_visible: node.is_visible(),
        opacity: node.opacity(),
        load_state: actual.load_state(),
        supports_children: node.supports_children(),
        is_wrapper: node.is_wrapper(),
        children: actual.children().iter().map(snapshot).collect(),
    }
}

/// Renders a snapshot as an indented text tree.
///
/// Hidden nodes and their subtrees are skipped unless `include_hidden` is set.
pub fn render_tree(view: &NodeView, include_hidden: bool) -> String {
    fn walk(view: &NodeView, depth: usize, include_hidden: bool, out: &mut String) {
        if !view.is_visible && !include_hidden {
            return;
        }
        out.push_str(&"  ".repeat(depth));
        out.push_str(&view.label);
        if let Some(description) = &view.description {
            out.push_str(&format!(" ({})", description));
        }
        if view.opacity < 1.0 {
            out.push_str(" [hidden]");
        }
        out.push('\n');
        for child in &view.children {
            walk(child, depth + 1, include_hidden, out);
        }
    }

    let mut out = String::new();
    walk(view, 0, include_hidden, &mut out);
    out
}

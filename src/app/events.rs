//! Defines the events sent from background tasks to the presentation consumer.

use super::view_model::{SearchResultView, UiState};
use crate::core::{NodeEvent, SearchProgress, SearchSummary};

/// Events delivered to the single-threaded presentation consumer.
#[derive(Debug)]
pub enum UserEvent {
    /// A complete state update to re-render from.
    StateUpdate(Box<UiState>),
    /// A mutation of the tree, reported after it was applied.
    Tree(NodeEvent),
    /// A search match, delivered as soon as it is found.
    SearchResult(Box<SearchResultView>),
    SearchProgress(SearchProgress),
    /// The search finished, was cancelled, or found nothing to search.
    SearchFinished(SearchSummary),
    /// An error message to be displayed to the user.
    ShowError(String),
}

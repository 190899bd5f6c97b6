//! Background tasks started by the presentation layer: expanding and
//! refreshing nodes, and running searches.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::UserEvent;
use super::helpers::{lock_state, with_state_and_notify};
use super::proxy::{EventProxy, ProxyObserver};
use super::state::AppState;
use super::view_model::{generate_ui_state, SearchResultView};

use crate::core::node::NodeId;
use crate::core::{LoadOutcome, SearchMatch, SearchOrchestrator, SearchProgress};

/// Routes every tree mutation to `proxy`, then publishes the initial state.
pub fn attach_tree_observer<P: EventProxy>(proxy: &P, state: &Arc<Mutex<AppState>>) {
    with_state_and_notify(state, proxy, |s| {
        s.root.set_observer(Arc::new(ProxyObserver::new(proxy.clone())));
    });
}

/// Loads the children of a node on a background task.
///
/// A no-op for leaves and for nodes that are loaded or loading already.
pub fn expand_node<P: EventProxy>(
    node_id: NodeId,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) -> Option<JoinHandle<()>> {
    let (node, cancel) = {
        let state_guard = lock_state(&state);
        (state_guard.find_node(node_id), state_guard.tree_cancel.clone())
    };
    let Some(node) = node else {
        proxy.send_event(UserEvent::ShowError(format!("Node {} not found", node_id)));
        return None;
    };

    Some(tokio::spawn(async move {
        let outcome = node.load_children(&cancel).await;
        tracing::debug!("Expanding '{}' finished: {:?}", node.label(), outcome);
        if outcome != LoadOutcome::Skipped {
            with_state_and_notify(&state, &proxy, |_| {});
        }
    }))
}

/// Discards a node's children and loads them again under the configured timeout.
pub fn refresh_node<P: EventProxy>(
    node_id: NodeId,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) -> Option<JoinHandle<()>> {
    let (node, cancel, timeout) = {
        let state_guard = lock_state(&state);
        (
            state_guard.find_node(node_id),
            state_guard.tree_cancel.clone(),
            state_guard.config.load_timeout(),
        )
    };
    let Some(node) = node else {
        proxy.send_event(UserEvent::ShowError(format!("Node {} not found", node_id)));
        return None;
    };

    Some(tokio::spawn(async move {
        let outcome = node.refresh(timeout, &cancel).await;
        with_state_and_notify(&state, &proxy, |s| {
            if outcome == LoadOutcome::TimedOut {
                s.status_message = format!("Refreshing '{}' timed out.", node.label());
            }
        });
    }))
}

/// Cancels any running search and starts a new one for `query`.
///
/// Matches and progress are streamed as `UserEvent`s while the search runs;
/// a final `SearchFinished` and state update follow when it ends.
pub fn start_search<P: EventProxy>(query: String, proxy: P, state: Arc<Mutex<AppState>>) {
    let mut state_guard = lock_state(&state);
    state_guard.cancel_current_search();

    state_guard.search_query = query.clone();
    state_guard.search_results.clear();
    state_guard.search_progress = None;
    state_guard.is_searching = true;
    state_guard.last_search_at = Some(chrono::Local::now());
    state_guard.status_message = format!("Searching for '{}'...", query);

    let cancel = CancellationToken::new();
    state_guard.search_cancel = cancel.clone();
    let generation = state_guard.search_generation;
    let orchestrator = SearchOrchestrator::new(
        state_guard.context.services.clone(),
        Arc::clone(&state_guard.context.registry),
    )
    .with_concurrency(state_guard.config.search_concurrency());

    let task_proxy = proxy.clone();
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        search_task(query, orchestrator, generation, cancel, task_proxy, task_state).await;
    });
    state_guard.search_task = Some(handle);

    let ui_state = generate_ui_state(&state_guard);
    drop(state_guard);
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
}

/// Cancels the running search, if any, and publishes the new state.
pub fn cancel_search<P: EventProxy>(proxy: &P, state: &Arc<Mutex<AppState>>) {
    with_state_and_notify(state, proxy, AppState::cancel_current_search);
}

async fn search_task<P: EventProxy>(
    query: String,
    orchestrator: SearchOrchestrator,
    generation: u64,
    cancel: CancellationToken,
    proxy: P,
    state: Arc<Mutex<AppState>>,
) {
    let on_result = {
        let proxy = proxy.clone();
        let state = state.clone();
        move |found: SearchMatch| {
            let view = SearchResultView::from_match(&found);
            {
                let mut state_guard = lock_state(&state);
                if state_guard.search_generation != generation {
                    return;
                }
                state_guard.search_results.push(found);
            }
            proxy.send_event(UserEvent::SearchResult(Box::new(view)));
        }
    };
    let on_progress = {
        let proxy = proxy.clone();
        let state = state.clone();
        move |progress: SearchProgress| {
            {
                let mut state_guard = lock_state(&state);
                if state_guard.search_generation != generation {
                    return;
                }
                state_guard.search_progress = Some(progress);
            }
            proxy.send_event(UserEvent::SearchProgress(progress));
        }
    };

    let summary = orchestrator
        .search(&query, on_result, on_progress, &cancel)
        .await;

    let mut state_guard = lock_state(&state);
    if state_guard.search_generation != generation {
        tracing::debug!("Discarding the summary of a replaced search for '{}'", query);
        return;
    }
    state_guard.is_searching = false;
    state_guard.search_task = None;
    state_guard.status_message = if summary.cancelled {
        "Search cancelled.".to_string()
    } else {
        format!(
            "Found {} matches in {} of {} subscriptions.",
            summary.matches, summary.scopes_completed, summary.total_scopes
        )
    };
    let ui_state = generate_ui_state(&state_guard);
    drop(state_guard);

    proxy.send_event(UserEvent::SearchFinished(summary));
    proxy.send_event(UserEvent::StateUpdate(Box::new(ui_state)));
}

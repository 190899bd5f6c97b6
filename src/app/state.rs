//! Defines the central, mutable state of the application.

use crate::config::ExplorerConfig;
use crate::core::node::NodeId;
use crate::core::{
    apply_visibility, build_root, CloudServices, ExplorerContext, NodeRef, ResourceRegistry,
    SearchMatch, SearchProgress,
};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Holds the complete, mutable state of the application.
///
/// This struct is wrapped in an `Arc<Mutex<...>>` to allow for safe, shared access
/// from the presentation consumer and the background tasks.
pub struct AppState {
    /// The application's configuration settings.
    pub config: ExplorerConfig,
    /// Collaborators, registry and visibility policy shared by every node.
    pub context: Arc<ExplorerContext>,
    /// Root of the primary tree.
    pub root: NodeRef,
    /// Cancels every expansion and refresh when the application shuts down.
    pub tree_cancel: CancellationToken,
    /// The query of the current or last search.
    pub search_query: String,
    /// Matches of the current or last search, in arrival order.
    pub search_results: Vec<SearchMatch>,
    pub search_progress: Option<SearchProgress>,
    /// `true` while a search is running.
    pub is_searching: bool,
    pub last_search_at: Option<DateTime<Local>>,
    pub status_message: String,
    /// A handle to the currently running search task, allowing it to be aborted.
    pub search_task: Option<JoinHandle<()>>,
    /// Cancels the currently running search.
    pub search_cancel: CancellationToken,
    /// Incremented per search so late callbacks of a replaced search are dropped.
    pub search_generation: u64,
}

impl AppState {
    pub fn new(config: ExplorerConfig, services: CloudServices) -> Self {
        let registry = match &config.resource_types {
            Some(types) => ResourceRegistry::with_defaults().restricted_to(types),
            None => ResourceRegistry::with_defaults(),
        };
        let context = ExplorerContext::new(services, registry, config.visibility_policy());
        let root = build_root(&context);
        Self {
            config,
            context,
            root,
            tree_cancel: CancellationToken::new(),
            search_query: String::new(),
            search_results: Vec::new(),
            search_progress: None,
            is_searching: false,
            last_search_at: None,
            status_message: "Ready.".to_string(),
            search_task: None,
            search_cancel: CancellationToken::new(),
            search_generation: 0,
        }
    }

    /// Cancels the current search, if any, and resets the searching state.
    pub fn cancel_current_search(&mut self) {
        self.search_cancel.cancel();
        self.search_generation += 1;
        if let Some(handle) = self.search_task.take() {
            tracing::info!("Cancelling search for '{}'", self.search_query);
            handle.abort();
            self.status_message = "Search cancelled.".to_string();
        }
        self.is_searching = false;
    }

    /// Finds a node of the primary tree or of the search results by id.
    pub fn find_node(&self, id: NodeId) -> Option<NodeRef> {
        let mut found = None;
        self.root.visit(&mut |node, _| {
            if found.is_none() && node.id() == id {
                found = Some(Arc::clone(node));
            }
        });
        found.or_else(|| {
            self.search_results.iter().find_map(|m| {
                let mut found = None;
                m.node.resolve().visit(&mut |node, _| {
                    if found.is_none() && node.id() == id {
                        found = Some(Arc::clone(node));
                    }
                });
                (m.node.id() == id)
                    .then(|| Arc::clone(&m.node))
                    .or(found)
            })
        })
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.config.show_all = show_all;
        self.apply_policy();
    }

    pub fn set_tenant_hidden(&mut self, tenant_id: &str, hidden: bool) {
        if hidden {
            self.config.hidden_tenants.insert(tenant_id.to_string());
        } else {
            self.config.hidden_tenants.remove(tenant_id);
        }
        self.apply_policy();
    }

    pub fn set_subscription_hidden(&mut self, subscription_id: &str, hidden: bool) {
        if hidden {
            self.config
                .hidden_subscriptions
                .insert(subscription_id.to_string());
        } else {
            self.config.hidden_subscriptions.remove(subscription_id);
        }
        self.apply_policy();
    }

    /// Pushes the configured visibility to future loads and the loaded tree.
    fn apply_policy(&self) {
        let policy = self.config.visibility_policy();
        self.context.set_policy(policy.clone());
        apply_visibility(&self.root, &policy);
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.tree_cancel.cancel();
        self.search_cancel.cancel();
    }
}

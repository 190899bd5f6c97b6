//! The tree node entity and its loading state machine.
//!
//! A node owns its children through a lock-protected vector (the data owner)
//! and reports every mutation to an optional [`NodeObserver`] (the
//! presentation adapter). The per-node `load_state` mutex is the only
//! serialization point deciding who may populate a node's subtree.

use super::error::CoreError;
use super::ordering::{sorted_insert_index, Visibility};
use super::timeout::run_with_timeout;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared handle to a node. Ownership flows from parent to child only.
pub type NodeRef = Arc<Node>;

/// Description shown while a node is loading its children.
pub const LOADING_DESCRIPTION: &str = "loading...";

/// Label of the synthetic "expandable but not loaded yet" child.
pub const PLACEHOLDER_LABEL: &str = "Loading...";

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node represents in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Account { identity_id: String },
    Tenant { tenant_id: String },
    Subscription { subscription_id: String },
    Category { resource_type: String },
    Resource { resource_type: String, resource_group: String },
    SearchResult,
    Placeholder,
    Error,
}

/// Loading state of a node's children.
///
/// A failed load still ends in `Loaded`, with a single error child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}

/// How a call to [`Node::load_children`] or [`Node::refresh`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing to do: a leaf, or another load already ran or is running.
    Skipped,
    Loaded,
    /// The error was recorded as a synthetic error child.
    Failed,
    Cancelled,
    TimedOut,
}

/// Whether a node stands for itself or forwards to another node.
pub enum NodeTarget {
    Direct,
    Wrapper(NodeRef),
}

/// Which observable property of a node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeProperty {
    Label,
    Description,
    LoadState,
    Visibility,
}

/// A mutation of the tree, reported after it has been fully applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    ChildInserted {
        parent: NodeId,
        index: usize,
        child: NodeId,
    },
    ChildRemoved {
        parent: NodeId,
        child: NodeId,
    },
    ChildrenCleared {
        parent: NodeId,
    },
    PropertyChanged {
        node: NodeId,
        property: NodeProperty,
    },
}

/// Receives tree mutations, possibly from many tasks at once.
pub trait NodeObserver: Send + Sync {
    fn on_node_event(&self, event: NodeEvent);
}

/// Enumerates the children of one kind of node.
#[async_trait]
pub trait ChildSource: Send + Sync {
    /// Inserts children into `node` as they are discovered.
    ///
    /// `node` is already in the `Loading` state when this is called.
    async fn populate(&self, node: &NodeRef, cancel: &CancellationToken) -> Result<(), CoreError>;
}

/// One position in the displayed hierarchy.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    target: NodeTarget,
    source: Option<Arc<dyn ChildSource>>,
    label: RwLock<String>,
    description: RwLock<Option<String>>,
    visibility: RwLock<Visibility>,
    children: Mutex<Vec<NodeRef>>,
    parent: RwLock<Weak<Node>>,
    load_state: Mutex<LoadState>,
    observer: RwLock<Option<Arc<dyn NodeObserver>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`Node`]. Construction is synchronous and cheap.
pub struct NodeBuilder {
    kind: NodeKind,
    label: String,
    description: Option<String>,
    visibility: Visibility,
    source: Option<Arc<dyn ChildSource>>,
    target: NodeTarget,
}

impl NodeBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Makes the node expandable, loading its children from `source`.
    pub fn children_from(mut self, source: Arc<dyn ChildSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Makes the node forward capability checks and loading to `inner`.
    pub fn wrapping(mut self, inner: NodeRef) -> Self {
        self.target = NodeTarget::Wrapper(inner);
        self
    }

    /// Builds the node. Expandable direct nodes get one placeholder child.
    pub fn build(self) -> NodeRef {
        let seed_placeholder =
            self.source.is_some() && matches!(self.target, NodeTarget::Direct);
        let node = Arc::new(Node {
            id: NodeId::next(),
            kind: self.kind,
            target: self.target,
            source: self.source,
            label: RwLock::new(self.label),
            description: RwLock::new(self.description),
            visibility: RwLock::new(self.visibility),
            children: Mutex::new(Vec::new()),
            parent: RwLock::new(Weak::new()),
            load_state: Mutex::new(LoadState::NotLoaded),
            observer: RwLock::new(None),
        });
        if seed_placeholder {
            node.add_child(Node::placeholder());
        }
        node
    }
}

/// Ends the load on every exit path, including when the load future is dropped.
struct LoadingGuard<'a>(&'a Node);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.end_loading();
    }
}

impl Node {
    pub fn builder(kind: NodeKind, label: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            kind,
            label: label.into(),
            description: None,
            visibility: Visibility::default(),
            source: None,
            target: NodeTarget::Direct,
        }
    }

    /// The synthetic child shown before a node has been expanded.
    pub fn placeholder() -> NodeRef {
        Node::builder(NodeKind::Placeholder, PLACEHOLDER_LABEL).build()
    }

    /// An inert child carrying a load failure message as its label.
    pub fn error(message: impl Into<String>) -> NodeRef {
        Node::builder(NodeKind::Error, message).build()
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn target(&self) -> &NodeTarget {
        &self.target
    }

    pub fn is_wrapper(&self) -> bool {
        matches!(self.target, NodeTarget::Wrapper(_))
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == NodeKind::Placeholder
    }

    /// Returns the node that actually owns data and loading for this position.
    pub fn resolve(self: &Arc<Self>) -> NodeRef {
        match &self.target {
            NodeTarget::Direct => Arc::clone(self),
            NodeTarget::Wrapper(inner) => inner.resolve(),
        }
    }

    /// Whether the resolved node can have children.
    pub fn supports_children(self: &Arc<Self>) -> bool {
        self.resolve().source.is_some()
    }

    pub fn label(&self) -> String {
        read(&self.label).clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *write(&self.label) = label.into();
        self.notify_property(NodeProperty::Label);
    }

    pub fn description(&self) -> Option<String> {
        read(&self.description).clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        {
            let mut current = write(&self.description);
            if *current == description {
                return;
            }
            *current = description;
        }
        self.notify_property(NodeProperty::Description);
    }

    pub fn visibility(&self) -> Visibility {
        *read(&self.visibility)
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        {
            let mut current = write(&self.visibility);
            if *current == visibility {
                return;
            }
            *current = visibility;
        }
        self.notify_property(NodeProperty::Visibility);
    }

    pub fn is_visible(&self) -> bool {
        self.visibility().is_visible
    }

    pub fn opacity(&self) -> f32 {
        self.visibility().opacity
    }

    pub fn parent(&self) -> Option<NodeRef> {
        read(&self.parent).upgrade()
    }

    /// A snapshot of the children. Safe to iterate while others mutate the node.
    pub fn children(&self) -> Vec<NodeRef> {
        lock(&self.children).clone()
    }

    pub fn child_count(&self) -> usize {
        lock(&self.children).len()
    }

    pub fn load_state(&self) -> LoadState {
        *lock(&self.load_state)
    }

    pub fn is_loaded(&self) -> bool {
        self.load_state() == LoadState::Loaded
    }

    pub fn is_loading(&self) -> bool {
        self.load_state() == LoadState::Loading
    }

    /// Attaches an observer to this node and every node below it that has none.
    pub fn set_observer(&self, observer: Arc<dyn NodeObserver>) {
        *write(&self.observer) = Some(Arc::clone(&observer));
        if let NodeTarget::Wrapper(inner) = &self.target {
            inner.inherit_observer(&observer);
        }
        for child in self.children() {
            child.inherit_observer(&observer);
        }
    }

    fn inherit_observer(&self, observer: &Arc<dyn NodeObserver>) {
        if read(&self.observer).is_none() {
            self.set_observer(Arc::clone(observer));
        }
    }

    fn notify(&self, event: NodeEvent) {
        let observer = read(&self.observer).clone();
        if let Some(observer) = observer {
            observer.on_node_event(event);
        }
    }

    fn notify_property(&self, property: NodeProperty) {
        self.notify(NodeEvent::PropertyChanged {
            node: self.id,
            property,
        });
    }

    /// Links `child` to this node. Runs before the child becomes visible in
    /// `children`, so no observer ever sees a stale parent.
    fn attach(self: &Arc<Self>, child: &NodeRef) {
        *write(&child.parent) = Arc::downgrade(self);
        let observer = read(&self.observer).clone();
        if let Some(observer) = observer {
            child.inherit_observer(&observer);
        }
    }

    /// Appends `child`, preserving discovery order. Returns its index.
    pub fn add_child(self: &Arc<Self>, child: NodeRef) -> usize {
        self.attach(&child);
        let child_id = child.id;
        let index = {
            let mut children = lock(&self.children);
            children.push(child);
            children.len() - 1
        };
        self.notify(NodeEvent::ChildInserted {
            parent: self.id,
            index,
            child: child_id,
        });
        index
    }

    /// Inserts `child` in case-insensitive label order. Returns its index.
    pub fn insert_child_sorted(self: &Arc<Self>, child: NodeRef) -> usize {
        self.attach(&child);
        let child_id = child.id;
        let label = child.label();
        let index = {
            let mut children = lock(&self.children);
            let labels: Vec<String> = children.iter().map(|c| c.label()).collect();
            let index = sorted_insert_index(labels.iter().map(String::as_str), &label);
            children.insert(index, child);
            index
        };
        self.notify(NodeEvent::ChildInserted {
            parent: self.id,
            index,
            child: child_id,
        });
        index
    }

    /// Removes `child` if present and clears its parent link.
    pub fn remove_child(&self, child: &NodeRef) -> bool {
        let removed = {
            let mut children = lock(&self.children);
            match children.iter().position(|c| Arc::ptr_eq(c, child)) {
                Some(index) => {
                    children.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            *write(&child.parent) = Weak::new();
            self.notify(NodeEvent::ChildRemoved {
                parent: self.id,
                child: child.id,
            });
        }
        removed
    }

    pub fn clear_children(&self) {
        let removed = std::mem::take(&mut *lock(&self.children));
        for child in &removed {
            *write(&child.parent) = Weak::new();
        }
        self.notify(NodeEvent::ChildrenCleared { parent: self.id });
    }

    fn remove_placeholders(&self) {
        let removed: Vec<NodeRef> = {
            let mut children = lock(&self.children);
            let (placeholders, kept): (Vec<_>, Vec<_>) =
                children.drain(..).partition(|c| c.is_placeholder());
            *children = kept;
            placeholders
        };
        for placeholder in removed {
            *write(&placeholder.parent) = Weak::new();
            self.notify(NodeEvent::ChildRemoved {
                parent: self.id,
                child: placeholder.id,
            });
        }
    }

    /// Claims the right to populate this node.
    ///
    /// Returns `false` when the node is already loaded or another load is in
    /// flight. On `true` the caller must eventually call [`Node::end_loading`].
    pub fn begin_loading(&self) -> bool {
        {
            let mut state = lock(&self.load_state);
            if *state != LoadState::NotLoaded {
                return false;
            }
            *state = LoadState::Loading;
        }
        self.notify_property(NodeProperty::LoadState);
        self.set_description(Some(LOADING_DESCRIPTION.to_string()));
        self.remove_placeholders();
        true
    }

    /// Marks the load as finished, whatever its result.
    pub fn end_loading(&self) {
        self.set_description(None);
        *lock(&self.load_state) = LoadState::Loaded;
        self.notify_property(NodeProperty::LoadState);
    }

    /// Puts the node back into `NotLoaded` with no children and no description.
    pub fn reset_loading(&self) {
        *lock(&self.load_state) = LoadState::NotLoaded;
        self.notify_property(NodeProperty::LoadState);
        self.set_description(None);
        self.clear_children();
    }

    /// Populates the children once.
    ///
    /// Never fails: errors become a single error child and cancellation just
    /// stops. Either way the node ends up `Loaded`.
    pub async fn load_children(self: &Arc<Self>, cancel: &CancellationToken) -> LoadOutcome {
        let node = self.resolve();
        let Some(source) = node.source.clone() else {
            return LoadOutcome::Skipped;
        };
        if !node.begin_loading() {
            return LoadOutcome::Skipped;
        }
        let _guard = LoadingGuard(&node);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = source.populate(&node, cancel) => result,
        };

        match result {
            Ok(()) => LoadOutcome::Loaded,
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                tracing::debug!("Loading '{}' was cancelled", node.label());
                LoadOutcome::Cancelled
            }
            Err(e) => {
                tracing::warn!("Failed to load children of '{}': {}", node.label(), e);
                node.clear_children();
                node.add_child(Node::error(e.to_string()));
                LoadOutcome::Failed
            }
        }
    }

    /// Discards the children and loads them again under `timeout`.
    ///
    /// When the deadline elapses the node is left `Loaded` with a timeout
    /// message as its description.
    pub async fn refresh(
        self: &Arc<Self>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> LoadOutcome {
        let node = self.resolve();
        node.reset_loading();

        let loading = Arc::clone(&node);
        let result = run_with_timeout(
            |token| async move { Ok(loading.load_children(&token).await) },
            timeout,
            cancel,
        )
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(CoreError::Timeout(elapsed)) => {
                tracing::warn!("Refreshing '{}' timed out after {:?}", node.label(), elapsed);
                node.end_loading();
                node.set_description(Some(format!("Timed out after {:?}", elapsed)));
                LoadOutcome::TimedOut
            }
            Err(_) => LoadOutcome::Cancelled,
        }
    }

    /// Visits this node and every descendant depth-first, with their depth.
    pub fn visit(self: &Arc<Self>, visitor: &mut dyn FnMut(&NodeRef, usize)) {
        fn walk(node: &NodeRef, depth: usize, visitor: &mut dyn FnMut(&NodeRef, usize)) {
            visitor(node, depth);
            for child in node.children() {
                walk(&child, depth + 1, visitor);
            }
        }
        walk(self, 0, visitor);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label())
            .field("load_state", &self.load_state())
            .field("children", &self.child_count())
            .finish()
    }
}

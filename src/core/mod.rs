pub mod catalog;
pub mod discovery;
pub mod error;
pub mod hierarchy;
pub mod node;
pub mod ordering;
pub mod provider;
pub mod registry;
pub mod search;
pub mod timeout;

pub use catalog::StaticCatalog;
pub use discovery::ScopeDiscovery;
pub use error::CoreError;
pub use hierarchy::{apply_visibility, build_root, ExplorerContext};
pub use node::{LoadOutcome, LoadState, Node, NodeEvent, NodeKind, NodeObserver, NodeRef};
pub use ordering::{Visibility, VisibilityPolicy};
pub use provider::{CloudServices, Scope};
pub use registry::ResourceRegistry;
pub use search::{SearchMatch, SearchOrchestrator, SearchProgress, SearchSummary};
pub use timeout::{run_with_timeout, run_with_timeout_or, DEFAULT_TIMEOUT};

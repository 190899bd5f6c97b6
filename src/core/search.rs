//! Searches every resource type in every reachable subscription for a
//! case-insensitive name match, streaming matches back as they are found.

use super::discovery::ScopeDiscovery;
use super::error::CoreError;
use super::node::{Node, NodeKind, NodeRef};
use super::provider::{resource_stream, CloudServices, RawResource, ResourceLister, Scope};
use super::registry::{ResourceKind, ResourceRegistry};
use futures::future::join_all;
use futures::StreamExt;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Coarse search progress, counted in completed scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchProgress {
    pub completed: usize,
    pub total: usize,
}

/// One matching resource.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    /// Display node for the result list. Wraps `resource`.
    pub node: NodeRef,
    /// The node built by the registry, identical to the primary tree's.
    pub resource: NodeRef,
    pub resource_type: String,
    pub scope: Scope,
}

/// How a search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub matches: usize,
    pub scopes_completed: usize,
    pub total_scopes: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

type ResultCallback = Arc<dyn Fn(SearchMatch) + Send + Sync>;
type ProgressCallback = Arc<dyn Fn(SearchProgress) + Send + Sync>;

/// Two tasks per available core, so latency is bounded by the slowest call
/// rather than by queueing.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
        * 2
}

/// Runs one fresh discovery and fan-out per [`SearchOrchestrator::search`] call.
/// Holds no state between searches.
pub struct SearchOrchestrator {
    services: CloudServices,
    registry: Arc<ResourceRegistry>,
    concurrency: usize,
}

impl SearchOrchestrator {
    pub fn new(services: CloudServices, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            services,
            registry,
            concurrency: default_concurrency(),
        }
    }

    /// Overrides how many scopes are searched at once. At least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Searches for resources whose name contains `query`, ignoring case.
    ///
    /// `on_result` runs once per match, as soon as it is found and possibly
    /// from several tasks at once. `on_progress` starts at `(0, total)` and
    /// its `completed` count only grows. Cancellation stops the search and is
    /// reported in the summary; matches already delivered stay valid.
    pub async fn search<R, P>(
        &self,
        query: &str,
        on_result: R,
        on_progress: P,
        cancel: &CancellationToken,
    ) -> SearchSummary
    where
        R: Fn(SearchMatch) + Send + Sync + 'static,
        P: Fn(SearchProgress) + Send + Sync + 'static,
    {
        let started = Instant::now();
        let needle = query.trim().to_lowercase();
        let mut summary = SearchSummary {
            matches: 0,
            scopes_completed: 0,
            total_scopes: 0,
            cancelled: false,
            elapsed: Duration::ZERO,
        };
        if needle.is_empty() {
            return summary;
        }

        let scopes = match ScopeDiscovery::new(self.services.clone())
            .discover(cancel)
            .await
        {
            Ok(scopes) => scopes,
            Err(CoreError::Cancelled) => {
                tracing::debug!("Search for '{}' cancelled during discovery", query);
                summary.cancelled = true;
                summary.elapsed = started.elapsed();
                return summary;
            }
            Err(e) => {
                tracing::warn!("Search for '{}' found no scopes: {}", query, e);
                summary.elapsed = started.elapsed();
                return summary;
            }
        };

        let total = scopes.len();
        summary.total_scopes = total;
        on_progress(SearchProgress {
            completed: 0,
            total,
        });

        let on_result: ResultCallback = Arc::new(on_result);
        let on_progress: ProgressCallback = Arc::new(on_progress);
        let needle: Arc<str> = needle.into();
        let gate = Arc::new(Semaphore::new(self.concurrency));
        let matches = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        // Counting and reporting happen together so `completed` arrives in order.
        let progress_lock = Arc::new(Mutex::new(()));

        let mut tasks = JoinSet::new();
        for scope in scopes {
            let search = ScopeSearch {
                scope,
                needle: Arc::clone(&needle),
                lister: Arc::clone(&self.services.resources),
                registry: Arc::clone(&self.registry),
                on_result: Arc::clone(&on_result),
                matches: Arc::clone(&matches),
                cancel: cancel.clone(),
            };
            let gate = Arc::clone(&gate);
            let completed = Arc::clone(&completed);
            let on_progress = Arc::clone(&on_progress);
            let progress_lock = Arc::clone(&progress_lock);
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = search.run(gate) => {}
                    }
                    let _ordered = progress_lock.lock().unwrap_or_else(PoisonError::into_inner);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    on_progress(SearchProgress {
                        completed: done,
                        total,
                    });
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("Search task failed: {}", CoreError::from(e));
                }
            }
        }

        summary.matches = matches.load(Ordering::SeqCst);
        summary.scopes_completed = completed.load(Ordering::SeqCst);
        // A cancel that lands after the last scope finished stopped nothing.
        summary.cancelled = cancel.is_cancelled() && summary.scopes_completed < total;
        summary.elapsed = started.elapsed();
        tracing::info!(
            "Search for '{}' found {} matches in {}/{} scopes after {:?}",
            query,
            summary.matches,
            summary.scopes_completed,
            summary.total_scopes,
            summary.elapsed
        );
        summary
    }
}

/// The work for one scope. Every resource type is queried concurrently.
struct ScopeSearch {
    scope: Scope,
    needle: Arc<str>,
    lister: Arc<dyn ResourceLister>,
    registry: Arc<ResourceRegistry>,
    on_result: ResultCallback,
    matches: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl ScopeSearch {
    async fn run(self, gate: Arc<Semaphore>) {
        let Ok(_permit) = gate.acquire_owned().await else {
            return;
        };
        join_all(
            self.registry
                .kinds()
                .iter()
                .map(|kind| self.search_resource_type(kind)),
        )
        .await;
    }

    async fn search_resource_type(&self, kind: &ResourceKind) {
        let mut resources = resource_stream(
            Arc::clone(&self.lister),
            self.scope.clone(),
            kind.resource_type.clone(),
            self.cancel.clone(),
        );
        while let Some(next) = resources.next().await {
            match next {
                Ok(raw) if raw.name.to_lowercase().contains(&*self.needle) => {
                    let found = self.build_match(kind, &raw);
                    self.matches.fetch_add(1, Ordering::SeqCst);
                    (self.on_result)(found);
                }
                Ok(_) => {}
                Err(CoreError::Cancelled) => return,
                Err(e) => {
                    let err = CoreError::ResourceListing {
                        resource_type: kind.resource_type.clone(),
                        scope: self.scope.to_string(),
                        source: e.into_source(),
                    };
                    tracing::warn!("Skipping resource type: {}", err);
                    return;
                }
            }
        }
    }

    fn build_match(&self, kind: &ResourceKind, raw: &RawResource) -> SearchMatch {
        let resource = kind.create_node(&self.scope, raw);
        let node = Node::builder(NodeKind::SearchResult, raw.name.clone())
            .description(format!(
                "{} / {}",
                self.scope.subscription_name, raw.resource_group
            ))
            .wrapping(Arc::clone(&resource))
            .build();
        SearchMatch {
            node,
            resource,
            resource_type: kind.resource_type.clone(),
            scope: self.scope.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{
        CatalogDocument, CatalogIdentity, CatalogSubscription, CatalogTenant, StaticCatalog,
    };
    use crate::core::provider::Page;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    const SITES: &str = "Microsoft.Web/sites";
    const VAULTS: &str = "Microsoft.KeyVault/vaults";
    const STORAGE: &str = "Microsoft.Storage/storageAccounts";

    fn raw(name: &str) -> RawResource {
        RawResource {
            name: name.into(),
            resource_group: "rg-web".into(),
            properties: BTreeMap::new(),
        }
    }

    fn subscription(id: &str, resources: Vec<(&str, Vec<RawResource>)>) -> CatalogSubscription {
        CatalogSubscription {
            id: id.into(),
            display_name: id.to_uppercase(),
            resources: resources
                .into_iter()
                .map(|(t, r)| (t.to_string(), r))
                .collect(),
            ..Default::default()
        }
    }

    fn identity(id: &str, subscriptions: Vec<CatalogSubscription>) -> CatalogIdentity {
        CatalogIdentity {
            id: id.into(),
            display_name: id.into(),
            tenants: vec![CatalogTenant {
                id: format!("{}-tenant", id),
                display_name: format!("{} tenant", id),
                subscriptions,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn registry(types: &[&str]) -> Arc<ResourceRegistry> {
        let mut registry = ResourceRegistry::new();
        for t in types {
            registry.register_leaf(*t, *t);
        }
        Arc::new(registry)
    }

    /// Collects everything the callbacks receive.
    #[derive(Clone, Default)]
    struct Collector {
        results: Arc<Mutex<Vec<SearchMatch>>>,
        progress: Arc<Mutex<Vec<SearchProgress>>>,
    }

    impl Collector {
        async fn search(
            &self,
            orchestrator: &SearchOrchestrator,
            query: &str,
            cancel: &CancellationToken,
        ) -> SearchSummary {
            let results = Arc::clone(&self.results);
            let progress = Arc::clone(&self.progress);
            orchestrator
                .search(
                    query,
                    move |m| results.lock().unwrap().push(m),
                    move |p| progress.lock().unwrap().push(p),
                    cancel,
                )
                .await
        }

        fn results(&self) -> Vec<SearchMatch> {
            self.results.lock().unwrap().clone()
        }

        fn progress(&self) -> Vec<SearchProgress> {
            self.progress.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_finds_the_single_match_across_identities() {
        let document = CatalogDocument {
            identities: vec![
                identity(
                    "alice",
                    vec![subscription(
                        "prod",
                        vec![
                            (SITES, vec![raw("My-App"), raw("other-site")]),
                            (VAULTS, vec![raw("kv-main")]),
                        ],
                    )],
                ),
                identity(
                    "bob",
                    vec![subscription("dev", vec![(STORAGE, vec![raw("mystorage")])])],
                ),
            ],
            ..Default::default()
        };
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(document)));
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES, VAULTS, STORAGE]));
        let collector = Collector::default();

        let summary = collector
            .search(&orchestrator, "my-app", &CancellationToken::new())
            .await;

        assert_eq!(summary.matches, 1);
        assert!(!summary.cancelled);
        let results = collector.results();
        assert_eq!(results.len(), 1);
        let found = &results[0];
        assert_eq!(found.node.label(), "My-App");
        assert_eq!(found.node.description().as_deref(), Some("PROD / rg-web"));
        assert!(found.node.is_wrapper());
        assert!(Arc::ptr_eq(&found.node.resolve(), &found.resource));
        assert_eq!(found.resource_type, SITES);
        assert_eq!(found.scope.identity_name, "alice");

        let progress = collector.progress();
        assert_eq!(progress.first(), Some(&SearchProgress { completed: 0, total: 2 }));
        assert_eq!(progress.last(), Some(&SearchProgress { completed: 2, total: 2 }));
        assert!(progress.windows(2).all(|w| w[0].completed <= w[1].completed));
    }

    #[tokio::test]
    async fn test_cancelled_before_discovery_yields_nothing() {
        let document = CatalogDocument {
            identities: vec![identity(
                "alice",
                vec![subscription("prod", vec![(SITES, vec![raw("my-app")])])],
            )],
            ..Default::default()
        };
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(document)));
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES]));
        let collector = Collector::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = collector.search(&orchestrator, "my-app", &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.matches, 0);
        assert!(collector.results().is_empty());
        assert!(collector.progress().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_discovering_yields_nothing() {
        let document = CatalogDocument {
            latency_ms: 50,
            identities: vec![identity(
                "alice",
                vec![subscription("prod", vec![(SITES, vec![raw("my-app")])])],
            )],
            ..Default::default()
        };
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(document)));
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES]));
        let collector = Collector::default();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let summary = collector.search(&orchestrator, "my-app", &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.total_scopes, 0);
        assert!(collector.results().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_one_failing_scope_does_not_stop_the_others() {
        let subscriptions = (0..10)
            .map(|i| {
                let mut sub = subscription(
                    &format!("sub-{}", i),
                    vec![(SITES, vec![raw(&format!("my-app-{}", i)), raw("unrelated")])],
                );
                sub.unavailable = i == 3;
                sub
            })
            .collect();
        let document = CatalogDocument {
            identities: vec![identity("alice", subscriptions)],
            ..Default::default()
        };
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(document)));
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES])).with_concurrency(3);
        let collector = Collector::default();

        let summary = collector
            .search(&orchestrator, "MY-APP", &CancellationToken::new())
            .await;

        assert_eq!(summary.matches, 9);
        assert_eq!(summary.scopes_completed, 10);
        assert_eq!(summary.total_scopes, 10);
        assert!(collector.results().iter().all(|m| m.scope.subscription_id != "sub-3"));
        assert_eq!(
            collector.progress().last(),
            Some(&SearchProgress { completed: 10, total: 10 })
        );
        assert!(logs_contain("Skipping resource type"));
    }

    #[tokio::test]
    async fn test_blank_query_skips_discovery() {
        let catalog = Arc::new(StaticCatalog::new(CatalogDocument {
            identities: vec![identity("alice", vec![subscription("prod", vec![])])],
            ..Default::default()
        }));
        let orchestrator =
            SearchOrchestrator::new(CloudServices::from_provider(catalog.clone()), registry(&[SITES]));
        let collector = Collector::default();

        let summary = collector
            .search(&orchestrator, "   ", &CancellationToken::new())
            .await;

        assert_eq!(summary.matches, 0);
        assert_eq!(catalog.identity_requests(), 0);
        assert!(collector.progress().is_empty());
    }

    /// Tracks how many listing calls run at the same time.
    struct ConcurrencyTracker {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ResourceLister for ConcurrencyTracker {
        async fn list_resources(
            &self,
            _scope: &Scope,
            _resource_type: &str,
            _continuation: Option<String>,
        ) -> anyhow::Result<Page<RawResource>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Page::last(vec![raw("my-app")]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_bounds_concurrent_scopes() {
        let subscriptions = (0..6)
            .map(|i| subscription(&format!("sub-{}", i), vec![]))
            .collect();
        let catalog = Arc::new(StaticCatalog::new(CatalogDocument {
            identities: vec![identity("alice", subscriptions)],
            ..Default::default()
        }));
        let tracker = Arc::new(ConcurrencyTracker {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let services = CloudServices {
            identities: catalog.clone(),
            directory: catalog,
            resources: tracker.clone(),
        };
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES])).with_concurrency(2);
        let collector = Collector::default();

        let summary = collector
            .search(&orchestrator, "app", &CancellationToken::new())
            .await;

        assert_eq!(summary.matches, 6);
        assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_progress_arrives_in_order_on_many_workers() {
        let subscriptions = (0..40)
            .map(|i| subscription(&format!("sub-{}", i), vec![(SITES, vec![raw("my-app")])]))
            .collect();
        let document = CatalogDocument {
            identities: vec![identity("alice", subscriptions)],
            ..Default::default()
        };
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(document)));
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES])).with_concurrency(8);
        let collector = Collector::default();

        let summary = collector
            .search(&orchestrator, "my-app", &CancellationToken::new())
            .await;

        assert_eq!(summary.scopes_completed, 40);
        let completed: Vec<usize> = collector.progress().iter().map(|p| p.completed).collect();
        assert_eq!(completed, (0..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancel_after_the_last_scope_is_not_reported() {
        let document = CatalogDocument {
            identities: vec![identity(
                "alice",
                vec![
                    subscription("prod", vec![(SITES, vec![raw("my-app")])]),
                    subscription("dev", vec![(SITES, vec![raw("my-app-dev")])]),
                ],
            )],
            ..Default::default()
        };
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(document)));
        let orchestrator = SearchOrchestrator::new(services, registry(&[SITES]));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();

        let summary = orchestrator
            .search(
                "my-app",
                |_| {},
                move |p: SearchProgress| {
                    if p.completed == p.total {
                        canceller.cancel();
                    }
                },
                &cancel,
            )
            .await;

        assert!(cancel.is_cancelled());
        assert!(!summary.cancelled);
        assert_eq!(summary.matches, 2);
        assert_eq!(summary.scopes_completed, 2);
    }

    #[test]
    fn test_concurrency_is_at_least_one() {
        let services = CloudServices::from_provider(Arc::new(StaticCatalog::new(
            CatalogDocument::default(),
        )));
        let orchestrator = SearchOrchestrator::new(services, registry(&[])).with_concurrency(0);
        assert_eq!(orchestrator.concurrency(), 1);
        assert!(default_concurrency() >= 2);
    }
}

//! Enumerates every scope (identity × tenant × subscription) the user can
//! reach, across all signed-in identities, before a search starts.

use super::error::CoreError;
use super::provider::{tenant_stream, CloudServices, Identity, Scope, Tenant};
use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Discovers scopes in parallel: one task per identity, and one concurrent
/// subscription lookup per tenant within an identity.
pub struct ScopeDiscovery {
    services: CloudServices,
}

impl ScopeDiscovery {
    pub fn new(services: CloudServices) -> Self {
        Self { services }
    }

    /// Returns every reachable scope, in no particular order.
    ///
    /// A failing identity or tenant is logged and skipped. Only a failure to
    /// list the identities themselves, or cancellation, is returned as an error.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<Scope>, CoreError> {
        let identities = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            listed = self.services.identities.list_identities() => {
                listed.map_err(|source| CoreError::ScopeEnumeration {
                    scope: "signed-in identities".to_string(),
                    source,
                })?
            }
        };

        // Producers only ever append, in any order.
        let (scope_tx, mut scope_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        for identity in identities {
            let services = self.services.clone();
            let scope_tx = scope_tx.clone();
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    discover_identity(services, identity, scope_tx, cancel).await;
                }
                .in_current_span(),
            );
        }
        drop(scope_tx);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(CoreError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => {
                        tracing::error!("Scope discovery task failed: {}", CoreError::from(e));
                    }
                    Some(_) => {}
                },
            }
        }

        let mut scopes = Vec::new();
        while let Ok(scope) = scope_rx.try_recv() {
            scopes.push(scope);
        }
        tracing::info!("Discovered {} searchable scopes", scopes.len());
        Ok(scopes)
    }
}

async fn discover_identity(
    services: CloudServices,
    identity: Identity,
    scope_tx: mpsc::UnboundedSender<Scope>,
    cancel: CancellationToken,
) {
    let credential = match services.identities.credential(&identity.id).await {
        Ok(credential) => credential,
        Err(source) => {
            let err = CoreError::ScopeEnumeration {
                scope: format!("identity {}", identity.display_name),
                source,
            };
            tracing::warn!("Skipping identity: {}", err);
            return;
        }
    };

    // Tenant pages are inherently sequential per identity.
    let mut tenants: Vec<Tenant> = Vec::new();
    let mut pages = tenant_stream(
        services.directory.clone(),
        credential.clone(),
        cancel.clone(),
    );
    while let Some(next) = pages.next().await {
        match next {
            Ok(tenant) => tenants.push(tenant),
            Err(CoreError::Cancelled) => return,
            Err(e) => {
                tracing::warn!(
                    "Failed to enumerate tenants of {}, keeping {} found so far: {}",
                    identity.display_name,
                    tenants.len(),
                    e
                );
                break;
            }
        }
    }

    let identity = &identity;
    let credential = &credential;
    let services = &services;
    let scope_tx = &scope_tx;
    let lookups = tenants.into_iter().map(|tenant| async move {
        match services
            .directory
            .list_subscriptions(credential, &tenant)
            .await
        {
            Ok(subscriptions) => {
                for subscription in subscriptions {
                    scope_tx
                        .send(Scope {
                            identity_id: identity.id.clone(),
                            identity_name: identity.display_name.clone(),
                            tenant_id: tenant.id.clone(),
                            tenant_name: tenant.display_name.clone(),
                            subscription_id: subscription.id,
                            subscription_name: subscription.display_name,
                        })
                        .ok();
                }
            }
            Err(source) => {
                let err = CoreError::ScopeEnumeration {
                    scope: format!("tenant {} of {}", tenant.display_name, identity.display_name),
                    source,
                };
                tracing::warn!("Skipping tenant: {}", err);
            }
        }
    });
    join_all(lookups).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{
        CatalogDocument, CatalogIdentity, CatalogSubscription, CatalogTenant, StaticCatalog,
    };
    use std::collections::HashSet;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn subscription(id: &str) -> CatalogSubscription {
        CatalogSubscription {
            id: id.into(),
            display_name: id.to_uppercase(),
            ..Default::default()
        }
    }

    fn tenant(id: &str, subscriptions: Vec<CatalogSubscription>) -> CatalogTenant {
        CatalogTenant {
            id: id.into(),
            display_name: id.to_uppercase(),
            subscriptions,
            ..Default::default()
        }
    }

    fn identity(id: &str, tenants: Vec<CatalogTenant>) -> CatalogIdentity {
        CatalogIdentity {
            id: id.into(),
            display_name: id.to_string(),
            tenants,
            ..Default::default()
        }
    }

    fn discovery(document: CatalogDocument) -> ScopeDiscovery {
        ScopeDiscovery::new(CloudServices::from_provider(Arc::new(StaticCatalog::new(document))))
    }

    fn subscription_ids(scopes: &[Scope]) -> HashSet<String> {
        scopes.iter().map(|s| s.subscription_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_discovers_every_subscription_of_every_identity() {
        let document = CatalogDocument {
            page_size: 1,
            identities: vec![
                identity(
                    "alice",
                    vec![
                        tenant("t1", vec![subscription("s1"), subscription("s2")]),
                        tenant("t2", vec![subscription("s3")]),
                    ],
                ),
                identity("bob", vec![tenant("t3", vec![subscription("s4")])]),
            ],
            ..Default::default()
        };

        let scopes = discovery(document)
            .discover(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(scopes.len(), 4);
        assert_eq!(
            subscription_ids(&scopes),
            HashSet::from(["s1", "s2", "s3", "s4"].map(String::from))
        );
        let s3 = scopes.iter().find(|s| s.subscription_id == "s3").unwrap();
        assert_eq!(s3.identity_id, "alice");
        assert_eq!(s3.tenant_name, "T2");
        assert_eq!(s3.subscription_name, "S3");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failing_identity_and_tenant_are_skipped() {
        let mut broken_tenant = tenant("t2", vec![subscription("s2")]);
        broken_tenant.unavailable = true;
        let mut broken_identity = identity("carol", vec![tenant("t3", vec![subscription("s3")])]);
        broken_identity.unavailable = true;

        let document = CatalogDocument {
            identities: vec![
                identity(
                    "alice",
                    vec![tenant("t1", vec![subscription("s1")]), broken_tenant],
                ),
                broken_identity,
            ],
            ..Default::default()
        };

        let scopes = discovery(document)
            .discover(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(subscription_ids(&scopes), HashSet::from(["s1".to_string()]));
        assert!(logs_contain("Skipping tenant"));
        assert!(logs_contain("Failed to enumerate tenants of carol"));
    }

    #[tokio::test]
    async fn test_cancelled_discovery_returns_cancelled() {
        let document = CatalogDocument {
            identities: vec![identity("alice", vec![tenant("t1", vec![subscription("s1")])])],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = discovery(document).discover(&cancel).await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_no_identities_means_no_scopes() {
        let scopes = discovery(CatalogDocument::default())
            .discover(&CancellationToken::new())
            .await
            .unwrap();
        assert!(scopes.is_empty());
    }
}

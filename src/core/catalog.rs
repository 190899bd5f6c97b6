//! An offline cloud described by a JSON document.
//!
//! `StaticCatalog` implements every collaborator contract from
//! [`super::provider`], with paging, optional latency and per-entry
//! `unavailable` flags that make the matching listing call fail.

use super::error::CoreError;
use super::provider::{
    AccountDirectory, Credential, Identity, IdentityProvider, Page, RawResource, ResourceLister,
    Scope, Subscription, Tenant,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 50;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Root of a catalog file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Items per listing page; 0 serves everything in one page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Simulated latency added to every call.
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub identities: Vec<CatalogIdentity>,
}

impl Default for CatalogDocument {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            latency_ms: 0,
            identities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogIdentity {
    pub id: String,
    pub display_name: String,
    /// Tenant listing fails for this identity.
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub tenants: Vec<CatalogTenant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogTenant {
    pub id: String,
    pub display_name: String,
    /// Subscription listing fails for this tenant.
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub subscriptions: Vec<CatalogSubscription>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSubscription {
    pub id: String,
    pub display_name: String,
    /// Resource listing fails for this subscription.
    #[serde(default)]
    pub unavailable: bool,
    /// Resources keyed by resource type.
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<RawResource>>,
}

pub struct StaticCatalog {
    document: CatalogDocument,
    identity_requests: AtomicUsize,
    resource_requests: AtomicUsize,
}

impl StaticCatalog {
    pub fn new(document: CatalogDocument) -> Self {
        Self {
            document,
            identity_requests: AtomicUsize::new(0),
            resource_requests: AtomicUsize::new(0),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: CatalogDocument =
            serde_json::from_str(json).context("Failed to parse catalog document")?;
        Ok(Self::new(document))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {:?}", path))?;
        let catalog = Self::from_json_str(&content)?;
        tracing::info!(
            "Loaded catalog from {:?} with {} identities",
            path,
            catalog.document.identities.len()
        );
        Ok(catalog)
    }

    pub fn document(&self) -> &CatalogDocument {
        &self.document
    }

    /// How many times the identity list was requested.
    pub fn identity_requests(&self) -> usize {
        self.identity_requests.load(Ordering::Relaxed)
    }

    /// How many resource pages were requested.
    pub fn resource_requests(&self) -> usize {
        self.resource_requests.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        if self.document.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.document.latency_ms)).await;
        }
    }

    fn identity(&self, identity_id: &str) -> Result<&CatalogIdentity> {
        self.document
            .identities
            .iter()
            .find(|i| i.id == identity_id)
            .ok_or_else(|| CoreError::UnknownIdentity(identity_id.to_string()).into())
    }

    fn tenant(&self, identity_id: &str, tenant_id: &str) -> Result<&CatalogTenant> {
        self.identity(identity_id)?
            .tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .ok_or_else(|| anyhow::anyhow!("Tenant {} not found", tenant_id))
    }

    fn subscription(&self, scope: &Scope) -> Result<&CatalogSubscription> {
        self.tenant(&scope.identity_id, &scope.tenant_id)?
            .subscriptions
            .iter()
            .find(|s| s.id == scope.subscription_id)
            .ok_or_else(|| anyhow::anyhow!("Subscription {} not found", scope.subscription_id))
    }

    fn page<T: Clone>(&self, items: &[T], continuation: Option<String>) -> Result<Page<T>> {
        let start: usize = match continuation {
            Some(token) => token
                .parse()
                .with_context(|| format!("Invalid continuation token {:?}", token))?,
            None => 0,
        };
        let size = match self.document.page_size {
            0 => items.len().max(1),
            size => size,
        };
        let end = start.saturating_add(size).min(items.len());
        let slice = items.get(start..end).unwrap_or_default();
        Ok(Page {
            items: slice.to_vec(),
            continuation: (end < items.len()).then(|| end.to_string()),
        })
    }
}

#[async_trait]
impl IdentityProvider for StaticCatalog {
    async fn list_identities(&self) -> Result<Vec<Identity>> {
        self.identity_requests.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        Ok(self
            .document
            .identities
            .iter()
            .map(|i| Identity {
                id: i.id.clone(),
                display_name: i.display_name.clone(),
            })
            .collect())
    }

    async fn credential(&self, identity_id: &str) -> Result<Credential> {
        let identity = self.identity(identity_id)?;
        Ok(Credential {
            identity_id: identity.id.clone(),
            token: format!("offline-token-{}", identity.id),
        })
    }
}

#[async_trait]
impl AccountDirectory for StaticCatalog {
    async fn list_tenants(
        &self,
        credential: &Credential,
        continuation: Option<String>,
    ) -> Result<Page<Tenant>> {
        self.simulate_latency().await;
        let identity = self.identity(&credential.identity_id)?;
        if identity.unavailable {
            anyhow::bail!("Identity {} is unavailable", identity.id);
        }
        let tenants: Vec<Tenant> = identity
            .tenants
            .iter()
            .map(|t| Tenant {
                id: t.id.clone(),
                display_name: t.display_name.clone(),
            })
            .collect();
        self.page(&tenants, continuation)
    }

    async fn list_subscriptions(
        &self,
        credential: &Credential,
        tenant: &Tenant,
    ) -> Result<Vec<Subscription>> {
        self.simulate_latency().await;
        let tenant = self.tenant(&credential.identity_id, &tenant.id)?;
        if tenant.unavailable {
            anyhow::bail!("Tenant {} is unavailable", tenant.id);
        }
        Ok(tenant
            .subscriptions
            .iter()
            .map(|s| Subscription {
                id: s.id.clone(),
                display_name: s.display_name.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ResourceLister for StaticCatalog {
    async fn list_resources(
        &self,
        scope: &Scope,
        resource_type: &str,
        continuation: Option<String>,
    ) -> Result<Page<RawResource>> {
        self.resource_requests.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        let subscription = self.subscription(scope)?;
        if subscription.unavailable {
            anyhow::bail!("Subscription {} is unavailable", subscription.id);
        }
        match subscription.resources.get(resource_type) {
            Some(resources) => self.page(resources, continuation),
            None => Ok(Page::last(Vec::new())),
        }
    }
}

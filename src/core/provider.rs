//! Contracts for the external collaborators the core consumes: identities,
//! the tenant/subscription directory and per-type resource listing.
//!
//! Implementations live outside the core (see `catalog` for an offline one).
//! They report failures as `anyhow` errors; the core wraps them into the
//! `CoreError` variant of the unit where they are contained.

use super::error::CoreError;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

/// An opaque credential for one identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub identity_id: String,
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity_id", &self.identity_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub display_name: String,
}

/// One resource as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResource {
    pub name: String,
    pub resource_group: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// One page of a paged listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }
}

/// A single (identity, tenant, subscription) triple resources can be listed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub identity_id: String,
    pub identity_name: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub subscription_id: String,
    pub subscription_name: String,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.identity_name, self.tenant_name, self.subscription_name
        )
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn list_identities(&self) -> Result<Vec<Identity>>;

    /// Fails if `identity_id` is unknown.
    async fn credential(&self, identity_id: &str) -> Result<Credential>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Lists one page of the tenants an identity can reach.
    async fn list_tenants(
        &self,
        credential: &Credential,
        continuation: Option<String>,
    ) -> Result<Page<Tenant>>;

    async fn list_subscriptions(
        &self,
        credential: &Credential,
        tenant: &Tenant,
    ) -> Result<Vec<Subscription>>;
}

#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// Lists one page of resources of `resource_type` in `scope`.
    async fn list_resources(
        &self,
        scope: &Scope,
        resource_type: &str,
        continuation: Option<String>,
    ) -> Result<Page<RawResource>>;
}

/// The full set of collaborators, shared by the tree loaders and search.
#[derive(Clone)]
pub struct CloudServices {
    pub identities: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn AccountDirectory>,
    pub resources: Arc<dyn ResourceLister>,
}

impl CloudServices {
    /// Uses one provider for every contract.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: IdentityProvider + AccountDirectory + ResourceLister + 'static,
    {
        Self {
            identities: provider.clone(),
            directory: provider.clone(),
            resources: provider,
        }
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

impl Cursor {
    fn from_continuation(continuation: Option<String>) -> Self {
        continuation.map_or(Cursor::Done, Cursor::Next)
    }

    fn take(self) -> Option<Option<String>> {
        match self {
            Cursor::Start => Some(None),
            Cursor::Next(token) => Some(Some(token)),
            Cursor::Done => None,
        }
    }
}

/// Streams every tenant of an identity, fetching pages lazily.
///
/// Checks `cancel` before each page fetch.
pub fn tenant_stream(
    directory: Arc<dyn AccountDirectory>,
    credential: Credential,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<Tenant, CoreError>> {
    stream::try_unfold(Cursor::Start, move |cursor| {
        let directory = Arc::clone(&directory);
        let credential = credential.clone();
        let cancel = cancel.clone();
        async move {
            let Some(continuation) = cursor.take() else {
                return Ok(None);
            };
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let page = directory.list_tenants(&credential, continuation).await?;
            Ok(Some((
                stream::iter(page.items.into_iter().map(Ok::<_, CoreError>)),
                Cursor::from_continuation(page.continuation),
            )))
        }
    })
    .try_flatten()
    .boxed()
}

/// Streams every resource of one type in one scope, fetching pages lazily.
///
/// Checks `cancel` before each page fetch.
pub fn resource_stream(
    lister: Arc<dyn ResourceLister>,
    scope: Scope,
    resource_type: String,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<RawResource, CoreError>> {
    stream::try_unfold(Cursor::Start, move |cursor| {
        let lister = Arc::clone(&lister);
        let scope = scope.clone();
        let resource_type = resource_type.clone();
        let cancel = cancel.clone();
        async move {
            let Some(continuation) = cursor.take() else {
                return Ok(None);
            };
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let page = lister
                .list_resources(&scope, &resource_type, continuation)
                .await?;
            Ok(Some((
                stream::iter(page.items.into_iter().map(Ok::<_, CoreError>)),
                Cursor::from_continuation(page.continuation),
            )))
        }
    })
    .try_flatten()
    .boxed()
}

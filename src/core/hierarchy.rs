//! Loaders for the primary tree:
//! accounts → tenants → subscriptions → resource categories → resources.
//!
//! Each level is a [`ChildSource`] attached to the node it populates, so
//! expansion, refresh and error recovery all go through the node state machine.

use super::error::CoreError;
use super::node::{ChildSource, Node, NodeKind, NodeRef};
use super::ordering::VisibilityPolicy;
use super::provider::{resource_stream, tenant_stream, CloudServices, Credential, Identity, Scope, Tenant};
use super::registry::{ResourceKind, ResourceRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Label of the tree root.
pub const ROOT_LABEL: &str = "Accounts";

/// Everything the loaders need, shared by every node of one tree.
pub struct ExplorerContext {
    pub services: CloudServices,
    pub registry: Arc<ResourceRegistry>,
    policy: RwLock<VisibilityPolicy>,
}

impl ExplorerContext {
    pub fn new(
        services: CloudServices,
        registry: ResourceRegistry,
        policy: VisibilityPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            services,
            registry: Arc::new(registry),
            policy: RwLock::new(policy),
        })
    }

    pub fn policy(&self) -> VisibilityPolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the policy used for nodes loaded from now on.
    ///
    /// Already loaded nodes keep their hints until [`apply_visibility`] runs.
    pub fn set_policy(&self, policy: VisibilityPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }
}

/// Creates the unloaded root of a new tree.
pub fn build_root(ctx: &Arc<ExplorerContext>) -> NodeRef {
    Node::builder(NodeKind::Root, ROOT_LABEL)
        .children_from(Arc::new(AccountsSource {
            ctx: Arc::clone(ctx),
        }))
        .build()
}

/// Recomputes visibility hints of every tenant and subscription under `root`.
///
/// Load state and children are left untouched.
pub fn apply_visibility(root: &NodeRef, policy: &VisibilityPolicy) {
    root.visit(&mut |node, _depth| match node.kind() {
        NodeKind::Tenant { tenant_id } => node.set_visibility(policy.for_tenant(tenant_id)),
        NodeKind::Subscription { subscription_id } => {
            node.set_visibility(policy.for_subscription(subscription_id))
        }
        _ => {}
    });
}

struct AccountsSource {
    ctx: Arc<ExplorerContext>,
}

#[async_trait]
impl ChildSource for AccountsSource {
    async fn populate(&self, node: &NodeRef, _cancel: &CancellationToken) -> Result<(), CoreError> {
        let identities = self
            .ctx
            .services
            .identities
            .list_identities()
            .await
            .map_err(|source| CoreError::ScopeEnumeration {
                scope: "signed-in identities".to_string(),
                source,
            })?;

        for identity in identities {
            let account = Node::builder(
                NodeKind::Account {
                    identity_id: identity.id.clone(),
                },
                identity.display_name.clone(),
            )
            .children_from(Arc::new(TenantsSource {
                ctx: Arc::clone(&self.ctx),
                identity,
            }))
            .build();
            node.insert_child_sorted(account);
        }
        Ok(())
    }
}

struct TenantsSource {
    ctx: Arc<ExplorerContext>,
    identity: Identity,
}

#[async_trait]
impl ChildSource for TenantsSource {
    async fn populate(&self, node: &NodeRef, cancel: &CancellationToken) -> Result<(), CoreError> {
        let scope = format!("tenants of {}", self.identity.display_name);
        let credential = self
            .ctx
            .services
            .identities
            .credential(&self.identity.id)
            .await
            .map_err(|source| CoreError::ScopeEnumeration {
                scope: scope.clone(),
                source,
            })?;

        let mut tenants = tenant_stream(
            self.ctx.services.directory.clone(),
            credential.clone(),
            cancel.clone(),
        );
        while let Some(next) = tenants.next().await {
            let tenant = match next {
                Ok(tenant) => tenant,
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    return Err(CoreError::ScopeEnumeration {
                        scope,
                        source: e.into_source(),
                    })
                }
            };
            let visibility = self.ctx.policy().for_tenant(&tenant.id);
            let child = Node::builder(
                NodeKind::Tenant {
                    tenant_id: tenant.id.clone(),
                },
                tenant.display_name.clone(),
            )
            .visibility(visibility)
            .children_from(Arc::new(SubscriptionsSource {
                ctx: Arc::clone(&self.ctx),
                identity: self.identity.clone(),
                credential: credential.clone(),
                tenant,
            }))
            .build();
            node.insert_child_sorted(child);
        }
        Ok(())
    }
}

struct SubscriptionsSource {
    ctx: Arc<ExplorerContext>,
    identity: Identity,
    credential: Credential,
    tenant: Tenant,
}

#[async_trait]
impl ChildSource for SubscriptionsSource {
    async fn populate(&self, node: &NodeRef, _cancel: &CancellationToken) -> Result<(), CoreError> {
        let subscriptions = self
            .ctx
            .services
            .directory
            .list_subscriptions(&self.credential, &self.tenant)
            .await
            .map_err(|source| CoreError::ScopeEnumeration {
                scope: format!("subscriptions of {}", self.tenant.display_name),
                source,
            })?;

        let policy = self.ctx.policy();
        for subscription in subscriptions {
            let scope = Scope {
                identity_id: self.identity.id.clone(),
                identity_name: self.identity.display_name.clone(),
                tenant_id: self.tenant.id.clone(),
                tenant_name: self.tenant.display_name.clone(),
                subscription_id: subscription.id.clone(),
                subscription_name: subscription.display_name.clone(),
            };
            let child = Node::builder(
                NodeKind::Subscription {
                    subscription_id: subscription.id,
                },
                subscription.display_name,
            )
            .visibility(policy.for_subscription(&scope.subscription_id))
            .children_from(Arc::new(SubscriptionSource {
                ctx: Arc::clone(&self.ctx),
                scope,
            }))
            .build();
            node.insert_child_sorted(child);
        }
        Ok(())
    }
}

/// Adds one category per registered resource type, then loads them all at once.
struct SubscriptionSource {
    ctx: Arc<ExplorerContext>,
    scope: Scope,
}

#[async_trait]
impl ChildSource for SubscriptionSource {
    async fn populate(&self, node: &NodeRef, cancel: &CancellationToken) -> Result<(), CoreError> {
        let categories: Vec<NodeRef> = self
            .ctx
            .registry
            .kinds()
            .iter()
            .map(|kind| {
                let category = Node::builder(
                    NodeKind::Category {
                        resource_type: kind.resource_type.clone(),
                    },
                    kind.display_name.clone(),
                )
                .children_from(Arc::new(CategorySource {
                    ctx: Arc::clone(&self.ctx),
                    scope: self.scope.clone(),
                    kind: kind.clone(),
                }))
                .build();
                node.add_child(Arc::clone(&category));
                category
            })
            .collect();

        // Each category only touches its own children.
        join_all(categories.iter().map(|category| category.load_children(cancel))).await;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

struct CategorySource {
    ctx: Arc<ExplorerContext>,
    scope: Scope,
    kind: ResourceKind,
}

#[async_trait]
impl ChildSource for CategorySource {
    async fn populate(&self, node: &NodeRef, cancel: &CancellationToken) -> Result<(), CoreError> {
        let mut resources = resource_stream(
            self.ctx.services.resources.clone(),
            self.scope.clone(),
            self.kind.resource_type.clone(),
            cancel.clone(),
        );
        while let Some(next) = resources.next().await {
            match next {
                Ok(raw) => {
                    node.insert_child_sorted(self.kind.create_node(&self.scope, &raw));
                }
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    return Err(CoreError::ResourceListing {
                        resource_type: self.kind.resource_type.clone(),
                        scope: self.scope.to_string(),
                        source: e.into_source(),
                    })
                }
            }
        }
        Ok(())
    }
}

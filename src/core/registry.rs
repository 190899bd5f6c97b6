//! The node-constructor registry keyed by resource type.
//!
//! Both the primary tree's category nodes and the search orchestrator build
//! resource nodes through the same registry, so a resource looks the same on
//! either surface.

use super::node::{Node, NodeKind, NodeRef};
use super::provider::{RawResource, Scope};
use std::sync::Arc;

/// Builds the node for one listed resource.
pub type NodeFactory = Arc<dyn Fn(&Scope, &RawResource) -> NodeRef + Send + Sync>;

/// One registered resource type.
#[derive(Clone)]
pub struct ResourceKind {
    pub resource_type: String,
    /// Label of the category node grouping resources of this type.
    pub display_name: String,
    factory: NodeFactory,
}

impl ResourceKind {
    pub fn create_node(&self, scope: &Scope, raw: &RawResource) -> NodeRef {
        (self.factory)(scope, raw)
    }
}

/// Resource types in registration order.
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    kinds: Vec<ResourceKind>,
}

const DEFAULT_KINDS: &[(&str, &str)] = &[
    ("Microsoft.Web/sites", "App Services"),
    ("Microsoft.App/containerApps", "Container Apps"),
    ("Microsoft.Storage/storageAccounts", "Storage Accounts"),
    ("Microsoft.KeyVault/vaults", "Key Vaults"),
    ("Microsoft.DocumentDB/databaseAccounts", "Cosmos DB Accounts"),
    ("Microsoft.Insights/components", "Application Insights"),
];

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the common resource types, all built as leaf nodes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for &(resource_type, display_name) in DEFAULT_KINDS {
            registry.register_leaf(resource_type, display_name);
        }
        registry
    }

    /// Registers `resource_type`, replacing an earlier registration in place.
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        display_name: impl Into<String>,
        factory: NodeFactory,
    ) -> &mut Self {
        let kind = ResourceKind {
            resource_type: resource_type.into(),
            display_name: display_name.into(),
            factory,
        };
        match self
            .kinds
            .iter_mut()
            .find(|k| k.resource_type == kind.resource_type)
        {
            Some(existing) => *existing = kind,
            None => self.kinds.push(kind),
        }
        self
    }

    /// Registers `resource_type` with [`resource_node`] as its constructor.
    pub fn register_leaf(
        &mut self,
        resource_type: impl Into<String>,
        display_name: impl Into<String>,
    ) -> &mut Self {
        let resource_type = resource_type.into();
        let node_type = resource_type.clone();
        self.register(
            resource_type,
            display_name,
            Arc::new(move |_scope: &Scope, raw: &RawResource| resource_node(&node_type, raw)),
        )
    }

    /// Keeps only the listed resource types, in their registration order.
    pub fn restricted_to(&self, resource_types: &[String]) -> Self {
        Self {
            kinds: self
                .kinds
                .iter()
                .filter(|k| resource_types.contains(&k.resource_type))
                .cloned()
                .collect(),
        }
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceKind> {
        self.kinds.iter().find(|k| k.resource_type == resource_type)
    }

    pub fn create_node(
        &self,
        resource_type: &str,
        scope: &Scope,
        raw: &RawResource,
    ) -> Option<NodeRef> {
        self.get(resource_type).map(|kind| kind.create_node(scope, raw))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// The default constructor: a leaf labelled with the resource name.
///
/// The description shows the resource group, plus the location when listed.
pub fn resource_node(resource_type: &str, raw: &RawResource) -> NodeRef {
    let description = match raw.properties.get("location").and_then(|v| v.as_str()) {
        Some(location) => format!("{} ({})", raw.resource_group, location),
        None => raw.resource_group.clone(),
    };
    Node::builder(
        NodeKind::Resource {
            resource_type: resource_type.to_string(),
            resource_group: raw.resource_group.clone(),
        },
        raw.name.clone(),
    )
    .description(description)
    .build()
}

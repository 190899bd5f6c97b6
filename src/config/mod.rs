pub mod settings;

use crate::core::search::default_concurrency;
use crate::core::timeout::DEFAULT_TIMEOUT;
use crate::core::VisibilityPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Deadline for refreshing a node, in seconds.
    pub load_timeout_secs: u64,
    /// Scopes searched at once. `None` picks a value from the available cores.
    pub search_concurrency: Option<usize>,
    /// Show hidden tenants and subscriptions, dimmed.
    pub show_all: bool,
    pub hidden_tenants: HashSet<String>,
    pub hidden_subscriptions: HashSet<String>,
    /// Only these resource types are shown and searched. `None` keeps all.
    pub resource_types: Option<Vec<String>>,
}

impl ExplorerConfig {
    pub fn load() -> Result<Self> {
        settings::load_config()
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs.max(1))
    }

    pub fn search_concurrency(&self) -> usize {
        self.search_concurrency
            .unwrap_or_else(default_concurrency)
            .max(1)
    }

    pub fn visibility_policy(&self) -> VisibilityPolicy {
        VisibilityPolicy {
            show_all: self.show_all,
            hidden_tenants: self.hidden_tenants.clone(),
            hidden_subscriptions: self.hidden_subscriptions.clone(),
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            load_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            search_concurrency: None,
            show_all: false,
            hidden_tenants: HashSet::new(),
            hidden_subscriptions: HashSet::new(),
            resource_types: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: ExplorerConfig =
            serde_json::from_str(r#"{ "show_all": true, "hidden_tenants": ["t-1"] }"#).unwrap();

        assert!(config.show_all);
        assert_eq!(config.load_timeout(), Duration::from_secs(30));
        assert_eq!(config.resource_types, None);

        let policy = config.visibility_policy();
        assert!(policy.show_all);
        assert!(policy.hidden_tenants.contains("t-1"));
        assert!(policy.hidden_subscriptions.is_empty());
    }

    #[test]
    fn test_search_concurrency_override() {
        let config = ExplorerConfig {
            search_concurrency: Some(0),
            ..Default::default()
        };
        assert_eq!(config.search_concurrency(), 1);
        assert_eq!(
            ExplorerConfig::default().search_concurrency(),
            default_concurrency()
        );
    }
}

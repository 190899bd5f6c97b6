//! Pure policy functions applied by nodes when children are added:
//! case-insensitive sorted insertion and hide/show-all visibility.

use std::cmp::Ordering;
use std::collections::HashSet;

/// Opacity used for hidden items that are still shown because "show all" is on.
pub const HIDDEN_OPACITY: f32 = 0.5;

/// Compares two labels case-insensitively.
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Returns the index at which `label` should be inserted into `existing`
/// so that the sequence stays ordered by [`compare_labels`].
///
/// Scans linearly from index 0 and stops at the first label that sorts
/// strictly after `label`, so equal labels keep their discovery order.
pub fn sorted_insert_index<'a, I>(existing: I, label: &str) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index = 0;
    for current in existing {
        if compare_labels(current, label) == Ordering::Greater {
            break;
        }
        index += 1;
    }
    index
}

/// Presentation hints for one node. They never affect loading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Visibility {
    pub is_visible: bool,
    pub opacity: f32,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            is_visible: true,
            opacity: 1.0,
        }
    }
}

impl Visibility {
    /// Resolves the hints for an item the user may have hidden.
    pub fn resolve(hidden: bool, show_all: bool) -> Self {
        match (hidden, show_all) {
            (false, _) => Self::default(),
            (true, true) => Self {
                is_visible: true,
                opacity: HIDDEN_OPACITY,
            },
            (true, false) => Self {
                is_visible: false,
                opacity: HIDDEN_OPACITY,
            },
        }
    }
}

/// The user-controlled hide/show-all settings for tenants and subscriptions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityPolicy {
    pub show_all: bool,
    pub hidden_tenants: HashSet<String>,
    pub hidden_subscriptions: HashSet<String>,
}

impl VisibilityPolicy {
    pub fn for_tenant(&self, tenant_id: &str) -> Visibility {
        Visibility::resolve(self.hidden_tenants.contains(tenant_id), self.show_all)
    }

    pub fn for_subscription(&self, subscription_id: &str) -> Visibility {
        Visibility::resolve(
            self.hidden_subscriptions.contains(subscription_id),
            self.show_all,
        )
    }
}

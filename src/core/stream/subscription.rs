//! Subscription groups and the upstream filter builder.
//!
//! A [`SubscriptionGroup`] is a named logical stream selecting transactions
//! by program identifier set. [`build_filter`] maps a group to the wire
//! filter specification; it is a pure function and the table of groups is
//! enumerated from configuration at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::pool::Priority;
use crate::core::domain::CommitmentLevel;

/// A named logical stream with its program filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionGroup {
    /// Unique group name, e.g. `bonding_curve`, `amm_pool`, `external_amm`.
    pub name: String,
    /// Program identifiers whose transactions this group selects.
    pub programs: Vec<String>,
    pub commitment: CommitmentLevel,
    /// Priority class requested from the connection pool.
    pub priority: Priority,
}

impl SubscriptionGroup {
    pub fn new(name: impl Into<String>, programs: Vec<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            programs,
            commitment: CommitmentLevel::default(),
            priority,
        }
    }
}

/// Per-group transaction filter in the upstream request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub vote: bool,
    pub failed: bool,
    pub account_include: Vec<String>,
    pub account_exclude: Vec<String>,
    pub account_required: Vec<String>,
}

/// Wire filter specification sent upstream for one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub commitment: CommitmentLevel,
    /// Keyed by group name; the upstream echoes matching keys back on each
    /// transaction notification.
    pub transactions: HashMap<String, TransactionFilter>,
    /// Subscribe to slot progression updates alongside transactions.
    pub slots: bool,
    /// Subscribe to block metadata.
    pub blocks_meta: bool,
}

impl FilterSpec {
    /// Name of the single group this spec subscribes, when it has one.
    pub fn group_name(&self) -> Option<&str> {
        let mut keys = self.transactions.keys();
        match (keys.next(), keys.next()) {
            (Some(k), None) => Some(k.as_str()),
            _ => None,
        }
    }
}

/// Map a subscription group to its upstream filter specification.
///
/// Vote and failed transactions are always excluded. Slot and block-meta
/// subscriptions ride along with every group; the block tracker is keyed
/// by slot and tolerates duplicate deliveries across connections.
pub fn build_filter(group: &SubscriptionGroup) -> FilterSpec {
    let mut transactions = HashMap::new();
    transactions.insert(
        group.name.clone(),
        TransactionFilter {
            vote: false,
            failed: false,
            account_include: group.programs.clone(),
            account_exclude: Vec::new(),
            account_required: Vec::new(),
        },
    );
    FilterSpec {
        commitment: group.commitment,
        transactions,
        slots: true,
        blocks_meta: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve_group() -> SubscriptionGroup {
        SubscriptionGroup::new(
            "bonding_curve",
            vec!["CurveProgram1111".into()],
            Priority::High,
        )
    }

    #[test]
    fn filter_excludes_votes_and_failures() {
        let spec = build_filter(&curve_group());
        let filter = &spec.transactions["bonding_curve"];
        assert!(!filter.vote);
        assert!(!filter.failed);
        assert_eq!(filter.account_include, vec!["CurveProgram1111".to_string()]);
        assert!(filter.account_exclude.is_empty());
    }

    #[test]
    fn filter_carries_group_name_as_key() {
        let spec = build_filter(&curve_group());
        assert_eq!(spec.group_name(), Some("bonding_curve"));
    }

    #[test]
    fn builder_is_deterministic() {
        let group = curve_group();
        assert_eq!(build_filter(&group), build_filter(&group));
    }
}

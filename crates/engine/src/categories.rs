//! Category bindings and ledger owners.

use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

/// The two categories of a personal ledger the sync cares about.
///
/// Resolved once at startup and never mutated afterwards. Serialized with the
/// same field names used by the persisted per-owner state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBinding {
    pub shared_category_group_id: String,
    /// Category of jointly owed expenses.
    pub shared_category_id: String,
    /// Category of money owed between the two owners.
    pub shared_category_balancing_id: String,
}

impl CategoryBinding {
    pub fn new(group_id: &str, shared_id: &str, balancing_id: &str) -> ResultEngine<Self> {
        if shared_id.is_empty() || balancing_id.is_empty() {
            return Err(EngineError::Configuration(
                "category binding needs both a shared and a balancing category".to_string(),
            ));
        }
        if shared_id == balancing_id {
            return Err(EngineError::Configuration(format!(
                "shared and balancing category must differ (both {shared_id})"
            )));
        }
        Ok(Self {
            shared_category_group_id: group_id.to_string(),
            shared_category_id: shared_id.to_string(),
            shared_category_balancing_id: balancing_id.to_string(),
        })
    }
}

/// One of the two personal ledger owners, with the identifiers the sync needs
/// in their own ledger and in the shared one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    /// The owner's personal budget.
    pub ledger_id: String,
    /// Account in the shared budget that receives this owner's expenses.
    pub shared_account_id: String,
    /// Payee in the shared budget that represents this owner's account.
    pub shared_payee_id: String,
    /// Account in the personal budget that receives balancing transfers.
    pub balancing_account_id: String,
    pub binding: CategoryBinding,
}

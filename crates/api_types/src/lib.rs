//! Wire types of the remote budgeting API.
//!
//! Every response is wrapped in a `{"data": ...}` envelope ([`Envelope`]) and
//! every failure in a `{"error": ...}` envelope ([`ErrorEnvelope`]). Fields the
//! sync does not read are left out; unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub detail: String,
}

pub mod transaction {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ClearedStatus {
        Cleared,
        #[default]
        Uncleared,
        Reconciled,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum FlagColor {
        Red,
        Orange,
        Yellow,
        Green,
        Blue,
        Purple,
    }

    /// Server-side filter for transaction listings.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TransactionType {
        Uncategorized,
        Unapproved,
    }

    impl TransactionType {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Uncategorized => "uncategorized",
                Self::Unapproved => "unapproved",
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransactionSummary {
        pub id: String,
        /// ISO date (`YYYY-MM-DD`).
        pub date: String,
        /// Milliunits.
        pub amount: i64,
        pub memo: Option<String>,
        #[serde(default)]
        pub cleared: ClearedStatus,
        #[serde(default)]
        pub approved: bool,
        pub flag_color: Option<FlagColor>,
        pub account_id: String,
        pub payee_id: Option<String>,
        pub category_id: Option<String>,
        pub transfer_account_id: Option<String>,
        pub import_id: Option<String>,
        #[serde(default)]
        pub deleted: bool,
    }

    /// Create/update payload. `id` is only set for batched updates.
    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SaveTransaction {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        pub account_id: String,
        pub date: String,
        pub amount: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub payee_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub payee_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub category_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub memo: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub cleared: Option<ClearedStatus>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub approved: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub flag_color: Option<FlagColor>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub import_id: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SaveTransactionWrapper {
        pub transaction: SaveTransaction,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SaveTransactionsWrapper {
        pub transactions: Vec<SaveTransaction>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TransactionsResponse {
        pub transactions: Vec<TransactionSummary>,
        pub server_knowledge: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TransactionResponse {
        pub transaction: TransactionSummary,
        #[serde(default)]
        pub server_knowledge: Option<i64>,
    }

    /// Response of single and batched create/update calls.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct SaveTransactionsResponse {
        #[serde(default)]
        pub transaction_ids: Vec<String>,
        pub transaction: Option<TransactionSummary>,
        pub transactions: Option<Vec<TransactionSummary>>,
        #[serde(default)]
        pub duplicate_import_ids: Vec<String>,
        #[serde(default)]
        pub server_knowledge: Option<i64>,
    }
}

pub mod budget {
    use super::*;
    use crate::transaction::TransactionSummary;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Payee {
        pub id: String,
        pub name: String,
        #[serde(default)]
        pub deleted: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Category {
        pub id: String,
        pub category_group_id: String,
        pub name: String,
        /// Milliunits assigned in the month (or the current month for the
        /// budget-wide list).
        #[serde(default)]
        pub budgeted: i64,
        #[serde(default)]
        pub deleted: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MonthDetail {
        /// First day of the month (`YYYY-MM-DD`).
        pub month: String,
        #[serde(default)]
        pub categories: Vec<Category>,
        #[serde(default)]
        pub deleted: bool,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct BudgetDetail {
        pub id: String,
        pub name: String,
        pub transactions: Option<Vec<TransactionSummary>>,
        pub payees: Option<Vec<Payee>>,
        pub categories: Option<Vec<Category>>,
        pub months: Option<Vec<MonthDetail>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BudgetDetailResponse {
        pub budget: BudgetDetail,
        pub server_knowledge: i64,
    }
}

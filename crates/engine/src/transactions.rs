//! Transaction and ledger snapshots.
//!
//! Both are read-only copies of what the remote system returned; the engine
//! never keeps them beyond a single pass.

use api_types::{
    budget::{BudgetDetailResponse, Category, MonthDetail, Payee},
    transaction::{ClearedStatus, FlagColor, TransactionSummary},
};
use chrono::{Datelike, NaiveDate};

use crate::{EngineError, ResultEngine};

pub type TransactionId = String;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    /// Signed milliunits.
    pub amount_minor: i64,
    pub category_id: Option<String>,
    pub memo: Option<String>,
    pub cleared: ClearedStatus,
    pub approved: bool,
    pub flag_color: Option<FlagColor>,
    pub deleted: bool,
    pub account_id: String,
    pub payee_id: Option<String>,
    pub import_id: Option<String>,
    pub transfer_account_id: Option<String>,
}

impl Transaction {
    /// Uncategorized, uncleared, unapproved transaction with an empty memo.
    pub fn new(id: &str, account_id: &str, date: NaiveDate, amount_minor: i64) -> Self {
        Self {
            id: id.to_string(),
            date,
            amount_minor,
            category_id: None,
            memo: None,
            cleared: ClearedStatus::Uncleared,
            approved: false,
            flag_color: None,
            deleted: false,
            account_id: account_id.to_string(),
            payee_id: None,
            import_id: None,
            transfer_account_id: None,
        }
    }

    pub fn memo_text(&self) -> &str {
        self.memo.as_deref().unwrap_or_default()
    }

    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn has_category(&self, category_id: &str) -> bool {
        self.category_id.as_deref() == Some(category_id)
    }
}

impl TryFrom<TransactionSummary> for Transaction {
    type Error = EngineError;

    fn try_from(value: TransactionSummary) -> Result<Self, Self::Error> {
        let date = parse_date(&value.date).map_err(|_| {
            EngineError::InvalidTransaction(format!(
                "transaction {} has malformed date {:?}",
                value.id, value.date
            ))
        })?;
        if value.id.trim().is_empty() {
            return Err(EngineError::InvalidTransaction(
                "transaction without id".to_string(),
            ));
        }

        Ok(Self {
            id: value.id,
            date,
            amount_minor: value.amount,
            category_id: value.category_id,
            memo: value.memo,
            cleared: value.cleared,
            approved: value.approved,
            flag_color: value.flag_color,
            deleted: value.deleted,
            account_id: value.account_id,
            payee_id: value.payee_id,
            import_id: value.import_id,
            transfer_account_id: value.transfer_account_id,
        })
    }
}

/// Converts a wire listing, failing on the first malformed transaction.
pub fn from_summaries(summaries: Vec<TransactionSummary>) -> ResultEngine<Vec<Transaction>> {
    summaries.into_iter().map(Transaction::try_from).collect()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
}

/// Which transactions of a ledger take part in a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateWindow {
    All,
    Since(NaiveDate),
    /// Inclusive on both ends.
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateWindow {
    /// First to last day of the month containing `day`.
    pub fn month(day: NaiveDate) -> Self {
        let start = day.with_day(1).unwrap_or(day);
        let end = next_month(start).pred_opt().unwrap_or(start);
        Self::Range { start, end }
    }

    pub fn year(year: i32) -> Option<Self> {
        Some(Self::Range {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Self::All => true,
            Self::Since(since) => date >= since,
            Self::Range { start, end } => date >= start && date <= end,
        }
    }
}

fn next_month(first: NaiveDate) -> NaiveDate {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first)
}

/// A budget snapshot: its transactions plus the knowledge counter observed
/// when it was fetched.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    pub id: String,
    pub name: String,
    pub knowledge: i64,
    pub transactions: Vec<Transaction>,
    pub categories: Vec<Category>,
    pub months: Vec<MonthDetail>,
    pub payees: Vec<Payee>,
}

impl Ledger {
    pub fn from_budget(response: BudgetDetailResponse) -> ResultEngine<Self> {
        let budget = response.budget;
        Ok(Self {
            id: budget.id,
            name: budget.name,
            knowledge: response.server_knowledge,
            transactions: from_summaries(budget.transactions.unwrap_or_default())?,
            categories: budget.categories.unwrap_or_default(),
            months: budget.months.unwrap_or_default(),
            payees: budget.payees.unwrap_or_default(),
        })
    }

    /// Transactions whose date falls inside `window`, in ledger order.
    pub fn window(&self, window: DateWindow) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|t| window.contains(t.date))
            .cloned()
            .collect()
    }

    pub fn month(&self, month: NaiveDate) -> Option<&MonthDetail> {
        self.months
            .iter()
            .filter(|m| !m.deleted)
            .find(|m| parse_date(&m.month).is_ok_and(|d| d == month))
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == category_id)
    }
}

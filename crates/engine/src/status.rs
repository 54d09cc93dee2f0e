//! Read-only consistency report of one owner against the shared ledger.

use chrono::NaiveDate;

use crate::{
    Owner,
    allocation::month_allocation,
    classify::classify,
    stamp::StampIndex,
    transactions::{Ledger, parse_date},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonthStatus {
    pub month: NaiveDate,
    /// Budgeted total in the personal ledger, `None` if it cannot be computed.
    pub expected: Option<i64>,
    /// Amount of the allocation transaction in the shared ledger.
    pub recorded: Option<i64>,
}

impl MonthStatus {
    pub fn is_consistent(&self) -> bool {
        self.expected.is_some() && self.expected == self.recorded
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerStatus {
    pub owner: String,
    pub knowledge: i64,
    pub shared_category_present: bool,
    pub balancing_category_present: bool,
    pub shared_expenses: usize,
    /// Shared expenses that have a stamped copy in the shared ledger.
    pub mirrored_expenses: usize,
    pub balancing: usize,
    pub other: usize,
    /// Live transactions on the owner's account in the shared ledger.
    pub shared_account_transactions: usize,
    pub months: Vec<MonthStatus>,
}

impl OwnerStatus {
    pub fn missing_expenses(&self) -> usize {
        self.shared_expenses - self.mirrored_expenses
    }
}

pub fn owner_status(owner: &Owner, personal: &Ledger, shared: &Ledger) -> OwnerStatus {
    let binding = &owner.binding;
    let live: Vec<_> = personal
        .transactions
        .iter()
        .filter(|t| !t.deleted)
        .cloned()
        .collect();
    let classified = classify(&live, binding);
    let index = StampIndex::for_account(&shared.transactions, &owner.shared_account_id);

    let months = personal
        .months
        .iter()
        .filter(|m| !m.deleted)
        .filter_map(|m| parse_date(&m.month).ok())
        .map(|month| {
            let allocation = month_allocation(personal, month, binding).ok();
            let recorded = allocation
                .as_ref()
                .and_then(|a| index.get(&a.key()))
                .map(|t| t.amount_minor);
            MonthStatus {
                month,
                expected: allocation.map(|a| a.total()),
                recorded,
            }
        })
        .collect();

    OwnerStatus {
        owner: owner.name.clone(),
        knowledge: personal.knowledge,
        shared_category_present: personal.category(&binding.shared_category_id).is_some(),
        balancing_category_present: personal
            .category(&binding.shared_category_balancing_id)
            .is_some(),
        shared_expenses: classified.shared_expense.len(),
        mirrored_expenses: classified
            .shared_expense
            .iter()
            .filter(|t| index.get(&t.id).is_some())
            .count(),
        balancing: classified.balancing.len(),
        other: classified.other.len(),
        shared_account_transactions: shared
            .transactions
            .iter()
            .filter(|t| !t.deleted && t.account_id == owner.shared_account_id)
            .count(),
        months,
    }
}

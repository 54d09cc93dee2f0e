//! Monthly allocated budget.
//!
//! What an owner assigns each month to the shared and balancing categories is
//! reported into the shared ledger as one transaction per month on the
//! owner's shared account, stamped with the month as origin id.

use api_types::transaction::{FlagColor, SaveTransaction};
use chrono::NaiveDate;

use crate::{
    CategoryBinding, EngineError, Gateway, LedgerApi, Owner, ResultEngine,
    plan::ApplyReport,
    stamp::{self, StampIndex},
    transactions::{DATE_FORMAT, Ledger, parse_date},
};

pub const ALLOCATION_PAYEE: &str = "Monthly Allocated Budget";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonthAllocation {
    pub month: NaiveDate,
    pub shared_budgeted: i64,
    pub balancing_budgeted: i64,
}

impl MonthAllocation {
    pub fn total(&self) -> i64 {
        self.shared_budgeted + self.balancing_budgeted
    }

    /// Key used as origin id of the stamp.
    pub fn key(&self) -> String {
        self.month.format(DATE_FORMAT).to_string()
    }
}

/// Budgeted amounts of the bound categories in `month`.
pub fn month_allocation(
    ledger: &Ledger,
    month: NaiveDate,
    binding: &CategoryBinding,
) -> ResultEngine<MonthAllocation> {
    let detail = ledger
        .month(month)
        .ok_or_else(|| EngineError::NotFound(format!("month {month} in {}", ledger.name)))?;
    let budgeted = |category_id: &str| {
        detail
            .categories
            .iter()
            .find(|c| c.id == category_id)
            .map(|c| c.budgeted)
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "category {category_id} in month {month} of {}",
                    ledger.name
                ))
            })
    };

    Ok(MonthAllocation {
        month,
        shared_budgeted: budgeted(&binding.shared_category_id)?,
        balancing_budgeted: budgeted(&binding.shared_category_balancing_id)?,
    })
}

pub fn allocation_payload(
    owner: &Owner,
    allocation: &MonthAllocation,
    knowledge: i64,
) -> SaveTransaction {
    SaveTransaction {
        account_id: owner.shared_account_id.clone(),
        date: allocation.key(),
        amount: allocation.total(),
        payee_name: Some(ALLOCATION_PAYEE.to_string()),
        memo: Some(stamp::encode(&allocation.key(), knowledge, "")),
        flag_color: Some(FlagColor::Purple),
        ..Default::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    pub to_create: Vec<SaveTransaction>,
    /// Payloads carry the id of the existing shared transaction.
    pub to_update: Vec<SaveTransaction>,
    /// Months that could not be evaluated.
    pub skipped: Vec<NaiveDate>,
}

/// Compares every month of `personal` up to `today` with the allocation
/// transactions of `owner` in `shared`.
pub fn plan_allocations(
    owner: &Owner,
    personal: &Ledger,
    shared: &Ledger,
    today: NaiveDate,
    current_knowledge: i64,
) -> AllocationPlan {
    let index = StampIndex::for_account(&shared.transactions, &owner.shared_account_id);
    let mut plan = AllocationPlan::default();

    for detail in personal.months.iter().filter(|m| !m.deleted) {
        let Ok(month) = parse_date(&detail.month) else {
            tracing::warn!("{} - Ignoring malformed month {}", owner.name, detail.month);
            continue;
        };
        if month > today {
            tracing::debug!("{} - Skipping future month {month}", owner.name);
            continue;
        }
        let allocation = match month_allocation(personal, month, &owner.binding) {
            Ok(allocation) => allocation,
            Err(err) => {
                tracing::warn!("{} - Some error occurred for the month {month}: {err}", owner.name);
                plan.skipped.push(month);
                continue;
            }
        };

        let mut payload = allocation_payload(owner, &allocation, current_knowledge);
        match index.get(&allocation.key()) {
            None => plan.to_create.push(payload),
            Some(existing) if stamp::needs_update(current_knowledge, existing.memo_text()) => {
                payload.id = Some(existing.id.clone());
                plan.to_update.push(payload);
            }
            Some(_) => {}
        }
    }
    plan
}

/// Plans and applies the allocation transactions of one owner.
pub async fn sync_allocations<A: LedgerApi>(
    gateway: &Gateway<A>,
    owner: &Owner,
    personal: &Ledger,
    shared: &Ledger,
    today: NaiveDate,
) -> ResultEngine<ApplyReport> {
    let plan = plan_allocations(owner, personal, shared, today, personal.knowledge);
    let mut report = ApplyReport::default();

    if !plan.to_create.is_empty() {
        report.created = gateway
            .create_transactions(&shared.id, plan.to_create)
            .await?
            .len();
    }
    if !plan.to_update.is_empty() {
        report.updated = gateway
            .update_transactions(&shared.id, plan.to_update)
            .await?
            .len();
    }

    tracing::info!(
        "{} - Allocated budget: created {} and updated {} transactions",
        owner.name,
        report.created,
        report.updated
    );
    Ok(report)
}

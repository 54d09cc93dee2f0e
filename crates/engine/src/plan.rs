//! Reconciliation of shared expenses against the shared ledger.
//!
//! [`plan`] is pure: it diffs an owner's shared-expense transactions against
//! the shared ledger and says what to create, update and delete.
//! [`apply_plan`] sends the result through the [`Gateway`]: one batched
//! create, one batched update, then one delete per transaction.
//!
//! Nothing here is atomic. If a step fails the previous ones stay applied and
//! the next pass derives what is left from the stamps found in the ledger.

use api_types::transaction::SaveTransaction;

use crate::{
    Gateway, LedgerApi, ResultEngine,
    stamp::{self, StampIndex},
    transactions::{Transaction, TransactionId},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub origin: Transaction,
    pub existing_target: Transaction,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub to_create: Vec<Transaction>,
    pub to_update: Vec<PlannedUpdate>,
    /// Ids in the target ledger.
    pub to_delete: Vec<TransactionId>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Adds target deletions, skipping ids already scheduled.
    pub fn extend_deletes(&mut self, ids: impl IntoIterator<Item = TransactionId>) {
        for id in ids {
            if !self.to_delete.contains(&id) {
                self.to_delete.push(id);
            }
        }
    }
}

/// Diffs `source` against `target` using `current_knowledge` as the freshness
/// reference.
pub fn plan(
    source: &[Transaction],
    target: &[Transaction],
    current_knowledge: i64,
) -> ReconciliationPlan {
    plan_with_index(source, &StampIndex::build(target), current_knowledge)
}

pub fn plan_with_index(
    source: &[Transaction],
    index: &StampIndex,
    current_knowledge: i64,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    for transaction in source {
        let existing = index.get(&transaction.id);

        if transaction.deleted {
            match existing {
                Some(target) => plan.extend_deletes([target.id.clone()]),
                None => tracing::debug!("{} deleted, nothing to remove", transaction.id),
            }
            continue;
        }

        match existing {
            None => plan.to_create.push(transaction.clone()),
            Some(target) if stamp::needs_update(current_knowledge, target.memo_text()) => {
                plan.to_update.push(PlannedUpdate {
                    origin: transaction.clone(),
                    existing_target: target.clone(),
                })
            }
            Some(target) => tracing::debug!("{} up to date as {}", transaction.id, target.id),
        }
    }

    tracing::info!(
        "Expenses to create {}, to update {}, to delete {}",
        plan.to_create.len(),
        plan.to_update.len(),
        plan.to_delete.len()
    );
    plan
}

/// Counterparts of transactions that left the shared-expense category.
///
/// `other` is the owner's non-shared, non-balancing set; any of them that
/// still has a stamped copy in the shared ledger must have been recategorized.
pub fn plan_retractions(other: &[Transaction], index: &StampIndex) -> Vec<TransactionId> {
    other
        .iter()
        .filter_map(|t| {
            let target = index.get(&t.id)?;
            tracing::debug!("{} is no longer a shared expense, retracting {}", t.id, target.id);
            Some(target.id.clone())
        })
        .collect()
}

/// Payload copying a shared expense into `account_id` of the shared ledger.
pub fn shared_expense_payload(
    origin: &Transaction,
    account_id: &str,
    knowledge: i64,
    payee_name: String,
) -> SaveTransaction {
    SaveTransaction {
        id: None,
        account_id: account_id.to_string(),
        date: origin.date_string(),
        amount: origin.amount_minor,
        payee_id: None,
        payee_name: Some(payee_name),
        category_id: None,
        memo: Some(stamp::encode(&origin.id, knowledge, origin.memo_text())),
        cleared: Some(origin.cleared),
        approved: Some(origin.approved),
        flag_color: origin.flag_color,
        import_id: None,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Executes `plan` against the shared ledger.
///
/// `knowledge` must be the value observed before any mutation of this pass.
pub async fn apply_plan<A: LedgerApi>(
    gateway: &Gateway<A>,
    target_ledger_id: &str,
    target_account_id: &str,
    plan: &ReconciliationPlan,
    knowledge: i64,
) -> ResultEngine<ApplyReport> {
    let mut report = ApplyReport::default();

    if !plan.to_create.is_empty() {
        let mut payloads = Vec::with_capacity(plan.to_create.len());
        for origin in &plan.to_create {
            let payee = gateway.payee_name(origin.payee_id.as_deref()).await;
            payloads.push(shared_expense_payload(
                origin,
                target_account_id,
                knowledge,
                payee,
            ));
        }
        let created = gateway
            .create_transactions(target_ledger_id, payloads)
            .await?;
        tracing::info!("Transactions created {}", created.len());
        report.created = created.len();
    }

    if !plan.to_update.is_empty() {
        let mut payloads = Vec::with_capacity(plan.to_update.len());
        for update in &plan.to_update {
            let payee = gateway.payee_name(update.origin.payee_id.as_deref()).await;
            let mut payload =
                shared_expense_payload(&update.origin, target_account_id, knowledge, payee);
            payload.id = Some(update.existing_target.id.clone());
            payloads.push(payload);
        }
        let updated = gateway
            .update_transactions(target_ledger_id, payloads)
            .await?;
        tracing::info!("Transactions updated {}", updated.len());
        report.updated = updated.len();
    }

    for id in &plan.to_delete {
        gateway.delete_transaction(target_ledger_id, id).await?;
        report.deleted += 1;
    }
    if report.deleted > 0 {
        tracing::info!("Transactions deleted {}", report.deleted);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn source(id: &str, amount: i64) -> Transaction {
        let mut t = Transaction::new(
            id,
            "personal-acc",
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            amount,
        );
        t.category_id = Some("shared".to_string());
        t
    }

    fn stamped(target_id: &str, origin: &Transaction, knowledge: i64) -> Transaction {
        let mut t = origin.clone();
        t.id = target_id.to_string();
        t.account_id = "shared-acc".to_string();
        t.category_id = None;
        t.memo = Some(stamp::encode(&origin.id, knowledge, origin.memo_text()));
        t
    }

    #[test]
    fn new_expense_is_created() {
        let t1 = source("t1", -2000);
        let plan = plan(&[t1.clone()], &[], 5);
        assert_eq!(plan.to_create, vec![t1.clone()]);
        assert!(plan.to_update.is_empty());
        assert!(plan.to_delete.is_empty());

        let payload = shared_expense_payload(&t1, "shared-acc", 5, "Bakery".to_string());
        assert_eq!(payload.memo.as_deref(), Some("t1@5 | "));
        assert_eq!(payload.amount, -2000);
    }

    #[test]
    fn fresh_copy_is_left_alone() {
        let t1 = source("t1", -2000);
        let target = [stamped("x1", &t1, 5)];
        assert!(plan(&[t1], &target, 5).is_empty());
    }

    #[test]
    fn stale_copy_is_updated() {
        let t1 = source("t1", -2000);
        let target = [stamped("x1", &t1, 5)];
        let changed = source("t1", -2500);
        let plan = plan(&[changed.clone()], &target, 9);
        assert!(plan.to_create.is_empty());
        assert_eq!(
            plan.to_update,
            vec![PlannedUpdate {
                origin: changed,
                existing_target: target[0].clone()
            }]
        );
    }

    #[test]
    fn unstamped_copy_is_always_refreshed() {
        let t1 = source("t1", -2000);
        let mut legacy = stamped("x1", &t1, 5);
        legacy.memo = Some("t1 @ ".to_string());
        let plan = plan(&[t1], &[legacy], 0);
        assert_eq!(plan.to_update.len(), 1);
    }

    #[test]
    fn deleted_source_removes_its_copy() {
        let t1 = source("t1", -2000);
        let target = [stamped("x1", &t1, 5)];
        let mut gone = t1.clone();
        gone.deleted = true;
        let plan = plan(&[gone], &target, 5);
        assert_eq!(plan.to_delete, vec!["x1".to_string()]);
        assert!(plan.to_create.is_empty());
    }

    #[test]
    fn deleted_source_without_copy_is_a_no_op() {
        let mut gone = source("t1", -2000);
        gone.deleted = true;
        assert!(plan(&[gone], &[], 5).is_empty());
    }

    #[test]
    fn plan_is_idempotent_once_applied() {
        let sources = vec![source("t1", -2000), source("t10", -300), source("t2", 150)];
        let first = plan(&sources, &[], 5);
        let target: Vec<_> = first
            .to_create
            .iter()
            .enumerate()
            .map(|(i, t)| stamped(&format!("x{i}"), t, 5))
            .collect();
        let second = plan(&sources, &target, 5);
        assert!(second.to_create.is_empty());
        assert!(second.to_update.is_empty());
    }

    #[test]
    fn recategorized_transactions_are_retracted() {
        let t1 = source("t1", -2000);
        let index = StampIndex::build(&[stamped("x1", &t1, 5)]);
        let mut moved = t1.clone();
        moved.category_id = Some("groceries".to_string());
        let untouched = source("t2", -100);
        assert_eq!(plan_retractions(&[moved, untouched], &index), vec!["x1"]);
    }

    #[test]
    fn extend_deletes_skips_duplicates() {
        let mut plan = ReconciliationPlan {
            to_delete: vec!["x1".to_string()],
            ..Default::default()
        };
        plan.extend_deletes(["x1".to_string(), "x2".to_string()]);
        assert_eq!(plan.to_delete, vec!["x1", "x2"]);
    }
}

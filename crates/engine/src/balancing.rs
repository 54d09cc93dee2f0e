//! Mirroring of balancing transactions between the two personal ledgers.
//!
//! A balancing transaction `b` in the source owner's ledger produces two
//! copies, both carrying `-b.amount`:
//!
//! - the *mirror*, in the shared ledger on the source owner's account, with the
//!   counterpart's account payee and a stamp keyed by `b.id`;
//! - the *transfer entry*, in the counterpart's own ledger on their balancing
//!   account, stamped with the mirror's id.
//!
//! The two writes are independent calls, so either one can be lost. Every pass
//! re-derives both copies from the ledgers: a live mirror without its transfer
//! entry gets one recreated, and a transfer entry whose mirror was deleted is
//! removed once its balancing transaction is deleted or recategorized.

use std::collections::HashMap;

use api_types::transaction::SaveTransaction;

use crate::{
    EngineError, Gateway, LedgerApi, Owner, ResultEngine,
    stamp::{self, StampIndex},
    transactions::{Ledger, Transaction, TransactionId},
};

/// Lookups needed to mirror one owner's balancing transactions.
#[derive(Clone, Debug)]
pub struct MirrorTargets {
    pub shared_ledger_id: String,
    /// Source owner's shared account, keyed by origin (balancing) id.
    pub mirrors: StampIndex,
    /// Counterpart's balancing account, keyed by mirror id.
    pub transfers: StampIndex,
    /// Deleted transactions of the source owner's shared account, by origin id.
    retired: HashMap<String, Vec<TransactionId>>,
    counterpart_payee_id: String,
}

impl MirrorTargets {
    pub fn new(
        shared: &Ledger,
        source: &Owner,
        counterpart_ledger: &Ledger,
        counterpart: &Owner,
    ) -> Self {
        let mut retired: HashMap<String, Vec<TransactionId>> = HashMap::new();
        for t in shared
            .transactions
            .iter()
            .filter(|t| t.deleted && t.account_id == source.shared_account_id)
        {
            if let Some(origin) = stamp::origin_id(t.memo_text()) {
                retired.entry(origin.to_string()).or_default().push(t.id.clone());
            }
        }

        Self {
            shared_ledger_id: shared.id.clone(),
            mirrors: StampIndex::for_account(&shared.transactions, &source.shared_account_id),
            transfers: StampIndex::for_account(
                &counterpart_ledger.transactions,
                &counterpart.balancing_account_id,
            ),
            retired,
            counterpart_payee_id: counterpart.shared_payee_id.clone(),
        }
    }

    /// Live mirror of `origin_id`. Shared expense copies on the same account
    /// are not mirrors.
    pub fn live_mirror(&self, origin_id: &str) -> Option<&Transaction> {
        self.mirrors.get(origin_id).filter(|shared| {
            shared.payee_id.as_deref() == Some(self.counterpart_payee_id.as_str())
                || self.transfers.get(&shared.id).is_some()
        })
    }

    /// Live transfer entries left behind by deleted mirrors of `origin_id`.
    pub fn orphaned_entries(&self, origin_id: &str) -> Vec<&Transaction> {
        self.retired
            .get(origin_id)
            .into_iter()
            .flatten()
            .filter_map(|mirror_id| self.transfers.get(mirror_id))
            .collect()
    }

    /// Transactions of `other` that still have a mirror or a transfer entry,
    /// meaning they left the balancing category. They are returned marked as
    /// deleted so that [`mirror`] retracts both copies.
    pub fn recategorized(&self, other: &[Transaction]) -> Vec<Transaction> {
        other
            .iter()
            .filter(|t| {
                self.live_mirror(&t.id).is_some() || !self.orphaned_entries(&t.id).is_empty()
            })
            .map(|t| {
                let mut retracted = t.clone();
                retracted.deleted = true;
                retracted
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MirrorAction {
    Create,
    Update { mirror: Transaction },
    /// Mirror is current; only its transfer entry may need a repair.
    Fresh { mirror: Transaction },
    Delete { mirror: Transaction },
    /// Deleted balancing without a live mirror; only orphaned transfer
    /// entries may remain.
    Retired,
}

/// What to do with one balancing transaction.
pub fn decide(
    balancing: &Transaction,
    mirrors: &StampIndex,
    current_knowledge: i64,
) -> MirrorAction {
    match (mirrors.get(&balancing.id), balancing.deleted) {
        (None, true) => MirrorAction::Retired,
        (Some(mirror), true) => MirrorAction::Delete {
            mirror: mirror.clone(),
        },
        (None, false) => MirrorAction::Create,
        (Some(mirror), false) if stamp::needs_update(current_knowledge, mirror.memo_text()) => {
            MirrorAction::Update {
                mirror: mirror.clone(),
            }
        }
        (Some(mirror), false) => MirrorAction::Fresh {
            mirror: mirror.clone(),
        },
    }
}

fn mirrored_amount(balancing: &Transaction) -> ResultEngine<i64> {
    balancing.amount_minor.checked_neg().ok_or_else(|| {
        EngineError::InvalidTransaction(format!(
            "amount of {} cannot be mirrored: {}",
            balancing.id, balancing.amount_minor
        ))
    })
}

/// Mirror of `balancing` in the shared ledger.
pub fn mirror_payload(
    balancing: &Transaction,
    source: &Owner,
    counterpart: &Owner,
    knowledge: i64,
) -> ResultEngine<SaveTransaction> {
    Ok(SaveTransaction {
        id: None,
        account_id: source.shared_account_id.clone(),
        date: balancing.date_string(),
        amount: mirrored_amount(balancing)?,
        payee_id: Some(counterpart.shared_payee_id.clone()),
        payee_name: None,
        category_id: None,
        memo: Some(stamp::encode(&balancing.id, knowledge, balancing.memo_text())),
        cleared: Some(balancing.cleared),
        approved: Some(balancing.approved),
        flag_color: balancing.flag_color,
        import_id: None,
    })
}

/// Entry in the counterpart's balancing account for an existing mirror.
pub fn transfer_payload(
    mirror_id: &str,
    balancing: &Transaction,
    counterpart: &Owner,
    knowledge: i64,
) -> ResultEngine<SaveTransaction> {
    Ok(SaveTransaction {
        id: None,
        account_id: counterpart.balancing_account_id.clone(),
        date: balancing.date_string(),
        amount: mirrored_amount(balancing)?,
        payee_id: None,
        payee_name: None,
        category_id: Some(counterpart.binding.shared_category_balancing_id.clone()),
        memo: Some(stamp::encode(mirror_id, knowledge, balancing.memo_text())),
        cleared: Some(balancing.cleared),
        approved: Some(true),
        flag_color: balancing.flag_color,
        import_id: None,
    })
}

/// Whether the counterpart's transfer entry already carries what `entry`
/// would write. The stamp is ignored: rewriting it alone would move the
/// counterpart's knowledge and make their own mirrors stale.
fn entry_matches(existing: &Transaction, entry: &SaveTransaction) -> bool {
    existing.amount_minor == entry.amount
        && existing.date_string() == entry.date
        && Some(existing.cleared) == entry.cleared
        && existing.flag_color == entry.flag_color
        && existing.category_id == entry.category_id
        && stamp::original_memo(existing.memo_text())
            == entry.memo.as_deref().map_or("", stamp::original_memo)
}

/// Brings the transfer entry of `mirror_id` in line with `entry`. Returns
/// whether a call was made.
async fn reconcile_entry<A: LedgerApi>(
    gateway: &Gateway<A>,
    targets: &MirrorTargets,
    counterpart: &Owner,
    mirror_id: &str,
    entry: SaveTransaction,
) -> ResultEngine<bool> {
    match targets.transfers.get(mirror_id) {
        Some(existing) if entry_matches(existing, &entry) => Ok(false),
        Some(existing) => {
            gateway
                .update_transaction(&counterpart.ledger_id, &existing.id, entry)
                .await?;
            Ok(true)
        }
        None => {
            tracing::warn!(
                "{}: transfer entry for mirror {mirror_id} missing, recreating it",
                counterpart.name
            );
            gateway
                .create_transaction(&counterpart.ledger_id, entry)
                .await?;
            Ok(true)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Fresh mirrors whose transfer entry had to be rewritten.
    pub repaired: usize,
    pub unchanged: usize,
}

/// Mirrors `balancing` (taken from `source`'s ledger) into the shared ledger
/// and `counterpart`'s ledger.
///
/// Transactions are processed one by one; the first failing call abandons the
/// rest of the batch.
pub async fn mirror<A: LedgerApi>(
    gateway: &Gateway<A>,
    targets: &MirrorTargets,
    source: &Owner,
    counterpart: &Owner,
    balancing: &[Transaction],
    current_knowledge: i64,
) -> ResultEngine<MirrorReport> {
    let mut report = MirrorReport::default();

    for b in balancing {
        match decide(b, &targets.mirrors, current_knowledge) {
            MirrorAction::Create => {
                let payload = mirror_payload(b, source, counterpart, current_knowledge)?;
                let created = gateway
                    .create_transaction(&targets.shared_ledger_id, payload)
                    .await?;
                tracing::info!(
                    "{}: balancing {} mirrored as {} in shared budget",
                    source.name,
                    b.id,
                    created.id
                );
                let entry = transfer_payload(&created.id, b, counterpart, current_knowledge)?;
                gateway
                    .create_transaction(&counterpart.ledger_id, entry)
                    .await?;
                report.created += 1;
            }
            MirrorAction::Update { mirror } => {
                let payload = mirror_payload(b, source, counterpart, current_knowledge)?;
                let updated = gateway
                    .update_transaction(&targets.shared_ledger_id, &mirror.id, payload)
                    .await?;
                let entry = transfer_payload(&updated.id, b, counterpart, current_knowledge)?;
                reconcile_entry(gateway, targets, counterpart, &updated.id, entry).await?;
                report.updated += 1;
            }
            MirrorAction::Fresh { mirror } => {
                let entry = transfer_payload(&mirror.id, b, counterpart, current_knowledge)?;
                if reconcile_entry(gateway, targets, counterpart, &mirror.id, entry).await? {
                    report.repaired += 1;
                } else {
                    report.unchanged += 1;
                }
            }
            MirrorAction::Delete { mirror } => {
                gateway
                    .delete_transaction(&targets.shared_ledger_id, &mirror.id)
                    .await?;
                if let Some(existing) = targets.transfers.get(&mirror.id) {
                    gateway
                        .delete_transaction(&counterpart.ledger_id, &existing.id)
                        .await?;
                }
                report.deleted += 1;
            }
            MirrorAction::Retired => {
                let orphans = targets.orphaned_entries(&b.id);
                if orphans.is_empty() {
                    report.unchanged += 1;
                    continue;
                }
                for entry in orphans {
                    tracing::warn!(
                        "{}: removing transfer entry {} left by deleted balancing {}",
                        counterpart.name,
                        entry.id,
                        b.id
                    );
                    gateway
                        .delete_transaction(&counterpart.ledger_id, &entry.id)
                        .await?;
                }
                report.deleted += 1;
            }
        }
    }

    tracing::info!(
        "{}: balancing created {}, updated {}, deleted {}, repaired {}, unchanged {}",
        source.name,
        report.created,
        report.updated,
        report.deleted,
        report.repaired,
        report.unchanged
    );
    Ok(report)
}

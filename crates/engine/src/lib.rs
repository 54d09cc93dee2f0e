//! Reconciliation of two personal budgets with a shared one.
//!
//! Shared expenses of each owner are copied one-way into the shared budget,
//! balancing transactions are mirrored into the shared budget and into the
//! other owner's budget. Correlation and freshness of every copy live in a
//! [`stamp`] at the front of its memo, so a pass can be interrupted at any
//! point and the next one picks up from what the ledgers contain.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinSet;

pub use api_types;
pub use balancing::{MirrorReport, MirrorTargets, mirror};
pub use categories::{CategoryBinding, Owner};
pub use classify::{Classified, classify};
pub use error::{EngineError, GatewayError, TransportError};
pub use gateway::{
    CallRecord, Gateway, GatewayBuilder, LedgerApi, RateLimitRecord, TransactionQuery,
    UNKNOWN_PAYEE,
};
pub use plan::{
    ApplyReport, PlannedUpdate, ReconciliationPlan, apply_plan, plan, plan_retractions,
};
pub use status::{MonthStatus, OwnerStatus};
pub use transactions::{DateWindow, Ledger, Transaction, TransactionId};

pub mod allocation;
pub mod balancing;
mod categories;
mod classify;
mod error;
mod gateway;
pub mod plan;
pub mod stamp;
mod status;
mod transactions;

type ResultEngine<T> = Result<T, EngineError>;

/// Ledgers fetched at the start of a pass. Knowledge is captured here, before
/// any write of the pass.
#[derive(Clone, Debug)]
pub struct PassSnapshot {
    pub shared: Ledger,
    /// Same order as the engine owners.
    pub personal: [Ledger; 2],
}

/// Outcome of one owner's pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnerReport {
    pub owner: String,
    pub shared_expenses: usize,
    pub balancing: usize,
    pub other: usize,
    pub expenses: ApplyReport,
    pub mirrors: MirrorReport,
}

#[derive(Debug)]
pub struct Engine<A> {
    gateway: Arc<Gateway<A>>,
    shared_ledger_id: String,
    owners: [Owner; 2],
}

impl<A: LedgerApi + 'static> Engine<A> {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder<A> {
        EngineBuilder::default()
    }

    pub fn gateway(&self) -> &Arc<Gateway<A>> {
        &self.gateway
    }

    pub fn owners(&self) -> &[Owner; 2] {
        &self.owners
    }

    pub async fn snapshot(&self) -> ResultEngine<PassSnapshot> {
        let shared = self.gateway.ledger(&self.shared_ledger_id).await?;
        let first = self.gateway.ledger(&self.owners[0].ledger_id).await?;
        let second = self.gateway.ledger(&self.owners[1].ledger_id).await?;
        Ok(PassSnapshot {
            shared,
            personal: [first, second],
        })
    }

    /// Reconciles the owner at `index` (0 or 1) against `snapshot`.
    pub async fn sync_owner(
        &self,
        snapshot: &PassSnapshot,
        index: usize,
        window: DateWindow,
    ) -> ResultEngine<OwnerReport> {
        let (owner, counterpart) = self.pair(index)?;
        let personal = &snapshot.personal[index];
        let counterpart_ledger = &snapshot.personal[1 - index];
        let knowledge = personal.knowledge;
        tracing::info!("{} - Latest server knowledge: {knowledge}", owner.name);

        let source = personal.window(window);
        let classified = classify(&source, &owner.binding);
        tracing::info!(
            "{} - Found {} shared expenses, {} balancing, {} other transactions",
            owner.name,
            classified.shared_expense.len(),
            classified.balancing.len(),
            classified.other.len()
        );

        let shared_index =
            stamp::StampIndex::for_account(&snapshot.shared.transactions, &owner.shared_account_id);
        let targets =
            MirrorTargets::new(&snapshot.shared, owner, counterpart_ledger, counterpart);
        let recategorized = targets.recategorized(&classified.other);
        let former_expenses: Vec<Transaction> = classified
            .other
            .iter()
            .filter(|t| recategorized.iter().all(|r| r.id != t.id))
            .cloned()
            .collect();

        let mut expenses =
            plan::plan_with_index(&classified.shared_expense, &shared_index, knowledge);
        expenses.extend_deletes(plan_retractions(&former_expenses, &shared_index));
        let applied = apply_plan(
            &self.gateway,
            &snapshot.shared.id,
            &owner.shared_account_id,
            &expenses,
            knowledge,
        )
        .await?;

        let mut balancing = classified.balancing.clone();
        balancing.extend(recategorized);
        let mirrors = mirror(
            &self.gateway,
            &targets,
            owner,
            counterpart,
            &balancing,
            knowledge,
        )
        .await?;

        Ok(OwnerReport {
            owner: owner.name.clone(),
            shared_expenses: classified.shared_expense.len(),
            balancing: classified.balancing.len(),
            other: classified.other.len(),
            expenses: applied,
            mirrors,
        })
    }

    /// One full pass: snapshot, then both owners in parallel.
    ///
    /// The outer error is a failed snapshot; each owner's outcome is reported
    /// separately so one failing owner does not hide the other.
    pub async fn sync_pass(
        self: &Arc<Self>,
        window: DateWindow,
    ) -> ResultEngine<Vec<(String, ResultEngine<OwnerReport>)>> {
        let snapshot = Arc::new(self.snapshot().await?);
        let mut tasks = JoinSet::new();
        for index in 0..self.owners.len() {
            let engine = Arc::clone(self);
            let snapshot = Arc::clone(&snapshot);
            tasks.spawn(async move {
                let result = engine.sync_owner(&snapshot, index, window).await;
                (index, result)
            });
        }

        let mut results = Vec::with_capacity(self.owners.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(err) => tracing::error!("owner task failed: {err}"),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        Ok(results
            .into_iter()
            .map(|(index, result)| (self.owners[index].name.clone(), result))
            .collect())
    }

    /// Reports the monthly allocated budget of both owners into the shared
    /// ledger.
    pub async fn sync_allocations(
        &self,
        today: NaiveDate,
    ) -> ResultEngine<Vec<(String, ResultEngine<ApplyReport>)>> {
        let snapshot = self.snapshot().await?;
        let mut results = Vec::with_capacity(self.owners.len());
        for (owner, personal) in self.owners.iter().zip(&snapshot.personal) {
            let result = allocation::sync_allocations(
                &self.gateway,
                owner,
                personal,
                &snapshot.shared,
                today,
            )
            .await;
            results.push((owner.name.clone(), result));
        }
        Ok(results)
    }

    pub async fn status(&self) -> ResultEngine<Vec<OwnerStatus>> {
        let snapshot = self.snapshot().await?;
        Ok(self
            .owners
            .iter()
            .zip(&snapshot.personal)
            .map(|(owner, personal)| status::owner_status(owner, personal, &snapshot.shared))
            .collect())
    }

    fn pair(&self, index: usize) -> ResultEngine<(&Owner, &Owner)> {
        match index {
            0 => Ok((&self.owners[0], &self.owners[1])),
            1 => Ok((&self.owners[1], &self.owners[0])),
            other => Err(EngineError::NotFound(format!("owner #{other}"))),
        }
    }
}

/// The builder for `Engine`
pub struct EngineBuilder<A> {
    gateway: Option<Arc<Gateway<A>>>,
    shared_ledger_id: String,
    owners: Vec<Owner>,
}

impl<A> Default for EngineBuilder<A> {
    fn default() -> Self {
        Self {
            gateway: None,
            shared_ledger_id: String::new(),
            owners: Vec::new(),
        }
    }
}

impl<A: LedgerApi + 'static> EngineBuilder<A> {
    pub fn gateway(mut self, gateway: Arc<Gateway<A>>) -> EngineBuilder<A> {
        self.gateway = Some(gateway);
        self
    }

    /// Id of the shared budget.
    pub fn shared_ledger(mut self, ledger_id: &str) -> EngineBuilder<A> {
        self.shared_ledger_id = ledger_id.to_string();
        self
    }

    pub fn owner(mut self, owner: Owner) -> EngineBuilder<A> {
        self.owners.push(owner);
        self
    }

    /// Construct `Engine`
    pub fn build(self) -> ResultEngine<Engine<A>> {
        let gateway = self
            .gateway
            .ok_or_else(|| EngineError::Configuration("missing gateway".to_string()))?;
        if self.shared_ledger_id.is_empty() {
            return Err(EngineError::Configuration(
                "missing shared budget id".to_string(),
            ));
        }
        let owners: [Owner; 2] = self.owners.try_into().map_err(|owners: Vec<Owner>| {
            EngineError::Configuration(format!("expected 2 owners, got {}", owners.len()))
        })?;
        if owners[0].ledger_id == owners[1].ledger_id {
            return Err(EngineError::Configuration(
                "both owners point to the same budget".to_string(),
            ));
        }

        Ok(Engine {
            gateway,
            shared_ledger_id: self.shared_ledger_id,
            owners,
        })
    }
}

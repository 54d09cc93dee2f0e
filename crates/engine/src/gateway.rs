//! Rate-limited access to the remote budgeting API.
//!
//! [`LedgerApi`] is the raw transport (HTTP in the binary, in-memory in
//! tests). [`Gateway`] wraps it with:
//!
//! - an hourly call counter, restorable across restarts within the same hour
//!   and optionally capped,
//! - a provenance log of the latest calls issued by this process,
//! - a payee id -> name cache filled by full ledger fetches.
//!
//! Nothing is retried: a transport failure is logged with its call label and
//! handed back to the caller.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
};

use api_types::{
    budget::BudgetDetailResponse,
    transaction::{
        SaveTransaction, SaveTransactionsResponse, TransactionResponse, TransactionType,
        TransactionsResponse,
    },
};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::{
    EngineError, ResultEngine,
    error::{GatewayError, TransportError},
    transactions::{self, Ledger, Transaction, TransactionId},
};

/// Returned by [`Gateway::payee_name`] for ids never seen in a ledger fetch.
pub const UNKNOWN_PAYEE: &str = "Unknown Payee";

type TransportResult<T> = Result<T, TransportError>;

/// Filters of a transaction listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionQuery {
    pub since_date: Option<NaiveDate>,
    pub transaction_type: Option<TransactionType>,
    /// Only return changes after this knowledge.
    pub last_knowledge: Option<i64>,
}

/// Remote transaction API.
pub trait LedgerApi: Send + Sync {
    fn list_transactions(
        &self,
        ledger_id: &str,
        query: &TransactionQuery,
    ) -> impl Future<Output = TransportResult<TransactionsResponse>> + Send;

    fn get_ledger(
        &self,
        ledger_id: &str,
    ) -> impl Future<Output = TransportResult<BudgetDetailResponse>> + Send;

    fn create_transaction(
        &self,
        ledger_id: &str,
        payload: SaveTransaction,
    ) -> impl Future<Output = TransportResult<SaveTransactionsResponse>> + Send;

    fn create_transactions(
        &self,
        ledger_id: &str,
        payloads: Vec<SaveTransaction>,
    ) -> impl Future<Output = TransportResult<SaveTransactionsResponse>> + Send;

    fn update_transaction(
        &self,
        ledger_id: &str,
        transaction_id: &str,
        payload: SaveTransaction,
    ) -> impl Future<Output = TransportResult<TransactionResponse>> + Send;

    /// Every payload must carry its `id`.
    fn update_transactions(
        &self,
        ledger_id: &str,
        payloads: Vec<SaveTransaction>,
    ) -> impl Future<Output = TransportResult<SaveTransactionsResponse>> + Send;

    fn delete_transaction(
        &self,
        ledger_id: &str,
        transaction_id: &str,
    ) -> impl Future<Output = TransportResult<TransactionResponse>> + Send;
}

/// Persisted form of the hourly counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    pub calls: u32,
    /// Hour of day (`0`..`23`) in the gateway timezone.
    pub current_hour: String,
}

/// One issued call, kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    /// Process-wide, starts at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub label: String,
}

impl std::fmt::Display for CallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.sequence,
            self.timestamp.to_rfc3339(),
            self.label
        )
    }
}

/// Calls kept in the provenance log. Older ones are dropped.
const CALL_LOG_CAPACITY: usize = 1000;

#[derive(Debug)]
struct Usage {
    record: RateLimitRecord,
    sequence: u64,
    log: VecDeque<CallRecord>,
}

#[derive(Debug)]
pub struct Gateway<A> {
    api: A,
    timezone: Tz,
    hourly_limit: Option<u32>,
    usage: Mutex<Usage>,
    payees: RwLock<HashMap<String, String>>,
}

impl<A: LedgerApi> Gateway<A> {
    /// Return a builder for `Gateway`.
    pub fn builder(api: A) -> GatewayBuilder<A> {
        GatewayBuilder {
            api,
            timezone: Tz::UTC,
            hourly_limit: None,
            saved: None,
        }
    }

    /// Counter state to persist at shutdown.
    pub async fn rate_limit(&self) -> RateLimitRecord {
        self.usage.lock().await.record.clone()
    }

    pub async fn call_log(&self) -> Vec<CallRecord> {
        self.usage.lock().await.log.iter().cloned().collect()
    }

    /// Name of a payee seen in a previous full ledger fetch, or
    /// [`UNKNOWN_PAYEE`].
    pub async fn payee_name(&self, payee_id: Option<&str>) -> String {
        let Some(payee_id) = payee_id else {
            return UNKNOWN_PAYEE.to_string();
        };
        self.payees
            .read()
            .await
            .get(payee_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_PAYEE.to_string())
    }

    pub async fn list_transactions(
        &self,
        ledger_id: &str,
        query: &TransactionQuery,
    ) -> ResultEngine<(Vec<Transaction>, i64)> {
        let label = format!("getTransactions({ledger_id})");
        self.begin_call(&label).await?;
        let response = finish(&label, self.api.list_transactions(ledger_id, query).await)?;
        Ok((
            transactions::from_summaries(response.transactions)?,
            response.server_knowledge,
        ))
    }

    /// Full ledger fetch. Refreshes the payee cache.
    pub async fn ledger(&self, ledger_id: &str) -> ResultEngine<Ledger> {
        let label = format!("getBudgetById({ledger_id})");
        self.begin_call(&label).await?;
        let response = finish(&label, self.api.get_ledger(ledger_id).await)?;

        if let Some(payees) = &response.budget.payees {
            let mut cache = self.payees.write().await;
            for payee in payees {
                cache.insert(payee.id.clone(), payee.name.clone());
            }
        }
        Ledger::from_budget(response)
    }

    pub async fn create_transaction(
        &self,
        ledger_id: &str,
        payload: SaveTransaction,
    ) -> ResultEngine<Transaction> {
        let label = format!("createTransaction({ledger_id})");
        self.begin_call(&label).await?;
        let response = finish(&label, self.api.create_transaction(ledger_id, payload).await)?;
        let created = response.transaction.ok_or_else(|| {
            EngineError::InvalidTransaction(format!("{label} returned no transaction"))
        })?;
        Transaction::try_from(created)
    }

    /// Returns the ids of the created transactions.
    pub async fn create_transactions(
        &self,
        ledger_id: &str,
        payloads: Vec<SaveTransaction>,
    ) -> ResultEngine<Vec<TransactionId>> {
        let label = format!("createTransactions({ledger_id})");
        self.begin_call(&label).await?;
        let response = finish(
            &label,
            self.api.create_transactions(ledger_id, payloads).await,
        )?;
        if !response.duplicate_import_ids.is_empty() {
            tracing::warn!(
                "{label}: {} duplicate import ids skipped",
                response.duplicate_import_ids.len()
            );
        }
        Ok(response.transaction_ids)
    }

    pub async fn update_transaction(
        &self,
        ledger_id: &str,
        transaction_id: &str,
        payload: SaveTransaction,
    ) -> ResultEngine<Transaction> {
        let label = format!("updateTransaction({ledger_id}, {transaction_id})");
        self.begin_call(&label).await?;
        let response = finish(
            &label,
            self.api
                .update_transaction(ledger_id, transaction_id, payload)
                .await,
        )?;
        Transaction::try_from(response.transaction)
    }

    /// Returns the ids of the updated transactions.
    pub async fn update_transactions(
        &self,
        ledger_id: &str,
        payloads: Vec<SaveTransaction>,
    ) -> ResultEngine<Vec<TransactionId>> {
        let label = format!("updateTransactions({ledger_id})");
        self.begin_call(&label).await?;
        let response = finish(
            &label,
            self.api.update_transactions(ledger_id, payloads).await,
        )?;
        Ok(response.transaction_ids)
    }

    pub async fn delete_transaction(
        &self,
        ledger_id: &str,
        transaction_id: &str,
    ) -> ResultEngine<TransactionId> {
        let label = format!("deleteTransaction({ledger_id}, {transaction_id})");
        self.begin_call(&label).await?;
        let response = finish(
            &label,
            self.api.delete_transaction(ledger_id, transaction_id).await,
        )?;
        Ok(response.transaction.id)
    }

    async fn begin_call(&self, label: &str) -> Result<(), GatewayError> {
        self.count_call(label, Utc::now()).await
    }

    async fn count_call(&self, label: &str, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let hour = hour_of(now, self.timezone);
        let mut usage = self.usage.lock().await;

        if usage.record.current_hour != hour {
            tracing::info!("New hour: {hour} - resetting number of calls");
            usage.record = RateLimitRecord {
                calls: 0,
                current_hour: hour,
            };
        }
        if let Some(limit) = self.hourly_limit
            && usage.record.calls >= limit
        {
            tracing::error!(
                "Refusing {label}: {} calls already made this hour",
                usage.record.calls
            );
            return Err(GatewayError::BudgetExhausted {
                calls: usage.record.calls,
                limit,
            });
        }

        usage.record.calls += 1;
        usage.sequence += 1;
        let record = CallRecord {
            sequence: usage.sequence,
            timestamp: now,
            label: label.to_string(),
        };
        tracing::debug!("Calling {label} - Number of calls: {}", usage.record.calls);
        if usage.log.len() == CALL_LOG_CAPACITY {
            usage.log.pop_front();
        }
        usage.log.push_back(record);
        Ok(())
    }
}

fn finish<T>(label: &str, result: TransportResult<T>) -> Result<T, GatewayError> {
    result.map_err(|source| {
        tracing::error!("{label} failed: {source}");
        GatewayError::Transport {
            call: label.to_string(),
            source,
        }
    })
}

fn hour_of(now: DateTime<Utc>, timezone: Tz) -> String {
    now.with_timezone(&timezone).hour().to_string()
}

/// The builder for `Gateway`.
pub struct GatewayBuilder<A> {
    api: A,
    timezone: Tz,
    hourly_limit: Option<u32>,
    saved: Option<RateLimitRecord>,
}

impl<A: LedgerApi> GatewayBuilder<A> {
    /// Timezone defining the hour the counter is scoped to.
    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn hourly_limit(mut self, limit: Option<u32>) -> Self {
        self.hourly_limit = limit;
        self
    }

    /// Counter saved by a previous run. Only honoured if it belongs to the
    /// current hour.
    pub fn restore(mut self, saved: Option<RateLimitRecord>) -> Self {
        self.saved = saved;
        self
    }

    pub fn build(self) -> Gateway<A> {
        self.build_at(Utc::now())
    }

    fn build_at(self, now: DateTime<Utc>) -> Gateway<A> {
        let hour = hour_of(now, self.timezone);
        let record = match self.saved {
            Some(saved) if saved.current_hour == hour => {
                tracing::info!(
                    "Using saved state with {} calls in hour {}",
                    saved.calls,
                    saved.current_hour
                );
                saved
            }
            Some(saved) => {
                tracing::info!(
                    "Saved state for hour {} is not valid for current hour {hour}",
                    saved.current_hour
                );
                RateLimitRecord {
                    calls: 0,
                    current_hour: hour,
                }
            }
            None => RateLimitRecord {
                calls: 0,
                current_hour: hour,
            },
        };

        Gateway {
            api: self.api,
            timezone: self.timezone,
            hourly_limit: self.hourly_limit,
            usage: Mutex::new(Usage {
                record,
                sequence: 0,
                log: VecDeque::with_capacity(CALL_LOG_CAPACITY),
            }),
            payees: RwLock::new(HashMap::new()),
        }
    }
}

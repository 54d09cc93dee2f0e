//! Runs the selected mode against the engine.
use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use engine::{DateWindow, Engine, Gateway, LedgerApi, Owner, OwnerStatus};
use tokio::sync::watch;

use crate::{
    bootstrap,
    error::{AppError, Result},
    settings::{Mode, Settings},
    state::StateStore,
};

pub fn today(timezone: Tz) -> NaiveDate {
    Utc::now().with_timezone(&timezone).date_naive()
}

/// Window of a single month pass. Months after `today` are rejected.
pub fn month_window(day: NaiveDate, today: NaiveDate) -> Result<DateWindow> {
    let window = DateWindow::month(day);
    if let DateWindow::Range { start, .. } = window
        && start > today
    {
        return Err(AppError::Settings(format!("month {start} is in the future")));
    }
    Ok(window)
}

pub fn year_window(year: i32) -> Result<DateWindow> {
    DateWindow::year(year).ok_or_else(|| AppError::Settings(format!("invalid year {year}")))
}

pub async fn run<A: LedgerApi + 'static>(
    engine: &Arc<Engine<A>>,
    mode: Mode,
    settings: &Settings,
    timezone: Tz,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    match mode {
        Mode::All => pass(engine, DateWindow::All).await,
        Mode::Month(day) => pass(engine, month_window(day, today(timezone))?).await,
        Mode::Year(year) => pass(engine, year_window(year)?).await,
        Mode::Poll => poll(engine, settings, shutdown).await,
        Mode::Budgeted => budgeted(engine, today(timezone)).await,
        Mode::Status => {
            for status in engine.status().await? {
                print_status(&status);
            }
            Ok(())
        }
    }
}

/// Logs each owner's outcome. Only a fatal owner error fails the pass.
async fn pass<A: LedgerApi + 'static>(engine: &Arc<Engine<A>>, window: DateWindow) -> Result<()> {
    for (owner, result) in engine.sync_pass(window).await? {
        match result {
            Ok(report) => tracing::info!(
                "{owner} - Shared expenses: created {}, updated {}, deleted {}. Balancing: created {}, updated {}, deleted {}, repaired {}",
                report.expenses.created,
                report.expenses.updated,
                report.expenses.deleted,
                report.mirrors.created,
                report.mirrors.updated,
                report.mirrors.deleted,
                report.mirrors.repaired
            ),
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => tracing::error!("{owner} - Sync failed: {err}"),
        }
    }
    Ok(())
}

/// Runs passes until `shutdown` flips. The flag is read between passes only,
/// so a pass in flight always completes.
async fn poll<A: LedgerApi + 'static>(
    engine: &Arc<Engine<A>>,
    settings: &Settings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let window = settings
        .since_date
        .map_or(DateWindow::All, DateWindow::Since);
    let interval = Duration::from_secs(settings.poll_interval_secs);

    loop {
        match pass(engine, window).await {
            Ok(()) => {}
            Err(err) if !err.is_fatal() => {
                tracing::error!("Pass failed: {err}");
            }
            Err(err) => return Err(err),
        }
        if *shutdown.borrow() {
            break;
        }
        tracing::info!("Waiting {}s for the next pass", interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Polling stopped");
    Ok(())
}

async fn budgeted<A: LedgerApi + 'static>(engine: &Arc<Engine<A>>, today: NaiveDate) -> Result<()> {
    for (owner, result) in engine.sync_allocations(today).await? {
        match result {
            Ok(_) => {}
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => tracing::error!("{owner} - Allocated budget sync failed: {err}"),
        }
    }
    Ok(())
}

/// Persists the call counter and the category bindings, then prints the call
/// log of this run.
pub async fn drain<A: LedgerApi>(
    gateway: &Gateway<A>,
    store: &StateStore,
    owners: &[Owner],
) -> Result<()> {
    let record = gateway.rate_limit().await;
    store.save_rate_limit(&record)?;
    bootstrap::save_bindings(store, owners)?;

    tracing::info!(
        "{} calls made to the API in hour {}",
        record.calls,
        record.current_hour
    );
    for call in gateway.call_log().await {
        tracing::info!("{call}");
    }
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok { "✅" } else { "❌" }
}

fn print_status(status: &OwnerStatus) {
    let owner = &status.owner;
    tracing::info!("{owner} - Latest server knowledge: {}", status.knowledge);
    tracing::info!("{owner} - {} Shared Expenses", mark(status.shared_category_present));
    tracing::info!("{owner} - {} Balancing", mark(status.balancing_category_present));
    tracing::info!(
        "{owner} - {} {}/{} shared expenses in the shared budget",
        mark(status.missing_expenses() == 0),
        status.mirrored_expenses,
        status.shared_expenses
    );
    tracing::info!(
        "{owner} - {} balancing, {} other transactions, {} on the shared account",
        status.balancing,
        status.other,
        status.shared_account_transactions
    );
    for month in &status.months {
        match month.recorded {
            Some(_) => tracing::info!(
                "{owner} - {} Budgeted for {}: amounts are equal",
                mark(month.is_consistent()),
                month.month
            ),
            None => tracing::info!(
                "{owner} - {} Budgeted {}: missing transaction",
                mark(false),
                month.month
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use api_types::{
        budget::{BudgetDetail, BudgetDetailResponse},
        transaction::{
            SaveTransaction, SaveTransactionsResponse, TransactionResponse, TransactionsResponse,
        },
    };
    use engine::{CategoryBinding, TransactionQuery, TransportError};
    use uuid::Uuid;

    use super::*;

    /// Empty budgets. A fetch may raise the shutdown flag.
    #[derive(Debug, Default)]
    struct EmptyApi {
        stop_on_fetch: Option<watch::Sender<bool>>,
    }

    fn offline<T>() -> std::result::Result<T, TransportError> {
        Err(TransportError::Network("offline".to_string()))
    }

    impl LedgerApi for EmptyApi {
        async fn list_transactions(
            &self,
            _: &str,
            _: &TransactionQuery,
        ) -> std::result::Result<TransactionsResponse, TransportError> {
            offline()
        }

        async fn get_ledger(
            &self,
            ledger_id: &str,
        ) -> std::result::Result<BudgetDetailResponse, TransportError> {
            if let Some(stop) = &self.stop_on_fetch {
                let _ = stop.send(true);
            }
            Ok(BudgetDetailResponse {
                budget: BudgetDetail {
                    id: ledger_id.to_string(),
                    name: ledger_id.to_string(),
                    transactions: Some(Vec::new()),
                    payees: Some(Vec::new()),
                    categories: Some(Vec::new()),
                    months: Some(Vec::new()),
                },
                server_knowledge: 1,
            })
        }

        async fn create_transaction(
            &self,
            _: &str,
            _: SaveTransaction,
        ) -> std::result::Result<SaveTransactionsResponse, TransportError> {
            offline()
        }

        async fn create_transactions(
            &self,
            _: &str,
            _: Vec<SaveTransaction>,
        ) -> std::result::Result<SaveTransactionsResponse, TransportError> {
            offline()
        }

        async fn update_transaction(
            &self,
            _: &str,
            _: &str,
            _: SaveTransaction,
        ) -> std::result::Result<TransactionResponse, TransportError> {
            offline()
        }

        async fn update_transactions(
            &self,
            _: &str,
            _: Vec<SaveTransaction>,
        ) -> std::result::Result<SaveTransactionsResponse, TransportError> {
            offline()
        }

        async fn delete_transaction(
            &self,
            _: &str,
            _: &str,
        ) -> std::result::Result<TransactionResponse, TransportError> {
            offline()
        }
    }

    fn owner(name: &str) -> Owner {
        Owner {
            name: name.to_string(),
            ledger_id: format!("{name}-budget"),
            shared_account_id: format!("{name}-shared-acc"),
            shared_payee_id: format!("{name}-payee"),
            balancing_account_id: format!("{name}-balancing-acc"),
            binding: CategoryBinding::new(
                "group",
                &format!("{name}-shared"),
                &format!("{name}-bal"),
            )
            .unwrap(),
        }
    }

    fn engine(api: EmptyApi) -> Arc<Engine<EmptyApi>> {
        let gateway = Arc::new(Gateway::builder(api).build());
        let engine = Engine::builder()
            .gateway(gateway)
            .shared_ledger("shared-budget")
            .owner(owner("alice"))
            .owner(owner("bob"))
            .build()
            .unwrap();
        Arc::new(engine)
    }

    fn slow_polling() -> Settings {
        Settings {
            poll_interval_secs: 3600,
            ..Settings::default()
        }
    }

    /// Only fetches reach the API in these tests.
    async fn fetches(engine: &Engine<EmptyApi>) -> u32 {
        engine.gateway().rate_limit().await.calls
    }

    #[tokio::test]
    async fn shutdown_during_a_pass_stops_after_it() {
        let (stop, shutdown) = watch::channel(false);
        let engine = engine(EmptyApi {
            stop_on_fetch: Some(stop),
            ..Default::default()
        });

        tokio::time::timeout(Duration::from_secs(5), poll(&engine, &slow_polling(), shutdown))
            .await
            .expect("poll kept running after shutdown")
            .unwrap();

        // The pass that saw the signal still fetched all three budgets.
        assert_eq!(fetches(&engine).await, 3);
    }

    #[tokio::test]
    async fn shutdown_while_waiting_ends_the_wait() {
        let (stop, shutdown) = watch::channel(false);
        let engine = engine(EmptyApi::default());

        let polling = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { poll(&engine, &slow_polling(), shutdown).await })
        };
        while fetches(&engine).await < 3 {
            tokio::task::yield_now().await;
        }
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), polling)
            .await
            .expect("poll kept waiting after shutdown")
            .unwrap()
            .unwrap();
        assert_eq!(fetches(&engine).await, 3);
    }

    #[tokio::test]
    async fn drain_persists_counter_and_bindings() {
        let root = PathBuf::from("target/test_state").join(Uuid::new_v4().to_string());
        let store = StateStore::new(&root);
        let engine = engine(EmptyApi::default());
        engine.snapshot().await.unwrap();

        drain(engine.gateway(), &store, engine.owners()).await.unwrap();

        let record = store.load_rate_limit().unwrap().unwrap();
        assert_eq!(record.calls, 3);
        for owner in engine.owners() {
            let saved = store.load_owner(&owner.name).unwrap();
            assert_eq!(saved.categories.as_ref(), Some(&owner.binding));
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_window_spans_the_whole_month() {
        let window = month_window(day(2024, 2, 17), day(2024, 6, 1)).unwrap();
        assert_eq!(
            window,
            DateWindow::Range {
                start: day(2024, 2, 1),
                end: day(2024, 2, 29)
            }
        );
        // The current month is allowed.
        assert!(month_window(day(2024, 6, 30), day(2024, 6, 1)).is_ok());
    }

    #[test]
    fn future_month_is_rejected() {
        let err = month_window(day(2024, 7, 1), day(2024, 6, 30)).unwrap_err();
        assert!(matches!(err, AppError::Settings(_)));
    }

    #[test]
    fn year_window_is_the_calendar_year() {
        assert_eq!(
            year_window(2023).unwrap(),
            DateWindow::Range {
                start: day(2023, 1, 1),
                end: day(2023, 12, 31)
            }
        );
        assert!(year_window(i32::MAX).is_err());
    }
}

use std::{sync::Arc, time::Instant};

use engine::{Engine, Gateway};
use tokio::sync::watch;

use crate::{client::YnabClient, error::Result, state::StateStore};

mod actions;
mod bootstrap;
mod client;
mod error;
mod settings;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    let (settings, options) = settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "splitsync={level},engine={level}",
            level = options.level(&settings)
        ))
        .init();

    let started = Instant::now();
    settings.validate()?;
    let timezone = settings.timezone()?;
    let store = StateStore::new(&settings.state_dir);

    let client = YnabClient::new(&settings.base_url, settings.token()?)?;
    let gateway = Arc::new(
        Gateway::builder(client)
            .timezone(timezone)
            .hourly_limit(settings.hourly_call_limit)
            .restore(store.load_rate_limit()?)
            .build(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, stopping after the current pass...");
            }
            _ = async {
                if let Some(ref mut t) = term { t.recv().await; }
            } => {
                tracing::info!("SIGTERM received, stopping after the current pass...");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let mut owners = Vec::new();
    let outcome = async {
        owners = bootstrap::owners(
            &gateway,
            &settings,
            &store,
            options.force_refresh_categories,
        )
        .await?;
        let names: Vec<_> = owners.iter().map(|o| o.name.as_str()).collect();
        tracing::info!("Syncing {} through {}", names.join(" and "), settings.shared.name);
        let mut builder = Engine::builder()
            .gateway(Arc::clone(&gateway))
            .shared_ledger(&settings.shared.budget_id);
        for owner in &owners {
            builder = builder.owner(owner.clone());
        }
        let engine = Arc::new(builder.build()?);
        actions::run(&engine, options.mode, &settings, timezone, shutdown_rx).await
    }
    .await;

    actions::drain(&gateway, &store, &owners).await?;
    tracing::info!(
        "Execution completed in {:.2} seconds",
        started.elapsed().as_secs_f64()
    );

    if let Err(err) = &outcome {
        tracing::error!("Error: {err}");
    }
    outcome
}

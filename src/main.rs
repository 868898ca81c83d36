use roomledger_billing::config::AppConfig;
use roomledger_billing::services::scheduler::run_billing_scheduler;
use roomledger_billing::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let state = AppState::build(config).await?;

    tracing::info!(
        app_name = %state.config.app_name,
        environment = %state.config.environment,
        persistent = state.db_pool.is_some(),
        scheduler_enabled = state.config.billing_scheduler_enabled,
        "Billing worker started"
    );

    let scheduler = if state.config.billing_scheduler_enabled {
        Some(tokio::spawn(run_billing_scheduler(state.clone())))
    } else {
        tracing::warn!("BILLING_SCHEDULER_ENABLED is off; no monthly runs will be triggered");
        None
    };

    shutdown_signal().await?;
    if let Some(handle) = scheduler {
        handle.abort();
    }
    if let Some(pool) = &state.db_pool {
        pool.close().await;
    }
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    tracing::info!("Shutdown signal received, stopping billing worker");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

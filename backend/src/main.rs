use anyhow::Context;
use ledger::shutdown::shutdown_signal;
use server::{config::Config, start_server, state::State};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let config = Config::load()?;

    #[cfg(not(feature = "workers"))]
    {
        let state = State::connect(config)
            .await
            .context("Failed to connect to Redis")?;

        start_server(state, shutdown_signal()).await?;
    }

    #[cfg(feature = "workers")]
    {
        use std::time::Duration;

        use ledger::{AnalyticsIndex, Backends};
        use tokio_util::sync::CancellationToken;

        let workers = process::config::Config::load()?;
        let backends = Backends::redis(&config.store.redis_url, &config.store.redis, workers.block)
            .await
            .context("Failed to connect to Redis")?;

        match backends.index.ensure_index(false).await {
            Ok(true) => info!("Created analytics index"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Analytics index unavailable: {e}"),
        }

        let consumer = std::env::var("HOSTNAME").unwrap_or_else(|_| "newsroom".to_string());
        let cancel = CancellationToken::new();
        let mut tasks = process::spawn_all(
            backends.clone(),
            workers,
            &consumer,
            Duration::from_secs(60),
            cancel.clone(),
        );

        let state = State::new(config, backends);
        let stopper = cancel.clone();
        let served = start_server(state, async move {
            shutdown_signal().await;
            stopper.cancel();
        })
        .await;

        cancel.cancel();
        while tasks.join_next().await.is_some() {}
        info!("Workers stopped");

        served?;
    }

    Ok(())
}

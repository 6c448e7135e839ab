use std::{process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ledger::{AnalyticsIndex, Backends, GroupStart, shutdown::shutdown_signal};
use process::{Consumer, config::Config, popularity, run_consumer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep each session's five most recently viewed articles.
    RecentlyViewed {
        /// Consumer name, unique within the group.
        consumer: String,

        /// Start a new group at the beginning of the stream.
        #[arg(long)]
        replay: bool,
    },

    /// Index search queries for analytics.
    SearchQueries {
        consumer: String,

        #[arg(long)]
        replay: bool,
    },

    /// Count clicks per search.
    SearchClicks {
        consumer: String,

        #[arg(long)]
        replay: bool,
    },

    /// Rebuild the popular articles leaderboard.
    Popular {
        /// Only count views from the last this many seconds.
        #[arg(long)]
        lookback: Option<u64>,

        /// Keep running, rebuilding every this many seconds.
        #[arg(long)]
        every: Option<u64>,
    },

    /// Create the search analytics index.
    CreateIndex {
        /// Drop and recreate it if it exists. Documents are kept.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load()?;
    let backends = Backends::redis(&config.store.redis_url, &config.store.redis, config.block)
        .await
        .context("Failed to connect to Redis")?;

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.cancel();
    });

    let (kind, consumer, replay) = match args.command {
        Command::RecentlyViewed { consumer, replay } => (Consumer::RecentlyViewed, consumer, replay),
        Command::SearchQueries { consumer, replay } => (Consumer::SearchQueries, consumer, replay),
        Command::SearchClicks { consumer, replay } => (Consumer::SearchClicks, consumer, replay),
        Command::Popular { lookback, every } => {
            let rebuild = popularity(&backends, &config);
            let lookback = lookback.map(Duration::from_secs);

            match every {
                Some(every) => {
                    rebuild
                        .run_every(Duration::from_secs(every.max(1)), lookback, cancel)
                        .await
                }
                None => {
                    rebuild.rebuild(lookback).await?;
                }
            }
            return Ok(());
        }
        Command::CreateIndex { force } => {
            let created = backends.index.ensure_index(force).await?;
            info!("Analytics index {}", if created { "created" } else { "already exists" });
            return Ok(());
        }
    };

    let start = if replay {
        GroupStart::Beginning
    } else {
        GroupStart::Tail
    };

    let stats = run_consumer(kind, &backends, &config, &consumer, start, cancel).await?;
    info!("{consumer} finished with {stats:?}");
    Ok(())
}

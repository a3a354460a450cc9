pub mod catalog;
mod cli;
pub mod config;
pub mod cycle;
pub mod db;
pub mod failure;
pub mod fetcher;
pub mod models;
pub mod notify;
pub mod remote;
pub mod server;
pub mod store;
pub mod sync;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use catalog::Catalog;
use cli::{Cli, Commands};
use config::{Config, Credentials};
use cycle::{AppContext, CycleError};
use fetcher::{OccupancyFetcher, PopularTimesClient};
use notify::{HandleStore, NotificationRenderer, TelegramNotifier};
use store::ReadingStore;
use sync::SyncAgent;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch";

/// Slack on top of the per-fetch timeout for storing and notifying.
const CYCLE_TIMEOUT_GRACE_SECS: u64 = 60;

pub fn build_store(config: &Config, credentials: &Credentials, catalog: Arc<Catalog>) -> Result<ReadingStore> {
    let remote = config.object_store(credentials)?;
    let local = config.open_database()?;
    Ok(ReadingStore::new(remote, local, catalog))
}

/// Wires the full fetch, store and notify pipeline from configuration.
pub fn build_context(config: &Config, credentials: &Credentials) -> Result<AppContext> {
    let catalog = Arc::new(config.catalog()?);
    let store = build_store(config, credentials, catalog.clone())?;

    let api_key = credentials
        .google_api_key
        .clone()
        .ok_or_else(|| anyhow!("GOOGLE_API_KEY is not set"))?;
    let mut source = PopularTimesClient::new(api_key, config.fetch_timeout())?;
    if config.fetch.details_url.is_some() || config.fetch.search_url.is_some() {
        source = source.with_endpoints(
            config
                .fetch
                .details_url
                .clone()
                .unwrap_or_else(|| fetcher::DEFAULT_DETAILS_URL.to_string()),
            config
                .fetch
                .search_url
                .clone()
                .unwrap_or_else(|| fetcher::DEFAULT_SEARCH_URL.to_string()),
        );
    }
    let fetcher = OccupancyFetcher::new(Arc::new(source), catalog.offset())
        .with_concurrency(config.fetch.concurrency)
        .with_timeout(config.fetch_timeout());

    let (Some(token), Some(chat_id)) = (
        credentials.telegram_bot_token.clone(),
        credentials.telegram_chat_id.clone(),
    ) else {
        bail!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must both be set");
    };
    let mut notifier = TelegramNotifier::new(token, chat_id, config.fetch_timeout())?;
    if let Some(base) = &config.notify.api_base {
        notifier = notifier.with_api_base(base.clone());
    }
    let renderer = NotificationRenderer::new(Arc::new(notifier), config.notify.language, catalog.offset());
    let handles = HandleStore::new(store.remote().clone());

    Ok(AppContext::new(catalog, store, fetcher, renderer, handles)
        .with_skip_closed_venues(config.skip_closed_venues))
}

pub fn run() {
    let cli = Cli::parse();
    utils::logging::init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log_error!("Failed to start the async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(dispatch(cli)) {
        log_error!("{err:#}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let credentials = Credentials::from_env();
    log_debug!("Loaded config {config:?} with {credentials:?}");

    match cli.command {
        Commands::Serve { bind } => serve(&config, &credentials, bind).await,
        Commands::Cycle => {
            let ctx = build_context(&config, &credentials)?;
            match ctx.run_cycle().await {
                Ok(summary) => print_json(&summary),
                Err(CycleError::NothingPersisted(summary)) => {
                    print_json(&*summary)?;
                    bail!("cycle stored none of its readings")
                }
                Err(err) => Err(err.into()),
            }
        }
        Commands::Sync => {
            let agent = sync_agent(&config, &credentials)?;
            print_json(&agent.sync().await?)
        }
        Commands::Status => {
            let agent = sync_agent(&config, &credentials)?;
            print_json(&agent.status().await?)
        }
        Commands::Readings { venue, hours, limit } => {
            let catalog = Arc::new(config.catalog()?);
            let store = build_store(&config, &credentials, catalog)?;
            match venue {
                Some(venue) => {
                    let until = Utc::now();
                    let from = until - chrono::Duration::hours(hours.max(1));
                    print_json(&store.query(&venue, from..until).await?)
                }
                None => {
                    let db = store
                        .local()
                        .ok_or_else(|| anyhow!("listing without --venue needs a local database"))?;
                    print_json(&db.latest_readings(limit).await?)
                }
            }
        }
    }
}

async fn serve(config: &Config, credentials: &Credentials, bind: Option<String>) -> Result<()> {
    let ctx = build_context(config, credentials)?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let cancel = CancellationToken::new();

    let scheduler = config.server.interval_secs.map(|secs| {
        let cycle_timeout = config.fetch_timeout() + Duration::from_secs(CYCLE_TIMEOUT_GRACE_SECS);
        tokio::spawn(cycle::run_scheduler(
            ctx.clone(),
            Duration::from_secs(secs.max(1)),
            cycle_timeout,
            cancel.clone(),
        ))
    });

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log_info!("Shutdown requested"),
                _ = cancel.cancelled() => {}
            }
            cancel.cancel();
        }
    };

    let result = server::serve(&bind, ctx, shutdown).await;
    cancel.cancel();
    if let Some(handle) = scheduler {
        if let Err(err) = handle.await {
            log_warn!("Scheduler task ended abnormally: {err}");
        }
    }
    result
}

fn sync_agent(config: &Config, credentials: &Credentials) -> Result<SyncAgent> {
    let catalog = Arc::new(config.catalog()?);
    let store = build_store(config, credentials, catalog)?;
    Ok(SyncAgent::new(store)?.with_batch_size(config.sync.batch_size))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}

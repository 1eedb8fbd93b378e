//! MoMo Storefront - storefront and back-office service with mobile-money checkout

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use momo_storefront::config::{Config, StoreBackend};
use momo_storefront::mail::{mailer_from_config, Dispatcher};
use momo_storefront::payments::MomoGateway;
use momo_storefront::services::{accounts, payments};
use momo_storefront::state::{AppState, EventBus};
use momo_storefront::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    config.momo.check()?;

    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().context("DATABASE_URL is required")?;
            let store = PgStore::connect(url, config.database_max_connections).await?;
            sqlx::migrate!("./migrations").run(store.pool()).await?;
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(error) => {
                tracing::warn!(%error, "NATS unavailable, domain events disabled");
                None
            }
        },
        None => None,
    };

    let gateway = MomoGateway::new(config.momo.clone())?;
    let mailer = mailer_from_config(&config.mail)?;
    let port = config.port;
    let state = AppState { config: Arc::new(config), store, payments: Arc::new(gateway), events: EventBus::new(nats) };

    accounts::bootstrap_admin(&state).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(state.store.clone(), mailer, &state.config.mail);
    let workers = [
        tokio::spawn(dispatcher.run(state.config.mail.dispatch_interval, shutdown_rx.clone())),
        tokio::spawn(payments::run_sweeper(state.clone(), shutdown_rx)),
    ];

    let app = momo_storefront::http::router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("MoMo Storefront listening on 0.0.0.0:{port}");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    shutdown_tx.send(true).ok();
    for worker in workers {
        worker.await.ok();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::error!(%error, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}

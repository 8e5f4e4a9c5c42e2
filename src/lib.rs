use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_tungstenite::accept_async;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod access;
pub mod availability;
pub mod config;
pub mod context;
pub mod distribution;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod mentions;
pub mod metrics;
pub mod notifier;
pub mod presence;
pub mod registry;
pub mod routes;
pub mod storage;

use availability::AvailabilityMonitor;
use config::{Config, StorageBackend};
use context::AppContext;
use notifier::{BaseUrlFileProvider, LogNotifier, Notifier, RelayNotifier};
use registry::{ConnectionRegistry, Registry};
use storage::Storage;

pub async fn run_websocket_server(ctx: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to accept socket: {}", e);
                continue;
            }
        };

        let ctx = ctx.clone();

        tokio::spawn(async move {
            if let Ok(ws_stream) = accept_async(socket).await {
                handlers::handle_websocket(ws_stream, addr, ctx).await;
            }
        });
    }
}

pub async fn run_http_server(ctx: AppContext, listener: TcpListener) -> Result<()> {
    let router = routes::create_router(Arc::new(ctx));
    tracing::info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Wires storage, registry, availability monitor and both servers together
pub async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let storage: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = storage::postgres::create_pool(&config.database_url).await?;
            tracing::info!("Connected to database");

            tracing::info!("Applying database migrations...");
            sqlx::migrate!().run(&pool).await?;
            tracing::info!("Database migrations applied");

            Arc::new(storage::postgres::PgStorage::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Running with in-memory storage; nothing will survive a restart");
            Arc::new(storage::memory::MemoryStorage::new())
        }
    };

    let registry: Registry = Arc::new(ConnectionRegistry::new());

    let availability = Arc::new(AvailabilityMonitor::new(
        storage.clone(),
        registry.clone(),
        Duration::from_secs(config.availability_debounce_secs),
        config.fallback_cache_capacity,
        Duration::from_secs(config.fallback_cache_ttl_secs as u64),
    ));
    tokio::spawn(availability.clone().run());

    let notifier: Arc<dyn Notifier> = match &config.mail_relay_url {
        Some(url) => Arc::new(RelayNotifier::new(url.clone(), config.mail_from.clone())),
        None => Arc::new(LogNotifier),
    };

    let files = Arc::new(BaseUrlFileProvider::new(config.file_base_url.clone()));

    let ctx = AppContext::new(
        storage,
        registry,
        notifier,
        files,
        availability,
        config.clone(),
    );

    let ws_listener = TcpListener::bind(format!("0.0.0.0:{}", config.ws_port)).await?;
    tracing::info!("WebSocket server listening on 0.0.0.0:{}", config.ws_port);
    let http_listener = TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;

    let websocket_server = run_websocket_server(ctx.clone(), ws_listener);
    let http_server = run_http_server(ctx, http_listener);

    tokio::select! {
        _ = websocket_server => {
            tracing::info!("WebSocket server shut down.");
        },
        res = http_server => {
            if let Err(e) = res {
                tracing::error!("HTTP server failed: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutdown signal received. Shutting down...");
        }
    }

    Ok(())
}

//! Parrot API server - main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::ServiceExt;
use parrot_api::{
    api::{self, AppState},
    config::Config,
    db::{InMemoryStore, PgStore, Store},
    middleware::{AccessLogWriter, HttpIntrospector},
    observability,
    startup::{wait_until_ready, TokioSleeper},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = match std::env::var("PARROT_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    observability::init("parrot-api", &config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Parrot API");

    // Store
    let store: Arc<dyn Store> = if config.database.is_in_memory() {
        tracing::warn!("Using the in-memory store; data is lost on restart");
        Arc::new(InMemoryStore::new())
    } else {
        let pg = PgStore::connect_lazy(&config.database)?;

        let attempts = wait_until_ready(
            &config.startup.retry_policy(),
            &TokioSleeper,
            || {
                let pg = pg.clone();
                async move {
                    match pg.ping().await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(error = %e, "Database probe failed");
                            false
                        }
                    }
                }
            },
        )
        .await?;
        tracing::info!(attempts, "Connected to database");

        pg.migrate().await?;
        Arc::new(pg)
    };

    let introspector = HttpIntrospector::new(
        &config.auth.url,
        &config.auth.introspection_path,
        config.auth.introspection_timeout,
    )?;
    tracing::info!(endpoint = %introspector.endpoint(), "Token introspection configured");

    let state = AppState::new(store, Arc::new(introspector))
        .with_lookup_timeout(config.database.lookup_timeout);

    let (access_log, access_log_task) =
        AccessLogWriter::spawn(config.server.access_log_capacity);
    let app = api::build_app(state, &config.server.pipeline(), access_log);

    // Start server
    let addr = config.server.bind_addr()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The writer exits once every layer clone holding its sender is gone.
    if let Err(e) = access_log_task.await {
        tracing::warn!(error = %e, "Access log writer ended abnormally");
    }

    observability::shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

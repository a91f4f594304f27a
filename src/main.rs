//! # Kast Ingest - Main Application Entry Point
//!
//! HTTP/WebSocket server that receives live audio recordings, pins them to IPFS
//! and records each upload in SQLite.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment variables)
//! - **state**: Shared collaborators and metrics
//! - **websocket**: One actor per live recording connection (`/ws-record`)
//! - **recording**: Session state, frame demultiplexing, sink, timer, finalization
//! - **pinning / store / identity**: External collaborators behind traits
//! - **health / handlers / middleware**: Monitoring and REST endpoints
//! - **error**: Application error type and HTTP error responses

mod config;
mod error;
mod handlers;
mod health;
mod identity;
mod middleware;
mod pinning;
mod recording;
mod state;
mod store;
mod websocket;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use config::AppConfig;
use identity::HeaderIdentity;
use pinning::PinataClient;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::SqliteStore;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup order:
/// 1. **Configuration** from `.env`, `config.toml` and the environment
/// 2. **Logging** via tracing
/// 3. **Collaborators**: temp directory, pinning client, SQLite store
/// 4. **HTTP server** with middleware and routes
/// 5. **Graceful shutdown** on SIGINT/SIGTERM
///
/// Any failure before the server starts aborts startup with the error.
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting kast-ingest v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    if config.pinning.jwt.is_empty() {
        warn!("No pinning JWT configured (PINATA_JWT); uploads will be rejected by the pinning service");
    }

    std::fs::create_dir_all(&config.recording.temp_dir)
        .with_context(|| format!("creating recording temp dir {}", config.recording.temp_dir))?;

    let pinning = PinataClient::new(&config.pinning)?;
    let store = SqliteStore::connect(&config.database).await?;
    info!(database = %config.database.url, "Metadata store ready");

    let app_state = AppState::new(
        config.clone(),
        Arc::new(pinning),
        Arc::new(store),
        Arc::new(HeaderIdentity::new(config.auth.user_id_header.clone())),
    );
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_state = app_state.clone();

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);
    info!("Live recording WebSocket at ws://{}{}", bind_addr, websocket::RECORDING_PATH);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route(websocket::RECORDING_PATH, web::get().to(websocket::recording_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/uploads/latest", web::get().to(handlers::latest_upload)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            // Open recordings finalize as disconnects; their connections close
            // once the upload result is delivered, which lets the graceful stop finish.
            shutdown_state.begin_shutdown();
            server_handle.stop(true).await;
        }
    }

    let pending = shutdown_state.finalizations.in_flight();
    if pending > 0 {
        info!(pending, "Waiting for in-flight recording uploads");
    }
    if !shutdown_state.finalizations.drain(config.recording.shutdown_drain()).await {
        warn!(
            pending = shutdown_state.finalizations.in_flight(),
            "Shutdown drain timed out, abandoning remaining uploads"
        );
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls filtering; defaults to `kast_ingest=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kast_ingest=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

//! # Speech Session Server - Main Application Entry Point
//!
//! Streams microphone audio from WebSocket clients into an incremental speech
//! decoder and streams partial and final transcripts back.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (config.toml + environment variables)
//! - **transcription**: decoder interface, model readiness gate, engine backends
//! - **audio**: PCM validation, per-connection session state machine, registry
//! - **router**: maps protocol events to session transitions and replies
//! - **websocket**: one actor per connection, the transport for the router
//! - **health / handlers**: HTTP monitoring and configuration endpoints
//! - **error**: HTTP error responses
//!
//! ## Startup Order:
//! 1. Load and validate configuration
//! 2. Verify and load the speech model (refuses to start on failure)
//! 3. Bind the HTTP listener
//!
//! Step 2 needs a decoding backend. Without `--features vosk` none is compiled
//! in and the server exits at startup instead of binding.

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod router;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use crate::state::AppState;
use crate::transcription::readiness;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting speech-session-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}", config.bind_address());

    // Nothing is served until the model is known to be usable.
    let factory = readiness::ensure_ready(&config.model.path, config.frame_format())
        .with_context(|| format!("Speech model at {} is not usable", config.model.path.display()))?;

    let app_state = AppState::new(config.clone(), factory);
    let bind_addr = config.bind_address();

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::speech_websocket))
            .default_service(web::route().to(handlers::not_found))
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
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
            // Graceful stop closes every WebSocket, which releases its decoder.
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured logging to stdout; `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_session_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag on either.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}

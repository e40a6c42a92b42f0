//! # Mock Interview Backend - Main Application Entry Point
//!
//! Voice mock-interview server: a client streams microphone audio over a
//! websocket, the server transcribes it, asks a language model for the
//! interviewer's reply and streams that reply back as text and speech.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared state (configuration, pipeline services, metrics)
//! - **audio**: PCM helpers and windowing of the inbound audio stream
//! - **conversation**: per-session turn history
//! - **pipeline**: transcription, generation and synthesis adapters
//! - **providers**: the OpenAI-compatible HTTP engines behind the adapters
//! - **session**: the per-connection state machine driving the pipeline
//! - **websocket**: the `/ws/audio` endpoint bridging frames to a session
//! - **health** / **handlers**: HTTP endpoints for monitoring and configuration
//! - **middleware**: request logging and metrics
//! - **error**: HTTP error responses

mod audio;
mod config;
mod conversation;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod providers;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::pipeline::PipelineServices;
use crate::providers::OpenAiProvider;
use crate::state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Builds the pipeline services** shared by all interviews
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        base_url = %config.providers.base_url,
        transcription_model = %config.providers.transcription_model,
        chat_model = %config.providers.chat_model,
        speech_model = %config.providers.speech_model,
        "Speech and chat provider configured"
    );
    if config.providers.api_key.is_none() {
        warn!("No provider API key configured; requests are sent unauthenticated");
    }

    // One provider instance backs all three capabilities
    let provider = Arc::new(OpenAiProvider::new(&config.providers)?);
    let services = PipelineServices::new(provider.clone(), provider.clone(), provider);

    let app_state = AppState::new(config.clone(), services);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for responses
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/audio", web::get().to(websocket::interview_websocket))
            .default_service(web::route().to(not_found))
    })
    // Shutdown is driven by `shutdown_signal` below
    .disable_signals()
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
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}

/// Initialize the tracing subscriber.
///
/// ## Environment Variables:
/// - `RUST_LOG`: e.g. `mock_interview_backend=trace`
/// - If not set, defaults to `mock_interview_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mock_interview_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on SIGTERM or SIGINT (Ctrl+C).
///
/// If the Unix handlers can't be installed, Ctrl+C is still honoured.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
}

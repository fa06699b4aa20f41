mod config;
mod errors;
mod extraction;
mod llm_client;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::extraction::normalizer::NativeTextExtractor;
use crate::extraction::pacing::MinIntervalGate;
use crate::extraction::pipeline::{ExtractionService, PipelineOptions};
use crate::extraction::schema::SchemaRegistry;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume API v{}", env!("CARGO_PKG_VERSION"));

    let schemas = SchemaRegistry::default();
    if schemas.get(&config.default_schema).is_none() {
        return Err(anyhow!(
            "DEFAULT_SCHEMA '{}' is not a registered schema",
            config.default_schema
        ));
    }

    // Initialize LLM client
    let llm = LlmClient::new(config.llm_api_url.clone(), config.groq_api_key.clone())?;
    info!(
        "LLM client initialized (model: {}, temperature: {})",
        llm_client::MODEL,
        llm_client::TEMPERATURE
    );

    let gate = MinIntervalGate::new(config.request_delay);
    info!(
        "Completion calls spaced {}s apart, {} attempt(s) per document, payload shape {:?}",
        gate.interval().as_secs(),
        config.max_attempts,
        config.payload_shape
    );

    let extraction = ExtractionService::new(
        Arc::new(llm),
        Arc::new(gate),
        Arc::new(NativeTextExtractor),
        PipelineOptions {
            shape: config.payload_shape,
            max_attempts: config.max_attempts,
        },
    );

    // Build app state
    let state = AppState {
        extraction,
        schemas: Arc::new(schemas),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

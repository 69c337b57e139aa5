//! Chat server in front of a local Ollama instance
//!
//! (c) Softlandia 2025

use tokio_local_llm_chat::api;
use tokio_local_llm_chat::config::ClientConfig;
use tokio_local_llm_chat::core::completion::CompletionService;
use tokio_local_llm_chat::core::controller::ConversationController;
use tokio_local_llm_chat::core::prober::AvailabilityProber;
use tokio_local_llm_chat::core::services::LocalSessionStore;
use tokio_local_llm_chat::infrastructure::database::DatabaseConnection;
use tokio_local_llm_chat::infrastructure::ollama::OllamaClient;
use tokio_local_llm_chat::infrastructure::repositories::SqliteStorage;

use anyhow::anyhow;
use axum::http::{HeaderValue, Method};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(web_server_task())
}

async fn web_server_task() -> anyhow::Result<()> {
    let provider = ServiceCollection::new()
        .add(ClientConfig::singleton())
        .add(DatabaseConnection::singleton())
        .add(SqliteStorage::singleton())
        .add(LocalSessionStore::singleton())
        .add(OllamaClient::singleton())
        .add(AvailabilityProber::singleton())
        .add(ConversationController::singleton())
        .add(CompletionService::singleton())
        .build_provider()
        .map_err(|e| anyhow!("invalid service configuration: {e:?}"))?;

    let config = provider.get_required::<ClientConfig>();
    info!(
        "using Ollama at {} with default model {}",
        config.ollama_host, config.default_model
    );

    // background availability checks
    let shutdown = CancellationToken::new();
    let prober = provider.get_required::<AvailabilityProber>();
    let prober_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let interval = config.probe_interval;
        async move { prober.run(interval, shutdown).await }
    });

    let app = api::router()
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_headers(Any)
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::PATCH,
                        Method::DELETE,
                    ])
                    .allow_origin([
                        HeaderValue::from_static("http://localhost:3000"),
                        HeaderValue::from_static("http://localhost:5173"),
                    ]),
            ),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutting down...");

    shutdown.cancel();
    prober_handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

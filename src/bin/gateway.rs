//! Gateway entry point: wire the pipeline together and serve.

use std::net::SocketAddr;
use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sentinel_gateway::access::AccessControl;
use sentinel_gateway::cache::InMemoryExampleStore;
use sentinel_gateway::config::GatewayConfig;
use sentinel_gateway::gateway::{router, AppState};
use sentinel_gateway::oracle::OpenAiOracle;
use sentinel_gateway::pipeline::Gatekeeper;
use sentinel_gateway::reasoner::OpenAiReasoner;
use sentinel_gateway::window::ContextWindow;

#[tokio::main]
async fn main() -> sentinel_gateway::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::from_env()?,
    };

    let client = Client::<OpenAIConfig>::new();
    let access = Arc::new(AccessControl::new());
    let gatekeeper = Arc::new(Gatekeeper::new(
        access.clone(),
        Arc::new(OpenAiOracle::new(client.clone(), config.oracle_model.clone())),
        Arc::new(OpenAiReasoner::new(
            client,
            config.reasoner_model.clone(),
            ContextWindow::new(config.window.clone()),
        )),
        Arc::new(InMemoryExampleStore::new()),
        config.retry,
        config.few_shot_k,
    ));
    let state = AppState {
        gatekeeper,
        access,
        http: reqwest::Client::new(),
        config: config.clone(),
    };

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, upstream = %config.upstream_url, "gateway listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

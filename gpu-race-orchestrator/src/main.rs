use anyhow::Context;
use gpu_race_orchestrator::config::{self, RaceConfig};
use gpu_race_orchestrator::engine::RaceEngine;
use gpu_race_orchestrator::provider_manager::ProviderManager;
use gpu_race_orchestrator::routes::{create_router, AppState};
use gpu_race_providers::ProvisioningClient;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = RaceConfig::from_env();
    info!("⚙️ Race config: {:?}", config);

    let provider_name = ProviderManager::current_provider_name();
    let provider = ProviderManager::get_provider(&provider_name).with_context(|| {
        format!(
            "provider '{}' unavailable (unknown, disabled, or missing GPU_API_URL / token)",
            provider_name
        )
    })?;
    info!("🔌 Provider: {}", provider_name);

    let client = ProvisioningClient::new(provider, config.request_timeout);
    let state = Arc::new(AppState {
        engine: RaceEngine::new(client, config),
    });
    let app = create_router(state.clone());

    let addr = config::listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("🚀 Race orchestrator listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Unfinished races must not leave billed instances behind.
    state.engine.cancel_race().await;
    info!("👋 Race orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("🛑 Shutdown requested");
}

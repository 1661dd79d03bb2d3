use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use personaflow::dashboard::{create_router, AppState};
use personaflow::tracing::{init_tracing, shutdown_tracing};
use personaflow::{EngineConfig, LanguageModel, LlmArchitect, OllamaClient, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;

    init_tracing("personaflow", config.otlp_endpoint.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let llm: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(
        config.llm_url.clone(),
        config.model.clone(),
        config.llm_timeout,
    ));
    // Report generation gets its own, longer deadline
    let report_llm: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(
        config.llm_url.clone(),
        config.model.clone(),
        config.synthesis_timeout,
    ));
    let architect = Arc::new(LlmArchitect::new(report_llm));

    let bind_addr = config.bind_addr;
    info!(
        llm_url = %config.llm_url,
        model = %config.model,
        max_steps = config.max_steps,
        "Starting PersonaFlow engine"
    );
    let manager = Arc::new(SessionManager::new(llm, architect, config));
    let router = create_router(AppState { manager });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    shutdown_tracing();
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use imagegen_fanout::{
    config::Config,
    history::HistoryRecorder,
    orchestrator::FanOut,
    poller::JobPoller,
    prompt::{PromptCompositor, PromptGenerator},
    providers::{OpenAiProvider, ProdiaProvider, StabilityProvider},
    rate_limit::ClientLimiter,
    routes::{self, AppState},
    storage::{ImageStore, JsonFileHistoryStore},
};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let client = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let images = ImageStore::new(config.generated_dir.clone(), config.api_host.clone());
    let history = Arc::new(JsonFileHistoryStore::new(config.history_dir.clone()));
    let shutdown = CancellationToken::new();

    let openai = Arc::new(OpenAiProvider::new(
        client.clone(),
        config.openai_token.clone(),
        config.openai_base_url.clone(),
        images.clone(),
    ));
    let stability = Arc::new(StabilityProvider::new(
        client.clone(),
        config.stability_key.clone(),
        config.stability_base_url.clone(),
        images.clone(),
    ));
    let prodia = Arc::new(ProdiaProvider::new(
        client,
        config.prodia_key.clone(),
        config.prodia_base_url.clone(),
        images,
        JobPoller::new(config.poll_interval, config.poll_max_attempts),
    ));

    let fan_out = FanOut::new(HistoryRecorder::new(history.clone()), shutdown.clone())
        .with_generator(stability.clone())
        .with_generator(openai.clone())
        .with_generator(prodia.clone())
        .with_editor(stability)
        .with_editor(prodia);
    let prompt_generator: Arc<dyn PromptGenerator> = openai;
    let state = AppState {
        fan_out: Arc::new(fan_out),
        compositor: PromptCompositor::new(Some(prompt_generator)),
        histories: history,
        shutdown: shutdown.clone(),
    };

    let limiter = ClientLimiter::new(&config.rate_limit);
    let pruner = limiter.spawn_pruner(shutdown.clone());
    let app = routes::router(state, &config, limiter);

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(
        address = %bind_address,
        api_host = %config.api_host,
        generated_dir = %config.generated_dir.display(),
        "imagegen-fanout listening"
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let serve_token = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { serve_token.cancelled().await })
        .await?;

    shutdown.cancel();
    pruner.await.ok();
    tracing::info!("imagegen-fanout stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}

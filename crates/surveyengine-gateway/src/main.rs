use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod error;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surveyengine_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("SURVEY_CONFIG").ok();
    let config = surveyengine_core::config::SurveyConfig::load(config_path.as_deref())?;

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let checkpoint_ttl = config.checkpoint.ttl_secs;

    let state = Arc::new(app::AppState::new(config)?);

    let sweep_store = state.checkpoint_store.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        surveyengine_checkpoint::run_ttl_sweep(sweep_store, checkpoint_ttl, shutdown_rx).await;
    });

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, cancelling in-flight survey turns");
        let _ = shutdown_tx.send(true);
        shutdown_state.cancel_all_operations();
    };

    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("survey engine gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal).await?;

    Ok(())
}

use clinic_frontend::config::get_configuration;
use clinic_frontend::services::billing_client::HttpBillingClient;
use clinic_frontend::startup::build_router;
use clinic_frontend::AppState;
use dotenvy::dotenv;
use service_core::observability::logging::init_tracing;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        "clinic-frontend",
        &configuration.telemetry.log_level,
        configuration.telemetry.otlp_endpoint.as_deref(),
    );

    clinic_frontend::services::metrics::init_metrics();

    let billing_client = HttpBillingClient::new(configuration.billing_service.clone())
        .map_err(|e| anyhow::anyhow!("Failed to build billing client: {}", e))?;
    let policy = configuration
        .settlement
        .poll_policy()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    info!(
        interval_secs = policy.interval.as_secs(),
        max_polls = policy.max_polls,
        "Gateway status polling configured"
    );

    let state = AppState::new(Arc::new(billing_client), policy);
    let eviction = configuration.settlement.eviction();
    info!(
        idle_timeout_secs = eviction.idle_timeout.as_secs(),
        finished_ttl_secs = eviction.finished_ttl.as_secs(),
        "Settlement dialog eviction configured"
    );
    let _sweeper = state.sessions.spawn_sweeper(eviction);

    let app = build_router(state);

    let address = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting clinic-frontend on {}", address);
    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}

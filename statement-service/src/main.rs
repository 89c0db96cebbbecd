use service_core::observability::init_tracing;
use statement_service::config::StatementConfig;
use statement_service::services::metrics::init_metrics;
use statement_service::Application;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Register metrics before anything records into them
    init_metrics();

    let config = StatementConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        environment = ?config.environment,
        version = %config.service_version,
        "Starting statement-service"
    );

    let application = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    application.run_until_stopped().await
}

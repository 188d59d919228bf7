use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use FeedInfra::config::loader::AppConfig;
use FeedInfra::feed::repository::PriceRepository;
use FeedInfra::feed::simulation::SimulationEngine;
use FeedInfra::feed::supervisor::ConnectionSupervisor;
use FeedInfra::observability::metrics::register_metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    register_metrics();

    let env = std::env::var("FEEDINFRA_ENV").unwrap_or_else(|_| "default".to_string());
    let config = AppConfig::load(&env)?;

    let repository = Arc::new(PriceRepository::new());
    repository.on_significant_change(|event| {
        tracing::info!(
            "Significant move on {}: {} -> {} ({:+.2}%)",
            event.symbol,
            event.previous_price.unwrap_or(event.price),
            event.price,
            event.percent_change,
        );
    });

    let simulation = Arc::new(SimulationEngine::new(
        repository.clone(),
        config.simulation.clone(),
    ));
    let supervisor = ConnectionSupervisor::with_live_connector(
        config.feed.clone(),
        config.proxy.clone(),
        repository.clone(),
        simulation.clone(),
    );

    if config.feed.enabled {
        supervisor.start()?;
        tracing::info!(
            "Price feed supervisor started for {} symbols",
            config.feed.symbols.len()
        );
    } else {
        tracing::warn!("Live feed disabled by configuration, serving simulated data only");
        simulation.start(Vec::new());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    supervisor.stop().await;
    simulation.stop();

    Ok(())
}

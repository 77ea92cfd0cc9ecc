use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use orderflow_api::app::{self, services};
use orderflow_infra::Settings;
use orderflow_infra::store::{DirectorySeed, InMemoryDirectory};
use orderflow_observability::LogOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;

    orderflow_observability::tracing::init(&LogOptions {
        filter: settings.log.filter.clone(),
        json: settings.log.json,
    });

    let seed = match &settings.seed_file {
        Some(path) => DirectorySeed::load(path).context("failed to load seed file")?,
        None => {
            warn!("no seed_file configured; customer and product lookups start empty");
            DirectorySeed::default()
        }
    };
    info!(
        customers = seed.customers.len(),
        products = seed.products.len(),
        "lookups seeded"
    );
    let directory = Arc::new(InMemoryDirectory::from_seed(seed)?);

    let services = Arc::new(
        services::build_services(&settings, directory).context("failed to start consumer workers")?,
    );

    let app = app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&settings.http.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.http.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tokio::task::spawn_blocking(move || services.shutdown())
        .await
        .context("worker shutdown failed")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

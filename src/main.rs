use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;

use tracing::{info, warn};

use webproxy::{AppConfig, Logger, ProxyApplicationServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and maintain the sentry connection
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    // metrics are nice to have, the proxy works fine without them
    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("prometheus recorder not installed: {}", e);
            None
        }
    };

    info!("starting proxy server on port {}...", config.port);

    ProxyApplicationServer::serve(config, metrics)
        .await
        .context("proxy server failed to start")?;

    Ok(())
}

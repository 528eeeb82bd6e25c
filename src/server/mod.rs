pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::AppConfig;
use api::{
    health_controller::HealthController, proxy_controller::ProxyController,
    search_controller::SearchController, youtube_controller::YoutubeController,
};
use error::{AppResult, Error};
use services::proxy_services::ProxyServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 302 to a location inside the proxy, every redirect the proxy issues goes through here
pub fn found(location: &str) -> AppResult<Response> {
    let value = HeaderValue::from_str(location).map_err(|e| {
        warn!("Refusing to redirect to {}: {}", location, e);
        Error::BadRequest("Invalid redirect target".to_string())
    })?;

    Ok((StatusCode::FOUND, [(header::LOCATION, value)]).into_response())
}

pub struct ProxyApplicationServer;

impl ProxyApplicationServer {
    /// full router with every layer applied, tests drive this directly
    pub fn router(services: ProxyServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);

        Router::new()
            .merge(HealthController::app())
            .merge(ProxyController::app())
            .merge(SearchController::app())
            .merge(YoutubeController::app())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(Extension(services))
    }

    pub async fn serve(
        config: Arc<AppConfig>,
        metrics: Option<PrometheusHandle>,
    ) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = ProxyServices::new(config.clone(), metrics)
            .context("failed to build proxy services")?;

        info!("services ok, binding listener...");

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!("listening on {}", addr);

        axum::serve(listener, Self::router(services))
            .with_graceful_shutdown(Self::shutdown_signal())
            .await
            .context("error while serving requests")?;

        Ok(())
    }

    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

        if cors_origin.trim() == "*" {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Skipping invalid cors origin {}: {}", o, e);
                    None
                }
            })
            .collect();

        layer.allow_origin(AllowOrigin::list(origins))
    }

    async fn shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received, draining connections");
    }
}

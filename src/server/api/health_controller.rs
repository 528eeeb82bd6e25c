use axum::{Extension, Json, Router, routing::get};
use chrono::Utc;

use crate::logger::Logger;
use crate::server::dtos::status_dto::{IndexResponse, StatusResponse};
use crate::server::error::{AppResult, Error};
use crate::server::services::ProxyServices;
use crate::server::{get_app_version, get_uptime_seconds};

pub struct HealthController;

impl HealthController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::index))
            .route("/status", get(Self::status))
            .route("/metrics", get(Self::metrics))
    }

    async fn index() -> Json<IndexResponse> {
        Json(IndexResponse::default())
    }

    /// liveness only, nothing upstream is checked
    async fn status(Extension(services): Extension<ProxyServices>) -> Json<StatusResponse> {
        Json(StatusResponse {
            status: "online".to_string(),
            timestamp: Utc::now(),
            uptime_seconds: get_uptime_seconds(),
            version: get_app_version().to_string(),
            environment: Logger::environment_name(services.config.cargo_env).to_string(),
        })
    }

    async fn metrics(Extension(services): Extension<ProxyServices>) -> AppResult<String> {
        services
            .metrics
            .as_ref()
            .map(|handle| handle.render())
            .ok_or_else(|| Error::NotFound("Metrics recorder not installed".to_string()))
    }
}

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::config::AppConfig;

use super::fetch_services::{DynFetchService, FetchService};

/// everything a handler needs, cloned into each request through an extension. Nothing in here
/// is mutated after startup
#[derive(Clone)]
pub struct ProxyServices {
    pub fetcher: DynFetchService,
    pub config: Arc<AppConfig>,
    pub metrics: Option<PrometheusHandle>,
}

impl ProxyServices {
    pub fn new(config: Arc<AppConfig>, metrics: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        info!("starting proxy services...");

        let fetcher = Arc::new(FetchService::new(config.clone())?) as DynFetchService;

        info!("fetch service ok");

        Ok(Self {
            fetcher,
            config,
            metrics,
        })
    }

    /// swap the fetcher, handler tests use this with a mock
    pub fn with_fetcher(config: Arc<AppConfig>, fetcher: DynFetchService) -> Self {
        Self {
            fetcher,
            config,
            metrics: None,
        }
    }
}

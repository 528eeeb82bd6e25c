use axum::{
    Extension, Form, Router,
    extract::{Query, rejection::FormRejection},
    response::Response,
    routing::get,
};
use tracing::{debug, error, info};

use crate::server::{
    error::AppResult,
    found,
    services::ProxyServices,
    utils::{
        form_utils::{self, ORIGIN_FIELD, QUERY_FIELD, SEARCH_ENDPOINT},
        url_utils, youtube_utils,
    },
};

type Params = Vec<(String, String)>;

pub struct SearchController;

impl SearchController {
    pub fn app() -> Router {
        Router::new().route(
            SEARCH_ENDPOINT,
            get(Self::search_get).post(Self::search_post),
        )
    }

    async fn search_get(
        Extension(services): Extension<ProxyServices>,
        Query(params): Query<Params>,
    ) -> AppResult<Response> {
        Self::search(&services, &params)
    }

    async fn search_post(
        Extension(services): Extension<ProxyServices>,
        form: Result<Form<Params>, FormRejection>,
    ) -> AppResult<Response> {
        // an unreadable body searches for nothing, same as a form with an empty box
        let fields = match form {
            Ok(Form(fields)) => fields,
            Err(e) => {
                debug!("POST /search without a readable form body: {}", e);
                Vec::new()
            }
        };
        Self::search(&services, &fields)
    }

    /// queries starting with the trigger word, or posted from a youtube page, search youtube.
    /// Everything else goes to the configured search engine
    fn search(services: &ProxyServices, fields: &[(String, String)]) -> AppResult<Response> {
        let query = form_utils::field(fields, QUERY_FIELD).unwrap_or_default();
        let from_youtube =
            form_utils::field(fields, ORIGIN_FIELD).is_some_and(|u| u.contains("youtube.com"));

        let youtube_query = match youtube_utils::strip_search_trigger(query) {
            Some(stripped) => Some(stripped),
            None if from_youtube => Some(query.trim().to_string()),
            None => None,
        };

        if let Some(youtube_query) = youtube_query {
            info!("YouTube search for '{}'", youtube_query);
            return found(&url_utils::proxy_url(&youtube_utils::search_url(
                &youtube_query,
            )));
        }

        let home = &services.config.search_engine_home;
        match form_utils::search_engine_url(home, query, fields) {
            Ok(search_url) => {
                info!("Search for '{}' -> {}", query, search_url);
                found(&url_utils::proxy_url(&search_url))
            }
            Err(e) => {
                error!("Failed to build search url from {}: {}", home, e);
                found(&url_utils::proxy_url(home))
            }
        }
    }
}

// the embedded player plus the youtube paths browsers hit directly against the proxy
use axum::{
    Router,
    extract::{Path, Query, RawQuery},
    response::{Html, Response},
    routing::get,
};
use tracing::{debug, info};

use crate::server::{
    error::{AppResult, Error},
    found,
    utils::{form_utils, url_utils, youtube_utils},
};

type Params = Vec<(String, String)>;

pub struct YoutubeController;

impl YoutubeController {
    pub fn app() -> Router {
        Router::new()
            .route("/youtube", get(Self::player))
            .route("/results", get(Self::results))
            .route("/watch", get(Self::watch))
            .route("/{*path}", get(Self::catchall))
    }

    async fn player(Query(params): Query<Params>) -> AppResult<Html<String>> {
        let video_id = form_utils::field(&params, "v").ok_or_else(|| {
            Error::MissingParameter("No YouTube video ID provided".to_string())
        })?;

        let mut options = youtube_utils::EmbedOptions::new(video_id);
        if let Some(autoplay) = form_utils::field(&params, "autoplay") {
            options.autoplay = autoplay.to_string();
        }
        options.start = form_utils::field(&params, "t")
            .or_else(|| form_utils::field(&params, "start"))
            .map(str::to_string);
        options.list = form_utils::field(&params, "list").map(str::to_string);

        debug!("Rendering player for {}", options.embed_url());
        Ok(Html(youtube_utils::render_player_page(&options)))
    }

    async fn results(Query(params): Query<Params>) -> AppResult<Response> {
        let query = form_utils::field(&params, "search_query").ok_or_else(|| {
            Error::MissingParameter("Missing search query parameter".to_string())
        })?;

        let search_url = youtube_utils::search_url(query);
        info!("Redirecting YouTube results to {}", search_url);
        found(&url_utils::proxy_url(&search_url))
    }

    async fn watch(Query(params): Query<Params>) -> AppResult<Response> {
        let video_id = form_utils::field(&params, "v")
            .ok_or_else(|| Error::MissingParameter("Missing video ID parameter".to_string()))?;

        found(&format!("/youtube?v={}", urlencoding::encode(video_id)))
    }

    async fn catchall(Path(path): Path<String>, RawQuery(query): RawQuery) -> AppResult<Response> {
        match youtube_utils::catchall_url(&path, query.as_deref()) {
            Some(youtube_url) => {
                info!("Catching YouTube path {} -> {}", path, youtube_url);
                found(&url_utils::proxy_url(&youtube_url))
            }
            None => Err(Error::NotFound(format!("Path not found: {}", path))),
        }
    }
}

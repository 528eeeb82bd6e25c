use axum::extract::{FromRequestParts, Query};
use axum::http::header::RANGE;
use axum::http::request::Parts;
use serde::Deserialize;
use tracing::debug;

use crate::server::error::Error;
use crate::server::utils::url_utils::ResolvedUrl;

pub const NO_URL_PROVIDED: &str = "No URL provided";

#[derive(Deserialize)]
struct TargetUrlQuery {
    url: Option<String>,
}

/// the absolute `url` query parameter every resource fetch needs, together with the inbound
/// `Range` header that has to reach the origin untouched
pub struct TargetUrl {
    pub url: ResolvedUrl,
    pub range: Option<String>,
}

impl<S> FromRequestParts<S> for TargetUrl
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // a query that doesn't even deserialize has no usable url in it either
        let Query(query): Query<TargetUrlQuery> = Query::from_request_parts(parts, state)
            .await
            .unwrap_or(Query(TargetUrlQuery { url: None }));

        let raw = query
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::MissingParameter(NO_URL_PROVIDED.to_string()))?;

        let url = ResolvedUrl::parse(&raw).map_err(|e| {
            debug!("Rejecting target {}: {}", raw, e);
            Error::BadRequest("Invalid URL format".to_string())
        })?;

        let range = parts
            .headers
            .get(RANGE)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        Ok(TargetUrl { url, range })
    }
}

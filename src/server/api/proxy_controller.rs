// the two proxy entry points: pages get rewritten, resources get passed through or streamed
use axum::{
    Extension, Form, Router,
    body::Bytes,
    extract::{Query, RawQuery, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, error, info, warn};
use url::{Url, form_urlencoded};

use crate::server::{
    error::{AppResult, Error},
    extractors::{NO_URL_PROVIDED, TargetUrl},
    found,
    services::{
        ProxyServices,
        fetch_services::{FetchRequest, FetchedResource, ResourceBody},
        stream_services,
    },
    utils::{
        form_utils::{self, ORIGIN_FIELD, QUERY_FIELD, SEARCH_ENDPOINT},
        rewrite_utils::{RewriteContext, rewrite_document},
        url_utils::{self, PROXY_PATH, RESOURCE_PATH, ResolvedUrl},
        youtube_utils,
    },
};

type Params = Vec<(String, String)>;

const GOOGLE_SEARCH_URL: &str = "https://www.google.com/search";
const YOUTUBE_QUERY_FIELD: &str = "search_query";

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new()
            .route(PROXY_PATH, get(Self::proxy_get).post(Self::proxy_post))
            .route(RESOURCE_PATH, get(Self::proxy_resource))
    }

    /// tack extra pairs onto a url that may or may not carry a query already
    fn append_query<'a>(
        target: &str,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for (key, value) in pairs {
            serializer.append_pair(key, value);
            any = true;
        }

        if !any {
            return target.to_string();
        }

        let separator = if target.contains('?') { '&' } else { '?' };
        format!("{}{}{}", target, separator, serializer.finish())
    }

    /// collapse a `/proxy?url=/proxy?url=...` chain into one hop
    fn redirect_unwrapped(target: &str) -> AppResult<Response> {
        let unwrapped = url_utils::unwrap_nested(target).ok_or_else(|| {
            warn!("Nested proxy url without an embedded target: {}", target);
            Error::MalformedNestedUrl
        })?;

        info!("Collapsing nested proxy url into {}", unwrapped);
        found(&url_utils::proxy_url(&unwrapped))
    }

    /// watch pages never go through generic rewriting, they get the embedded player instead
    fn watch_redirect(target: &str) -> Option<AppResult<Response>> {
        youtube_utils::watch_video_id(target).map(|id| {
            debug!("Watch url {} handed to the player", target);
            found(&format!("/youtube?v={}", urlencoding::encode(&id)))
        })
    }

    fn validate(target: &str) -> AppResult<ResolvedUrl> {
        ResolvedUrl::parse(target).map_err(|e| {
            debug!("Rejecting target {}: {}", target, e);
            Error::BadRequest("Invalid URL format".to_string())
        })
    }

    async fn proxy_get(
        Extension(services): Extension<ProxyServices>,
        RawQuery(raw_query): RawQuery,
        Query(params): Query<Params>,
    ) -> AppResult<Response> {
        let Some(target) = form_utils::field(&params, ORIGIN_FIELD) else {
            // a search box that lost its action ends up here with only a query
            if form_utils::field(&params, QUERY_FIELD).is_some() {
                let query = raw_query.unwrap_or_default();
                return found(&format!("{}?{}", SEARCH_ENDPOINT, query));
            }
            return Err(Error::MissingParameter(NO_URL_PROVIDED.to_string()));
        };

        if url_utils::is_nested_proxy_url(target) {
            return Self::redirect_unwrapped(target);
        }

        if let Some(redirect) = Self::watch_redirect(target) {
            return redirect;
        }

        // a GET form rewritten by us submits its fields next to `url`, they belong to the target
        let extras = params
            .iter()
            .filter(|(key, _)| key != ORIGIN_FIELD)
            .map(|(key, value)| (key.as_str(), value.as_str()));
        let target = Self::append_query(target, extras);

        let target = Self::validate(&target)?;
        Ok(Self::render_page(&services, FetchRequest::page(target.as_str())).await)
    }

    async fn proxy_post(
        Extension(services): Extension<ProxyServices>,
        Query(params): Query<Params>,
        form: Result<Form<Params>, FormRejection>,
    ) -> AppResult<Response> {
        let fields = match form {
            Ok(Form(fields)) => fields,
            Err(e) => {
                debug!("POST /proxy without a readable form body: {}", e);
                Vec::new()
            }
        };

        if let Some(origin) = form_utils::field(&fields, ORIGIN_FIELD) {
            return Self::redirect_form_submission(origin, &fields);
        }

        let Some(target) = form_utils::field(&params, ORIGIN_FIELD) else {
            return Err(Error::MissingParameter(NO_URL_PROVIDED.to_string()));
        };

        if url_utils::is_nested_proxy_url(target) {
            return Self::redirect_unwrapped(target);
        }

        if let Some(redirect) = Self::watch_redirect(target) {
            return redirect;
        }

        let target = Self::validate(target)?;
        info!("Forwarding form POST to {}", target);
        Ok(Self::render_page(&services, FetchRequest::page_post(target.as_str(), fields)).await)
    }

    /// a form posted back to us with its origin in `url`: turn the submission into the url the
    /// site would have navigated to and send the browser there through the proxy
    fn redirect_form_submission(origin: &str, fields: &[(String, String)]) -> AppResult<Response> {
        let origin = if url_utils::is_nested_proxy_url(origin) {
            url_utils::unwrap_nested(origin).ok_or(Error::MalformedNestedUrl)?
        } else {
            origin.to_string()
        };

        let rest = || {
            fields
                .iter()
                .filter(|(key, _)| key != ORIGIN_FIELD)
                .map(|(key, value)| (key.as_str(), value.as_str()))
        };

        let target = if origin.contains("google.com/search") || origin.contains("/search") {
            match form_utils::field(fields, QUERY_FIELD) {
                Some(query) => Self::append_query(
                    GOOGLE_SEARCH_URL,
                    std::iter::once((QUERY_FIELD, query)).chain(
                        rest().filter(|(key, value)| *key != QUERY_FIELD && !value.is_empty()),
                    ),
                ),
                None => Self::append_query(&origin, rest()),
            }
        } else if origin.contains("youtube.com/results") || origin.contains("/results") {
            match form_utils::field(fields, YOUTUBE_QUERY_FIELD) {
                Some(query) => youtube_utils::search_url(query),
                None => Self::append_query(&origin, rest()),
            }
        } else {
            Self::append_query(&origin, rest())
        };

        debug!("Form submission from {} redirected to {}", origin, target);
        found(&url_utils::proxy_url(&target))
    }

    /// fetch failures on a page become a small html page naming the site
    async fn render_page(services: &ProxyServices, request: FetchRequest) -> Response {
        let url = request.url.clone();

        match Self::fetch_and_rewrite(services, request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error proxying {}: {}", url, e);
                e.into_html_page(&url)
            }
        }
    }

    async fn fetch_and_rewrite(
        services: &ProxyServices,
        request: FetchRequest,
    ) -> AppResult<Response> {
        let FetchedResource {
            status,
            headers,
            final_url,
            body,
        } = services.fetcher.fetch(request).await?;

        match body {
            ResourceBody::Html(text) => {
                let base = Url::parse(&final_url).map_err(|e| {
                    error!("Upstream answered from an unparsable url {}: {}", final_url, e);
                    Error::InternalServerError
                })?;
                let ctx = RewriteContext::new(base);

                let rewritten = rewrite_document(&text, &ctx).map_err(|e| {
                    error!("Failed to rewrite {}: {}", final_url, e);
                    Error::InternalServerErrorWithContext(format!(
                        "Failed to rewrite document: {}",
                        e
                    ))
                })?;

                debug!(
                    "Rewrote {} ({} -> {} bytes, video site: {})",
                    final_url,
                    text.len(),
                    rewritten.len(),
                    ctx.video_site
                );

                Ok((
                    status,
                    [(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("text/html; charset=utf-8"),
                    )],
                    rewritten,
                )
                    .into_response())
            }
            ResourceBody::Buffered(bytes) => Ok(Self::passthrough(status, &headers, bytes)),
            ResourceBody::Stream(chunks) => {
                Ok(stream_services::relay(chunks, &headers, status, final_url))
            }
        }
    }

    fn passthrough(status: StatusCode, upstream: &HeaderMap, bytes: Bytes) -> Response {
        let content_type = upstream
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

        (status, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
    }

    /// resources keep json errors, the browser is not going to render them anyway
    async fn proxy_resource(
        Extension(services): Extension<ProxyServices>,
        TargetUrl { url, range }: TargetUrl,
    ) -> AppResult<Response> {
        let FetchedResource {
            status,
            headers,
            final_url,
            body,
        } = services
            .fetcher
            .fetch(FetchRequest::resource(url.as_str(), range))
            .await?;

        match body {
            ResourceBody::Stream(chunks) => {
                Ok(stream_services::relay(chunks, &headers, status, final_url))
            }
            ResourceBody::Buffered(bytes) => Ok(Self::passthrough(StatusCode::OK, &headers, bytes)),
            ResourceBody::Html(text) => Ok(Self::passthrough(
                StatusCode::OK,
                &headers,
                Bytes::from(text),
            )),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode, header},
};
use encoding_rs::{Encoding, UTF_8};
use futures::{StreamExt, stream::BoxStream};
use mockall::automock;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        utils::{
            header_utils::{BROWSER_HEADERS, HeaderOverlay},
            url_utils::ResolvedUrl,
            youtube_utils,
        },
    },
};

pub type DynFetchService = Arc<dyn FetchServiceTrait + Send + Sync>;

/// lazily pulled upstream body, dropping it releases the upstream connection
pub type ChunkStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// content types that are always streamed, matched as case-insensitive substrings
pub const VIDEO_CONTENT_TYPES: [&str; 7] = [
    "video/mp4",
    "video/webm",
    "video/ogg",
    "application/x-mpegurl",
    "video/x-matroska",
    "video/quicktime",
    "application/dash+xml",
];

static CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*["']?([^"';\s]+)"#).expect("Static regex should compile")
});

/// decode a page with the charset its content type declares, utf-8 when there is none or the
/// label is unknown. A byte order mark wins over both
pub fn decode_text(bytes: &[u8], content_type: &str) -> String {
    let label = CHARSET
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());

    let encoding = match label {
        Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            warn!("Unknown charset {}, decoding as utf-8", label);
            UTF_8
        }),
        None => UTF_8,
    };

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Malformed {} sequences replaced while decoding", used.name());
    }
    text.into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// html is expected and will be rewritten
    Page,
    /// images, scripts, styles and video, passed through or streamed
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// buffered, decoded and rewritten
    Html,
    /// relayed lazily
    Stream,
    /// buffered and passed through
    Binary,
}

impl ContentKind {
    /// video and manifests always stream, and so does any resource the client asked a byte
    /// range of so the origin's partial response reaches it intact
    pub fn classify(content_type: &str, purpose: FetchPurpose, ranged: bool) -> Self {
        let content_type = content_type.to_ascii_lowercase();

        if VIDEO_CONTENT_TYPES.iter().any(|v| content_type.contains(v)) {
            return Self::Stream;
        }

        match purpose {
            FetchPurpose::Page if content_type.contains("text/html") => Self::Html,
            FetchPurpose::Resource if ranged => Self::Stream,
            _ => Self::Binary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub purpose: FetchPurpose,
    /// present means POST with a form-encoded body
    pub form: Option<Vec<(String, String)>>,
    /// inbound `Range`, forwarded verbatim on resource fetches
    pub range: Option<String>,
}

impl FetchRequest {
    pub fn page(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            purpose: FetchPurpose::Page,
            form: None,
            range: None,
        }
    }

    pub fn page_post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            form: Some(form),
            ..Self::page(url)
        }
    }

    pub fn resource(url: impl Into<String>, range: Option<String>) -> Self {
        Self {
            url: url.into(),
            purpose: FetchPurpose::Resource,
            form: None,
            range,
        }
    }
}

pub enum ResourceBody {
    /// decoded html, handed to the document rewriter
    Html(String),
    /// anything else that was small enough to buffer
    Buffered(Bytes),
    /// video and manifests, handed to the stream relay
    Stream(ChunkStream),
}

pub struct FetchedResource {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// after redirects, rewriting resolves against this
    pub final_url: String,
    pub body: ResourceBody,
}

impl FetchedResource {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

#[automock]
#[async_trait]
pub trait FetchServiceTrait {
    /// one upstream attempt, no retries
    async fn fetch(&self, request: FetchRequest) -> AppResult<FetchedResource>;
}

pub struct FetchService {
    http: reqwest::Client,
    config: Arc<AppConfig>,
}

impl FetchService {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        // gzip and zstd are negotiated and undone by the client, for buffered and streamed
        // bodies alike
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            // a stalled stream is dropped after this long without a byte
            .read_timeout(Duration::from_secs(config.stream_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { http, config })
    }

    fn request_headers(&self, request: &FetchRequest) -> HeaderMap {
        match request.purpose {
            FetchPurpose::Page => HeaderOverlay::new()
                .with(header::REFERER, self.config.search_engine_home.clone())
                .apply(&BROWSER_HEADERS),
            FetchPurpose::Resource => {
                let is_youtube = ResolvedUrl::parse(&request.url)
                    .map(|u| youtube_utils::is_youtube_host(u.host()))
                    .unwrap_or(false);

                let overlay = HeaderOverlay::new()
                    .with(header::ACCEPT_ENCODING, "identity")
                    .with_opt(header::RANGE, request.range.clone());

                let overlay = if is_youtube {
                    overlay
                        .with(header::REFERER, youtube_utils::YOUTUBE_REFERER)
                        .with(header::ORIGIN, youtube_utils::YOUTUBE_ORIGIN)
                } else {
                    overlay
                };

                overlay.apply(&BROWSER_HEADERS)
            }
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.resource_timeout_secs)
    }

    async fn read_buffered(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> AppResult<Bytes> {
        let bytes = tokio::time::timeout(self.timeout(), response.bytes())
            .await
            .map_err(|_| Error::upstream(url, "timed out reading the response body"))?
            .map_err(|e| {
                error!("Failed to read response from {}: {}", url, e);
                Error::upstream(url, e)
            })?;

        debug!("Read {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }

    fn record(purpose: FetchPurpose, outcome: &'static str) {
        let kind = match purpose {
            FetchPurpose::Page => "page",
            FetchPurpose::Resource => "resource",
        };
        metrics::counter!("proxy_fetch_total", "kind" => kind, "outcome" => outcome).increment(1);
    }
}

#[async_trait]
impl FetchServiceTrait for FetchService {
    async fn fetch(&self, request: FetchRequest) -> AppResult<FetchedResource> {
        let url = request.url.clone();
        let headers = self.request_headers(&request);

        let builder = match &request.form {
            Some(form) => {
                info!("POST {} ({} fields)", url, form.len());
                self.http.post(&url).headers(headers).form(form)
            }
            None => {
                debug!("GET {} (range: {:?})", url, request.range);
                self.http.get(&url).headers(headers)
            }
        };

        let response = match tokio::time::timeout(self.timeout(), builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("Request to {} failed: {}", url, e);
                Self::record(request.purpose, "error");
                return Err(Error::upstream(url, e));
            }
            Err(_) => {
                error!("Request to {} timed out", url);
                Self::record(request.purpose, "timeout");
                return Err(Error::upstream(
                    url,
                    format!("timed out after {}s", self.config.resource_timeout_secs),
                ));
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let response_headers = response.headers().clone();
        let content_type = response_headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let kind = ContentKind::classify(&content_type, request.purpose, request.range.is_some());
        debug!(
            "{} answered {} with {:?} ({})",
            final_url, status, kind, content_type
        );

        let body = match kind {
            ContentKind::Stream => ResourceBody::Stream(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(std::io::Error::other))
                    .boxed(),
            ),
            ContentKind::Html => {
                let bytes = self.read_buffered(&url, response).await?;
                ResourceBody::Html(decode_text(&bytes, &content_type))
            }
            ContentKind::Binary => ResourceBody::Buffered(self.read_buffered(&url, response).await?),
        };

        Self::record(request.purpose, "ok");

        Ok(FetchedResource {
            status,
            headers: response_headers,
            final_url,
            body,
        })
    }
}

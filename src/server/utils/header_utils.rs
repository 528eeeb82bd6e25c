use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use once_cell::sync::Lazy;
use tracing::warn;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// immutable base every outbound request starts from
pub static BROWSER_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
});

/// overlay on top of a base template, entries in the overlay win. Values that are not valid
/// header values are dropped with a warning instead of failing the request
#[derive(Debug, Default, Clone)]
pub struct HeaderOverlay {
    entries: Vec<(HeaderName, String)>,
}

impl HeaderOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.entries.push((name, value.into()));
        self
    }

    pub fn with_opt(self, name: HeaderName, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    pub fn apply(&self, base: &HeaderMap) -> HeaderMap {
        let mut merged = base.clone();
        for (name, value) in &self.entries {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    merged.insert(name.clone(), value);
                }
                Err(e) => warn!("Dropping header {}: {}", name, e),
            }
        }
        merged
    }
}

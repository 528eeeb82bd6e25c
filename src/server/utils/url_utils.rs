use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, error};
use url::Url;

pub const PROXY_PATH: &str = "/proxy";
pub const RESOURCE_PATH: &str = "/proxy-resource";

/// upper bound on percent-decoding passes when unwrapping nested proxy urls, garbled input can
/// otherwise keep producing new escapes
pub const MAX_DECODE_PASSES: usize = 10;

/// stylesheets larger than this are passed through untouched
pub const MAX_CSS_INPUT_BYTES: usize = 1024 * 1024;
pub const MAX_CSS_URLS: usize = 512;

static NESTED_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/=](https?[^&]+)").expect("Static regex should compile"));

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("Static regex should compile")
});

/// references that are never routed through the proxy
const SKIPPED_PREFIXES: [&str; 7] = [
    "javascript:",
    "mailto:",
    "tel:",
    "data:",
    "blob:",
    "about:",
    "#",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    Parse(url::ParseError),
    UnsupportedScheme(String),
}

impl fmt::Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "could not parse url: {}", e),
            Self::UnsupportedScheme(s) => write!(f, "unsupported scheme '{}'", s),
        }
    }
}

impl std::error::Error for UrlError {}

impl From<url::ParseError> for UrlError {
    fn from(e: url::ParseError) -> Self {
        Self::Parse(e)
    }
}

/// an absolute http(s) url, never relative once constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl(Url);

impl ResolvedUrl {
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        Self::try_from(Url::parse(raw.trim())?)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or("")
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.0.query()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<Url> for ResolvedUrl {
    type Error = UrlError;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        match url.scheme() {
            "http" | "https" if url.host_str().is_some() => Ok(Self(url)),
            other => Err(UrlError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for ResolvedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// fragments, scripts and inline payloads stay as they are
pub fn is_skipped_reference(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    SKIPPED_PREFIXES.iter().any(|prefix| {
        trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

fn is_absolute_http(raw: &str) -> bool {
    let lower = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// absolute urls come back as they are, `/path` lands on the base's scheme and host and
/// everything else goes through regular relative resolution against the base
pub fn resolve(raw: &str, base: &Url) -> Result<ResolvedUrl, UrlError> {
    let trimmed = raw.trim();

    if is_absolute_http(trimmed) {
        return ResolvedUrl::parse(trimmed);
    }

    ResolvedUrl::try_from(base.join(trimmed)?)
}

pub fn proxy_url(target: &str) -> String {
    format!("{}?url={}", PROXY_PATH, urlencoding::encode(target))
}

pub fn resource_url(target: &str) -> String {
    format!("{}?url={}", RESOURCE_PATH, urlencoding::encode(target))
}

/// true when the target points back at our own `/proxy` route, either as a bare path or as an
/// absolute url on any host whose path is exactly `/proxy`
pub fn is_nested_proxy_url(target: &str) -> bool {
    let trimmed = target.trim();

    if let Some(rest) = trimmed.strip_prefix(PROXY_PATH) {
        return rest.is_empty() || rest.starts_with('?') || rest.starts_with('/');
    }

    if !is_absolute_http(trimmed) {
        return false;
    }

    match Url::parse(trimmed) {
        Ok(url) => url.path() == PROXY_PATH,
        Err(_) => false,
    }
}

/// percent-decode until nothing changes, bounded by `MAX_DECODE_PASSES`. A pass that fails to
/// decode abandons the whole attempt and the value is used as it arrived
pub fn decode_until_stable(raw: &str) -> String {
    let mut current = raw.to_string();

    for _ in 0..MAX_DECODE_PASSES {
        if !current.contains('%') {
            break;
        }

        match urlencoding::decode(&current) {
            Ok(decoded) if decoded == current => break,
            Ok(decoded) => current = decoded.into_owned(),
            Err(e) => {
                error!("Error decoding URL {}: {}", raw, e);
                return raw.to_string();
            }
        }
    }

    current
}

/// collapse a self-referential proxy url to the target it wraps. Urls that are not nested come
/// back unchanged, nested ones without an embedded http(s) target are `None`
pub fn unwrap_nested(target: &str) -> Option<String> {
    if !is_nested_proxy_url(target) {
        return Some(target.to_string());
    }

    let trimmed = target.trim();
    // only look past our own path so the host of an absolute nested url is never picked up
    let tail = match trimmed.strip_prefix(PROXY_PATH) {
        Some(rest) => rest.to_string(),
        None => Url::parse(trimmed)
            .ok()
            .and_then(|url| url.query().map(|q| format!("?{}", q)))
            .unwrap_or_default(),
    };

    let embedded = NESTED_TARGET.captures(&tail)?.get(1)?.as_str();
    let unwrapped = decode_until_stable(embedded);

    debug!("Unwrapped nested proxy url {} -> {}", target, unwrapped);
    Some(unwrapped)
}

/// every `url(...)` target in a stylesheet, bounded in input size and match count
pub fn extract_css_urls(css: &str) -> Vec<String> {
    if css.len() > MAX_CSS_INPUT_BYTES {
        return Vec::new();
    }

    CSS_URL
        .captures_iter(css)
        .take(MAX_CSS_URLS)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// swap every `url(...)` in a stylesheet for its `/proxy-resource` form, inline payloads and
/// targets that fail to resolve are left where they are
pub fn rewrite_css_urls(css: &str, base: &Url) -> String {
    if css.len() > MAX_CSS_INPUT_BYTES {
        debug!("Stylesheet of {} bytes left untouched", css.len());
        return css.to_string();
    }

    CSS_URL
        .replacen(css, MAX_CSS_URLS, |caps: &Captures| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let Some(target) = caps.get(1).map(|m| m.as_str().trim()) else {
                return whole.to_string();
            };

            if is_skipped_reference(target) {
                return whole.to_string();
            }

            match resolve(target, base) {
                Ok(resolved) => format!("url({})", resource_url(resolved.as_str())),
                Err(e) => {
                    error!("Failed to resolve css url {}: {}", target, e);
                    whole.to_string()
                }
            }
        })
        .into_owned()
}

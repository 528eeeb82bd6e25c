// search-engine forms get funneled into /search instead of being proxied raw
use lol_html::html_content::{ContentType, Element};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, error};
use url::Url;

pub const SEARCH_ENDPOINT: &str = "/search";
pub const QUERY_FIELD: &str = "q";
pub const ORIGIN_FIELD: &str = "url";

const SEARCH_ACTION_MARKERS: [&str; 2] = ["google.com/search", "/webhp"];

static FORM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form").expect("Static selector should parse"));
static QUERY_INPUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[name="q"]"#).expect("Static selector should parse"));
static FORM_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<form[\s>]").expect("Static regex should compile"));

/// blocks submitting the search form with nothing typed in
pub const EMPTY_QUERY_GUARD_SCRIPT: &str = r#"<script>
document.addEventListener('DOMContentLoaded', function () {
    document.querySelectorAll('form[action="/search"]').forEach(function (form) {
        form.addEventListener('submit', function (e) {
            var input = form.querySelector('input[name="q"]');
            if (!input || !input.value || input.value.trim() === '') {
                e.preventDefault();
            }
        });
    });
});
</script>"#;

/// first non-blank value for `name` among decoded query or form pairs
pub fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, value)| key == name && !value.trim().is_empty())
        .map(|(_, value)| value.as_str())
}

/// fixed search parameters: english, safe search on, no personalization, no autocorrect
const SEARCH_DEFAULTS: [(&str, &str); 5] = [
    ("hl", "en"),
    ("safe", "active"),
    ("pws", "0"),
    ("nfpr", "1"),
    ("darkmode", "1"),
];

/// the search engine's results url for `query`. Extra non-empty parameters other than the
/// query and origin fields are carried along and override the defaults
pub fn search_engine_url(
    home: &str,
    query: &str,
    extras: &[(String, String)],
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(home)?.join("search")?;

    let mut params: Vec<(String, String)> = vec![(QUERY_FIELD.to_string(), query.to_string())];
    params.extend(
        SEARCH_DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );

    for (key, value) in extras {
        if key == QUERY_FIELD || key == ORIGIN_FIELD || value.is_empty() {
            continue;
        }
        match params.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => params.push((key.clone(), value.clone())),
        }
    }

    url.query_pairs_mut().clear().extend_pairs(params.iter());
    Ok(url.to_string())
}

/// a resolved action pointing at a search results or search home page
pub fn is_search_action(resolved_action: &str) -> bool {
    SEARCH_ACTION_MARKERS
        .iter()
        .any(|marker| resolved_action.contains(marker))
}

/// for every form in document order, whether it already carries a `q` input. The streaming
/// rewriter only sees a form's opening tag, so this has to be known up front
pub fn scan_query_inputs(html: &str) -> Vec<bool> {
    if !FORM_TAG.is_match(html) {
        return Vec::new();
    }

    let document = Html::parse_document(html);
    document
        .select(&FORM_SELECTOR)
        .map(|form| form.select(&QUERY_INPUT_SELECTOR).next().is_some())
        .collect()
}

/// raw `<form` start tags, the way a tokenizer sees them. Nested forms count here even though
/// the tree built by `scan_query_inputs` drops them
pub fn count_form_tags(html: &str) -> usize {
    FORM_TAG.find_iter(html).count()
}

/// hidden origin field plus a query box when the page never rendered one
pub fn search_form_fields(page_url: &str, needs_query_input: bool) -> String {
    let mut fields = format!(
        r#"<input type="hidden" name="{}" value="{}">"#,
        ORIGIN_FIELD,
        html_escape::encode_double_quoted_attribute(page_url)
    );

    if needs_query_input {
        fields.push_str(&format!(r#"<input type="text" name="{}">"#, QUERY_FIELD));
    }

    fields
}

fn set_or_log(el: &mut Element, name: &str, value: &str) {
    if let Err(e) = el.set_attribute(name, value) {
        error!("Failed to set {} on <{}>: {}", name, el.tag_name(), e);
    }
}

/// point a search form at our search endpoint. Pure tree mutation, nothing is fetched
pub fn classify_search_form(el: &mut Element, page_url: &str, has_query_input: bool) {
    set_or_log(el, "method", "POST");
    set_or_log(el, "action", SEARCH_ENDPOINT);
    el.append(
        &search_form_fields(page_url, !has_query_input),
        ContentType::Html,
    );

    debug!(
        "Search form redirected to {} (query input present: {})",
        SEARCH_ENDPOINT, has_query_input
    );
}

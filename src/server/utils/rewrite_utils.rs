use std::cell::{Cell, RefCell};

use lol_html::{
    HtmlRewriter, Settings, element, errors::RewritingError, html_content::ContentType,
    html_content::Element, text,
};
use tracing::{debug, error, warn};
use url::Url;

use crate::server::utils::{
    form_utils,
    url_utils::{self, ResolvedUrl},
    youtube_utils,
};

/// appended to every rewritten body so links created by scripts after load still go through
/// the proxy
pub const NAVIGATION_SCRIPT: &str = r#"<script>
document.addEventListener('click', function (e) {
    var link = e.target.closest ? e.target.closest('a[href]') : null;
    if (!link) {
        return;
    }
    var href = link.getAttribute('href') || '';
    if (/^https?:\/\//i.test(href)) {
        e.preventDefault();
        window.location.href = '/proxy?url=' + encodeURIComponent(href);
    }
});
</script>"#;

#[derive(Debug, Clone)]
pub struct RewriteContext {
    pub base: Url,
    pub video_site: bool,
}

impl RewriteContext {
    pub fn new(base: Url) -> Self {
        let video_site = base
            .host_str()
            .is_some_and(youtube_utils::is_youtube_host);
        Self { base, video_site }
    }
}

/// where a rewritten reference should point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Page,
    Resource,
}

impl Target {
    fn wrap(self, resolved: &ResolvedUrl) -> String {
        match self {
            Self::Page => url_utils::proxy_url(resolved.as_str()),
            Self::Resource => url_utils::resource_url(resolved.as_str()),
        }
    }
}

fn record_element_failure(el: &Element, attr: &str, raw: &str, reason: &dyn std::fmt::Display) {
    error!(
        "Leaving <{} {}=\"{}\"> unmodified: {}",
        el.tag_name(),
        attr,
        raw,
        reason
    );
    metrics::counter!("proxy_rewrite_element_errors_total").increment(1);
}

fn set_attribute(el: &mut Element, attr: &str, value: &str) -> bool {
    match el.set_attribute(attr, value) {
        Ok(()) => true,
        Err(e) => {
            record_element_failure(el, attr, value, &e);
            false
        }
    }
}

/// resolve one attribute; skipped references and failures come back as None with the element
/// untouched
fn resolve_attribute(el: &Element, attr: &str, ctx: &RewriteContext) -> Option<ResolvedUrl> {
    let raw = el.get_attribute(attr)?;
    if url_utils::is_skipped_reference(&raw) {
        return None;
    }

    match url_utils::resolve(&raw, &ctx.base) {
        Ok(resolved) => Some(resolved),
        Err(e) => {
            record_element_failure(el, attr, &raw, &e);
            None
        }
    }
}

fn rewrite_attribute(
    el: &mut Element,
    attr: &str,
    ctx: &RewriteContext,
    target: Target,
) -> Option<ResolvedUrl> {
    let resolved = resolve_attribute(el, attr, ctx)?;
    if set_attribute(el, attr, &target.wrap(&resolved)) {
        Some(resolved)
    } else {
        None
    }
}

/// `srcset` candidates are rewritten one by one, descriptors are kept
fn rewrite_srcset(el: &mut Element, ctx: &RewriteContext) {
    let Some(srcset) = el.get_attribute("srcset") else {
        return;
    };

    let candidates: Vec<String> = srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let Some(src) = parts.next() else {
                return candidate.to_string();
            };
            let descriptor: Vec<&str> = parts.collect();

            if url_utils::is_skipped_reference(src) {
                return candidate.to_string();
            }

            match url_utils::resolve(src, &ctx.base) {
                Ok(resolved) => {
                    let mut rewritten = url_utils::resource_url(resolved.as_str());
                    if !descriptor.is_empty() {
                        rewritten.push(' ');
                        rewritten.push_str(&descriptor.join(" "));
                    }
                    rewritten
                }
                Err(e) => {
                    record_element_failure(el, "srcset", src, &e);
                    candidate.to_string()
                }
            }
        })
        .collect();

    set_attribute(el, "srcset", &candidates.join(", "));
}

fn rewrite_anchor(el: &mut Element, ctx: &RewriteContext) {
    if let Some(resolved) = rewrite_attribute(el, "href", ctx, Target::Page) {
        set_attribute(el, "data-original-url", resolved.as_str());
    }
}

fn rewrite_script(el: &mut Element, ctx: &RewriteContext) {
    let Some(resolved) = resolve_attribute(el, "src", ctx) else {
        return;
    };

    // the embedded player refuses to boot from anywhere but its own hosts
    if ctx.video_site && youtube_utils::is_asset_host(resolved.host()) {
        debug!("Leaving player script {} in place", resolved);
        return;
    }

    set_attribute(el, "src", &Target::Resource.wrap(&resolved));
}

fn rewrite_iframe(el: &mut Element, ctx: &RewriteContext) {
    let Some(resolved) = resolve_attribute(el, "src", ctx) else {
        return;
    };

    if ctx.video_site && youtube_utils::is_embed_src(resolved.as_str()) {
        if let Some(video_id) = youtube_utils::embed_video_id(resolved.as_str()) {
            set_attribute(
                el,
                "src",
                &format!("/youtube?v={}", urlencoding::encode(&video_id)),
            );
        }
        return;
    }

    set_attribute(el, "src", &Target::Page.wrap(&resolved));
}

fn rewrite_inline_style(el: &mut Element, ctx: &RewriteContext) {
    let Some(style) = el.get_attribute("style") else {
        return;
    };
    if !style.contains("url(") {
        return;
    }

    let rewritten = url_utils::rewrite_css_urls(&style, &ctx.base);
    if rewritten != style {
        set_attribute(el, "style", &rewritten);
    }
}

/// per-document state shared between the form handler and the classifier
struct FormState {
    query_inputs: Vec<bool>,
    next_index: Cell<usize>,
    guard_injected: Cell<bool>,
}

impl FormState {
    fn new(html: &str) -> Self {
        let mut query_inputs = form_utils::scan_query_inputs(html);
        let tags = form_utils::count_form_tags(html);
        if tags != query_inputs.len() {
            // positions no longer line up, every form is taken to have its input
            warn!(
                "Form pre-scan found {} forms but the markup has {} form tags",
                query_inputs.len(),
                tags
            );
            query_inputs.clear();
        }

        Self {
            query_inputs,
            next_index: Cell::new(0),
            guard_injected: Cell::new(false),
        }
    }

    /// forms past the end of the pre-scan are assumed to have the input
    fn next_has_query_input(&self) -> bool {
        let index = self.next_index.get();
        self.next_index.set(index + 1);
        self.query_inputs.get(index).copied().unwrap_or(true)
    }
}

fn rewrite_form(el: &mut Element, ctx: &RewriteContext, forms: &FormState) {
    let has_query_input = forms.next_has_query_input();

    let Some(action) = el.get_attribute("action") else {
        return;
    };
    if action.trim().is_empty() {
        return;
    }

    let Some(resolved) = resolve_attribute(el, "action", ctx) else {
        return;
    };

    if form_utils::is_search_action(resolved.as_str()) {
        form_utils::classify_search_form(el, ctx.base.as_str(), has_query_input);

        if !forms.guard_injected.replace(true) {
            el.after(form_utils::EMPTY_QUERY_GUARD_SCRIPT, ContentType::Html);
        }
        return;
    }

    if set_attribute(el, "action", &Target::Page.wrap(&resolved)) {
        set_attribute(el, "data-original-action", resolved.as_str());

        let is_get = el
            .get_attribute("method")
            .is_none_or(|m| m.trim().eq_ignore_ascii_case("get"));

        // a GET submission replaces the action's query string, so the target rides along as a
        // field too
        if is_get {
            el.append(
                &format!(
                    r#"<input type="hidden" name="{}" value="{}">"#,
                    form_utils::ORIGIN_FIELD,
                    html_escape::encode_double_quoted_attribute(resolved.as_str())
                ),
                ContentType::Html,
            );
        }
    }
}

/// rewrite every outbound reference in a document so navigation keeps flowing through the
/// proxy. One bad attribute never stops the rest of the document
pub fn rewrite_document(html: &str, ctx: &RewriteContext) -> Result<String, RewritingError> {
    let forms = FormState::new(html);
    let style_buffer = RefCell::new(String::new());
    let mut output = Vec::with_capacity(html.len() + NAVIGATION_SCRIPT.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("a[href]", |el| {
                    rewrite_anchor(el, ctx);
                    Ok(())
                }),
                element!("form", |el| {
                    rewrite_form(el, ctx, &forms);
                    Ok(())
                }),
                element!("img[src], video[src], video source[src]", |el| {
                    rewrite_attribute(el, "src", ctx, Target::Resource);
                    Ok(())
                }),
                element!("img[srcset], picture source[srcset], video source[srcset]", |el| {
                    rewrite_srcset(el, ctx);
                    Ok(())
                }),
                element!("script[src]", |el| {
                    rewrite_script(el, ctx);
                    Ok(())
                }),
                element!("iframe[src]", |el| {
                    rewrite_iframe(el, ctx);
                    Ok(())
                }),
                element!(r#"link[rel~="stylesheet"][href]"#, |el| {
                    rewrite_attribute(el, "href", ctx, Target::Resource);
                    Ok(())
                }),
                element!("*[style]", |el| {
                    rewrite_inline_style(el, ctx);
                    Ok(())
                }),
                // style text can arrive in several chunks, hold it until the element closes
                text!("style", |chunk| {
                    style_buffer.borrow_mut().push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let css = std::mem::take(&mut *style_buffer.borrow_mut());
                        chunk.replace(
                            &url_utils::rewrite_css_urls(&css, &ctx.base),
                            ContentType::Html,
                        );
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    el.append(NAVIGATION_SCRIPT, ContentType::Html);
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    Ok(String::from_utf8_lossy(&output).into_owned())
}

use url::Url;
use webproxy::server::utils::url_utils::{
    self, MAX_CSS_URLS, MAX_DECODE_PASSES, ResolvedUrl,
};

fn base() -> Url {
    Url::parse("https://ex.com/dir/index.html").unwrap()
}

#[test]
fn test_resolve_relative_forms() {
    let b = base();

    assert_eq!(
        url_utils::resolve("/page", &b).unwrap().as_str(),
        "https://ex.com/page"
    );
    assert_eq!(
        url_utils::resolve("other.html", &b).unwrap().as_str(),
        "https://ex.com/dir/other.html"
    );
    assert_eq!(
        url_utils::resolve("../up?x=1", &b).unwrap().as_str(),
        "https://ex.com/up?x=1"
    );
    assert_eq!(
        url_utils::resolve("//cdn.ex.com/a.js", &b).unwrap().as_str(),
        "https://cdn.ex.com/a.js"
    );
}

#[test]
fn test_resolve_keeps_absolute_urls() {
    let resolved = url_utils::resolve("http://other.org/a?b=c", &base()).unwrap();

    assert_eq!(resolved.as_str(), "http://other.org/a?b=c");
    assert_eq!(resolved.scheme(), "http");
    assert_eq!(resolved.host(), "other.org");
    assert_eq!(resolved.path(), "/a");
    assert_eq!(resolved.query(), Some("b=c"));
}

#[test]
fn test_resolve_is_idempotent() {
    let other_base = Url::parse("http://unrelated.net/x/y/z").unwrap();

    for raw in ["/page", "rel/path.png", "../a/../b", "?q=1", "https://ex.com/already"] {
        let once = url_utils::resolve(raw, &base()).unwrap();
        let twice = url_utils::resolve(once.as_str(), &other_base).unwrap();
        assert_eq!(once, twice, "re-resolving {} moved it", raw);
    }
}

#[test]
fn test_resolve_rejects_non_http_results() {
    assert!(url_utils::resolve("ftp://files.ex.com/a", &base()).is_err());
    assert!(ResolvedUrl::parse("not a url").is_err());
}

#[test]
fn test_skipped_references() {
    for raw in ["#top", "javascript:void(0)", "JavaScript:alert(1)", "data:image/png;base64,AA", "mailto:a@b.c"] {
        assert!(url_utils::is_skipped_reference(raw), "{} should be skipped", raw);
    }
    assert!(!url_utils::is_skipped_reference("/page#frag"));
}

#[test]
fn test_proxy_url_encoding() {
    let resolved = url_utils::resolve("/page", &Url::parse("https://ex.com/").unwrap()).unwrap();

    assert_eq!(
        url_utils::proxy_url(resolved.as_str()),
        "/proxy?url=https%3A%2F%2Fex.com%2Fpage"
    );
    assert_eq!(
        url_utils::resource_url(resolved.as_str()),
        "/proxy-resource?url=https%3A%2F%2Fex.com%2Fpage"
    );
}

#[test]
fn test_nested_detection_is_host_independent() {
    assert!(url_utils::is_nested_proxy_url("/proxy?url=https://ex.com"));
    assert!(url_utils::is_nested_proxy_url("http://localhost:5000/proxy?url=https://ex.com"));
    assert!(url_utils::is_nested_proxy_url("https://my.deploy.app/proxy?url=https://ex.com"));

    assert!(!url_utils::is_nested_proxy_url("/proxy-resource?url=https://ex.com"));
    assert!(!url_utils::is_nested_proxy_url("https://proxy.example.com/page"));
    assert!(!url_utils::is_nested_proxy_url("https://ex.com/proxy/list"));
}

#[test]
fn test_unwrap_strips_every_encoding_layer() {
    let target = "https://ex.com/page?a=1";

    let mut encoded = target.to_string();
    for layers in 1..=4 {
        encoded = urlencoding::encode(&encoded).into_owned();
        let nested = format!("/proxy?url={}", encoded);

        assert_eq!(
            url_utils::unwrap_nested(&nested).as_deref(),
            Some("https://ex.com/page?a=1"),
            "failed with {} layers",
            layers
        );
    }
}

#[test]
fn test_unwrap_absolute_nested_url() {
    let nested = "http://localhost:5000/proxy?url=https%253A%252F%252Fex.com%252Fpage";

    assert_eq!(
        url_utils::unwrap_nested(nested).as_deref(),
        Some("https://ex.com/page")
    );
}

#[test]
fn test_unwrap_leaves_plain_urls_alone() {
    for raw in ["https://ex.com/page", "https://ex.com/?u=https%3A%2F%2Fo.org"] {
        assert_eq!(url_utils::unwrap_nested(raw).as_deref(), Some(raw));
    }
}

#[test]
fn test_unwrap_without_embedded_target() {
    assert_eq!(url_utils::unwrap_nested("/proxy?url=ftp%3A%2F%2Fx"), None);
    assert_eq!(url_utils::unwrap_nested("/proxy"), None);
}

#[test]
fn test_decode_is_bounded() {
    // more layers than passes allowed, whatever is left after the bound is returned
    let mut encoded = "https://ex.com/".to_string();
    for _ in 0..(MAX_DECODE_PASSES + 5) {
        encoded = urlencoding::encode(&encoded).into_owned();
    }

    let decoded = url_utils::decode_until_stable(&encoded);
    assert!(decoded.contains('%'));
    assert_ne!(decoded, encoded);
}

#[test]
fn test_decode_failure_keeps_raw_value() {
    // %FF%FE is not valid utf-8
    let raw = "https%3A%2F%2Fex.com%2F%FF%FE";
    assert_eq!(url_utils::decode_until_stable(raw), raw);
}

#[test]
fn test_extract_css_urls() {
    let css = r#"
        body { background: url("/img/bg.png"); }
        .a { background-image: url( 'icons.svg' ) }
        .b { src: url(data:font/woff2;base64,AAAA) }
    "#;

    assert_eq!(
        url_utils::extract_css_urls(css),
        vec![
            "/img/bg.png".to_string(),
            "icons.svg".to_string(),
            "data:font/woff2;base64,AAAA".to_string(),
        ]
    );
}

#[test]
fn test_extract_css_urls_is_bounded() {
    let css = "a{background:url(x.png)}".repeat(MAX_CSS_URLS + 100);
    assert_eq!(url_utils::extract_css_urls(&css).len(), MAX_CSS_URLS);
}

#[test]
fn test_rewrite_css_urls_skips_inline_data() {
    let css = ".a{background:url('/bg.png')} .b{background:url(data:image/gif;base64,R0)}";
    let rewritten = url_utils::rewrite_css_urls(css, &Url::parse("https://ex.com/").unwrap());

    assert!(rewritten.contains("url(/proxy-resource?url=https%3A%2F%2Fex.com%2Fbg.png)"));
    assert!(rewritten.contains("url(data:image/gif;base64,R0)"));
}

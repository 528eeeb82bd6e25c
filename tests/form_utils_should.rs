use url::Url;
use webproxy::server::utils::form_utils;

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_search_engine_url_defaults() {
    let url = form_utils::search_engine_url("https://www.google.com/", "rust lang", &[]).unwrap();
    let url = Url::parse(&url).unwrap();

    assert_eq!(url.host_str(), Some("www.google.com"));
    assert_eq!(url.path(), "/search");

    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(
        query,
        pairs(&[
            ("q", "rust lang"),
            ("hl", "en"),
            ("safe", "active"),
            ("pws", "0"),
            ("nfpr", "1"),
            ("darkmode", "1"),
        ])
    );
}

#[test]
fn test_search_engine_url_extras() {
    let extras = pairs(&[
        ("q", "ignored"),
        ("url", "https://www.google.com/"),
        ("tbm", "isch"),
        ("hl", "de"),
        ("empty", ""),
    ]);
    let url = form_utils::search_engine_url("https://www.google.com/", "cats", &extras).unwrap();
    let url = Url::parse(&url).unwrap();
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    assert!(query.contains(&("q".to_string(), "cats".to_string())));
    assert!(query.contains(&("hl".to_string(), "de".to_string())));
    assert!(query.contains(&("tbm".to_string(), "isch".to_string())));
    assert!(!query.iter().any(|(k, _)| k == "url" || k == "empty"));
    assert_eq!(query.iter().filter(|(k, _)| k == "q").count(), 1);
}

#[test]
fn test_search_engine_url_bad_home() {
    assert!(form_utils::search_engine_url("not a url", "cats", &[]).is_err());
}

#[test]
fn test_search_actions() {
    assert!(form_utils::is_search_action("https://www.google.com/search?q="));
    assert!(form_utils::is_search_action("https://www.google.com/webhp"));
    assert!(!form_utils::is_search_action("https://ex.com/login"));
}

#[test]
fn test_scan_query_inputs_in_document_order() {
    let html = r#"<form><input name="q"></form><form><input name="other"></form><form><div><input name="q"></div></form>"#;

    assert_eq!(form_utils::scan_query_inputs(html), vec![true, false, true]);
    assert!(form_utils::scan_query_inputs("<p>no forms</p>").is_empty());
}

#[test]
fn test_field_skips_blank_values() {
    let fields = pairs(&[("url", "  "), ("url", "https://ex.com"), ("q", "x")]);

    assert_eq!(form_utils::field(&fields, "url"), Some("https://ex.com"));
    assert_eq!(form_utils::field(&fields, "missing"), None);
}

#[test]
fn test_count_form_tags_sees_nested_forms() {
    let html = r#"<FORM action="/a"><form action="/b"></form></FORM><form>"#;

    assert_eq!(form_utils::count_form_tags(html), 3);
    assert_eq!(form_utils::scan_query_inputs(html).len(), 2);
    assert_eq!(form_utils::count_form_tags("<formula>"), 0);
}

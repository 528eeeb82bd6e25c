// url shapes and the embeddable player page for youtube
use once_cell::sync::Lazy;
use regex::Regex;
use url::form_urlencoded;

pub const YOUTUBE_DOMAINS: [&str; 6] = [
    "youtube.com",
    "www.youtube.com",
    "youtu.be",
    "m.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

/// scripts from these hosts drive the player and must load from the origin
const ASSET_DOMAINS: [&str; 2] = ["youtube.com", "ytimg.com"];

/// first path segments that are forwarded to youtube when hit directly on the proxy
pub const CATCHALL_SEGMENTS: [&str; 7] = [
    "channel", "user", "c", "playlist", "feed", "gaming", "watch",
];

pub const SEARCH_TRIGGER: &str = "youtube ";

pub const YOUTUBE_REFERER: &str = "https://www.youtube.com/";
pub const YOUTUBE_ORIGIN: &str = "https://www.youtube.com";

static WATCH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?(?:youtube\.com|youtu\.be)(?:/watch\?v=|/)([a-zA-Z0-9_-]{11})")
        .expect("Static regex should compile")
});

static EMBED_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"youtube(?:-nocookie)?\.com/embed/([a-zA-Z0-9_-]{11})")
        .expect("Static regex should compile")
});

static HOURS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)h").expect("Static regex should compile"));
static MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)m").expect("Static regex should compile"));
static SECONDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)s").expect("Static regex should compile"));

fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

pub fn is_youtube_host(host: &str) -> bool {
    YOUTUBE_DOMAINS.iter().any(|domain| host_matches(host, domain))
}

pub fn is_asset_host(host: &str) -> bool {
    ASSET_DOMAINS.iter().any(|domain| host_matches(host, domain))
}

/// `youtube.com/watch?v=ID` and `youtu.be/ID`
pub fn watch_video_id(url: &str) -> Option<String> {
    WATCH_URL
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn embed_video_id(src: &str) -> Option<String> {
    EMBED_URL
        .captures(src)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_embed_src(src: &str) -> bool {
    src.contains("youtube.com/embed/") || src.contains("youtube-nocookie.com/embed/")
}

fn quote_plus(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

pub fn search_url(query: &str) -> String {
    format!(
        "https://www.youtube.com/results?search_query={}",
        quote_plus(query)
    )
}

/// `youtube rick astley` -> `rick astley`, None when the trigger is missing
pub fn strip_search_trigger(query: &str) -> Option<String> {
    let head = query.get(..SEARCH_TRIGGER.len())?;
    if !head.eq_ignore_ascii_case(SEARCH_TRIGGER) {
        return None;
    }
    Some(query[SEARCH_TRIGGER.len()..].trim().to_string())
}

/// rebuild the youtube url for a path that was requested directly against the proxy
pub fn catchall_url(path: &str, query: Option<&str>) -> Option<String> {
    let path = path.trim_start_matches('/');
    let first_segment = path.split('/').next().unwrap_or("");

    if !CATCHALL_SEGMENTS.contains(&first_segment) {
        return None;
    }

    let mut url = format!("https://www.youtube.com/{}", path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    Some(url)
}

/// plain seconds pass through, `1h30m15s` style values are summed. Anything that adds up to
/// zero keeps the raw value so the player can make of it what it wants
pub fn parse_start_time(raw: &str) -> String {
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.to_string();
    }

    let component = |re: &Regex| -> u64 {
        re.captures(raw)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };

    let seconds = component(&HOURS) * 3600 + component(&MINUTES) * 60 + component(&SECONDS);

    if seconds > 0 {
        seconds.to_string()
    } else {
        raw.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedOptions {
    pub video_id: String,
    pub autoplay: String,
    pub start: Option<String>,
    pub list: Option<String>,
}

impl EmbedOptions {
    pub fn new(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            autoplay: "1".to_string(),
            start: None,
            list: None,
        }
    }

    pub fn embed_url(&self) -> String {
        let mut params = vec![format!("autoplay={}", quote_plus(&self.autoplay))];

        if let Some(start) = self.start.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("start={}", quote_plus(&parse_start_time(start))));
        }

        if let Some(list) = self.list.as_deref().filter(|l| !l.is_empty()) {
            params.push(format!("list={}", quote_plus(list)));
        }

        params.extend(
            ["rel=0", "showinfo=0", "modestbranding=1", "fs=1", "iv_load_policy=3"]
                .iter()
                .map(|p| p.to_string()),
        );

        format!(
            "https://www.youtube.com/embed/{}?{}",
            urlencoding::encode(&self.video_id),
            params.join("&")
        )
    }
}

const PLAYER_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>YouTube - {{TITLE}}</title>
    <style>
        body, html { margin: 0; padding: 0; height: 100%; overflow: hidden; background: #000; }
        .video-container { width: 100%; height: 100%; display: flex; align-items: center; justify-content: center; }
        .player-wrapper { width: 100%; height: 100%; position: relative; }
        iframe { position: absolute; top: 0; left: 0; width: 100%; height: 100%; border: none; }
        .loading { position: absolute; top: 50%; left: 50%; transform: translate(-50%, -50%); color: #fff; font-family: Arial, sans-serif; text-align: center; }
        .spinner { width: 50px; height: 50px; margin: 0 auto 20px; border: 5px solid rgba(255,255,255,0.3); border-top-color: #fff; border-radius: 50%; animation: spin 1s linear infinite; }
        @keyframes spin { 100% { transform: rotate(360deg); } }
    </style>
</head>
<body>
    <div class="video-container">
        <div class="player-wrapper">
            <div class="loading">
                <div class="spinner"></div>
                <div>Loading video...</div>
            </div>
            <iframe
                src="{{EMBED_URL}}"
                frameborder="0"
                allow="accelerometer; autoplay; clipboard-write; encrypted-media; gyroscope; picture-in-picture; web-share"
                allowfullscreen
                title="YouTube video player"
                onload="document.querySelector('.loading').style.display='none';"
            ></iframe>
        </div>
    </div>
    <script>
        window.addEventListener('message', function (e) {
            if (!e.data || e.data.action !== 'toggleFullscreen') {
                return;
            }
            var container = document.querySelector('.video-container');
            if (!document.fullscreenElement) {
                container.requestFullscreen().catch(function () {});
            } else if (document.exitFullscreen) {
                document.exitFullscreen();
            }
        });
    </script>
</body>
</html>"#;

pub fn render_player_page(options: &EmbedOptions) -> String {
    PLAYER_TEMPLATE
        .replace("{{TITLE}}", &html_escape::encode_text(&options.video_id))
        .replace(
            "{{EMBED_URL}}",
            &html_escape::encode_double_quoted_attribute(&options.embed_url()),
        )
}

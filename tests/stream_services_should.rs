use axum::{
    body::{Bytes, to_bytes},
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use futures::{StreamExt, stream};
use std::io;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use webproxy::server::services::fetch_services::{ChunkStream, ContentKind, FetchPurpose};
use webproxy::server::services::stream_services::{self, RELAY_CHUNK_SIZE};

fn chunks(parts: Vec<Vec<u8>>) -> ChunkStream {
    stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p)))).boxed()
}

fn upstream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_RANGE, HeaderValue::from_static("bytes 100-199/5000"));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::ETAG, HeaderValue::from_static("\"abc\""));
    headers.insert(header::SET_COOKIE, HeaderValue::from_static("session=1"));
    headers.insert(header::SERVER, HeaderValue::from_static("nginx"));
    headers
}

#[test]
fn test_whitelist_filters_headers() {
    let filtered = stream_services::filter_headers(&upstream_headers());

    assert_eq!(filtered.len(), 4);
    assert_eq!(filtered[header::CONTENT_RANGE], "bytes 100-199/5000");
    assert_eq!(filtered[header::ACCEPT_RANGES], "bytes");
    assert!(filtered.get(header::SET_COOKIE).is_none());
    assert!(filtered.get(header::SERVER).is_none());
}

#[tokio::test]
async fn test_rechunk_preserves_order_and_bounds_size() {
    let first: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    let second: Vec<u8> = vec![7; 10];
    let mut expected = first.clone();
    expected.extend_from_slice(&second);

    let pieces: Vec<Bytes> = stream_services::rechunk(chunks(vec![first, second]), RELAY_CHUNK_SIZE)
        .map(|r| r.unwrap())
        .collect()
        .await;

    let sizes: Vec<usize> = pieces.iter().map(|p| p.len()).collect();
    assert_eq!(sizes, vec![1024, 1024, 452, 10]);
    assert_eq!(pieces.concat(), expected);
}

#[tokio::test]
async fn test_relay_keeps_upstream_status_and_whitelisted_headers() {
    let body: Vec<u8> = (0..100u8).collect();
    let response = stream_services::relay(
        chunks(vec![body.clone()]),
        &upstream_headers(),
        StatusCode::PARTIAL_CONTENT,
        "test",
    );

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 100-199/5000");
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let relayed = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(relayed.to_vec(), body);
}

/// flips its flag once the upstream source holding it is dropped
struct SourceDropped(Arc<AtomicBool>);

impl SourceDropped {
    fn held(&self) {}
}

impl Drop for SourceDropped {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(logs: &LogBuffer) -> tracing::subscriber::DefaultGuard {
    let logs = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || logs.clone())
        .finish();
    tracing::subscriber::set_default(subscriber)
}

#[tokio::test]
async fn test_client_hangup_releases_upstream() {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = SourceDropped(dropped.clone());

    // one chunk, then an upstream that never finishes
    let source: ChunkStream = stream::iter(vec![Ok(Bytes::from(vec![1u8; 10]))])
        .chain(stream::pending())
        .map(move |item| {
            flag.held();
            item
        })
        .boxed();

    let logs = LogBuffer::default();
    let _guard = capture_logs(&logs);

    let response = stream_services::relay(source, &HeaderMap::new(), StatusCode::OK, "live");
    let mut body = response.into_body().into_data_stream();

    let first = body.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 10);
    assert!(!dropped.load(Ordering::SeqCst));

    drop(body);

    assert!(dropped.load(Ordering::SeqCst));
    assert!(logs.contents().contains("Relay for live stopped after 10 bytes, client went away"));
}

#[tokio::test]
async fn test_upstream_failure_is_not_logged_as_success() {
    let source: ChunkStream = stream::iter(vec![
        Ok(Bytes::from(vec![2u8; 100])),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
    ])
    .boxed();

    let logs = LogBuffer::default();
    let _guard = capture_logs(&logs);

    let response = stream_services::relay(source, &HeaderMap::new(), StatusCode::OK, "clip");
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());

    let logs = logs.contents();
    assert!(logs.contains("Relay for clip aborted after 100 bytes, upstream failed"));
    assert!(!logs.contains("Relayed 100 bytes for clip"));
}

#[test]
fn test_content_classification() {
    assert_eq!(
        ContentKind::classify("text/html; charset=utf-8", FetchPurpose::Page, false),
        ContentKind::Html
    );
    assert_eq!(
        ContentKind::classify("Application/X-MPEGURL", FetchPurpose::Page, false),
        ContentKind::Stream
    );
    assert_eq!(
        ContentKind::classify("video/webm", FetchPurpose::Resource, false),
        ContentKind::Stream
    );
    assert_eq!(
        ContentKind::classify("image/png", FetchPurpose::Resource, false),
        ContentKind::Binary
    );
    assert_eq!(
        ContentKind::classify("image/png", FetchPurpose::Resource, true),
        ContentKind::Stream
    );
    // html is only rewritten on page fetches
    assert_eq!(
        ContentKind::classify("text/html", FetchPurpose::Resource, false),
        ContentKind::Binary
    );
}

// relays upstream bodies chunk by chunk without ever holding the whole payload
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::Response,
};
use futures::{Stream, StreamExt, stream};
use tracing::{debug, warn};

use crate::server::services::fetch_services::ChunkStream;

pub const RELAY_CHUNK_SIZE: usize = 1024;

/// the only upstream headers a streamed response carries
pub const HEADER_WHITELIST: [HeaderName; 8] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ACCEPT_RANGES,
    header::CONTENT_RANGE,
    header::CACHE_CONTROL,
    header::EXPIRES,
    header::ETAG,
    header::LAST_MODIFIED,
];

pub fn filter_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for name in HEADER_WHITELIST.iter() {
        for value in upstream.get_all(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// split without copying, the last piece may be shorter
fn split_bytes(bytes: Bytes, size: usize) -> Vec<Bytes> {
    let len = bytes.len();
    (0..len)
        .step_by(size.max(1))
        .map(|start| bytes.slice(start..(start + size).min(len)))
        .collect()
}

/// re-cut an upstream stream into pieces of at most `size` bytes, order untouched
pub fn rechunk(
    chunks: ChunkStream,
    size: usize,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    chunks.flat_map(move |item| {
        let pieces: Vec<Result<Bytes, std::io::Error>> = match item {
            Ok(bytes) => split_bytes(bytes, size).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(pieces)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayOutcome {
    /// still running when dropped, the client went away
    Interrupted,
    Completed,
    UpstreamFailed,
}

/// logs how a relay ended when it is dropped, a client hanging up mid-stream lands here too
struct RelayProgress {
    label: String,
    bytes: u64,
    outcome: RelayOutcome,
}

impl Drop for RelayProgress {
    fn drop(&mut self) {
        match self.outcome {
            RelayOutcome::Completed => debug!("Relayed {} bytes for {}", self.bytes, self.label),
            RelayOutcome::UpstreamFailed => warn!(
                "Relay for {} aborted after {} bytes, upstream failed",
                self.label, self.bytes
            ),
            RelayOutcome::Interrupted => debug!(
                "Relay for {} stopped after {} bytes, client went away",
                self.label, self.bytes
            ),
        }
    }
}

fn track(
    chunks: impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static,
    label: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let progress = RelayProgress {
        label,
        bytes: 0,
        outcome: RelayOutcome::Interrupted,
    };

    stream::unfold((chunks, progress), |(mut chunks, mut progress)| async move {
        match chunks.next().await {
            Some(Ok(bytes)) => {
                progress.bytes += bytes.len() as u64;
                Some((Ok(bytes), (chunks, progress)))
            }
            Some(Err(e)) => {
                warn!("Upstream stream for {} failed: {}", progress.label, e);
                progress.outcome = RelayOutcome::UpstreamFailed;
                Some((Err(e), (chunks, progress)))
            }
            None => {
                if progress.outcome == RelayOutcome::Interrupted {
                    progress.outcome = RelayOutcome::Completed;
                }
                None
            }
        }
    })
}

/// forward an upstream body as-is: upstream status, whitelisted headers, 1 KiB chunks. Range
/// slicing is left to the origin, whatever partial response it sends is passed along. The body
/// is pulled only as fast as the client takes it
pub fn relay(
    chunks: ChunkStream,
    upstream_headers: &HeaderMap,
    status: StatusCode,
    label: impl Into<String>,
) -> Response {
    let body = Body::from_stream(track(
        Box::pin(rechunk(chunks, RELAY_CHUNK_SIZE)),
        label.into(),
    ));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = filter_headers(upstream_headers);
    response
}

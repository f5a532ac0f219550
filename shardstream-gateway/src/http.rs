//! HTTP range serving
//!
//! Serves a [`RangeSource`] over HTTP, honoring RFC 7233 `Range` requests.
//! Each request opens exactly the window it asks for and streams it to the
//! response body chunk by chunk, so no more than a few chunks of the
//! requested window are ever buffered.

use std::io::{self, Read};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, instrument};

use shardstream_core::{ByteStream, SharedSource};

/// Bytes read from the source per body chunk.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the blocking reader and the response.
const STREAM_CHANNEL_DEPTH: usize = 4;

/// Shared state for the range-serving routes.
pub struct ServeState {
    /// The fully assembled content to serve.
    pub source: SharedSource,
    /// Content type reported for the served bytes.
    pub content_type: String,
}

impl ServeState {
    /// Serve `source` as `application/octet-stream`.
    pub fn new(source: SharedSource) -> Self {
        Self {
            source,
            content_type: "application/octet-stream".to_string(),
        }
    }
}

/// Router serving the content at `/`.
pub fn routes() -> Router<Arc<ServeState>> {
    Router::new().route("/", get(serve_content))
}

/// GET / - Serve the content, honoring Range requests
#[instrument(skip(state, headers))]
async fn serve_content(
    State(state): State<Arc<ServeState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let size = state.source.size();

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let window = range_header.and_then(|value| parse_range(value, size));
    if range_header.is_some() && window.is_none() {
        debug!(range = ?range_header, size, "unsatisfiable range");
        return match Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{size}"))
            .body(Body::empty())
        {
            Ok(response) => response,
            Err(err) => internal_error(err),
        };
    }

    let (offset, length, status) = match window {
        Some((offset, length)) => (offset, length, StatusCode::PARTIAL_CONTENT),
        None => (0, size, StatusCode::OK),
    };
    debug!(offset, length, status = %status, "serving window");

    let body = if method == Method::HEAD || length == 0 {
        Body::empty()
    } else {
        stream_body(state.source.range(offset, length))
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &state.content_type)
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes");

    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", offset, offset + length - 1, size),
        );
    }

    match response.body(body) {
        Ok(response) => response,
        Err(err) => internal_error(err),
    }
}

fn internal_error(err: axum::http::Error) -> Response {
    error!(error = %err, "failed to build response");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// Stream a source window to a response body through a bounded channel.
///
/// The source is read on a blocking task; a client that disconnects closes
/// the channel and stops the reader at the next chunk.
fn stream_body(mut stream: ByteStream) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(STREAM_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx
                        .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "stream failed mid-response");
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });
    Body::from_stream(ReceiverStream::new(rx))
}

/// Parse a single byte-range `Range` header into the `(offset, length)`
/// window it selects on a resource of `size` bytes.
///
/// Covers the three RFC 7233 forms: `bytes=a-b` selects the inclusive span
/// with the end clamped to the resource, `bytes=a-` runs to the end, and
/// `bytes=-n` selects the final `n` bytes (the whole resource if `n`
/// exceeds it). Anything else, including multi-range requests and windows
/// with no bytes in them, is `None`, which the handler answers with 416.
pub fn parse_range(value: &str, size: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    if spec.contains(',') {
        // Multi-range requests are not supported.
        return None;
    }
    match spec.split_once('-')? {
        ("", "") => None,
        ("", tail) => {
            let length = tail.parse::<u64>().ok()?.min(size);
            (length > 0).then(|| (size - length, length))
        }
        (from, to) => {
            let offset = from.parse::<u64>().ok()?;
            if offset >= size {
                return None;
            }
            let last = match to {
                "" => size - 1,
                bound => bound.parse::<u64>().ok()?.min(size - 1),
            };
            (offset <= last).then(|| (offset, last - offset + 1))
        }
    }
}

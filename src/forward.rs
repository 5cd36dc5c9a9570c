//! Streams upstream responses back to the client.
//!
//! The forwarder issues a bodyless upstream request through the tunnel
//! client picked by the link's selector, then hands the upstream body
//! back as a streaming response. Connection and byte accounting rides
//! on a drop guard inside the stream, so cancelled downloads are still
//! counted and closed out.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Method, Response};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tracing::{info, warn};
use url::Url;

use crate::error::{Result, ShroudError};
use crate::stats::StatsSink;
use crate::tunnel::{TunnelClients, TunnelSelector};

/// Headers that would disclose the caller's address to the upstream
const IP_HEADERS: &[&str] = &[
    "x-client-ip",
    "x-forwarded-for",
    "cf-connecting-ip",
    "do-connecting-ip",
    "fastly-client-ip",
    "true-client-ip",
    "x-real-ip",
    "x-cluster-client-ip",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
    "x-appengine-user-ip",
    "cf-pseudo-ipv4",
];

/// Hop-by-hop and framing headers owned by each side's HTTP stack
const HOP_HEADERS: &[&str] = &["host", "connection", "content-length", "transfer-encoding"];

/// Gateway credentials that must never reach the upstream
const AUTH_HEADERS: &[&str] = &["proxy-authorization", "x-shroud-authorization"];

/// Response headers the gateway re-derives instead of copying
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection"];

fn is_denied(name: &HeaderName) -> bool {
    let name = name.as_str();
    IP_HEADERS.contains(&name) || HOP_HEADERS.contains(&name) || AUTH_HEADERS.contains(&name)
}

/// Drops denied headers, keeping everything else including repeats
pub fn sanitize_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if !is_denied(name) {
            outbound.append(name.clone(), value.clone());
        }
    }
    outbound
}

/// Fetches link targets and relays their bodies downstream
pub struct StreamForwarder {
    clients: Arc<TunnelClients>,
    sink: Arc<dyn StatsSink>,
}

impl StreamForwarder {
    pub fn new(clients: Arc<TunnelClients>, sink: Arc<dyn StatsSink>) -> Self {
        Self { clients, sink }
    }

    /// Relays `target` to the caller with the link's tunnel selector.
    ///
    /// The upstream request carries the inbound method and sanitized
    /// headers and no body. The upstream status and headers come back
    /// verbatim apart from framing headers, whatever the status was;
    /// upstream errors surface as 502.
    pub async fn forward(
        &self,
        method: Method,
        headers: &HeaderMap,
        target: &Url,
        selector: TunnelSelector,
        user: &str,
    ) -> Result<Response<Body>> {
        let client = self.clients.for_selector(selector);
        let request = client
            .request(method, target.clone())
            .headers(sanitize_headers(headers))
            .build()
            .map_err(|e| ShroudError::Internal(format!("failed to build upstream request: {e}")))?;

        let upstream = client
            .execute(request)
            .await
            .map_err(|e| ShroudError::BadGateway(format!("upstream request failed: {e}")))?;

        let mut builder = Response::builder().status(upstream.status());
        for (name, value) in upstream.headers() {
            if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }

        let guard = ConnectionGuard::open(Arc::clone(&self.sink), user.to_string());
        let body = Body::from_stream(CountingStream {
            inner: upstream.bytes_stream(),
            guard,
        });

        builder
            .body(body)
            .map_err(|e| ShroudError::Internal(format!("failed to build response: {e}")))
    }
}

/// Open-connection marker that settles the books when the body ends.
///
/// Lives inside the response stream so that a client hanging up
/// mid-transfer still closes the connection count and logs the bytes
/// that did go out.
struct ConnectionGuard {
    sink: Arc<dyn StatsSink>,
    user: String,
    bytes: u64,
}

impl ConnectionGuard {
    fn open(sink: Arc<dyn StatsSink>, user: String) -> Self {
        sink.connection_opened();
        Self {
            sink,
            user,
            bytes: 0,
        }
    }

    fn count(&mut self, n: u64) {
        self.bytes += n;
        self.sink.bytes_transferred(n);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.sink.connection_closed();
        info!(user = %self.user, bytes = self.bytes, "proxy stream closed");
    }
}

pin_project! {
    struct CountingStream<S> {
        #[pin]
        inner: S,
        guard: ConnectionGuard,
    }
}

impl<S> Stream for CountingStream<S>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    type Item = reqwest::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.guard.count(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                warn!(user = %this.guard.user, error = %e, "upstream stream failed");
                Poll::Ready(Some(Err(e)))
            }
            None => Poll::Ready(None),
        }
    }
}

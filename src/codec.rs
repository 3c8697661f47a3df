//! Boundary types between the HTTP codec and the engines.
//!
//! The codec (external to this crate) parses the wire and delivers
//! [`HttpMessage`] values: one [`RequestHead`] per request, followed by
//! zero or more [`BodyChunk`]s, the final one flagged `last`. Engines
//! answer with [`Action`]s which the codec writes back, honoring the
//! close flag of each [`FullResponse`].
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version, request};
use std::task::{Context, Poll};

/// One inbound message from the HTTP codec.
#[derive(Debug)]
pub enum HttpMessage {
    Head(RequestHead),
    Chunk(BodyChunk),
}

/// A parsed request head.
///
/// `body` is `Some` when the codec aggregated the whole request before
/// delivery; no [`BodyChunk`] follows in that case.
#[derive(Debug)]
pub struct RequestHead {
    pub parts: request::Parts,
    pub body: Option<Bytes>,
}

impl RequestHead {
    /// Head of a streaming request; chunks will follow if the request has
    /// a body.
    pub fn streaming(request: http::Request<()>) -> Self {
        let (parts, ()) = request.into_parts();
        Self { parts, body: None }
    }

    /// Head of a fully aggregated request.
    pub fn full(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self { parts, body: Some(body) }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Decoded path component of the request URI.
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }
}

/// A fragment of a request body.
#[derive(Debug)]
pub struct BodyChunk {
    pub data: Bytes,
    /// Marked by the codec on the terminator chunk.
    pub last: bool,
}

impl BodyChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), last: false }
    }

    pub fn last(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), last: true }
    }
}

/// A complete response plus the connection-close decision.
#[derive(Debug)]
pub struct FullResponse {
    pub response: http::Response<Bytes>,
    /// Close the connection once this response is flushed.
    pub close: bool,
}

impl FullResponse {
    pub fn status(&self) -> http::StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    pub fn body(&self) -> &Bytes {
        self.response.body()
    }
}

/// One outbound instruction from an engine.
#[derive(Debug)]
pub enum Action {
    /// Write this response.
    Respond(FullResponse),
    /// Delegate to the external static-file server.
    ServeStatic { path: String },
    /// Delegate a download to the external file-serving helper.
    ServeFile { path: String },
}

impl Action {
    /// Whether the connection must be closed after this action.
    pub fn is_closing(&self) -> bool {
        matches!(self, Action::Respond(r) if r.close)
    }
}

// ===== Codec =====

/// Transport-facing side of a connection, implemented by the HTTP codec.
///
/// Mirrors a `Stream` of [`HttpMessage`] plus a `Sink` of [`Action`];
/// kept as a single trait so one value can own the socket.
pub trait Codec {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Next inbound message. `None` means the peer went away.
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<HttpMessage, Self::Error>>>;

    /// Begin writing one action. Must only be called after a successful
    /// [`poll_flush`](Codec::poll_flush).
    fn start_send(&mut self, action: Action) -> Result<(), Self::Error>;

    /// Drive pending writes to completion.
    fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>>;
}

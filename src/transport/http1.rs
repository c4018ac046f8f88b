//! HTTP/1.1 transport over TCP.
//!
//! # Responsibilities
//! - Open one TCP connection per `Connection` and run a hyper HTTP/1.1
//!   handshake on it
//! - Send one request at a time and buffer the full response body
//! - Translate hyper failures into `TransportError` kinds
//!
//! # Design Decisions
//! - No hyper-util pooled client: reuse is owned by `ConnectionTracker`
//! - Failures before the response head are hang ups, failures while reading
//!   the body are aborts

use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{HeaderValue, CONTENT_LENGTH, HOST};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::transport::{
    Activity, Connection, Exchange, ExchangeBody, ExchangeResponse, Phase, Transport,
    TransportError,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type OutgoingBody = UnsyncBoxBody<Bytes, BoxError>;

/// Transport that speaks plain HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HyperTransport {
    connect_timeout: Duration,
}

impl HyperTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, TransportError> {
        let authority = format!("{}:{}", host, port);

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let reason = match e.kind() {
                    std::io::ErrorKind::ConnectionRefused => "connection refused",
                    std::io::ErrorKind::TimedOut => "connect timed out",
                    _ => "connect error",
                };
                return Err(TransportError::other(reason, format!("connect {}: {}", authority, e)));
            }
            Err(_) => {
                return Err(TransportError::other(
                    "connect timed out",
                    format!("connect {}: timed out after {:?}", authority, self.connect_timeout),
                ));
            }
        };
        let _ = stream.set_nodelay(true);

        let (sender, connection) = http1::handshake::<_, OutgoingBody>(TokioIo::new(stream))
            .await
            .map_err(|e| TransportError::other("handshake", format!("handshake {}: {}", authority, e)))?;

        let peer = authority.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(peer = %peer, error = %e, "Backend connection closed with error");
            }
        });

        tracing::trace!(peer = %authority, "Backend connection established");
        Ok(Box::new(HyperConnection { sender, authority }))
    }
}

/// A single HTTP/1.1 connection.
pub struct HyperConnection {
    sender: SendRequest<OutgoingBody>,
    authority: String,
}

#[async_trait]
impl Connection for HyperConnection {
    async fn exchange(&mut self, request: Exchange) -> Result<ExchangeResponse, TransportError> {
        let Exchange { method, path, headers, body, activity, .. } = request;

        activity.advance(Phase::RequestWrite);
        self.sender.ready().await.map_err(|e| classify_send_error(&e))?;

        let content_length = body.len();
        let uri = if path.is_empty() { "/".to_string() } else { path };
        let mut req = Request::builder()
            .method(method.as_http())
            .uri(uri)
            .body(outgoing_body(body, activity.clone()))
            .map_err(|e| TransportError::other("invalid request", e.to_string()))?;

        *req.headers_mut() = headers;
        if !req.headers().contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(&self.authority) {
                req.headers_mut().insert(HOST, value);
            }
        }
        if let Some(len) = content_length.filter(|len| *len > 0) {
            req.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
        }

        let response = self.sender.send_request(req).await.map_err(|e| classify_send_error(&e))?;
        activity.advance(Phase::ResponseStart);

        let (parts, mut incoming) = response.into_parts();
        let mut buf = BytesMut::new();
        while let Some(frame) = incoming.frame().await {
            let frame = frame.map_err(|e| TransportError::aborted(format!("aborted: {}", e)))?;
            activity.advance(Phase::ResponseRead);
            if let Ok(chunk) = frame.into_data() {
                buf.extend_from_slice(&chunk);
            }
        }

        Ok(ExchangeResponse {
            status: parts.status,
            headers: parts.headers,
            body: buf.freeze(),
        })
    }

    fn is_usable(&self) -> bool {
        !self.sender.is_closed()
    }
}

fn outgoing_body(body: ExchangeBody, activity: Activity) -> OutgoingBody {
    match body {
        // Buffered bodies go out with the head.
        ExchangeBody::Empty => {
            activity.advance(Phase::RequestEnd);
            Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
        }
        ExchangeBody::Full(bytes) => {
            activity.advance(Phase::RequestEnd);
            Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
        }
        ExchangeBody::Stream(stream) => {
            let touched = activity.clone();
            let frames = stream
                .map(move |chunk| {
                    touched.touch();
                    chunk.map(Frame::data).map_err(BoxError::from)
                })
                .chain(stream::poll_fn(move |_| {
                    activity.advance(Phase::RequestEnd);
                    Poll::Ready(None)
                }));
            StreamBody::new(frames).boxed_unsync()
        }
    }
}

fn classify_send_error(e: &hyper::Error) -> TransportError {
    if e.is_parse() {
        TransportError::other("parse error", format!("invalid response: {}", e))
    } else if e.is_user() {
        TransportError::other("invalid request", e.to_string())
    } else {
        TransportError::hang_up(format!("socket hang up: {}", e))
    }
}

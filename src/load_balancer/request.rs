//! Per-call request options, bodies and responses.
//!
//! # Responsibilities
//! - Enumerate every option a caller can set, with its default
//! - Carry the request body across attempts
//! - Present a fully read response to the caller

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use hyper::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use crate::transport::{BodyStream, ExchangeBody, ExchangeResponse};

/// Methods the pool sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    pub fn as_http(&self) -> hyper::Method {
        match self {
            Method::Get => hyper::Method::GET,
            Method::Put => hyper::Method::PUT,
            Method::Post => hyper::Method::POST,
            Method::Delete => hyper::Method::DELETE,
            Method::Head => hyper::Method::HEAD,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            other => Err(format!("unsupported method: {}", other)),
        }
    }
}

/// How the response body is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Also decode the body as (lossy) UTF-8 text.
    #[default]
    Utf8,
    /// Raw bytes only.
    Binary,
}

/// Rejects an otherwise successful response, forcing a retry.
///
/// Returning `Some(detail)` rejects the response; the detail ends up in the
/// error message.
pub type RetryFilter = Arc<dyn Fn(&Response) -> Option<String> + Send + Sync>;

/// Options of one logical request.
///
/// `None` fields fall back to the pool's configuration.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    /// Idle timeout of a single attempt.
    pub timeout: Option<Duration>,
    pub retry_filter: Option<RetryFilter>,
    pub max_attempts: Option<u32>,
    pub max_hangups: Option<u32>,
    pub max_aborts: Option<u32>,
    /// Base delay of the exponential retry backoff.
    pub retry_delay: Option<Duration>,
    /// Pin every attempt to this `host:port`.
    pub endpoint: Option<String>,
    /// Skip the pool-wide pending limit during selection.
    pub override_pending: bool,
    pub encoding: Encoding,
}

impl RequestOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: hyper::header::HeaderName, value: hyper::header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Response) -> Option<String> + Send + Sync + 'static,
    {
        self.retry_filter = Some(Arc::new(filter));
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn max_hangups(mut self, hangups: u32) -> Self {
        self.max_hangups = Some(hangups);
        self
    }

    pub fn max_aborts(mut self, aborts: u32) -> Self {
        self.max_aborts = Some(aborts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn endpoint(mut self, host_port: impl Into<String>) -> Self {
        self.endpoint = Some(host_port.into());
        self
    }

    pub fn override_pending(mut self, enabled: bool) -> Self {
        self.override_pending = enabled;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .field("retry_filter", &self.retry_filter.is_some())
            .field("max_attempts", &self.max_attempts)
            .field("max_hangups", &self.max_hangups)
            .field("max_aborts", &self.max_aborts)
            .field("retry_delay", &self.retry_delay)
            .field("endpoint", &self.endpoint)
            .field("override_pending", &self.override_pending)
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl From<&str> for RequestOptions {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for RequestOptions {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

/// Body of a logical request.
///
/// A stream can only be sent once, which limits its request to one attempt.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Stream(Mutex<Option<BodyStream>>),
}

impl RequestBody {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        RequestBody::Stream(Mutex::new(Some(Box::pin(stream))))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }

    /// Body for the next attempt. A stream is handed out only once.
    pub(crate) fn for_attempt(&self) -> ExchangeBody {
        match self {
            RequestBody::Empty => ExchangeBody::Empty,
            RequestBody::Bytes(bytes) => ExchangeBody::Full(bytes.clone()),
            RequestBody::Stream(slot) => slot
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .map(ExchangeBody::Stream)
                .unwrap_or(ExchangeBody::Empty),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Empty
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            RequestBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

impl From<()> for RequestBody {
    fn from(_: ()) -> Self {
        RequestBody::Empty
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(bytes: &'static [u8]) -> Self {
        RequestBody::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(Bytes::from(text))
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl<T: Into<RequestBody>> From<Option<T>> for RequestBody {
    fn from(body: Option<T>) -> Self {
        body.map(Into::into).unwrap_or_default()
    }
}

/// A completed response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Body decoded as text when the request asked for `Encoding::Utf8`.
    pub text: Option<String>,
    /// `host:port` that served the response.
    pub endpoint: String,
    /// The connection had carried an earlier exchange.
    pub reused: bool,
    /// Exchanges carried by the connection, this one included.
    pub exchanges: u64,
    /// Whole attempt, connect included.
    pub duration: Duration,
    /// From the end of the request to the start of the response.
    pub latency: Duration,
}

impl Response {
    pub(crate) fn from_exchange(
        exchange: ExchangeResponse,
        encoding: Encoding,
        endpoint: String,
        exchanges: u64,
        duration: Duration,
    ) -> Self {
        let text = match encoding {
            Encoding::Utf8 => Some(String::from_utf8_lossy(&exchange.body).into_owned()),
            Encoding::Binary => None,
        };
        Self {
            status: exchange.status,
            headers: exchange.headers,
            body: exchange.body,
            text,
            endpoint,
            reused: exchanges > 1,
            exchanges,
            duration,
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

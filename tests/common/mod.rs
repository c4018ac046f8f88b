//! Shared utilities for integration tests.
//!
//! Mock backends speak just enough HTTP/1.1 over a raw `TcpListener`:
//! they read one request head (plus a `Content-Length` body), answer with
//! whatever the handler returns, and keep reading on the same socket until
//! the client goes away.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request as the backend saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Accept order of the socket that carried it.
    pub connection: usize,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What the backend does with a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(u16, String),
    /// Close the socket without answering.
    HangUp,
    /// Send the head and part of the body, then close.
    Truncate(u16, String),
    /// Never answer.
    Stall,
    /// Answer after a delay.
    Delay(Duration, u16, String),
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Respond(200, body.to_string())
    }
}

/// Running mock backend.
#[derive(Clone)]
pub struct Backend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    connections: Arc<AtomicUsize>,
}

impl Backend {
    /// `host:port` of the backend.
    pub fn host_port(&self) -> String {
        self.addr.to_string()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Sockets accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a backend whose handler picks a reply for every request.
pub async fn start_backend<F>(handler: F) -> Backend
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = Backend {
        addr: listener.local_addr().unwrap(),
        requests: Arc::new(Mutex::new(Vec::new())),
        connections: Arc::new(AtomicUsize::new(0)),
    };
    let handler = Arc::new(handler);

    let shared = backend.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let connection = shared.connections.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            let requests = shared.requests.clone();
            tokio::spawn(async move {
                serve(socket, connection, handler, requests).await;
            });
        }
    });
    backend
}

/// Start a backend that answers 200 with a fixed body.
pub async fn start_mock_backend(body: &'static str) -> Backend {
    start_backend(move |_| Reply::ok(body)).await
}

/// An address nothing listens on.
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

async fn serve<F>(
    mut socket: TcpStream,
    connection: usize,
    handler: Arc<F>,
    requests: Arc<Mutex<Vec<Recorded>>>,
) where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let Some(request) = read_request(&mut socket, &mut buf, connection).await else {
            return;
        };
        requests.lock().unwrap().push(request.clone());

        match handler(&request) {
            Reply::Respond(status, body) => {
                if write_response(&mut socket, status, &body).await.is_err() {
                    return;
                }
            }
            Reply::Delay(delay, status, body) => {
                tokio::time::sleep(delay).await;
                if write_response(&mut socket, status, &body).await.is_err() {
                    return;
                }
            }
            Reply::HangUp => return,
            Reply::Truncate(status, body) => {
                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n",
                    status,
                    reason_phrase(status),
                    body.len() + 100
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body.as_bytes()).await;
                let _ = socket.flush().await;
                return;
            }
            Reply::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
        }
    }
}

async fn read_request(socket: &mut TcpStream, buf: &mut Vec<u8>, connection: usize) -> Option<Recorded> {
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut start = lines.next()?.split_whitespace();
    let method = start.next()?.to_string();
    let path = start.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + length {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = buf[body_start..body_start + length].to_vec();
    buf.drain(..body_start + length);

    Some(Recorded { method, path, headers, body, connection })
}

async fn write_response(socket: &mut TcpStream, status: u16, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

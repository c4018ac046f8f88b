//! End-to-end request behavior over real HTTP/1.1 backends.

use std::collections::HashSet;
use std::sync::Arc;

use hyper::header::{HeaderName, HeaderValue};
use lb_pool::load_balancer::Encoding;
use lb_pool::{HyperTransport, Method, Pool, PoolConfig, PoolEvent, RequestOptions};

mod common;
use common::Reply;

fn pool(endpoints: &[String], config: PoolConfig) -> Pool {
    Pool::new(Arc::new(HyperTransport::default()), endpoints, config).unwrap()
}

async fn echo_backend() -> common::Backend {
    common::start_backend(|request| {
        let body = String::from_utf8_lossy(&request.body).to_string();
        Reply::Respond(200, format!("{} {} {}", request.method, request.path, body))
    })
    .await
}

#[tokio::test]
async fn test_requests_spread_across_endpoints() {
    let backends = vec![
        common::start_mock_backend("a").await,
        common::start_mock_backend("b").await,
        common::start_mock_backend("c").await,
    ];
    let endpoints: Vec<String> = backends.iter().map(|b| b.host_port()).collect();
    let pool = pool(&endpoints, PoolConfig::default());

    let mut served_by = HashSet::new();
    for _ in 0..60 {
        let response = pool.get("/").await.unwrap();
        served_by.insert(response.endpoint.clone());
    }
    assert_eq!(served_by.len(), 3);
    assert!(backends.iter().all(|b| b.request_count() > 0));
    assert_eq!(pool.summary().total_pending, 0);
    pool.close();
}

#[tokio::test]
async fn test_methods_and_bodies_reach_backend() {
    let backend = echo_backend().await;
    let pool = pool(&[backend.host_port()], PoolConfig::default());

    let response = pool.post("/echo", "bar").await.unwrap();
    assert_eq!(response.text(), Some("POST /echo bar"));

    let response = pool.put("/items/1", b"baz".to_vec()).await.unwrap();
    assert_eq!(response.text(), Some("PUT /items/1 baz"));

    let response = pool.delete("/items/1").await.unwrap();
    assert_eq!(response.text(), Some("DELETE /items/1 "));

    let requests = backend.requests();
    assert_eq!(requests[0].header("content-length"), Some("3"));
    assert_eq!(requests[0].body, b"bar");
    assert!(requests[2].body.is_empty());
    pool.close();
}

#[tokio::test]
async fn test_headers_and_query_are_forwarded() {
    let backend = echo_backend().await;
    let pool = pool(&[backend.host_port()], PoolConfig::default());

    let options = RequestOptions::new("/search?q=rust")
        .method(Method::Get)
        .header(HeaderName::from_static("x-request-tag"), HeaderValue::from_static("abc"));
    let response = pool.request(options, ()).await.unwrap();
    assert_eq!(response.status, hyper::StatusCode::OK);

    let seen = &backend.requests()[0];
    assert_eq!(seen.path, "/search?q=rust");
    assert_eq!(seen.header("x-request-tag"), Some("abc"));
    assert_eq!(seen.header("host"), Some(backend.host_port().as_str()));
    pool.close();
}

#[tokio::test]
async fn test_non_success_status_is_a_response() {
    let backend = common::start_backend(|_| Reply::Respond(503, "busy".into())).await;
    let pool = pool(&[backend.host_port()], PoolConfig::default());

    let response = pool.get("/").await.unwrap();
    assert_eq!(response.status, hyper::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(backend.request_count(), 1);
    pool.close();
}

#[tokio::test]
async fn test_retry_filter_moves_request_along() {
    let busy = common::start_backend(|_| Reply::Respond(503, "busy".into())).await;
    let good = common::start_mock_backend("ok").await;
    let config = PoolConfig { retry_delay_ms: 0, ..PoolConfig::default() };
    let pool = pool(&[busy.host_port(), good.host_port()], config).with_retry_filter(
        |response| (response.status.as_u16() == 503).then(|| "service unavailable".to_string()),
    );

    for _ in 0..5 {
        let response = pool.get(RequestOptions::new("/").max_attempts(30)).await.unwrap();
        assert_eq!(response.endpoint, good.host_port());
    }
    let filtered: u64 = pool.stats().iter().map(|s| s.filtered).sum();
    assert_eq!(filtered as usize, busy.request_count());
    assert!(pool.healthy_endpoints().len() == 2);
    pool.close();
}

#[tokio::test]
async fn test_pinned_endpoint_gets_every_attempt() {
    let first = common::start_mock_backend("first").await;
    let second = common::start_mock_backend("second").await;
    let pool = pool(&[first.host_port(), second.host_port()], PoolConfig::default());

    for _ in 0..10 {
        let options = RequestOptions::new("/").endpoint(second.host_port());
        let response = pool.get(options).await.unwrap();
        assert_eq!(response.text(), Some("second"));
    }
    assert_eq!(first.request_count(), 0);
    assert_eq!(second.request_count(), 10);
    pool.close();
}

#[tokio::test]
async fn test_binary_encoding_skips_text() {
    let backend = common::start_mock_backend("raw").await;
    let pool = pool(&[backend.host_port()], PoolConfig::default());

    let response = pool.get(RequestOptions::new("/").encoding(Encoding::Binary)).await.unwrap();
    assert!(response.text().is_none());
    assert_eq!(&response.body[..], b"raw");
    pool.close();
}

#[tokio::test]
async fn test_keep_alive_reuses_socket() {
    let backend = common::start_mock_backend("ok").await;
    let config = PoolConfig { keep_alive: true, ..PoolConfig::default() };
    let pool = pool(&[backend.host_port()], config);

    let first = pool.get("/1").await.unwrap();
    let second = pool.get("/2").await.unwrap();
    let third = pool.get("/3").await.unwrap();
    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(third.exchanges, 3);
    assert_eq!(backend.connections(), 1);
    assert!(backend.requests().iter().all(|r| r.connection == 0));
    assert_eq!(pool.stats()[0].connection_exchange_counts, vec![3]);
    pool.close();
}

#[tokio::test]
async fn test_keep_alive_disabled_opens_socket_per_request() {
    let backend = common::start_mock_backend("ok").await;
    let pool = pool(&[backend.host_port()], PoolConfig::default());

    for _ in 0..3 {
        assert!(!pool.get("/").await.unwrap().reused);
    }
    assert_eq!(backend.connections(), 3);
    assert_eq!(pool.stats()[0].connections(), 0);
    pool.close();
}

#[tokio::test]
async fn test_membership_follows_sync() {
    let old = common::start_mock_backend("old").await;
    let new = common::start_mock_backend("new").await;
    let pool = pool(&[old.host_port()], PoolConfig::default());

    pool.sync_endpoints(&[new.host_port()]);
    assert_eq!(pool.known_endpoints(), vec![new.host_port()]);
    for _ in 0..5 {
        assert_eq!(pool.get("/").await.unwrap().text(), Some("new"));
    }
    assert_eq!(old.request_count(), 0);
    pool.close();
}

#[tokio::test]
async fn test_response_event_follows_timing_event() {
    let backend = common::start_mock_backend("ok").await;
    let pool = pool(&[backend.host_port()], PoolConfig::default());
    let mut events = pool.subscribe();

    pool.get("/evt").await.unwrap();

    let names: Vec<&'static str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.name())
        .collect();
    assert_eq!(names, vec!["timing", "response"]);

    pool.get("/evt").await.unwrap();
    match events.try_recv().unwrap() {
        PoolEvent::Timing { info, .. } => {
            assert_eq!(info.endpoint.as_deref(), Some(backend.host_port().as_str()));
            assert!(info.success);
        }
        other => panic!("unexpected event {:?}", other),
    }
    pool.close();
}

mod common;

use common::{global_limited, init_tracing, route_limited, status, window, with_headers, MockTransport};
use futures::future::join_all;
use http::StatusCode;
use restgate::{
    HttpErrorKind, MemorySink, RestClient, RestConfig, RestRequest, Route, TransportError,
    TransportErrorKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn config() -> RestConfig {
    RestConfig::default().with_max_requests_per_second(None)
}

fn client(transport: &Arc<MockTransport>, config: RestConfig) -> RestClient<Arc<MockTransport>> {
    RestClient::new(transport.clone(), config).unwrap()
}

fn get(path: &str) -> RestRequest {
    RestRequest::get(format!("GET {path}"), format!("https://api.test{path}"))
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let transport = MockTransport::new().shared();
    let client = client(&transport, config());

    let failures = [
        (400, HttpErrorKind::BadRequest),
        (405, HttpErrorKind::BadRequest),
        (401, HttpErrorKind::Unauthorized),
        (403, HttpErrorKind::Unauthorized),
        (404, HttpErrorKind::NotFound),
        (413, HttpErrorKind::RequestTooLarge),
        (500, HttpErrorKind::ServerError),
        (502, HttpErrorKind::ServerError),
        (503, HttpErrorKind::ServerError),
        (504, HttpErrorKind::ServerError),
    ];
    for (code, kind) in failures {
        let path = format!("/fail/{code}");
        transport.script(&format!("https://api.test{path}"), status(code));
        let err = client.execute(&get(&path)).await.unwrap_err();
        assert_eq!(err.kind(), Some(kind), "status {code}");
        assert_eq!(err.response().unwrap().status.as_u16(), code);
        assert_eq!(err.request().unwrap().url, format!("https://api.test{path}"));
    }

    for code in [200, 201, 204, 302, 418] {
        let path = format!("/ok/{code}");
        transport.script(&format!("https://api.test{path}"), status(code));
        let response = client.execute(&get(&path)).await.unwrap();
        assert_eq!(response.status.as_u16(), code);
        assert_eq!(response.body, format!("status {code}").into_bytes());
    }

    let lifetime = client.metrics(false).lifetime;
    assert_eq!(lifetime.bad_request, 2);
    assert_eq!(lifetime.unauthorized, 2);
    assert_eq!(lifetime.not_found, 1);
    assert_eq!(lifetime.too_large, 1);
    assert_eq!(lifetime.server_error, 4);
    assert_eq!(lifetime.success, 5);
    assert_eq!(lifetime.rate_limited, 0);
    assert_eq!(transport.sends(), 15, "application errors are never retried");
}

#[tokio::test]
async fn metrics_since_last_call_resets_temporal_only() {
    let transport = MockTransport::new().shared();
    let client = client(&transport, config());
    client.execute(&get("/a")).await.unwrap();
    client.execute(&get("/a")).await.unwrap();

    let first = client.metrics(true);
    assert_eq!(first.temporal.success, 2);

    let second = client.metrics(true);
    assert_eq!(second.temporal.total(), 0);
    assert_eq!(second.lifetime.success, 2);

    transport.script("https://api.test/b", status(404));
    client.execute(&get("/b")).await.unwrap_err();
    let third = client.metrics(false);
    assert_eq!(third.temporal.not_found, 1);
    assert_eq!(third.lifetime.total(), 3);
}

#[tokio::test]
async fn disposed_client_fails_fast_without_network() {
    let transport = MockTransport::new().failing_close().shared();
    let client = client(&transport, config());

    client.dispose().await;
    client.dispose().await;

    let err = client.execute(&get("/a")).await.unwrap_err();
    assert!(err.is_disposed());
    assert_eq!(transport.sends(), 0);
    assert_eq!(transport.closes(), 1, "close runs once and its error is swallowed");
    assert_eq!(client.metrics(false).lifetime.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_releases_parked_requests() {
    let transport = MockTransport::new().shared();
    transport.script("https://api.test/a", global_limited(60.0));
    let sink = MemorySink::new();
    let client = RestClient::builder(transport.clone()).config(config()).sink(sink.clone()).build().unwrap();

    let in_retry = tokio::spawn({
        let client = client.clone();
        async move { client.execute(&get("/a")).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let at_gate = tokio::spawn({
        let client = client.clone();
        async move { client.execute(&get("/b")).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let start = Instant::now();
    client.dispose().await;
    assert!(in_retry.await.unwrap().unwrap_err().is_disposed());
    assert!(at_gate.await.unwrap().unwrap_err().is_disposed());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.sent_to("https://api.test/b"), 0);
    assert_eq!(sink.count("disposed"), 3, "one lifecycle event plus two failed calls");
}

#[tokio::test(start_paused = true)]
async fn exhausted_bucket_delays_only_its_route() {
    let transport = MockTransport::new().shared();
    transport.script("https://api.test/a", window(1, 0, 2.0));
    let client = client(&transport, config());

    client.execute(&get("/a")).await.unwrap();
    let state = client.bucket(&Route::new("GET /a")).unwrap();
    assert_eq!((state.limit, state.remaining), (Some(1), 0));

    let start = Instant::now();
    let parked = tokio::spawn({
        let client = client.clone();
        async move { client.execute(&get("/a")).await }
    });
    tokio::task::yield_now().await;
    assert!(!parked.is_finished());

    client.execute(&get("/b")).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO, "distinct routes never block each other");
    assert!(!parked.is_finished(), "/a is still waiting for its window");
    assert_eq!(transport.sent_to("https://api.test/a"), 1);

    parked.await.unwrap().unwrap();
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.sent_to("https://api.test/a"), 2);
}

#[tokio::test(start_paused = true)]
async fn global_limit_blocks_everyone_except_exempt_requests() {
    let transport = MockTransport::new().shared();
    transport.script("https://api.test/a", global_limited(10.0));
    let client = client(&transport, config());

    let limited = tokio::spawn({
        let client = client.clone();
        async move { client.execute(&get("/a")).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let start = Instant::now();
    client.execute(&get("/b").exempt_from_global_limit()).await.unwrap();
    client.execute(&get("/c").exempt_from_all_limits()).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);

    client.execute(&get("/d")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(9));

    let response = limited.await.unwrap().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(transport.sent_to("https://api.test/a"), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_surfaces_once_retries_run_out() {
    let transport = MockTransport::new().shared();
    for _ in 0..3 {
        transport.script("https://api.test/a", route_limited(1.0));
    }
    let client = client(&transport, config().with_max_retry_attempts(3));

    let start = Instant::now();
    let err = client.execute(&get("/a")).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.response().unwrap().status, StatusCode::TOO_MANY_REQUESTS);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.sends(), 3);

    let metrics = client.metrics(false);
    assert_eq!(metrics.lifetime.rate_limited, 1);
    assert_eq!(metrics.lifetime.total(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_retries_are_invisible_on_success() {
    let transport = MockTransport::new().shared();
    transport.script("https://api.test/a", route_limited(0.5));
    let sink = MemorySink::new();
    let client = RestClient::builder(transport.clone()).config(config()).sink(sink.clone()).build().unwrap();

    let start = Instant::now();
    client.execute(&get("/a")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(500));

    assert_eq!(client.metrics(false).lifetime.success, 1);
    assert_eq!(client.metrics(false).lifetime.rate_limited, 0);
    assert_eq!(sink.count("request_sent"), 2);
    assert_eq!(sink.count("response_received"), 2);
    assert_eq!(sink.count("bucket_rate_limit"), 1);
    assert_eq!(sink.count("retry_scheduled"), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_fallback_delay() {
    let transport = MockTransport::new().shared();
    transport
        .script_err("https://api.test/a", TransportError::connect("connection refused"))
        .script_err("https://api.test/a", TransportError::connect("connection refused"));
    let client = client(&transport, config().with_retry_fallback_delay(Duration::from_millis(100)));

    let start = Instant::now();
    client.execute(&get("/a")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(transport.sends(), 3);
}

#[tokio::test]
async fn fatal_transport_errors_propagate_unchanged() {
    let transport = MockTransport::new().shared();
    transport.script_err("https://api.test/a", TransportError::other("tls handshake failed"));
    let sink = MemorySink::new();
    let client = RestClient::builder(transport.clone()).config(config()).sink(sink.clone()).build().unwrap();

    let err = client.execute(&get("/a")).await.unwrap_err();
    let transport_err = err.as_transport().unwrap();
    assert_eq!(transport_err.kind(), TransportErrorKind::Other);
    assert!(err.to_string().contains("tls handshake failed"));
    assert_eq!(transport.sends(), 1);
    assert_eq!(client.metrics(false).lifetime.total(), 0);
    assert_eq!(sink.count("transport_failure"), 1);
}

#[tokio::test(start_paused = true)]
async fn unlearned_route_lets_one_learner_through() {
    let transport = MockTransport::new().with_latency(Duration::from_secs(1)).shared();
    transport.script("https://api.test/a", window(10, 9, 30.0));
    let client = client(
        &transport,
        config().with_route_learning_grace(Duration::from_secs(5)).with_max_unlearned_in_flight(1),
    );

    let elapsed = join_all((0..3).map(|_| {
        let client = client.clone();
        async move {
            let start = Instant::now();
            client.execute(&get("/a")).await.unwrap();
            start.elapsed()
        }
    }))
    .await;

    assert_eq!(elapsed[0], Duration::from_secs(1));
    for follower in &elapsed[1..] {
        assert!(*follower >= Duration::from_secs(2));
        assert!(*follower < Duration::from_secs(5));
    }
    let state = client.bucket(&Route::new("GET /a")).unwrap();
    assert_eq!(state.limit, Some(10));
    assert_eq!(state.remaining, 7);
}

#[tokio::test(start_paused = true)]
async fn routes_sharing_a_bucket_hash_share_limits() {
    let transport = MockTransport::new().shared();
    let shared = [
        ("X-RateLimit-Bucket", "abcd1234"),
        ("X-RateLimit-Limit", "1"),
        ("X-RateLimit-Remaining", "0"),
        ("X-RateLimit-Reset-After", "3"),
    ];
    transport.script("https://api.test/a", with_headers(200, &shared));
    transport.script("https://api.test/b", with_headers(200, &shared));
    let client = client(&transport, config());

    client.execute(&get("/a")).await.unwrap();
    client.execute(&get("/b")).await.unwrap();
    assert_eq!(client.bucket(&Route::new("GET /a")), client.bucket(&Route::new("GET /b")));

    let start = Instant::now();
    client.execute(&get("/a")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn request_ceiling_paces_requests_after_a_burst() {
    let transport = MockTransport::new().shared();
    let client = client(&transport, RestConfig::default().with_max_requests_per_second(Some(2)));

    let start = Instant::now();
    for n in 0..5 {
        client.execute(&get(&format!("/burst/{n}"))).await.unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(1_500));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(transport.sends(), 5);
}

#[tokio::test]
async fn request_body_and_headers_reach_the_transport() {
    init_tracing();
    let transport = MockTransport::new().shared();
    let client = client(&transport, config().with_anonymized_payloads(true));
    let request = RestRequest::post("POST /channels/{id}/messages", "https://api.test/channels/9/messages")
        .header(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"))
        .body(br#"{"content":"hello"}"#.to_vec());

    client.execute(&request).await.unwrap();
    let sent = transport.last_sent().unwrap();
    assert_eq!(sent.method, http::Method::POST);
    assert_eq!(sent.body.as_deref(), Some(&br#"{"content":"hello"}"#[..]));
    assert_eq!(sent.headers[http::header::CONTENT_TYPE], "application/json");
}

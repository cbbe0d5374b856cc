//! Services announcing an HTTP backend through their options endpoint.

use serde_json::{json, Value};

mod common;

use common::{http_client, serve_http_options, spawn_gateway, start_http_backend, test_config};

#[tokio::test]
async fn json_requests_are_posted_to_the_backend() {
    let gateway = spawn_gateway(test_config()).await;
    let (backend, mut received) = start_http_backend().await;
    serve_http_options(&gateway.bus, "http.put.profile", format!("http://{backend}/profile")).await;

    let res = http_client()
        .put(gateway.url("/profile?draft=1"))
        .json(&json!({"name": "Ada"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let req_id = res.headers()["x-request-id"].to_str().unwrap().to_string();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["reqId"], req_id);
    assert!(body["data"]["received"].as_u64().unwrap() > 0);

    let request = received.recv().await.unwrap();
    let forwarded: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(forwarded["reqId"], req_id);
    assert_eq!(forwarded["method"], "PUT");
    assert_eq!(forwarded["path"], "/profile");
    assert_eq!(forwarded["query"], json!({"draft": "1"}));
    assert_eq!(forwarded["data"], json!({"name": "Ada"}));
}

#[tokio::test]
async fn multipart_bodies_are_streamed_byte_for_byte() {
    let gateway = spawn_gateway(test_config()).await;
    let (backend, mut received) = start_http_backend().await;
    serve_http_options(&gateway.bus, "http.post.upload", format!("http://{backend}/upload")).await;

    let boundary = "gateway-test-boundary";
    let mut payload = Vec::new();
    payload.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    payload.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"blob.bin\"\r\n",
    );
    payload.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    payload.extend((0..=255u8).cycle().take(64 * 1024));
    payload.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let res = http_client()
        .post(gateway.url("/upload"))
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(payload.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["received"], payload.len());

    let request = received.recv().await.unwrap();
    assert_eq!(request.body.as_ref(), payload.as_slice());
    assert!(request.headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("multipart/form-data"));

    let header: Value = serde_json::from_str(request.headers["data"].to_str().unwrap()).unwrap();
    assert_eq!(header["path"], "/upload");
    assert!(header.get("data").is_none());
}

#[tokio::test]
async fn unreachable_backends_are_upstream_errors() {
    let gateway = spawn_gateway(test_config()).await;
    serve_http_options(&gateway.bus, "http.get.gone", "http://127.0.0.1:1/gone".to_string()).await;

    let res = http_client().get(gateway.url("/gone")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
    assert!(body["error"].get("stacktrace").is_none());
}

#[tokio::test]
async fn backend_server_errors_become_upstream_errors() {
    use axum::http::StatusCode;
    use axum::routing::any;

    let app = axum::Router::new().route("/{*path}", any(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let gateway = spawn_gateway(test_config()).await;
    serve_http_options(&gateway.bus, "http.get.flaky", format!("http://{backend}/flaky")).await;

    let res = http_client().get(gateway.url("/flaky")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
}

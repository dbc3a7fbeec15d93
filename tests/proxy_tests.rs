/// HTTP proxy adapter tests against a real local origin
mod common;

use common::{get_available_port, start_http_origin};
use devpipe::protocol::IncomingRequest;
use devpipe::{HttpForwarder, ProxyHandler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn handler(port: u16) -> ProxyHandler {
    let forwarder = HttpForwarder::new(Some(Duration::from_secs(5)), true)
        .expect("Failed to create HTTP forwarder");
    ProxyHandler::new(port.to_string(), Arc::new(forwarder))
}

fn request(id: &str, method: &str, path: &str) -> IncomingRequest {
    IncomingRequest {
        id: id.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        headers: HashMap::new(),
        body: String::new(),
    }
}

#[tokio::test]
async fn test_get_forwards_and_recomputes_content_length() {
    let origin = start_http_origin(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Set-Cookie: a=1\r\n\
         Set-Cookie: b=2\r\n\
         Content-Length: 11\r\n\
         Connection: close\r\n\
         \r\n\
         hello world",
    )
    .await;

    let mut req = request("get-1", "GET", "/greeting?lang=en");
    req.headers
        .insert("Host".to_string(), "quiet-fox.devpipe.cloud".to_string());
    req.headers
        .insert("X-Request-Id".to_string(), "abc-123".to_string());

    let response = handler(origin.port).handle(req).await;
    assert_eq!(response.id, "get-1");
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "hello world");
    assert_eq!(response.headers["Content-Length"], "11");
    assert_eq!(response.headers["set-cookie"], "a=1, b=2");
    assert_eq!(response.headers["content-type"], "text/plain");
    assert!(!response.headers.contains_key("content-length"));

    let requests = origin.requests.lock().unwrap();
    let raw = &requests[0];
    assert!(raw.starts_with("GET /greeting?lang=en HTTP/1.1\r\n"));
    assert!(raw.to_ascii_lowercase().contains("x-request-id: abc-123"));
    assert!(!raw.contains("quiet-fox.devpipe.cloud"));
}

#[tokio::test]
async fn test_post_body_reaches_origin() {
    let origin = start_http_origin(
        "HTTP/1.1 201 Created\r\nContent-Length: 7\r\nConnection: close\r\n\r\ncreated",
    )
    .await;

    let mut req = request("post-1", "post", "/items");
    req.headers
        .insert("Content-Type".to_string(), "application/json".to_string());
    req.body = r#"{"name":"devpipe"}"#.to_string();

    let response = handler(origin.port).handle(req).await;
    assert_eq!(response.status, 201);
    assert_eq!(response.body, "created");

    let requests = origin.requests.lock().unwrap();
    let raw = &requests[0];
    assert!(raw.starts_with("POST /items HTTP/1.1\r\n"));
    assert!(raw.ends_with(r#"{"name":"devpipe"}"#));
}

#[tokio::test]
async fn test_head_strips_body() {
    let origin = start_http_origin(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 512\r\nConnection: close\r\n\r\n",
    )
    .await;

    let response = handler(origin.port).handle(request("head-1", "HEAD", "/")).await;
    assert_eq!(response.id, "head-1");
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
    assert_eq!(response.headers["Content-Length"], "0");
}

#[tokio::test]
async fn test_origin_error_status_is_passed_through() {
    let origin = start_http_origin(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
    )
    .await;

    let response = handler(origin.port).handle(request("nf", "GET", "/missing")).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "not found");
    assert_eq!(response.headers["Content-Length"], "9");
}

#[tokio::test]
async fn test_unreachable_origin_is_502() {
    let port = get_available_port();

    let response = handler(port).handle(request("down", "GET", "/")).await;
    assert_eq!(response.id, "down");
    assert_eq!(response.status, 502);
    assert_eq!(response.headers["Content-Type"], "text/plain");
    assert!(response.body.starts_with("Request failed"));
}

#[tokio::test]
async fn test_truncated_origin_body_is_500() {
    // 声明 100 字节，只发送 5 字节就关闭连接
    let origin = start_http_origin(
        "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshort",
    )
    .await;

    let response = handler(origin.port).handle(request("cut", "GET", "/")).await;
    assert_eq!(response.id, "cut");
    assert_eq!(response.status, 500);
    assert_eq!(response.headers["Content-Type"], "text/plain");
    assert!(
        response.body.starts_with("Failed to read response"),
        "unexpected body: {}",
        response.body
    );
}

#[tokio::test]
async fn test_options_does_not_reach_origin() {
    let origin = start_http_origin("HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n").await;

    let response = handler(origin.port)
        .handle(request("pre", "OPTIONS", "/api/items"))
        .await;
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(origin.requests.lock().unwrap().is_empty());
}

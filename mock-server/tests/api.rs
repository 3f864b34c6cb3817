use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Echo, LoginReply};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get_request(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn form_request(uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            http::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded; charset=UTF-8",
        )
        .body(body.to_string())
        .unwrap()
}

// --- banner ---

#[tokio::test]
async fn banner_returns_json() {
    let resp = app().oneshot(get_request("/banner/json")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(&body_bytes(resp).await[..], br#"{"a":1}"#);
}

// --- login ---

#[tokio::test]
async fn login_echoes_username() {
    let resp = app()
        .oneshot(form_request("/user/login", "username=test0"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let reply: LoginReply = body_json(resp).await;
    assert_eq!(reply.error_code, 0);
    assert_eq!(reply.username.as_deref(), Some("test0"));
}

#[tokio::test]
async fn login_without_username_reports_error_code() {
    let resp = app()
        .oneshot(form_request("/user/login", "password=x"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let reply: LoginReply = body_json(resp).await;
    assert_eq!(reply.error_code, -1);
    assert!(reply.username.is_none());
}

#[tokio::test]
async fn login_rejects_non_form_body() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/user/login")
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(r#"{"username":"test0"}"#.to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

// --- echo ---

#[tokio::test]
async fn echo_reports_query_and_headers() {
    let resp = app()
        .oneshot(
            Request::builder()
                .uri("/echo?page=2&q=a+b")
                .header("x-request-tag", "abc")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.query["page"], "2");
    assert_eq!(echo.query["q"], "a b");
    assert_eq!(echo.headers["x-request-tag"], "abc");
}

// --- status ---

#[tokio::test]
async fn status_route_returns_requested_code() {
    let resp = app().oneshot(get_request("/status/404")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(&body_bytes(resp).await[..], b"status 404");
}

#[tokio::test]
async fn status_route_rejects_non_numeric_code() {
    let resp = app().oneshot(get_request("/status/teapot")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- slow ---

#[tokio::test]
async fn slow_route_answers_after_delay() {
    let started = std::time::Instant::now();
    let resp = app().oneshot(get_request("/slow/50")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    let body: serde_json::Value = body_json(resp).await;
    assert_eq!(body["slept_ms"], 50);
}

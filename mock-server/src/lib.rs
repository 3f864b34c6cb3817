use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug, Deserialize)]
pub struct Login {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginReply {
    #[serde(rename = "errorCode")]
    pub error_code: i32,
    #[serde(rename = "errorMsg")]
    pub error_msg: String,
    pub username: Option<String>,
}

/// What `/echo` saw of the request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Echo {
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

pub fn app() -> Router {
    Router::new()
        .route("/banner/json", get(banner))
        .route("/user/login", post(login))
        .route("/echo", get(echo))
        .route("/status/{code}", get(status))
        .route("/slow/{ms}", get(slow))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn banner() -> Json<Value> {
    Json(json!({"a": 1}))
}

async fn login(Form(input): Form<Login>) -> Json<LoginReply> {
    tracing::debug!(username = ?input.username, has_password = input.password.is_some(), "login");
    let reply = match input.username.filter(|u| !u.is_empty()) {
        Some(username) => LoginReply {
            error_code: 0,
            error_msg: String::new(),
            username: Some(username),
        },
        None => LoginReply {
            error_code: -1,
            error_msg: "username is required".to_string(),
            username: None,
        },
    };
    Json(reply)
}

async fn echo(Query(query): Query<BTreeMap<String, String>>, headers: HeaderMap) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo { query, headers })
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {}", status.as_u16()))
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({"slept_ms": ms}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_reply_uses_api_field_names() {
        let reply = LoginReply {
            error_code: 0,
            error_msg: String::new(),
            username: Some("test0".to_string()),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["errorCode"], 0);
        assert_eq!(json["errorMsg"], "");
        assert_eq!(json["username"], "test0");
    }

    #[test]
    fn login_reply_roundtrips_through_json() {
        let raw = r#"{"errorCode":-1,"errorMsg":"username is required","username":null}"#;
        let reply: LoginReply = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.error_code, -1);
        assert!(reply.username.is_none());
    }

    #[test]
    fn echo_defaults_to_empty_maps() {
        let echo: Echo = serde_json::from_str(r#"{"query":{},"headers":{}}"#).unwrap();
        assert!(echo.query.is_empty());
        assert!(echo.headers.is_empty());
    }
}

//! HTTP data types shared by the exchange, the client and the FFI layer.
//!
//! # Design
//! Requests are described by plain owned data (`HttpMethod`, header pairs,
//! a JSON argument map) and results by `Response`/`Failure`. A delivered
//! result is `Outcome = Result<Response, Failure>`: both branches carry the
//! same four normalized fields, so a caller can always render code, status
//! line, headers and body, and only the failure branch adds a cause.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ExchangeError;

/// Status line reported when no real one could be recovered.
pub const STATUS_REQUEST_FAILED: &str = "HTTP/0.0 -1 request_failed";

/// Status code meaning "unknown / never fetched".
pub const CODE_UNKNOWN: u16 = 0;

/// Response headers: field name to every value received for it, in order.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Request arguments. Values are JSON primitives; they are form-encoded for
/// POST bodies and GET queries.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// HTTP method for an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(ExchangeError::InvalidMethod(other.to_string())),
        }
    }
}

/// The normalized result fields of one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    pub code: u16,
    pub status_line: String,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    /// Values of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Headers rendered as a JSON object of string arrays.
    pub fn headers_json(&self) -> String {
        serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A failed exchange: the recovered fields plus the recorded cause.
///
/// `response` is always fully populated. `code` is 0 unless some stage saw
/// a real status, and `status_line` falls back to `STATUS_REQUEST_FAILED`.
#[derive(Debug)]
pub struct Failure {
    pub response: Response,
    pub cause: ExchangeError,
}

impl Failure {
    pub fn code(&self) -> u16 {
        self.response.code
    }

    pub fn status_line(&self) -> &str {
        &self.response.status_line
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, ExchangeError::Cancelled)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}: {}", self.response.code, self.response.status_line, self.cause)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// What a completion callback receives, exactly once per exchange.
pub type Outcome = Result<Response, Failure>;

/// Merge caller headers over defaults. A caller header replaces every
/// default whose name matches case-insensitively; order is defaults first.
pub fn merge_headers(defaults: &[(String, String)], overrides: &[(String, String)]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(k, _)| !overrides.iter().any(|(o, _)| o.eq_ignore_ascii_case(k)))
        .cloned()
        .collect();
    merged.extend(overrides.iter().cloned());
    merged
}

/// Split `HTTP/x.y CODE reason` into its code and reason phrase.
pub fn parse_status_line(line: &str) -> Option<(u16, &str)> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    let mut parts = line.splitn(3, ' ');
    parts.next()?;
    let code = parts.next()?.parse().ok()?;
    Some((code, parts.next().unwrap_or("")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn method_parses_known_names_only() {
        assert_eq!("GET".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("POST".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        let err = "BREW".parse::<HttpMethod>().unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidMethod(ref m) if m == "BREW"));
    }

    #[test]
    fn caller_connection_header_wins() {
        let defaults = pairs(&[("Content-Type", "X"), ("Connection", "Keep-Alive")]);
        let merged = merge_headers(&defaults, &pairs(&[("connection", "close")]));
        assert_eq!(merged, pairs(&[("Content-Type", "X"), ("connection", "close")]));
    }

    #[test]
    fn merge_without_overrides_keeps_defaults() {
        let defaults = pairs(&[("Content-Type", "X"), ("Connection", "Keep-Alive")]);
        assert_eq!(merge_headers(&defaults, &[]), defaults);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut response = Response::default();
        response
            .headers
            .insert("content-type".to_string(), vec!["application/json".to_string()]);
        assert_eq!(response.header("Content-Type"), Some(&["application/json".to_string()][..]));
        assert!(response.header("Server").is_none());
        assert_eq!(response.headers_json(), r#"{"content-type":["application/json"]}"#);
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK"), Some((200, "OK")));
        assert_eq!(parse_status_line("HTTP/1.1 404 Not Found"), Some((404, "Not Found")));
        assert_eq!(parse_status_line("HTTP/1.0 204"), Some((204, "")));
        assert_eq!(parse_status_line(STATUS_REQUEST_FAILED), None);
        assert_eq!(parse_status_line("garbage"), None);
    }

    #[test]
    fn failure_display_and_source() {
        let failure = Failure {
            response: Response {
                code: 0,
                status_line: STATUS_REQUEST_FAILED.to_string(),
                ..Response::default()
            },
            cause: ExchangeError::Cancelled,
        };
        assert!(failure.is_cancelled());
        assert_eq!(failure.to_string(), "0 : HTTP/0.0 -1 request_failed: exchange cancelled");
        assert!(std::error::Error::source(&failure).is_some());
    }
}

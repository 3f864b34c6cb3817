//! The low-level connection primitive an exchange drives.
//!
//! # Design
//! `Connection` is shaped after a URL connection: the request side is
//! configured piecewise (method, request properties, body), `connect` sends
//! it, and the response side is read through separate calls for the status
//! code, the header fields and the body stream. Every call returns its own
//! error so the exchange can decide how to absorb it.
//!
//! `header_fields` returns the status line as an entry without a field name,
//! the way URL connections expose it. The exchange is responsible for
//! lifting it out of the header map.
//!
//! `UreqConnector` is the production transport. One `ureq::Agent` is built
//! per connection, so nothing is pooled or shared between exchanges. Its
//! sockets come from `AbortableTcpConnector`, so firing the exchange's
//! `AbortSignal` shuts down a call that is blocked in the network.
//!
//! `ureq` parses the status line and drops the server's reason phrase. The
//! status line is rebuilt as `{version} {code} {canonical reason}`; a code
//! with no canonical reason yields just `{version} {code}`.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::debug;
use ureq::http::response::Parts;
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{Connector as _, RustlsConnector};
use ureq::{Agent, Body};
use url::Url;

use crate::abort::AbortSignal;
use crate::config::ClientConfig;
use crate::error::ExchangeError;
use crate::http::HttpMethod;
use crate::socket::AbortableTcpConnector;

/// Header fields as delivered by a connection. `None` names the status line.
pub type HeaderFields = Vec<(Option<String>, Vec<String>)>;

/// One connection handle, owned by exactly one exchange.
pub trait Connection: Send {
    fn set_method(&mut self, method: HttpMethod) -> Result<(), ExchangeError>;

    fn add_request_property(&mut self, name: &str, value: &str);

    /// Buffer the request body. Fails once the request has been sent.
    fn write_body(&mut self, body: &[u8]) -> Result<(), ExchangeError>;

    /// Send the request and receive the response head. Repeat calls are no-ops.
    fn connect(&mut self) -> Result<(), ExchangeError>;

    fn response_code(&mut self) -> Result<u16, ExchangeError>;

    fn header_fields(&mut self) -> Result<HeaderFields, ExchangeError>;

    /// The response body stream. Error statuses have no readable body.
    fn body_reader(&mut self) -> Result<Box<dyn Read + '_>, ExchangeError>;

    /// Release the connection. Later calls fail with `NotConnected`.
    fn disconnect(&mut self);
}

/// Opens connections for a URL.
///
/// `abort` belongs to the exchange; a connection that can block should
/// register a teardown hook on it.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        url: &str,
        config: &ClientConfig,
        abort: &Arc<AbortSignal>,
    ) -> Result<Box<dyn Connection>, ExchangeError>;
}

/// Connector backed by `ureq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UreqConnector;

impl Connector for UreqConnector {
    fn open(
        &self,
        url: &str,
        config: &ClientConfig,
        abort: &Arc<AbortSignal>,
    ) -> Result<Box<dyn Connection>, ExchangeError> {
        let parsed = Url::parse(url).map_err(|e| ExchangeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ExchangeError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }

        // Status codes are data here, not errors: 4xx/5xx come back as responses.
        let agent_config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(config.connect_timeout()))
            .timeout_recv_response(Some(config.read_timeout()))
            .timeout_recv_body(Some(config.read_timeout()))
            .build();
        let sockets = AbortableTcpConnector::new(Arc::clone(abort)).chain(RustlsConnector::default());
        let agent = Agent::with_parts(agent_config, sockets, DefaultResolver::default());

        Ok(Box::new(UreqConnection {
            agent,
            url: parsed.into(),
            method: HttpMethod::Get,
            headers: Vec::new(),
            body: None,
            head: None,
            stream: None,
            released: false,
        }))
    }
}

struct UreqConnection {
    agent: Agent,
    url: String,
    method: HttpMethod,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    head: Option<Parts>,
    stream: Option<Body>,
    released: bool,
}

impl UreqConnection {
    fn ensure_unsent(&self) -> Result<(), ExchangeError> {
        if self.released {
            return Err(ExchangeError::NotConnected);
        }
        if self.head.is_some() {
            return Err(ExchangeError::AlreadyConnected);
        }
        Ok(())
    }

    fn head(&self) -> Result<&Parts, ExchangeError> {
        self.head.as_ref().ok_or(ExchangeError::NotConnected)
    }
}

impl Connection for UreqConnection {
    fn set_method(&mut self, method: HttpMethod) -> Result<(), ExchangeError> {
        self.ensure_unsent()?;
        self.method = method;
        Ok(())
    }

    fn add_request_property(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write_body(&mut self, body: &[u8]) -> Result<(), ExchangeError> {
        self.ensure_unsent()?;
        if self.method == HttpMethod::Get {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "GET requests carry no body").into());
        }
        self.body.get_or_insert_with(Vec::new).extend_from_slice(body);
        Ok(())
    }

    fn connect(&mut self) -> Result<(), ExchangeError> {
        if self.released {
            return Err(ExchangeError::NotConnected);
        }
        if self.head.is_some() {
            return Ok(());
        }
        let response = match self.method {
            HttpMethod::Get => {
                let mut request = self.agent.get(&self.url);
                for (name, value) in &self.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                request.call()?
            }
            HttpMethod::Post => {
                let mut request = self.agent.post(&self.url);
                for (name, value) in &self.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                match self.body.take() {
                    Some(body) => request.send(&body[..])?,
                    None => request.send_empty()?,
                }
            }
        };
        debug!(status = response.status().as_u16(), "response head received");
        let (head, stream) = response.into_parts();
        self.head = Some(head);
        self.stream = Some(stream);
        Ok(())
    }

    fn response_code(&mut self) -> Result<u16, ExchangeError> {
        Ok(self.head()?.status.as_u16())
    }

    fn header_fields(&mut self) -> Result<HeaderFields, ExchangeError> {
        let head = self.head()?;
        let status_line = format!(
            "{:?} {} {}",
            head.version,
            head.status.as_u16(),
            head.status.canonical_reason().unwrap_or("")
        );

        let headers = &head.headers;
        let mut fields: HeaderFields = vec![(None, vec![status_line.trim_end().to_string()])];
        for name in headers.keys() {
            let values = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            fields.push((Some(name.as_str().to_string()), values));
        }
        Ok(fields)
    }

    fn body_reader(&mut self) -> Result<Box<dyn Read + '_>, ExchangeError> {
        let code = self.head()?.status.as_u16();
        if code >= 400 {
            return Err(ExchangeError::HttpStatus(code));
        }
        // The stream is handed out once; a second read finds nothing to read.
        let stream = self.stream.take().ok_or(ExchangeError::NotConnected)?;
        Ok(Box::new(stream.into_reader()))
    }

    fn disconnect(&mut self) {
        self.head = None;
        self.stream = None;
        self.body = None;
        self.released = true;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_malformed_url() {
        let err = UreqConnector.open("not a url", &ClientConfig::default(), &AbortSignal::new()).err().unwrap();
        assert!(matches!(err, ExchangeError::InvalidUrl { .. }));
    }

    #[test]
    fn open_rejects_non_http_scheme() {
        let err = UreqConnector.open("ftp://example.com/file", &ClientConfig::default(), &AbortSignal::new()).err().unwrap();
        assert!(matches!(err, ExchangeError::InvalidUrl { ref reason, .. } if reason.contains("ftp")));
    }

    #[test]
    fn response_side_requires_connect() {
        let mut conn = UreqConnector.open("http://127.0.0.1:1/", &ClientConfig::default(), &AbortSignal::new()).unwrap();
        assert!(matches!(conn.response_code(), Err(ExchangeError::NotConnected)));
        assert!(matches!(conn.header_fields(), Err(ExchangeError::NotConnected)));
        assert!(conn.body_reader().is_err());
    }

    #[test]
    fn get_refuses_a_body() {
        let mut conn = UreqConnector.open("http://127.0.0.1:1/", &ClientConfig::default(), &AbortSignal::new()).unwrap();
        let err = conn.write_body(b"a=1").unwrap_err();
        assert!(matches!(err, ExchangeError::Io(ref e) if e.kind() == io::ErrorKind::InvalidInput));
    }

    #[test]
    fn released_connection_refuses_everything() {
        let mut conn = UreqConnector.open("http://127.0.0.1:1/", &ClientConfig::default(), &AbortSignal::new()).unwrap();
        conn.disconnect();
        assert!(matches!(conn.set_method(HttpMethod::Post), Err(ExchangeError::NotConnected)));
        assert!(matches!(conn.connect(), Err(ExchangeError::NotConnected)));
    }
}

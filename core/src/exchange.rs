//! One HTTP request/response cycle over one connection.
//!
//! # Design
//! An `Exchange` is a state machine:
//!
//! ```text
//! Pending --connect--> Connecting --> Succeeded --close--> Closed
//!    |                     |      \-> Failed ----close--> Closed
//!    \------ any error ----+---------^
//! ```
//!
//! Phases only move forward. The response fields are produced once, in
//! order (status code, header fields and status line, body), while leaving
//! `Connecting`; after that every accessor answers from the stored fields
//! and never touches the connection again.
//!
//! No operation returns an error. Any error at any stage goes through the
//! failure path: recover whatever the connection can still give (each read
//! on its own, each swallowing its own error), fill the rest with defaults,
//! record the cause, release the connection. A failed exchange therefore
//! always has a code, a non-empty status line, a header map and a body.
//!
//! The exchange shares an `AbortSignal` with whoever may cancel it from
//! another thread. Once the signal fires, the exchange stops between
//! stages, skips the recovery reads and fails with `Cancelled`.

use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::abort::AbortSignal;
use crate::config::ClientConfig;
use crate::connection::{Connection, Connector, HeaderFields};
use crate::error::ExchangeError;
use crate::form::encode_args;
use crate::http::{
    parse_status_line, Args, Failure, Headers, HttpMethod, Outcome, Response, CODE_UNKNOWN,
    STATUS_REQUEST_FAILED,
};

/// Where an exchange is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Connecting,
    Succeeded,
    Failed,
    Closed,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Pending => 0,
            Phase::Connecting => 1,
            Phase::Succeeded | Phase::Failed => 2,
            Phase::Closed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() >= 2
    }
}

#[derive(Debug, Default)]
struct Fields {
    code: Option<u16>,
    status_line: Option<String>,
    headers: Option<Headers>,
    body: Option<String>,
}

impl Fields {
    /// Take code and status line from raw header fields, keep the rest as headers.
    fn apply_header_fields(&mut self, raw: HeaderFields) {
        let mut headers = Headers::new();
        for (name, values) in raw {
            match name {
                Some(name) if !name.is_empty() => {
                    headers.entry(name).or_default().extend(values);
                }
                _ => {
                    if let Some(line) = values.into_iter().next().filter(|l| !l.is_empty()) {
                        self.status_line.get_or_insert(line);
                    }
                }
            }
        }
        self.headers = Some(headers);

        if matches!(self.code, None | Some(CODE_UNKNOWN)) {
            if let Some((code, _)) = self.status_line.as_deref().and_then(parse_status_line) {
                self.code = Some(code);
            }
        }
    }

    fn fill_defaults(&mut self) {
        self.code.get_or_insert(CODE_UNKNOWN);
        if self.status_line.as_deref().map_or(true, str::is_empty) {
            self.status_line = Some(STATUS_REQUEST_FAILED.to_string());
        }
        self.headers.get_or_insert_with(Headers::new);
        self.body.get_or_insert_with(String::new);
    }

    fn into_response(self) -> Response {
        Response {
            code: self.code.unwrap_or(CODE_UNKNOWN),
            status_line: self.status_line.unwrap_or_default(),
            headers: self.headers.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
        }
    }
}

/// A single HTTP exchange and the connection it owns.
pub struct Exchange {
    url: String,
    phase: Phase,
    conn: Option<Box<dyn Connection>>,
    fields: Fields,
    cause: Option<ExchangeError>,
    abort: Arc<AbortSignal>,
}

impl Exchange {
    /// Open a connection to `url`. An open error fails the exchange at once.
    pub fn open(connector: &dyn Connector, url: &str, config: &ClientConfig) -> Self {
        Self::open_with_abort(connector, url, config, AbortSignal::new())
    }

    /// Like `open`, with teardown driven by a signal shared with another thread.
    pub fn open_with_abort(
        connector: &dyn Connector,
        url: &str,
        config: &ClientConfig,
        abort: Arc<AbortSignal>,
    ) -> Self {
        let mut exchange = Exchange {
            url: url.to_string(),
            phase: Phase::Pending,
            conn: None,
            fields: Fields::default(),
            cause: None,
            abort,
        };
        match connector.open(url, config, &exchange.abort) {
            Ok(conn) => exchange.conn = Some(conn),
            Err(e) => exchange.fail(e),
        }
        exchange
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_failed(&self) -> bool {
        self.cause.is_some()
    }

    pub fn cause(&self) -> Option<&ExchangeError> {
        self.cause.as_ref()
    }

    pub fn set_method(&mut self, method: HttpMethod) {
        let Some(conn) = self.configurable() else {
            return;
        };
        if let Err(e) = conn.set_method(method) {
            self.fail(e);
        }
    }

    /// Like `set_method`, for a method given by name.
    pub fn set_method_name(&mut self, method: &str) {
        if self.phase != Phase::Pending {
            return;
        }
        match method.parse() {
            Ok(method) => self.set_method(method),
            Err(e) => self.fail(e),
        }
    }

    /// Add request headers. Empty names are skipped. Unless one of them is a
    /// `Connection` header, `Connection: Keep-Alive` is added as well.
    pub fn add_headers(&mut self, headers: &[(String, String)]) {
        if headers.is_empty() {
            return;
        }
        let Some(conn) = self.configurable() else {
            return;
        };
        let mut has_connection = false;
        for (name, value) in headers {
            if name.is_empty() {
                continue;
            }
            conn.add_request_property(name, value);
            has_connection |= name.eq_ignore_ascii_case("connection");
        }
        if !has_connection {
            conn.add_request_property("Connection", "Keep-Alive");
        }
    }

    /// Write `args` as a form-encoded request body. No keys, no write.
    pub fn add_args(&mut self, args: &Args) {
        let body = encode_args(args);
        if body.is_empty() {
            return;
        }
        let Some(conn) = self.configurable() else {
            return;
        };
        if let Err(e) = conn.write_body(body.as_bytes()) {
            self.fail(e);
        }
    }

    /// Send the request and read the whole response. Runs at most once.
    pub fn connect(&mut self) {
        if self.phase != Phase::Pending || self.conn.is_none() {
            return;
        }
        self.transition(Phase::Connecting);
        debug!(url = %self.url, "connecting");
        let connected = match self.conn.as_mut() {
            Some(conn) => conn.connect(),
            None => Err(ExchangeError::NotConnected),
        };
        if let Err(e) = connected {
            self.fail(e);
            return;
        }
        match self.populate() {
            Ok(()) => self.transition(Phase::Succeeded),
            Err(e) => self.fail(e),
        }
    }

    pub fn status_code(&mut self) -> u16 {
        self.settle();
        self.fields.code.unwrap_or(CODE_UNKNOWN)
    }

    pub fn status_line(&mut self) -> &str {
        self.settle();
        self.fields.status_line.get_or_insert_with(String::new)
    }

    pub fn headers(&mut self) -> &Headers {
        self.settle();
        self.fields.headers.get_or_insert_with(Headers::new)
    }

    pub fn body(&mut self) -> &str {
        self.settle();
        self.fields.body.get_or_insert_with(String::new)
    }

    /// Release the connection. Closing before a result was produced cancels
    /// the exchange without reading anything more from the connection.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        if !self.phase.is_terminal() {
            debug!(url = %self.url, "closed before completion");
            self.fields.fill_defaults();
            self.cause = Some(ExchangeError::Cancelled);
        }
        self.release();
        self.transition(Phase::Closed);
    }

    /// Run the exchange to completion if needed, close it, and hand out the result.
    pub fn finish(mut self) -> Outcome {
        self.settle();
        self.close();
        let response = std::mem::take(&mut self.fields).into_response();
        match self.cause.take() {
            None => Ok(response),
            Some(cause) => Err(Failure { response, cause }),
        }
    }

    fn settle(&mut self) {
        if self.phase == Phase::Pending {
            self.connect();
        }
    }

    fn configurable(&mut self) -> Option<&mut Box<dyn Connection>> {
        if self.phase != Phase::Pending {
            return None;
        }
        self.conn.as_mut()
    }

    fn populate(&mut self) -> Result<(), ExchangeError> {
        let abort = Arc::clone(&self.abort);
        let checkpoint = || if abort.is_aborted() { Err(ExchangeError::Cancelled) } else { Ok(()) };
        let conn = self.conn.as_mut().ok_or(ExchangeError::NotConnected)?;
        checkpoint()?;
        self.fields.code = Some(conn.response_code()?);
        checkpoint()?;
        self.fields.apply_header_fields(conn.header_fields()?);
        self.fields.status_line.get_or_insert_with(String::new);
        checkpoint()?;
        let body = read_lines(conn.body_reader()?)?;
        checkpoint()?;
        self.fields.body = Some(body);
        Ok(())
    }

    fn fail(&mut self, cause: ExchangeError) {
        if self.phase.is_terminal() {
            return;
        }
        if self.abort.is_aborted() {
            debug!(url = %self.url, error = %cause, "aborted");
            self.fields.fill_defaults();
            self.cause = Some(ExchangeError::Cancelled);
            self.transition(Phase::Failed);
            self.release();
            return;
        }
        warn!(url = %self.url, error = %cause, "request failed");

        if let Some(conn) = self.conn.as_mut() {
            if self.fields.code.is_none() {
                if let Ok(code) = conn.response_code() {
                    self.fields.code = Some(code);
                }
            }
            if self.fields.headers.is_none() {
                if let Ok(raw) = conn.header_fields() {
                    self.fields.apply_header_fields(raw);
                }
            }
            if self.fields.body.is_none() {
                let body = conn
                    .body_reader()
                    .and_then(|reader| read_lines(reader).map_err(ExchangeError::from));
                if let Ok(body) = body {
                    self.fields.body = Some(body);
                }
            }
        }

        self.fields.fill_defaults();
        self.cause = Some(cause);
        self.transition(Phase::Failed);
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.disconnect();
            debug!(url = %self.url, "connection released");
        }
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(next.rank() >= self.phase.rank(), "{:?} -> {:?}", self.phase, next);
        self.phase = next;
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read a body stream line by line, terminating every line with `\n`.
///
/// Bytes that are not UTF-8 are replaced, never rejected.
fn read_lines(reader: impl Read) -> std::io::Result<String> {
    let mut reader = BufReader::new(reader);
    let mut body = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(body);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        body.push_str(&String::from_utf8_lossy(&line));
        body.push('\n');
    }
}

//! Error types for exchanges and the client.
//!
//! # Design
//! `ExchangeError` is the recorded *cause* of a failed exchange. It never
//! propagates out of an exchange operation: the exchange absorbs it, runs
//! its failure path and keeps it for the `Failure` that is delivered later.
//! `ClientError` is the only error a caller sees as a `Result`, and only
//! while building a client.

use std::io;

/// Why an exchange failed.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The URL could not be turned into a connection target.
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The method string is not one this client can send.
    #[error("unsupported method: {0}")]
    InvalidMethod(String),

    /// Request-side configuration was attempted after the request went out.
    #[error("already connected")]
    AlreadyConnected,

    /// A response accessor was used on a connection that never connected.
    #[error("not connected")]
    NotConnected,

    /// The server answered with an error status; the body is not readable.
    #[error("server returned HTTP status {0}")]
    HttpStatus(u16),

    /// Connect, send or receive failed inside the transport. Timeouts land here.
    #[error("transport error: {0}")]
    Transport(#[from] ureq::Error),

    /// Reading or writing a body stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The exchange was closed before it reached a result.
    #[error("exchange cancelled")]
    Cancelled,
}

/// Errors returned while constructing an `HttpClient`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The background runtime could not be started.
    #[error("failed to start background runtime: {0}")]
    Runtime(#[source] io::Error),

    /// A JSON configuration document could not be parsed.
    #[error("invalid client configuration: {0}")]
    Config(#[from] serde_json::Error),
}

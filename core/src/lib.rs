//! Asynchronous single-exchange HTTP wrapper.
//!
//! # Overview
//! `HttpClient` issues one GET or POST per call on a background task and
//! hands the result to a completion callback on a chosen delivery context.
//! Every exchange ends in exactly one `Outcome`, either a `Response` or a
//! `Failure` carrying the same normalized fields plus its cause. Nothing in
//! the exchange path returns an error to the caller or panics on bad input.
//!
//! # Design
//! - `Exchange` owns one `Connection` and walks the state machine
//!   `Pending → Connecting → {Succeeded, Failed} → Closed`.
//! - `Connection`/`Connector` are the I/O seam; `UreqConnector` is the real
//!   transport, tests substitute scripted connections.
//! - `ExchangeHandle::close` cancels an outstanding exchange through its
//!   `AbortSignal`, shutting down the socket; the caller still receives
//!   exactly one (cancelled) failure.
//! - `DeliveryContext` decides which thread runs completions.

pub mod abort;
pub mod client;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod exchange;
pub mod form;
pub mod http;
mod socket;

pub use abort::AbortSignal;
pub use client::{ExchangeHandle, ExchangeSlot, HttpClient, HttpClientBuilder};
pub use config::ClientConfig;
pub use connection::{Connection, Connector, HeaderFields, UreqConnector};
pub use delivery::{delivery_queue, DeliveryContext, DeliveryLoop, DeliveryQueue, WorkerDelivery};
pub use error::{ClientError, ExchangeError};
pub use exchange::{Exchange, Phase};
pub use form::{append_args, encode_args, url_with_args};
pub use http::{Args, Failure, Headers, HttpMethod, Outcome, Response, CODE_UNKNOWN, STATUS_REQUEST_FAILED};

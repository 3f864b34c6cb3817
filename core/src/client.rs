//! The public entry point: issue GET/POST exchanges in the background.
//!
//! # Design
//! `HttpClient` turns a call into a plan (method, URL, merged headers,
//! arguments), runs the plan as one `Exchange` on a blocking task of its
//! runtime, and hands the `Outcome` to its `DeliveryContext`. The caller
//! gets an `ExchangeHandle` back immediately and never blocks.
//!
//! Every exchange delivers exactly one outcome. Closing a handle while its
//! exchange is outstanding does not suppress delivery. The handle fires the
//! exchange's `AbortSignal`, which shuts down its socket from the caller's
//! thread. A blocked connect or read returns at once, the worker skips any
//! further reads, releases the connection and delivers a `Failure` whose
//! cause is `Cancelled`. Closing after completion changes nothing.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::abort::AbortSignal;
use crate::config::ClientConfig;
use crate::connection::{Connector, UreqConnector};
use crate::delivery::{DeliveryContext, WorkerDelivery};
use crate::error::{ClientError, ExchangeError};
use crate::exchange::Exchange;
use crate::form::url_with_args;
use crate::http::{merge_headers, Args, Failure, HttpMethod, Outcome};

const OUTSTANDING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
struct HandleState {
    id: Uuid,
    state: AtomicU8,
    abort: Arc<AbortSignal>,
}

/// Cancellation handle for one outstanding exchange.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    inner: Arc<HandleState>,
}

impl ExchangeHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleState {
                id: Uuid::new_v4(),
                state: AtomicU8::new(OUTSTANDING),
                abort: AbortSignal::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Cancel the exchange if it is still outstanding, tearing down its
    /// connection. Safe to call repeatedly.
    pub fn close(&self) {
        if self
            .inner
            .state
            .compare_exchange(OUTSTANDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(id = %self.inner.id, "exchange closed by caller");
            self.inner.abort.abort();
        }
    }

    /// True once the exchange completed without being cancelled.
    pub fn is_finished(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FINISHED
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Mark natural completion. False if the caller closed the handle first.
    fn complete(&self) -> bool {
        self.inner
            .state
            .compare_exchange(OUTSTANDING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Holds the latest exchange issued from one call site and closes it before
/// the next one starts.
#[derive(Debug, Default)]
pub struct ExchangeSlot {
    current: Mutex<Option<ExchangeHandle>>,
}

impl ExchangeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the held exchange, then issue a new one and hold it.
    pub fn replace_with(&self, issue: impl FnOnce() -> ExchangeHandle) -> ExchangeHandle {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.close();
        }
        let handle = issue();
        *current = Some(handle.clone());
        handle
    }

    pub fn close(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = current.as_ref() {
            handle.close();
        }
    }
}

struct Plan {
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    args: Option<Args>,
}

/// Builder for `HttpClient`.
#[derive(Default)]
pub struct HttpClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    runtime: Option<Handle>,
    delivery: Option<Arc<dyn DeliveryContext>>,
}

impl HttpClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Run exchanges on an existing runtime instead of starting one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Where completions run. Defaults to the worker thread.
    pub fn delivery(mut self, delivery: Arc<dyn DeliveryContext>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn build(self) -> Result<HttpClient, ClientError> {
        let (runtime, handle) = match self.runtime {
            Some(handle) => (None, handle),
            None => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(self.config.worker_threads.max(1))
                    .max_blocking_threads(self.config.max_blocking_threads.max(1))
                    .thread_keep_alive(self.config.keep_alive())
                    .thread_name("exchange-worker")
                    .build()
                    .map_err(ClientError::Runtime)?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };
        Ok(HttpClient {
            config: Arc::new(self.config),
            connector: self.connector.unwrap_or_else(|| Arc::new(UreqConnector)),
            runtime,
            handle,
            delivery: self.delivery.unwrap_or_else(|| Arc::new(WorkerDelivery)),
        })
    }
}

/// Issues exchanges in the background and delivers their outcomes.
pub struct HttpClient {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    /// Set only when the client started its own runtime.
    runtime: Option<Runtime>,
    handle: Handle,
    delivery: Arc<dyn DeliveryContext>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn get<F>(&self, url: &str, on_done: F) -> ExchangeHandle
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.get_with_headers(url, &[], on_done)
    }

    pub fn get_with_headers<F>(&self, url: &str, headers: &[(String, String)], on_done: F) -> ExchangeHandle
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.get_with_args(url, headers, &Args::new(), on_done)
    }

    /// GET with `args` appended to the URL query.
    pub fn get_with_args<F>(
        &self,
        url: &str,
        headers: &[(String, String)],
        args: &Args,
        on_done: F,
    ) -> ExchangeHandle
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let plan = Plan {
            method: HttpMethod::Get,
            url: url_with_args(url, args),
            headers: merge_headers(&self.config.default_headers, headers),
            args: None,
        };
        self.issue(plan, on_done)
    }

    pub fn post<F>(&self, url: &str, args: &Args, on_done: F) -> ExchangeHandle
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.post_with_headers(url, &[], args, on_done)
    }

    /// POST with `args` as a form-encoded body.
    pub fn post_with_headers<F>(
        &self,
        url: &str,
        headers: &[(String, String)],
        args: &Args,
        on_done: F,
    ) -> ExchangeHandle
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let plan = Plan {
            method: HttpMethod::Post,
            url: url.to_string(),
            headers: merge_headers(&self.config.default_headers, headers),
            args: Some(args.clone()),
        };
        self.issue(plan, on_done)
    }

    fn issue<F>(&self, plan: Plan, on_done: F) -> ExchangeHandle
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let handle = ExchangeHandle::new();
        let worker_handle = handle.clone();
        let connector = Arc::clone(&self.connector);
        let config = Arc::clone(&self.config);
        let delivery = Arc::clone(&self.delivery);
        let span = info_span!("exchange", id = %handle.id(), method = %plan.method, url = %plan.url);

        self.handle.spawn_blocking(move || {
            let _entered = span.enter();
            let outcome = execute(connector.as_ref(), &config, plan, &worker_handle);
            delivery.dispatch(Box::new(move || on_done(outcome)));
        });
        handle
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        // A runtime may not block on shutdown from inside another runtime.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        }
    }
}

/// Run one plan to its outcome on the current (background) thread.
fn execute(connector: &dyn Connector, config: &ClientConfig, plan: Plan, handle: &ExchangeHandle) -> Outcome {
    debug!("request start");
    let abort = Arc::clone(&handle.inner.abort);
    let mut exchange = Exchange::open_with_abort(connector, &plan.url, config, abort);
    exchange.set_method(plan.method);
    exchange.add_headers(&plan.headers);
    if let Some(args) = &plan.args {
        exchange.add_args(args);
    }
    if handle.is_cancelled() {
        exchange.close();
    } else {
        exchange.connect();
    }
    let outcome = exchange.finish();

    let outcome = if handle.complete() {
        outcome
    } else {
        let response = match outcome {
            Ok(response) => response,
            Err(failure) => failure.response,
        };
        Err(Failure {
            response,
            cause: ExchangeError::Cancelled,
        })
    };

    match &outcome {
        Ok(response) => info!(code = response.code, "request finished: succeeded"),
        Err(failure) if failure.is_cancelled() => info!("request finished: cancelled"),
        Err(failure) => info!(code = failure.code(), error = %failure.cause, "request finished: failed"),
    }
    outcome
}

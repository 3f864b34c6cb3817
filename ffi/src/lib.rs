//! C-ABI wrapper around `exchange-core`.
//!
//! # Overview
//! Lets any language with a C FFI issue background GET/POST exchanges and
//! receive exactly one completion callback per exchange, without touching
//! Rust's runtime or serde directly.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Null arguments are tolerated: constructors return null, `free`/`close`
//!   functions do nothing.
//! - Completions run on a background worker thread. Strings handed to a
//!   callback are borrowed for the duration of the call only.
//! - The C caller owns returned client and handle pointers and must release
//!   them with the matching `exchange_*_free` function. Freeing a handle
//!   does not cancel its exchange; `exchange_handle_close` does.

pub mod types;

use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use exchange_core::{ClientConfig, HttpClient};
use tracing_subscriber::EnvFilter;

use types::*;

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install a `tracing` subscriber writing to stderr.
///
/// The filter comes from `EXCHANGE_LOG`, then `RUST_LOG`, else `info`.
/// Returns false if a global subscriber was already installed.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_logging_init() -> bool {
    catch_unwind(|| {
        let filter = EnvFilter::try_from_env("EXCHANGE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    })
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

fn into_ffi_client(config: ClientConfig) -> *mut FfiClient {
    match HttpClient::new(config) {
        Ok(client) => Box::into_raw(Box::new(FfiClient { inner: client })),
        Err(err) => {
            tracing::error!(error = %err, "client construction failed");
            ptr::null_mut()
        }
    }
}

/// Create a client with the given timeouts. Zero keeps the default.
///
/// Returns null if the background runtime cannot start.
/// The caller must free the returned pointer with `exchange_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_client_new(connect_timeout_ms: u64, read_timeout_ms: u64) -> *mut FfiClient {
    catch_unwind(|| {
        let mut config = ClientConfig::default();
        if connect_timeout_ms > 0 {
            config.connect_timeout_ms = connect_timeout_ms;
        }
        if read_timeout_ms > 0 {
            config.read_timeout_ms = read_timeout_ms;
        }
        into_ffi_client(config)
    })
    .unwrap_or(ptr::null_mut())
}

/// Create a client from a JSON `ClientConfig`; missing fields keep defaults.
///
/// Returns null if `config_json` is null or does not parse.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_client_from_json(config_json: *const c_char) -> *mut FfiClient {
    catch_unwind(|| {
        let Some(raw) = (unsafe { str_arg(config_json) }) else {
            return ptr::null_mut();
        };
        match ClientConfig::from_json(raw) {
            Ok(config) => into_ffi_client(config),
            Err(err) => {
                tracing::error!(error = %err, "invalid client config");
                ptr::null_mut()
            }
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Free a client. Safe to call with null.
///
/// Blocks until exchanges already running on the client finish.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Exchanges
// ---------------------------------------------------------------------------

fn into_ffi_handle(inner: exchange_core::ExchangeHandle) -> *mut FfiExchangeHandle {
    Box::into_raw(Box::new(FfiExchangeHandle { inner }))
}

/// Issue a GET in the background.
///
/// `headers` may be null when `headers_len` is 0. Returns null, without
/// invoking any callback, if `client` or `url` is null. Otherwise exactly
/// one of the callbacks runs later.
/// The caller must free the returned pointer with `exchange_handle_free`.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_get(
    client: *const FfiClient,
    url: *const c_char,
    headers: *const FfiHeader,
    headers_len: u32,
    callback: FfiCallback,
) -> *mut FfiExchangeHandle {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return ptr::null_mut();
        }
        let Some(url) = (unsafe { str_arg(url) }) else {
            return ptr::null_mut();
        };
        let client = unsafe { &*client };
        let headers = unsafe { header_pairs(headers, headers_len) };
        let callback = SendCallback::new(callback);
        let handle = client
            .inner
            .get_with_headers(url, &headers, move |outcome| callback.deliver(outcome));
        into_ffi_handle(handle)
    }))
    .unwrap_or(ptr::null_mut())
}

/// Issue a form POST in the background.
///
/// `args_json` is a JSON object of arguments; null or empty sends no body.
/// Returns null, without invoking any callback, if `client` or `url` is
/// null or `args_json` is not a JSON object.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_post(
    client: *const FfiClient,
    url: *const c_char,
    headers: *const FfiHeader,
    headers_len: u32,
    args_json: *const c_char,
    callback: FfiCallback,
) -> *mut FfiExchangeHandle {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return ptr::null_mut();
        }
        let Some(url) = (unsafe { str_arg(url) }) else {
            return ptr::null_mut();
        };
        let Some(args) = parse_args(unsafe { str_arg(args_json) }) else {
            tracing::warn!("exchange_post: args_json is not a JSON object");
            return ptr::null_mut();
        };
        let client = unsafe { &*client };
        let headers = unsafe { header_pairs(headers, headers_len) };
        let callback = SendCallback::new(callback);
        let handle = client
            .inner
            .post_with_headers(url, &headers, &args, move |outcome| callback.deliver(outcome));
        into_ffi_handle(handle)
    }))
    .unwrap_or(ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cancel the exchange if still outstanding. Its `on_failed` callback then
/// runs once with a cancellation message. Safe to call with null or twice.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_handle_close(handle: *const FfiExchangeHandle) {
    if !handle.is_null() {
        let _ = catch_unwind(|| unsafe { &*handle }.inner.close());
    }
}

/// True once the exchange completed without being cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_handle_is_finished(handle: *const FfiExchangeHandle) -> bool {
    if handle.is_null() {
        return false;
    }
    catch_unwind(|| unsafe { &*handle }.inner.is_finished()).unwrap_or(false)
}

/// Free a handle. Safe to call with null. Does not cancel the exchange.
#[unsafe(no_mangle)]
pub extern "C" fn exchange_handle_free(handle: *mut FfiExchangeHandle) {
    if !handle.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(handle) });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{c_void, CStr, CString};
    use std::net::SocketAddr;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_secs(10);

    #[derive(Debug, PartialEq)]
    enum Event {
        Succeeded { code: u16, status_line: String, headers: String, body: String },
        Failed { code: u16, status_line: String, message: String },
    }

    fn owned(ptr: *const c_char) -> String {
        unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string()
    }

    extern "C" fn on_succeed(
        user_data: *mut c_void,
        code: u16,
        status_line: *const c_char,
        headers_json: *const c_char,
        body: *const c_char,
    ) {
        let tx = unsafe { &*(user_data as *const mpsc::Sender<Event>) };
        let _ = tx.send(Event::Succeeded {
            code,
            status_line: owned(status_line),
            headers: owned(headers_json),
            body: owned(body),
        });
    }

    extern "C" fn on_failed(
        user_data: *mut c_void,
        code: u16,
        status_line: *const c_char,
        error_message: *const c_char,
    ) {
        let tx = unsafe { &*(user_data as *const mpsc::Sender<Event>) };
        let _ = tx.send(Event::Failed {
            code,
            status_line: owned(status_line),
            message: owned(error_message),
        });
    }

    /// The sender is leaked so `user_data` outlives every callback.
    fn recording_callback() -> (FfiCallback, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let user_data = Box::into_raw(Box::new(tx)) as *mut c_void;
        let callback = FfiCallback {
            on_succeed: Some(on_succeed),
            on_failed: Some(on_failed),
            user_data,
        };
        (callback, rx)
    }

    fn start_server() -> SocketAddr {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });
        addr
    }

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    // --- lifecycle ---

    #[test]
    fn client_new_and_free() {
        let client = exchange_client_new(0, 0);
        assert!(!client.is_null());
        assert_eq!(unsafe { &*client }.inner.config().connect_timeout_ms, 3000);
        exchange_client_free(client);
    }

    #[test]
    fn client_new_applies_timeouts() {
        let client = exchange_client_new(1000, 2000);
        let config = unsafe { &*client }.inner.config();
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.read_timeout_ms, 2000);
        exchange_client_free(client);
    }

    #[test]
    fn client_from_json() {
        let raw = cstr(r#"{"read_timeout_ms": 750}"#);
        let client = exchange_client_from_json(raw.as_ptr());
        assert!(!client.is_null());
        assert_eq!(unsafe { &*client }.inner.config().read_timeout_ms, 750);
        exchange_client_free(client);

        let bad = cstr("{not json");
        assert!(exchange_client_from_json(bad.as_ptr()).is_null());
        assert!(exchange_client_from_json(ptr::null()).is_null());
    }

    #[test]
    fn free_and_close_tolerate_null() {
        exchange_client_free(ptr::null_mut());
        exchange_handle_free(ptr::null_mut());
        exchange_handle_close(ptr::null());
        assert!(!exchange_handle_is_finished(ptr::null()));
    }

    // --- argument checks ---

    #[test]
    fn get_with_null_arguments_returns_null() {
        let (callback, rx) = recording_callback();
        let url = cstr("http://127.0.0.1:1/");
        assert!(exchange_get(ptr::null(), url.as_ptr(), ptr::null(), 0, callback).is_null());

        let client = exchange_client_new(0, 0);
        assert!(exchange_get(client, ptr::null(), ptr::null(), 0, callback).is_null());
        exchange_client_free(client);
        assert!(rx.try_recv().is_err(), "no callback for a refused call");
    }

    #[test]
    fn post_with_non_object_args_returns_null() {
        let (callback, rx) = recording_callback();
        let client = exchange_client_new(0, 0);
        let url = cstr("http://127.0.0.1:1/");
        let args = cstr("[1,2,3]");

        let handle = exchange_post(client, url.as_ptr(), ptr::null(), 0, args.as_ptr(), callback);
        assert!(handle.is_null());
        exchange_client_free(client);
        assert!(rx.try_recv().is_err());
    }

    // --- delivery ---

    #[test]
    fn unreachable_host_calls_on_failed_once() {
        let (callback, rx) = recording_callback();
        let client = exchange_client_new(500, 500);
        let url = cstr("http://127.0.0.1:1/banner/json");

        let handle = exchange_get(client, url.as_ptr(), ptr::null(), 0, callback);
        assert!(!handle.is_null());

        match rx.recv_timeout(WAIT).unwrap() {
            Event::Failed { code, status_line, message } => {
                assert_eq!(code, 0);
                assert_eq!(status_line, exchange_core::STATUS_REQUEST_FAILED);
                assert!(!message.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        exchange_handle_free(handle);
        exchange_client_free(client);
    }

    #[test]
    fn get_banner_calls_on_succeed_with_headers_json() {
        let addr = start_server();
        let (callback, rx) = recording_callback();
        let client = exchange_client_new(0, 0);
        let url = cstr(&format!("http://{addr}/banner/json"));
        let key = cstr("X-Request-Tag");
        let value = cstr("ffi");
        let headers = [FfiHeader { key: key.as_ptr(), value: value.as_ptr() }];

        let handle = exchange_get(client, url.as_ptr(), headers.as_ptr(), 1, callback);

        match rx.recv_timeout(WAIT).unwrap() {
            Event::Succeeded { code, status_line, headers, body } => {
                assert_eq!(code, 200);
                assert_eq!(status_line, "HTTP/1.1 200 OK");
                let headers: serde_json::Value = serde_json::from_str(&headers).unwrap();
                assert_eq!(headers["content-type"][0], "application/json");
                assert_eq!(body, "{\"a\":1}\n");
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert!(exchange_handle_is_finished(handle));
        exchange_handle_free(handle);
        exchange_client_free(client);
    }

    #[test]
    fn post_login_sends_args() {
        let addr = start_server();
        let (callback, rx) = recording_callback();
        let client = exchange_client_new(0, 0);
        let url = cstr(&format!("http://{addr}/user/login"));
        let args = cstr(r#"{"username":"test0"}"#);

        let handle = exchange_post(client, url.as_ptr(), ptr::null(), 0, args.as_ptr(), callback);

        match rx.recv_timeout(WAIT).unwrap() {
            Event::Succeeded { body, .. } => {
                let reply: mock_server::LoginReply = serde_json::from_str(&body).unwrap();
                assert_eq!(reply.username.as_deref(), Some("test0"));
            }
            other => panic!("expected success, got {other:?}"),
        }
        exchange_handle_free(handle);
        exchange_client_free(client);
    }

    #[test]
    fn close_reports_cancellation_through_on_failed() {
        let addr = start_server();
        let (callback, rx) = recording_callback();
        let client = exchange_client_new(0, 0);
        let url = cstr(&format!("http://{addr}/slow/3000"));

        let handle = exchange_get(client, url.as_ptr(), ptr::null(), 0, callback);
        std::thread::sleep(Duration::from_millis(300));
        let closed_at = std::time::Instant::now();
        exchange_handle_close(handle);
        exchange_handle_close(handle);

        match rx.recv_timeout(WAIT).unwrap() {
            Event::Failed { code, status_line, message } => {
                assert!(closed_at.elapsed() < Duration::from_millis(1500));
                assert_eq!(code, 0);
                assert_eq!(status_line, exchange_core::STATUS_REQUEST_FAILED);
                assert_eq!(message, "exchange cancelled");
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(!exchange_handle_is_finished(handle));
        exchange_handle_free(handle);
        exchange_client_free(client);
    }

    #[test]
    fn null_callbacks_are_skipped() {
        let client = exchange_client_new(500, 500);
        let url = cstr("http://127.0.0.1:1/");
        let callback = FfiCallback {
            on_succeed: None,
            on_failed: None,
            user_data: ptr::null_mut(),
        };
        let handle = exchange_get(client, url.as_ptr(), ptr::null(), 0, callback);
        assert!(!handle.is_null());
        exchange_handle_free(handle);
        exchange_client_free(client);
    }
}

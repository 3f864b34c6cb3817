//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Opaque boxes wrap the core client and handle. Callbacks are plain C
//! function pointers plus a `user_data` pointer the library never reads.
//! Conversions from C input and into callback arguments live here so
//! `lib.rs` stays focused on the `extern "C"` surface.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use exchange_core::{Args, ExchangeHandle, HttpClient, Outcome};

/// Opaque handle to an `HttpClient`. C callers receive a pointer to this
/// and pass it back into every FFI function.
pub struct FfiClient {
    pub(crate) inner: HttpClient,
}

/// Opaque handle to one issued exchange.
pub struct FfiExchangeHandle {
    pub(crate) inner: ExchangeHandle,
}

/// A single request header as a key-value pair of C strings.
///
/// The library copies both strings before the call returns.
#[repr(C)]
pub struct FfiHeader {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Called once when the exchange succeeds.
///
/// Arguments: `user_data`, status code, status line, headers as a JSON
/// object string, body. The strings are valid only during the call.
pub type FfiOnSucceed = extern "C" fn(
    user_data: *mut c_void,
    code: u16,
    status_line: *const c_char,
    headers_json: *const c_char,
    body: *const c_char,
);

/// Called once when the exchange fails or is cancelled.
///
/// Arguments: `user_data`, status code (0 if unknown), status line, error
/// message. The strings are valid only during the call.
pub type FfiOnFailed = extern "C" fn(
    user_data: *mut c_void,
    code: u16,
    status_line: *const c_char,
    error_message: *const c_char,
);

/// Completion callbacks for one exchange. Either pointer may be null.
///
/// Callbacks run on a background thread; `user_data` must be safe to use
/// from there.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiCallback {
    pub on_succeed: Option<FfiOnSucceed>,
    pub on_failed: Option<FfiOnFailed>,
    pub user_data: *mut c_void,
}

/// Moves a callback onto the worker thread.
pub(crate) struct SendCallback(FfiCallback);

// SAFETY: the caller promises `user_data` may be used from any thread.
unsafe impl Send for SendCallback {}

impl SendCallback {
    pub(crate) fn new(callback: FfiCallback) -> Self {
        Self(callback)
    }

    pub(crate) fn deliver(self, outcome: Outcome) {
        let callback = self.0;
        match outcome {
            Ok(response) => {
                if let Some(on_succeed) = callback.on_succeed {
                    let status_line = c_string(&response.status_line);
                    let headers = c_string(&response.headers_json());
                    let body = c_string(&response.body);
                    on_succeed(
                        callback.user_data,
                        response.code,
                        status_line.as_ptr(),
                        headers.as_ptr(),
                        body.as_ptr(),
                    );
                }
            }
            Err(failure) => {
                if let Some(on_failed) = callback.on_failed {
                    let status_line = c_string(failure.status_line());
                    let message = c_string(&failure.cause.to_string());
                    on_failed(
                        callback.user_data,
                        failure.code(),
                        status_line.as_ptr(),
                        message.as_ptr(),
                    );
                }
            }
        }
    }
}

/// Interior NULs cannot cross into C; they are dropped.
pub(crate) fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

/// Borrow a C string as `&str`. Null or invalid UTF-8 gives `None`.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Copy a C header array. Entries with a null or non-UTF-8 key or value are
/// skipped.
///
/// # Safety
/// `headers` must be null or point to `len` valid `FfiHeader` values.
pub(crate) unsafe fn header_pairs(headers: *const FfiHeader, len: u32) -> Vec<(String, String)> {
    if headers.is_null() || len == 0 {
        return Vec::new();
    }
    let headers = unsafe { std::slice::from_raw_parts(headers, len as usize) };
    headers
        .iter()
        .filter_map(|h| {
            let key = unsafe { str_arg(h.key) }?;
            let value = unsafe { str_arg(h.value) }?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse POST arguments. Null or empty means no arguments; anything other
/// than a JSON object is rejected.
pub(crate) fn parse_args(raw: Option<&str>) -> Option<Args> {
    match raw.map(str::trim) {
        None | Some("") => Some(Args::new()),
        Some(raw) => match serde_json::from_str(raw) {
            Ok(serde_json::Value::Object(args)) => Some(args),
            _ => None,
        },
    }
}

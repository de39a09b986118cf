//! FFI bindings for Synheart Capture
//!
//! This module provides C-compatible functions for driving a capture session from
//! a host UI. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `capture_free_string`.
//!
//! Outbound collector messages are not written anywhere by the library; the host
//! drains them with `capture_session_drain_outbox` and forwards them over its own
//! socket.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::channel::OutboxTransport;
use crate::config::CaptureConfig;
use crate::events::{CaptureEvent, Notification};
use crate::session::CaptureSession;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Join already-serialized JSON values into one array
fn vec_to_json_array(vec: Vec<String>) -> String {
    format!("[{}]", vec.join(","))
}

fn notifications_to_json(notifications: &[Notification]) -> *mut c_char {
    match serde_json::to_string(notifications) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Session API
// ============================================================================

/// Opaque handle to a capture session
pub struct CaptureSessionHandle {
    session: CaptureSession<OutboxTransport>,
}

/// Create a capture session.
///
/// The delivery channel starts closed; call `capture_session_set_channel_open`
/// once the host's connection is ready.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a handle that must be freed with `capture_session_free`.
/// - Returns NULL on error; call `capture_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn capture_session_new(
    config_json: *const c_char,
) -> *mut CaptureSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        CaptureConfig::default()
    } else {
        let json_str = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match CaptureConfig::from_json(&json_str) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match CaptureSession::new(config, OutboxTransport::closed()) {
        Ok(session) => Box::into_raw(Box::new(CaptureSessionHandle { session })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a capture session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `capture_session_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn capture_session_free(session: *mut CaptureSessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Dispatch one JSON event and return the resulting notifications as a JSON array.
///
/// # Safety
/// - `session` must be a valid pointer returned by `capture_session_new`.
/// - `event_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `capture_free_string`.
/// - Returns NULL on error (malformed event, or input the current stage rejects);
///   call `capture_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn capture_session_handle_event(
    session: *mut CaptureSessionHandle,
    event_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *session;

    let json_str = match cstr_to_string(event_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid event string pointer");
            return ptr::null_mut();
        }
    };

    let event: CaptureEvent = match serde_json::from_str(&json_str) {
        Ok(event) => event,
        Err(e) => {
            set_last_error(&format!("Invalid event: {e}"));
            return ptr::null_mut();
        }
    };

    match handle.session.try_handle(event) {
        Ok(notifications) => notifications_to_json(&notifications),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Mark the host connection open (non-zero) or closed (zero).
///
/// Opening drains any queued messages into the outbox. Returns the resulting
/// notifications as a JSON array.
///
/// # Safety
/// - `session` must be a valid pointer returned by `capture_session_new`.
/// - Returns a newly allocated string that must be freed with `capture_free_string`.
/// - Returns NULL on error; call `capture_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn capture_session_set_channel_open(
    session: *mut CaptureSessionHandle,
    open: i32,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *session;
    let open = open != 0;
    handle.session.channel_mut().transport_mut().set_open(open);

    let event = if open {
        CaptureEvent::ChannelOpened
    } else {
        CaptureEvent::ChannelClosed
    };
    let notifications = handle.session.handle(event);
    notifications_to_json(&notifications)
}

/// Take every message transmitted since the last drain, as a JSON array.
///
/// # Safety
/// - `session` must be a valid pointer returned by `capture_session_new`.
/// - Returns a newly allocated string that must be freed with `capture_free_string`.
/// - Returns NULL on error; call `capture_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn capture_session_drain_outbox(
    session: *mut CaptureSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &mut *session;
    let messages = handle.session.channel_mut().transport_mut().drain();
    string_to_cstr(&vec_to_json_array(messages))
}

/// Snapshot the session state as JSON.
///
/// # Safety
/// - `session` must be a valid pointer returned by `capture_session_new`.
/// - Returns a newly allocated string that must be freed with `capture_free_string`.
/// - Returns NULL on error; call `capture_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn capture_session_snapshot(
    session: *mut CaptureSessionHandle,
) -> *mut c_char {
    clear_last_error();

    if session.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }

    let handle = &*session;

    match serde_json::to_string(&handle.session.snapshot()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Capture functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Capture function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn capture_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Capture function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn capture_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Capture library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn capture_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

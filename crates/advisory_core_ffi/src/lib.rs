//! C ABI over `StoreRuntime` for native hosts.
//!
//! Every function returning `*mut c_char` hands over an owned
//! `InvokeResponse` JSON string that must be released with `ab_free_c_string`.

use std::{
    ffi::{c_char, c_int, c_void, CStr, CString},
    ptr,
    sync::{Arc, Mutex, MutexGuard},
};

use advisory_core::{InvokeError, InvokeResponse, StoreRuntime};
use serde_json::Value;
use tracing::error;

/// Receives every new state snapshot as JSON (`{"event", "payload"}`).
type AbStateCallback = unsafe extern "C" fn(state_json: *const c_char, user_data: *mut c_void);

#[derive(Clone, Copy)]
struct StateListener {
    callback: AbStateCallback,
    user_data: usize,
}

type SharedListener = Arc<Mutex<Option<StateListener>>>;

#[repr(C)]
pub struct AbRuntimeHandle {
    runtime: StoreRuntime,
    listener: SharedListener,
}

/// `ab_storage_event` results.
pub const AB_SLICE_RELOADED: c_int = 1;
pub const AB_SLICE_EMPTY: c_int = 0;
pub const AB_SLICE_INVALID: c_int = -1;

fn listener_slot(listener: &Mutex<Option<StateListener>>) -> MutexGuard<'_, Option<StateListener>> {
    listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Borrows a C string argument; `None` for null pointers, `Err` for invalid UTF-8.
unsafe fn borrow_str<'a>(raw: *const c_char, name: &str) -> Result<Option<&'a str>, InvokeError> {
    if raw.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(raw)
        .to_str()
        .map(Some)
        .map_err(|err| InvokeError::new("invalid_request", format!("{name} must be UTF-8: {err}")))
}

unsafe fn required_str<'a>(raw: *const c_char, name: &str) -> Result<&'a str, InvokeError> {
    borrow_str(raw, name)?
        .ok_or_else(|| InvokeError::new("invalid_request", format!("{name} is null")))
}

unsafe fn runtime<'a>(handle: *mut AbRuntimeHandle) -> Result<&'a StoreRuntime, InvokeError> {
    handle
        .as_ref()
        .map(|handle| &handle.runtime)
        .ok_or_else(|| InvokeError::new("invalid_handle", "runtime handle is null"))
}

fn respond(result: Result<Value, InvokeError>) -> *mut c_char {
    into_c_string(InvokeResponse::from_result(result).to_json())
}

/// Creates a runtime from a JSON store config (null or empty means defaults).
/// Returns null on failure; the reason is logged.
#[no_mangle]
pub unsafe extern "C" fn ab_runtime_new(config_json: *const c_char) -> *mut AbRuntimeHandle {
    let config = match borrow_str(config_json, "config_json") {
        Ok(config) => config.unwrap_or_default(),
        Err(err) => {
            error!(error = %err.message, "ab_runtime_new: rejected config");
            return ptr::null_mut();
        }
    };

    let runtime = match StoreRuntime::new(config) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "ab_runtime_new: failed to initialize store runtime");
            return ptr::null_mut();
        }
    };

    let listener: SharedListener = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&listener);
    runtime.set_event_callback(move |_event, state| {
        let Some(current) = *listener_slot(&slot) else {
            return;
        };
        if let Ok(state_json) = CString::new(state.to_string()) {
            unsafe { (current.callback)(state_json.as_ptr(), current.user_data as *mut c_void) };
        }
    });

    Box::into_raw(Box::new(AbRuntimeHandle { runtime, listener }))
}

#[no_mangle]
pub unsafe extern "C" fn ab_runtime_free(handle: *mut AbRuntimeHandle) {
    if handle.is_null() {
        return;
    }
    let boxed = Box::from_raw(handle);
    boxed.runtime.clear_event_callback();
    *listener_slot(&boxed.listener) = None;
}

/// Registers (or with a null callback, removes) the state listener.
#[no_mangle]
pub unsafe extern "C" fn ab_set_event_callback(
    handle: *mut AbRuntimeHandle,
    callback: Option<AbStateCallback>,
    user_data: *mut c_void,
) {
    let Some(handle) = handle.as_ref() else {
        return;
    };
    *listener_slot(&handle.listener) = callback.map(|callback| StateListener {
        callback,
        user_data: user_data as usize,
    });
}

/// Generic command entry point (`{"command", "payload"}`).
#[no_mangle]
pub unsafe extern "C" fn ab_invoke_json(
    handle: *mut AbRuntimeHandle,
    request_json: *const c_char,
) -> *mut c_char {
    let runtime = match runtime(handle) {
        Ok(runtime) => runtime,
        Err(err) => return respond(Err(err)),
    };
    match required_str(request_json, "request_json") {
        Ok(request) => into_c_string(runtime.invoke_json(request)),
        Err(err) => respond(Err(err)),
    }
}

/// Applies one `{type, payload}` action and returns `{applied, state}`.
#[no_mangle]
pub unsafe extern "C" fn ab_dispatch_action(
    handle: *mut AbRuntimeHandle,
    action_json: *const c_char,
) -> *mut c_char {
    respond((|| {
        let runtime = runtime(handle)?;
        let raw = required_str(action_json, "action_json")?;
        let action: Value = serde_json::from_str(raw)
            .map_err(|err| InvokeError::new("invalid_action", format!("action is not JSON: {err}")))?;
        runtime.dispatch_action(action)
    })())
}

/// Runs startup hydration to completion and returns the hydration report.
#[no_mangle]
pub unsafe extern "C" fn ab_hydrate(handle: *mut AbRuntimeHandle) -> *mut c_char {
    respond(runtime(handle).map(|runtime| {
        serde_json::to_value(runtime.hydrate()).unwrap_or_default()
    }))
}

/// Storage event from another window: reloads the named slice
/// (`documents`, `conversations`, `settings`, `preferences`).
#[no_mangle]
pub unsafe extern "C" fn ab_storage_event(
    handle: *mut AbRuntimeHandle,
    slice_key: *const c_char,
) -> c_int {
    let reloaded = runtime(handle).and_then(|runtime| {
        let key = required_str(slice_key, "slice_key")?;
        runtime.storage_event(key)
    });
    match reloaded {
        Ok(true) => AB_SLICE_RELOADED,
        Ok(false) => AB_SLICE_EMPTY,
        Err(err) => {
            error!(code = %err.code, error = %err.message, "ab_storage_event ignored");
            AB_SLICE_INVALID
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn ab_free_c_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    let _ = CString::from_raw(ptr);
}

fn into_c_string(value: String) -> *mut c_char {
    match CString::new(value) {
        Ok(text) => text.into_raw(),
        Err(_) => c"{\"ok\":false,\"error\":{\"code\":\"encoding_failure\",\"message\":\"response contains invalid NUL\"}}"
            .to_owned()
            .into_raw(),
    }
}

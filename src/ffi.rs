//! C surface over the command queue for native hosts (Swift, Kotlin/JNI).
//! Every string returned here must be released with `labour_string_free`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

use tracing::warn;

use crate::queue::CommandQueue;

/// Opaque handle that owns an open command queue.
/// Hosts hold this as an unsafe pointer and pass it back to the functions below.
pub struct QueueHandle {
    queue: CommandQueue,
}

fn ptr_to_str<'a>(ptr: *const c_char) -> Result<&'a str, ()> {
    if ptr.is_null() {
        return Err(());
    }
    unsafe { CStr::from_ptr(ptr).to_str().map_err(|_| ()) }
}

fn to_cstring_ptr(s: &str) -> *mut c_char {
    CString::new(s).map(|cs| cs.into_raw()).unwrap_or(std::ptr::null_mut())
}

/// Free a C string returned by this library.
#[unsafe(no_mangle)]
pub extern "C" fn labour_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

/// Open a queue at `path` (a file path or ":memory:"). Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn labour_queue_open(path: *const c_char) -> *mut QueueHandle {
    let path = match ptr_to_str(path) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    let opened = if path == ":memory:" {
        CommandQueue::open_in_memory()
    } else {
        CommandQueue::open(path)
    };
    match opened {
        Ok(queue) => Box::into_raw(Box::new(QueueHandle { queue })),
        Err(e) => {
            warn!(error = %e, "labour_queue_open failed");
            std::ptr::null_mut()
        }
    }
}

/// Close a previously opened queue.
#[unsafe(no_mangle)]
pub extern "C" fn labour_queue_close(handle: *mut QueueHandle) {
    if handle.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(handle);
    }
}

/// Enqueue a JSON command envelope. Returns the new command id, or null on error.
#[unsafe(no_mangle)]
pub extern "C" fn labour_queue_enqueue(
    handle: *mut QueueHandle,
    aggregate_id: *const c_char,
    command_json: *const c_char,
) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else { return std::ptr::null_mut() };
    let (aggregate_id, raw) = match (ptr_to_str(aggregate_id), ptr_to_str(command_json)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return std::ptr::null_mut(),
    };
    let command: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return std::ptr::null_mut(),
    };
    match h.queue.enqueue(aggregate_id, &command) {
        Ok(id) => to_cstring_ptr(&id),
        Err(e) => {
            warn!(error = %e, "labour_queue_enqueue failed");
            std::ptr::null_mut()
        }
    }
}

/// Pending commands as a JSON array, in replay order. Null on error.
#[unsafe(no_mangle)]
pub extern "C" fn labour_queue_pending_json(handle: *mut QueueHandle) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else { return std::ptr::null_mut() };
    match h.queue.list_pending() {
        Ok(pending) => match serde_json::to_string(&pending) {
            Ok(s) => to_cstring_ptr(&s),
            Err(_) => std::ptr::null_mut(),
        },
        Err(_) => std::ptr::null_mut(),
    }
}

/// Remove a command by id. Returns 0 on success (including unknown ids).
#[unsafe(no_mangle)]
pub extern "C" fn labour_queue_remove(handle: *mut QueueHandle, id: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else { return 2 };
    let id = match ptr_to_str(id) {
        Ok(s) => s,
        Err(_) => return 3,
    };
    match h.queue.remove(id) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Number of pending commands, or -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn labour_queue_count(handle: *mut QueueHandle) -> i64 {
    let Some(h) = (unsafe { handle.as_ref() }) else { return -1 };
    match h.queue.count() {
        Ok(n) => i64::try_from(n).unwrap_or(i64::MAX),
        Err(_) => -1,
    }
}

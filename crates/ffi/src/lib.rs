//! C ABI for embedding the transcode engine in native hosts.
//!
//! Every string crossing the boundary is UTF-8 JSON. Strings returned to the
//! caller are owned by Rust and must be released with [`free_cstring`].
//!
//! ```c
//! char *job = vidpress_submit("/sdcard/clip.mp4", "/sdcard/clip_720p.mp4", NULL);
//! // {"id":"..."}
//! char *snapshot = vidpress_poll(id);
//! free_cstring(snapshot);
//! free_cstring(job);
//! ```

mod bridge;

pub use bridge::{Bridge, CancelCode, SharedEngine};

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::ffi::{c_char, CStr, CString};

use bridge::error_json;

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Process-wide bridge, created on first use.
fn bridge() -> Result<&'static Bridge, Value> {
    BRIDGE
        .get_or_try_init(|| {
            init_logging();
            Bridge::from_env()
        })
        .map_err(|e| error_json(e, Some("resource_error")))
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // The host may already have installed a subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Reads a required UTF-8 argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn read_arg(ptr: *const c_char, name: &str) -> Result<String, Value> {
    if ptr.is_null() {
        return Err(error_json(format!("{} is null", name), None));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|_| error_json(format!("{} is not valid UTF-8", name), None))
}

/// Hands a JSON value to the caller. Null only if the text contains a NUL.
fn into_raw_json(value: Value) -> *mut c_char {
    CString::new(value.to_string())
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

fn respond(result: Result<Value, Value>) -> *mut c_char {
    into_raw_json(result.unwrap_or_else(|e| e))
}

unsafe fn metadata(file_path: *const c_char) -> Result<Value, Value> {
    let path = read_arg(file_path, "file_path")?;
    Ok(bridge()?.metadata(&path))
}

unsafe fn compress(input: *const c_char, output: *const c_char) -> Result<Value, Value> {
    let input = read_arg(input, "input_file_path")?;
    let output = read_arg(output, "output_file_path")?;
    Ok(bridge()?.compress(&input, &output))
}

unsafe fn submit(
    input: *const c_char,
    output: *const c_char,
    profile_json: *const c_char,
) -> Result<Value, Value> {
    let input = read_arg(input, "input_file_path")?;
    let output = read_arg(output, "output_file_path")?;
    let profile = if profile_json.is_null() {
        None
    } else {
        Some(read_arg(profile_json, "profile_json")?)
    };
    Ok(bridge()?.submit(&input, &output, profile.as_deref()))
}

unsafe fn poll(job_id: *const c_char) -> Result<Value, Value> {
    let id = read_arg(job_id, "job_id")?;
    Ok(bridge()?.poll(&id))
}

/// Media info of a file as JSON, or `{"error": ...}`.
///
/// # Safety
/// `file_path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn get_video_metadata(file_path: *const c_char) -> *mut c_char {
    respond(metadata(file_path))
}

/// Compresses to MP4 within 720p with the first available of H.264,
/// MPEG-4 or H.265 and blocks until done. Returns the JSON job result.
///
/// # Safety
/// Both arguments must be null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn compress_video(
    input_file_path: *const c_char,
    output_file_path: *const c_char,
) -> *mut c_char {
    respond(compress(input_file_path, output_file_path))
}

/// Queues a job and returns `{"id": ...}` without waiting for it.
///
/// `profile_json` may be null for the default profile.
///
/// # Safety
/// All arguments must be null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn vidpress_submit(
    input_file_path: *const c_char,
    output_file_path: *const c_char,
    profile_json: *const c_char,
) -> *mut c_char {
    respond(submit(input_file_path, output_file_path, profile_json))
}

/// JSON snapshot of a job.
///
/// # Safety
/// `job_id` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vidpress_poll(job_id: *const c_char) -> *mut c_char {
    respond(poll(job_id))
}

/// Requests cancellation. 1 = requested, 0 = job already finished,
/// -1 = unknown id or bad argument.
///
/// # Safety
/// `job_id` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn vidpress_cancel(job_id: *const c_char) -> i32 {
    let Ok(id) = read_arg(job_id, "job_id") else {
        return CancelCode::Unknown as i32;
    };
    match bridge() {
        Ok(bridge) => bridge.cancel(&id) as i32,
        Err(_) => CancelCode::Unknown as i32,
    }
}

/// Releases a string returned by this library. Null is ignored.
///
/// # Safety
/// `ptr` must come from this library and not have been freed already.
#[no_mangle]
pub unsafe extern "C" fn free_cstring(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_json(ptr: *mut c_char) -> Value {
        assert!(!ptr.is_null());
        let text = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        free_cstring(ptr);
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_null_arguments_are_reported_as_json() {
        unsafe {
            let value = take_json(get_video_metadata(std::ptr::null()));
            assert_eq!(value["error"], "file_path is null");

            let input = CString::new("/media/clip.mp4").unwrap();
            let value = take_json(compress_video(input.as_ptr(), std::ptr::null()));
            assert_eq!(value["error"], "output_file_path is null");

            let value = take_json(vidpress_poll(std::ptr::null()));
            assert_eq!(value["error"], "job_id is null");

            assert_eq!(vidpress_cancel(std::ptr::null()), -1);
        }
    }

    #[test]
    fn test_invalid_utf8_is_reported_as_json() {
        let bytes: &[u8] = b"/media/\xff\xfe.mp4\0";
        unsafe {
            let value = take_json(get_video_metadata(bytes.as_ptr() as *const c_char));
            assert_eq!(value["error"], "file_path is not valid UTF-8");
        }
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { free_cstring(std::ptr::null_mut()) };
    }

    #[test]
    fn test_cancel_codes() {
        assert_eq!(CancelCode::Requested as i32, 1);
        assert_eq!(CancelCode::NoOp as i32, 0);
        assert_eq!(CancelCode::Unknown as i32, -1);
    }
}

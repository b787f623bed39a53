//! FFI bindings for Posture Watch
//!
//! C-compatible functions for embedding the monitor in a mobile host. The host
//! owns the camera and the detectors; it pushes detector output in and drains
//! monitor events out as JSON. Returned strings must be freed with
//! `watch_free_string`.
//!
//! Stream identifiers: `0` = pose, `1` = face.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::events::EventQueue;
use crate::monitor::{FaceDetection, PostureMonitor};
use crate::types::{FaceBox, FrameTimestamp, LandmarkSet, StreamKind};

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

fn stream_from_id(stream: i32) -> Option<StreamKind> {
    match stream {
        0 => Some(StreamKind::Pose),
        1 => Some(StreamKind::Face),
        _ => None,
    }
}

/// Map a fallible call onto the 0 / -1 status convention
fn status(result: Result<(), MonitorError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Monitor API
// ============================================================================

/// Opaque handle to a running PostureMonitor and its event queue
pub struct WatchMonitorHandle {
    monitor: PostureMonitor,
    queue: Arc<EventQueue>,
}

impl WatchMonitorHandle {
    fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let queue = Arc::new(EventQueue::new());
        let monitor = PostureMonitor::new(config, queue.clone())?;
        monitor.start();
        Ok(Self { monitor, queue })
    }
}

/// Create and start a monitor.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer that must be freed with `watch_monitor_free`.
/// - Returns NULL on error; call `watch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_new(config_json: *const c_char) -> *mut WatchMonitorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        MonitorConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match MonitorConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match WatchMonitorHandle::new(config) {
        Ok(handle) => Box::into_raw(Box::new(handle)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a monitor.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_free(handle: *mut WatchMonitorHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Open the aggregation round for a captured frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - Returns 1 if the round was opened, 0 if the frame was rejected, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_submit_frame(
    handle: *const WatchMonitorHandle,
    timestamp_ms: i64,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    i32::from((*handle).monitor.submit_frame(FrameTimestamp(timestamp_ms)))
}

/// Push pose detector output for a frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - `landmarks_json` must be a valid null-terminated C string holding a JSON
///   array of `{x, y, z?}` points, or NULL when no body was detected.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_pose_result(
    handle: *const WatchMonitorHandle,
    timestamp_ms: i64,
    landmarks_json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let landmarks = if landmarks_json.is_null() {
        None
    } else {
        let json = match cstr_to_string(landmarks_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid landmarks string pointer");
                return -1;
            }
        };
        match serde_json::from_str::<LandmarkSet>(&json) {
            Ok(set) => Some(set),
            Err(e) => return status(Err(e.into())),
        }
    };

    (*handle)
        .monitor
        .pose_result(FrameTimestamp(timestamp_ms), landmarks.as_ref());
    0
}

/// Push face detector output for a frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - `detection_json` must be a valid null-terminated C string holding
///   `{"landmarks": [...]|null, "faces": [{width_px, height_px}], "image_height_px": n}`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_face_result(
    handle: *const WatchMonitorHandle,
    timestamp_ms: i64,
    detection_json: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let json = match cstr_to_string(detection_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid detection string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<FaceDetection>(&json) {
        Ok(detection) => {
            (*handle)
                .monitor
                .face_result(FrameTimestamp(timestamp_ms), &detection);
            0
        }
        Err(e) => status(Err(e.into())),
    }
}

/// Push face box heights from a separately scheduled face detector.
///
/// Only the viewing distance is updated; no posture round is touched.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - `box_heights_px` must point to `count` readable doubles, or be NULL when `count` is 0.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_face_boxes(
    handle: *const WatchMonitorHandle,
    timestamp_ms: i64,
    image_height_px: u32,
    box_heights_px: *const f64,
    count: usize,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }
    if box_heights_px.is_null() && count > 0 {
        set_last_error("Null face box pointer");
        return -1;
    }

    let faces: Vec<FaceBox> = if count == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(box_heights_px, count)
            .iter()
            .map(|h| FaceBox::with_height(*h))
            .collect()
    };

    let monitor = &(*handle).monitor;
    let distance = monitor.estimator().estimate_faces(image_height_px, &faces);
    monitor.distance_result(FrameTimestamp(timestamp_ms), distance);
    0
}

/// Report a detector failure on one frame.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - `message` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_detector_failed(
    handle: *const WatchMonitorHandle,
    stream: i32,
    timestamp_ms: i64,
    message: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }
    let Some(stream) = stream_from_id(stream) else {
        set_last_error("Unknown stream id");
        return -1;
    };
    let message = cstr_to_string(message).unwrap_or_default();

    (*handle).monitor.detector_failed(
        stream,
        FrameTimestamp(timestamp_ms),
        &MonitorError::detection_failed(stream, message),
    );
    0
}

/// Report that a detector could not be set up; the monitor continues on the other stream.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - `message` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_stream_unavailable(
    handle: *const WatchMonitorHandle,
    stream: i32,
    message: *const c_char,
) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }
    let Some(stream) = stream_from_id(stream) else {
        set_last_error("Unknown stream id");
        return -1;
    };
    let message = cstr_to_string(message).unwrap_or_default();

    (*handle)
        .monitor
        .stream_unavailable(stream, &MonitorError::detector_unavailable(stream, message));
    0
}

/// Drain pending monitor events as a JSON array, oldest first.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - Returns a newly allocated string that must be freed with `watch_free_string`.
/// - Returns NULL on error; call `watch_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_drain_events(
    handle: *const WatchMonitorHandle,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return ptr::null_mut();
    }

    let events = (*handle).queue.drain();
    match serde_json::to_string(&events) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Monitor counters as a JSON object.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - Returns a newly allocated string that must be freed with `watch_free_string`.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_stats(handle: *const WatchMonitorHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return ptr::null_mut();
    }

    match serde_json::to_string(&(*handle).monitor.stats()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop the monitor. Detector output pushed afterwards is ignored.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `watch_monitor_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn watch_monitor_stop(handle: *const WatchMonitorHandle) -> i32 {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    (*handle).monitor.stop();
    0
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Posture Watch functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Posture Watch function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn watch_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Posture Watch call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn watch_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn watch_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MonitorEvent;

    fn drain(handle: *const WatchMonitorHandle) -> Vec<MonitorEvent> {
        unsafe {
            let json = watch_monitor_drain_events(handle);
            assert!(!json.is_null());
            let events = serde_json::from_str(CStr::from_ptr(json).to_str().unwrap()).unwrap();
            watch_free_string(json);
            events
        }
    }

    fn hunched_pose_json() -> CString {
        let mut points = vec![serde_json::json!({"x": 0.5, "y": 0.5}); 33];
        points[11] = serde_json::json!({"x": 0.40, "y": 0.65});
        points[12] = serde_json::json!({"x": 0.60, "y": 0.65});
        points[23] = serde_json::json!({"x": 0.42, "y": 0.50});
        CString::new(serde_json::Value::Array(points).to_string()).unwrap()
    }

    #[test]
    fn test_ffi_monitor_lifecycle() {
        unsafe {
            let handle = watch_monitor_new(ptr::null());
            assert!(!handle.is_null());

            assert_eq!(watch_monitor_submit_frame(handle, 100), 1);
            assert_eq!(watch_monitor_submit_frame(handle, 100), 0);

            let pose = hunched_pose_json();
            assert_eq!(watch_monitor_pose_result(handle, 100, pose.as_ptr()), 0);

            let face = CString::new(
                r#"{"landmarks":null,"faces":[{"width_px":300,"height_px":300}],"image_height_px":1080}"#,
            )
            .unwrap();
            assert_eq!(watch_monitor_face_result(handle, 100, face.as_ptr()), 0);

            let events = drain(handle);
            assert!(events.iter().any(|e| matches!(e, MonitorEvent::Distance { .. })));
            assert!(events.iter().any(|e| matches!(
                e,
                MonitorEvent::Posture { issues, .. } if issues.len() == 1
            )));

            let stats = watch_monitor_stats(handle);
            assert!(!stats.is_null());
            let stats_str = CStr::from_ptr(stats).to_str().unwrap();
            assert!(stats_str.contains("\"rounds_completed\":1"));
            watch_free_string(stats);

            assert_eq!(watch_monitor_stop(handle), 0);
            watch_monitor_free(handle);
        }
    }

    #[test]
    fn test_ffi_face_boxes_update_distance_only() {
        unsafe {
            let handle = watch_monitor_new(ptr::null());
            let heights = [1_500.0_f64, 200.0];
            assert_eq!(
                watch_monitor_face_boxes(handle, 10, 1920, heights.as_ptr(), heights.len()),
                0
            );
            assert_eq!(watch_monitor_face_boxes(handle, 20, 1920, ptr::null(), 0), 0);

            let events = drain(handle);
            let distances: Vec<bool> = events
                .iter()
                .filter_map(|e| match e {
                    MonitorEvent::Distance { distance_cm, .. } => {
                        Some(distance_cm.is_indeterminate())
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(distances, vec![false, true]);
            assert!(!events.iter().any(|e| matches!(e, MonitorEvent::Posture { .. })));
            watch_monitor_free(handle);
        }
    }

    #[test]
    fn test_ffi_stream_unavailable_and_failure() {
        unsafe {
            let handle = watch_monitor_new(ptr::null());
            let message = CString::new("pose model asset missing").unwrap();
            assert_eq!(watch_monitor_stream_unavailable(handle, 0, message.as_ptr()), 0);
            assert_eq!(watch_monitor_stream_unavailable(handle, 7, message.as_ptr()), -1);

            assert_eq!(watch_monitor_submit_frame(handle, 1), 1);
            let timeout = CString::new("inference timeout").unwrap();
            assert_eq!(watch_monitor_detector_failed(handle, 1, 1, timeout.as_ptr()), 0);

            let events = drain(handle);
            assert!(matches!(events[0], MonitorEvent::Error { code: 3, .. }));
            assert!(events.iter().any(|e| matches!(e, MonitorEvent::Error { code: 4, .. })));
            assert!(events.iter().any(|e| matches!(e, MonitorEvent::Posture { .. })));
            watch_monitor_free(handle);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid =
                CString::new(r#"{"thresholds": {"glance_min_x": 0.9, "glance_max_x": 0.1}}"#)
                    .unwrap();
            let handle = watch_monitor_new(invalid.as_ptr());
            assert!(handle.is_null());

            let error = watch_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let handle = watch_monitor_new(ptr::null());
            let bad = CString::new("not json").unwrap();
            assert_eq!(watch_monitor_pose_result(handle, 1, bad.as_ptr()), -1);
            assert!(!watch_last_error().is_null());
            assert_eq!(watch_monitor_submit_frame(ptr::null(), 1), -1);
            watch_monitor_free(handle);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = watch_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}

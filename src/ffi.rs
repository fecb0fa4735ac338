//! The C boundary: record layout, the recognition entry points and the release operation.
//!
//! Every collection handed out by [`perform_ocr`] and friends must be released exactly once with
//! [`cleanup`] (exported as `OCRResult_cleanup`) using the count reported for it. On success
//! the collection is never null, even when no text was found; in that case the count is 0 and
//! the pointer must not be dereferenced. On failure the collection is null and the count is 0.
//!
//! Calls may run concurrently: the default engine is reentrant. A custom engine passed to
//! [`perform_ocr_with`] is only safe to share if its `recognize` is.

use std::{
    ffi::{c_char, CStr, CString},
    panic::{self, AssertUnwindSafe},
    path::Path,
    ptr, slice,
    sync::OnceLock,
};

use image::DynamicImage;

use crate::{
    invoker::{decode_image, load_image, panic_message, recognize_image},
    EngineConfig, EngineError, NormalizedRect, Observation, OcrError, OnnxEngine,
    RecognitionEngine,
};

/// One observation as laid out for C callers (`OCRResult` in `ocr_boundary.h`).
#[repr(C)]
#[derive(Debug)]
pub struct OcrRecord {
    /// NUL-terminated UTF-8, owned by the collection.
    pub text: *mut c_char,
    pub origin_x: f32,
    pub origin_y: f32,
    pub size_width: f32,
    pub size_height: f32,
}

impl OcrRecord {
    fn new(observation: Observation) -> Self {
        let NormalizedRect {
            origin_x,
            origin_y,
            size_width,
            size_height,
        } = observation.bounds;
        Self {
            text: c_string(observation.text).into_raw(),
            origin_x,
            origin_y,
            size_width,
            size_height,
        }
    }

    pub fn bounds(&self) -> NormalizedRect {
        NormalizedRect {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            size_width: self.size_width,
            size_height: self.size_height,
        }
    }

    /// # Safety
    /// `self` must belong to a live collection produced by this crate.
    pub unsafe fn text(&self) -> &CStr {
        CStr::from_ptr(self.text)
    }
}

/// Failure category reported by [`perform_ocr_ex`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrStatus {
    Ok = 0,
    InvalidArgument = 1,
    Io = 2,
    Decode = 3,
    Engine = 4,
}

/// Copies `text` into a C string, dropping interior NUL bytes.
fn c_string(text: String) -> CString {
    CString::new(text).unwrap_or_else(|err| {
        let mut bytes = err.into_vec();
        bytes.retain(|b| *b != 0);
        // SAFETY: every NUL byte was just removed.
        unsafe { CString::from_vec_unchecked(bytes) }
    })
}

/// Marshals `observations` into a producer-owned array. The pointer is never null.
pub fn into_raw(observations: Vec<Observation>) -> (*mut OcrRecord, usize) {
    let records = observations
        .into_iter()
        .map(OcrRecord::new)
        .collect::<Box<[_]>>();
    let count = records.len();
    (Box::into_raw(records) as *mut OcrRecord, count)
}

/// Frees an array produced by [`into_raw`]. Null is a no-op.
///
/// # Safety
/// `records` must be null, or a pointer returned by [`into_raw`] (or a C entry point) together
/// with the count reported for it, and must not have been released before.
pub unsafe fn release(records: *mut OcrRecord, count: usize) {
    if records.is_null() {
        return;
    }
    let records = Box::from_raw(ptr::slice_from_raw_parts_mut(records, count));
    for record in records.iter() {
        if !record.text.is_null() {
            drop(CString::from_raw(record.text));
        }
    }
    log::trace!("Released {count} records");
}

static DEFAULT_ENGINE: OnceLock<Result<OnnxEngine, String>> = OnceLock::new();

/// The engine behind the C entry points, built on first use from [`EngineConfig::from_env`].
/// A failed build, including one that panics (ONNX Runtime missing), is remembered and reported
/// by every later call.
pub fn default_engine() -> Result<&'static OnnxEngine, EngineError> {
    DEFAULT_ENGINE
        .get_or_init(load_default_engine)
        .as_ref()
        .map_err(|reason| EngineError::Unavailable(reason.clone()))
}

fn load_default_engine() -> Result<OnnxEngine, String> {
    let config = EngineConfig::from_env();
    log::info!("Loading default recognition engine: {config:?}");
    let built = panic::catch_unwind(AssertUnwindSafe(|| config.builder().build()));
    let reason = match built {
        Ok(Ok(engine)) => return Ok(engine),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    log::error!("Failed to load default recognition engine: {reason}");
    Err(reason)
}

enum Source {
    Path(*const c_char),
    Buffer(*const u8, usize),
}

unsafe fn path_from_c<'a>(path: *const c_char) -> Result<&'a Path, OcrError> {
    if path.is_null() {
        return Err(OcrError::InvalidArgument("path is null"));
    }
    let bytes = CStr::from_ptr(path).to_bytes();
    if bytes.is_empty() {
        return Err(OcrError::InvalidArgument("path is empty"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Ok(Path::new(std::ffi::OsStr::from_bytes(bytes)))
    }
    #[cfg(not(unix))]
    {
        std::str::from_utf8(bytes)
            .map(Path::new)
            .map_err(|_| OcrError::InvalidArgument("path is not valid UTF-8"))
    }
}

impl Source {
    unsafe fn load(&self) -> Result<DynamicImage, OcrError> {
        match *self {
            Source::Path(path) => load_image(path_from_c(path)?),
            Source::Buffer(_, 0) => decode_image(&[]),
            Source::Buffer(data, _) if data.is_null() => {
                Err(OcrError::InvalidArgument("image buffer is null"))
            }
            Source::Buffer(data, len) => decode_image(slice::from_raw_parts(data, len)),
        }
    }
}

/// Body shared by every entry point. `count_out` and `status_out` are written on every path
/// where they are non-null.
unsafe fn perform<'e, E, F>(
    source: Source,
    engine: F,
    count_out: *mut usize,
    status_out: *mut OcrStatus,
) -> *mut OcrRecord
where
    E: RecognitionEngine + ?Sized + 'e,
    F: FnOnce() -> Result<&'e E, EngineError>,
{
    let report = |status: OcrStatus| {
        if !status_out.is_null() {
            *status_out = status;
        }
    };
    if count_out.is_null() {
        log::warn!("perform_ocr called without a count slot");
        report(OcrStatus::InvalidArgument);
        return ptr::null_mut();
    }

    let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<_, OcrError> {
        let image = source.load()?;
        recognize_image(engine()?, &image)
    }));
    let observations = attempt.unwrap_or_else(|payload| {
        let reason = panic_message(payload.as_ref());
        Err(EngineError::Panicked(reason).into())
    });
    match observations {
        Ok(observations) => {
            let (records, count) = into_raw(observations);
            *count_out = count;
            report(OcrStatus::Ok);
            records
        }
        Err(err) => {
            log::warn!("Text recognition failed: {err}");
            *count_out = 0;
            report(err.status());
            ptr::null_mut()
        }
    }
}

/// [`perform_ocr_ex`] against a caller-supplied engine.
///
/// # Safety
/// Same contract as [`perform_ocr_ex`].
pub unsafe fn perform_ocr_with<E>(
    engine: &E,
    path: *const c_char,
    count_out: *mut usize,
    status_out: *mut OcrStatus,
) -> *mut OcrRecord
where
    E: RecognitionEngine + ?Sized,
{
    perform(Source::Path(path), || Ok(engine), count_out, status_out)
}

/// [`perform_ocr_buffer`] against a caller-supplied engine.
///
/// # Safety
/// Same contract as [`perform_ocr_buffer`].
pub unsafe fn perform_ocr_buffer_with<E>(
    engine: &E,
    data: *const u8,
    len: usize,
    count_out: *mut usize,
    status_out: *mut OcrStatus,
) -> *mut OcrRecord
where
    E: RecognitionEngine + ?Sized,
{
    perform(
        Source::Buffer(data, len),
        || Ok(engine),
        count_out,
        status_out,
    )
}

/// Recognizes the text in the image at `path`.
///
/// Returns the collection and writes its length to `count_out`, or returns null and writes 0
/// when the image can't be read or decoded or recognition fails.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string. `count_out` must be null or valid for
/// writes; when it is null nothing is recognized and null is returned.
#[no_mangle]
pub unsafe extern "C" fn perform_ocr(
    path: *const c_char,
    count_out: *mut usize,
) -> *mut OcrRecord {
    perform(
        Source::Path(path),
        default_engine,
        count_out,
        ptr::null_mut(),
    )
}

/// [`perform_ocr`] that also reports why it failed.
///
/// # Safety
/// As [`perform_ocr`]; `status_out` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn perform_ocr_ex(
    path: *const c_char,
    count_out: *mut usize,
    status_out: *mut OcrStatus,
) -> *mut OcrRecord {
    perform(Source::Path(path), default_engine, count_out, status_out)
}

/// Recognizes the text in an encoded image held in memory.
///
/// # Safety
/// `data` must be valid for reads of `len` bytes (it may be null only when `len` is 0).
/// `count_out` as in [`perform_ocr`].
#[no_mangle]
pub unsafe extern "C" fn perform_ocr_buffer(
    data: *const u8,
    len: usize,
    count_out: *mut usize,
) -> *mut OcrRecord {
    perform(
        Source::Buffer(data, len),
        default_engine,
        count_out,
        ptr::null_mut(),
    )
}

/// Releases a collection and every string in it. Null is a no-op whatever `count` is.
///
/// # Safety
/// `result` must be null or a collection returned by one of the entry points, released with the
/// exact count reported for it, at most once.
#[export_name = "OCRResult_cleanup"]
pub unsafe extern "C" fn cleanup(result: *mut OcrRecord, count: usize) {
    release(result, count)
}

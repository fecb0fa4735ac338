use std::{
    ffi::CString,
    path::{Path, PathBuf},
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use geo::{coord, Rect};
use image::{DynamicImage, Rgb, RgbImage};
use ocr_boundary::{
    ffi::{
        cleanup, perform_ocr, perform_ocr_buffer, perform_ocr_buffer_with, perform_ocr_ex,
        perform_ocr_with, OcrRecord,
    },
    DetectionOptions, EngineError, ExecutionProvider, NormalizedRect, Observation, OcrError,
    OcrResults, OcrStatus, OnnxEngineBuilder, RecognitionEngine, TextRegion,
};

/// Reports two fixed lines for every image, in pixel space of a 200x100 image.
struct Receipt;

impl RecognitionEngine for Receipt {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        assert_eq!((image.width(), image.height()), (200, 100));
        Ok(vec![
            TextRegion::new(
                "TOTAL",
                Rect::new(coord! { x: 20.0, y: 10.0 }, coord! { x: 120.0, y: 30.0 }),
            ),
            TextRegion::new(
                "12,50 €",
                Rect::new(coord! { x: 100.0, y: 50.0 }, coord! { x: 200.0, y: 75.0 }),
            ),
        ])
    }
}

struct Blank;

impl RecognitionEngine for Blank {
    fn recognize(&self, _: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        Ok(Vec::new())
    }
}

struct Broken;

impl RecognitionEngine for Broken {
    fn recognize(&self, _: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        Err(EngineError::Unavailable("no models".into()))
    }
}

#[derive(Default)]
struct Counting(AtomicUsize);

impl RecognitionEngine for Counting {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Receipt.recognize(image)
    }
}

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fixture(name: &str) -> PathBuf {
    let dir = PathBuf::from(std::env!("CARGO_TARGET_TMPDIR")).join("fixtures");
    std::fs::create_dir_all(&dir).expect("Failed to create fixture dir");
    let path = dir.join(name);
    RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]))
        .save(&path)
        .expect("Failed to write fixture image");
    path
}

fn c_path(path: &Path) -> CString {
    CString::new(path.to_str().expect("fixture path is UTF-8")).unwrap()
}

fn records<'a>(ptr: *mut OcrRecord, count: usize) -> &'a [OcrRecord] {
    assert!(!ptr.is_null());
    unsafe { std::slice::from_raw_parts(ptr, count) }
}

#[test]
fn success_populates_every_record() {
    init();
    let path = c_path(&fixture("receipt.png"));
    let mut count = usize::MAX;
    let mut status = OcrStatus::Engine;
    let result = unsafe { perform_ocr_with(&Receipt, path.as_ptr(), &mut count, &mut status) };

    assert_eq!(status, OcrStatus::Ok);
    assert_eq!(count, 2);
    let texts = records(result, count)
        .iter()
        .map(|record| {
            assert!(!record.text.is_null());
            unsafe { record.text() }.to_str().expect("text is UTF-8").to_string()
        })
        .collect::<Vec<_>>();
    assert_eq!(texts, ["TOTAL", "12,50 €"]);

    unsafe { cleanup(result, count) };
}

#[test]
fn coordinates_are_normalized_from_the_top_left() {
    init();
    let path = c_path(&fixture("coordinates.png"));
    let mut count: usize = 0;
    let result = unsafe { perform_ocr_with(&Receipt, path.as_ptr(), &mut count, ptr::null_mut()) };
    let bounds = records(result, count)
        .iter()
        .map(OcrRecord::bounds)
        .collect::<Vec<_>>();
    unsafe { cleanup(result, count) };

    assert_eq!(
        bounds,
        [
            NormalizedRect {
                origin_x: 0.1,
                origin_y: 0.1,
                size_width: 0.5,
                size_height: 0.2,
            },
            NormalizedRect {
                origin_x: 0.5,
                origin_y: 0.5,
                size_width: 0.5,
                size_height: 0.25,
            },
        ]
    );
}

#[test]
fn no_text_is_an_empty_non_null_collection() {
    init();
    let path = c_path(&fixture("blank.png"));
    let mut count = usize::MAX;
    let mut status = OcrStatus::Engine;
    let result = unsafe { perform_ocr_with(&Blank, path.as_ptr(), &mut count, &mut status) };

    assert!(!result.is_null());
    assert_eq!(count, 0);
    assert_eq!(status, OcrStatus::Ok);
    unsafe { cleanup(result, count) };
}

#[test]
fn engine_failure_is_null_with_zero_count() {
    init();
    let path = c_path(&fixture("broken.png"));
    let mut count = usize::MAX;
    let mut status = OcrStatus::Ok;
    let result = unsafe { perform_ocr_with(&Broken, path.as_ptr(), &mut count, &mut status) };

    assert!(result.is_null());
    assert_eq!(count, 0);
    assert_eq!(status, OcrStatus::Engine);
}

#[test]
fn missing_file_is_null_with_zero_count() {
    init();
    let path = CString::new("/nonexistent/path").unwrap();
    let mut count = usize::MAX;
    let result = unsafe { perform_ocr(path.as_ptr(), &mut count) };

    assert!(result.is_null());
    assert_eq!(count, 0);

    let mut status = OcrStatus::Ok;
    count = usize::MAX;
    let result = unsafe { perform_ocr_ex(path.as_ptr(), &mut count, &mut status) };
    assert!(result.is_null());
    assert_eq!(count, 0);
    assert_eq!(status, OcrStatus::Io);
}

#[test]
fn undecodable_file_is_a_decode_failure() {
    init();
    let dir = PathBuf::from(std::env!("CARGO_TARGET_TMPDIR")).join("fixtures");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("corrupt.png");
    std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really").unwrap();
    let path = c_path(&path);

    let mut count = usize::MAX;
    let mut status = OcrStatus::Ok;
    let result = unsafe { perform_ocr_ex(path.as_ptr(), &mut count, &mut status) };
    assert!(result.is_null());
    assert_eq!(count, 0);
    assert_eq!(status, OcrStatus::Decode);
}

#[test]
fn invalid_arguments_are_rejected() {
    init();
    let mut count = usize::MAX;
    let mut status = OcrStatus::Ok;
    let result = unsafe { perform_ocr_ex(ptr::null(), &mut count, &mut status) };
    assert!(result.is_null());
    assert_eq!(count, 0);
    assert_eq!(status, OcrStatus::InvalidArgument);

    let empty = CString::new("").unwrap();
    status = OcrStatus::Ok;
    let result = unsafe { perform_ocr_ex(empty.as_ptr(), &mut count, &mut status) };
    assert!(result.is_null());
    assert_eq!(status, OcrStatus::InvalidArgument);

    let path = c_path(&fixture("no_count.png"));
    let engine = Counting::default();
    let result = unsafe { perform_ocr_with(&engine, path.as_ptr(), ptr::null_mut(), &mut status) };
    assert!(result.is_null());
    assert_eq!(status, OcrStatus::InvalidArgument);
    assert_eq!(engine.0.load(Ordering::SeqCst), 0);
}

#[test]
fn cleanup_of_null_is_a_no_op() {
    unsafe {
        cleanup(ptr::null_mut(), 0);
        cleanup(ptr::null_mut(), 1);
        cleanup(ptr::null_mut(), usize::MAX);
    }
}

#[test]
fn repeated_calls_are_deterministic() {
    init();
    let path = fixture("repeat.png");
    let first = OcrResults::recognize(&Receipt, &path).unwrap();
    let second = OcrResults::recognize(&Receipt, &path).unwrap();
    assert_eq!(first.len(), second.len());
    assert_eq!(first.to_observations(), second.to_observations());
}

#[test]
fn recognizes_encoded_buffers() {
    init();
    let bytes = std::fs::read(fixture("buffer.png")).unwrap();
    let mut count: usize = 0;
    let mut status = OcrStatus::Engine;
    let result = unsafe {
        perform_ocr_buffer_with(&Receipt, bytes.as_ptr(), bytes.len(), &mut count, &mut status)
    };
    assert_eq!(status, OcrStatus::Ok);
    assert_eq!(count, 2);
    let results = unsafe { OcrResults::from_raw(result, count) }.unwrap();
    assert_eq!(results.texts().collect::<Vec<_>>(), ["TOTAL", "12,50 €"]);

    let result = unsafe {
        perform_ocr_buffer_with(&Receipt, ptr::null(), 16, &mut count, &mut status)
    };
    assert!(result.is_null());
    assert_eq!(count, 0);
    assert_eq!(status, OcrStatus::InvalidArgument);

    // Garbage never reaches the default engine.
    count = usize::MAX;
    let garbage = b"garbage";
    let result = unsafe { perform_ocr_buffer(garbage.as_ptr(), garbage.len(), &mut count) };
    assert!(result.is_null());
    assert_eq!(count, 0);
}

#[test]
fn concurrent_calls_get_independent_collections() {
    init();
    let path = fixture("concurrent.png");
    let engine = Arc::new(Counting::default());
    let handles = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let path = path.clone();
            thread::spawn(move || OcrResults::recognize(&engine, &path).unwrap())
        })
        .collect::<Vec<_>>();
    let results = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(engine.0.load(Ordering::SeqCst), 8);
    for pair in results.windows(2) {
        assert_ne!(pair[0].as_slice().as_ptr(), pair[1].as_slice().as_ptr());
        assert_eq!(pair[0].to_observations(), pair[1].to_observations());
    }
}

#[test]
fn typed_errors_keep_their_kind() {
    init();
    let err = OcrResults::recognize(&Broken, fixture("typed.png")).unwrap_err();
    assert!(matches!(err, OcrError::Engine(EngineError::Unavailable(_))), "{err}");
    assert_eq!(err.status(), OcrStatus::Engine);

    let observations = ocr_boundary::recognize_path(&Receipt, &fixture("typed_ok.png")).unwrap();
    assert_eq!(
        observations[0],
        Observation {
            text: "TOTAL".into(),
            bounds: NormalizedRect {
                origin_x: 0.1,
                origin_y: 0.1,
                size_width: 0.5,
                size_height: 0.2,
            },
        }
    );
}

#[test]
#[ignore = "needs ONNX Runtime and the models under tests/data"]
fn onnx_engine_reads_test_image() {
    init();
    let cache = PathBuf::from(std::env!("CARGO_TARGET_TMPDIR")).join(".engine_cache");
    std::fs::create_dir_all(&cache).expect("Failed to create temp dir");
    let engine = OnnxEngineBuilder::new()
        .det_model("tests/data/models/det.onnx")
        .cls_model("tests/data/models/cls.onnx")
        .rec_model(
            "tests/data/models/rec.onnx",
            "tests/data/models/ppocr_keys_v1.txt",
        )
        .options(DetectionOptions {
            most_angle: false,
            ..DetectionOptions::default()
        })
        .max_side_len(2048)
        .with_engine_cache_path(cache)
        .with_execution_providers([ExecutionProvider::Default])
        .build()
        .expect("Failed to build engine");
    let results = OcrResults::recognize(&engine, "tests/data/test_image.png")
        .expect("Failed recognition.");
    assert!(results.len() > 1);
    for observation in results.to_observations() {
        let NormalizedRect {
            origin_x,
            origin_y,
            size_width,
            size_height,
        } = observation.bounds;
        assert!((0.0..=1.0).contains(&origin_x) && (0.0..=1.0).contains(&origin_y));
        assert!(origin_x + size_width <= 1.0 + f32::EPSILON);
        assert!(origin_y + size_height <= 1.0 + f32::EPSILON);
    }
}

//! Text recognition behind a plain C interface.
//!
//! [`ffi::perform_ocr`] reads an image, runs a [`RecognitionEngine`] over it and hands back a
//! flat array of [`ffi::OcrRecord`]s that the caller releases with [`ffi::cleanup`]. Rust code
//! can use the typed layer directly ([`recognize_path`], [`Observation`]) or hold collections
//! through [`OcrResults`], which releases them on drop.
//!
//! Bounding boxes are normalized to the image size with the origin in the top-left corner and
//! y pointing down; see [`NormalizedRect`].

mod config;
mod engine;
mod error;
pub mod ffi;
mod handle;
mod invoker;
pub mod onnx;
mod result;

pub use config::*;
pub use engine::RecognitionEngine;
pub use error::{EngineError, OcrError};
pub use ffi::OcrStatus;
pub use handle::OcrResults;
pub use invoker::{decode_image, load_image, recognize_image, recognize_path};
pub use onnx::{DetectionOptions, ExecutionProvider, OnnxEngine, OnnxEngineBuilder};
pub use result::*;

pub use ort as runtime;

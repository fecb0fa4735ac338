use std::{io, path::PathBuf};

use crate::ffi::OcrStatus;

/// Failure inside a recognition engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("onnx runtime error: {0}")]
    Runtime(#[from] ort::Error),
    #[error("unexpected tensor shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("failed to read character dictionary {path:?}: {source}")]
    Dictionary { path: PathBuf, source: io::Error },
    #[error("recognition engine unavailable: {0}")]
    Unavailable(String),
    #[error("recognition engine panicked: {0}")]
    Panicked(String),
}

/// Failure of a single recognition call.
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("failed to read image {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl OcrError {
    /// The status code this error is reported as across the C boundary.
    pub fn status(&self) -> OcrStatus {
        match self {
            OcrError::InvalidArgument(_) => OcrStatus::InvalidArgument,
            OcrError::Io { .. } => OcrStatus::Io,
            OcrError::Decode(_) => OcrStatus::Decode,
            OcrError::Engine(_) => OcrStatus::Engine,
        }
    }
}

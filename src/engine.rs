use std::sync::Arc;

use image::DynamicImage;

use crate::{EngineError, TextRegion};

/// Anything that can turn a decoded image into lines of text.
///
/// Implementations are shared between threads by the C entry points, so `recognize` may be
/// called concurrently and must be reentrant.
pub trait RecognitionEngine: Send + Sync {
    /// Recognizes all text in `image`. Finding no text is `Ok(vec![])`, not an error.
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError>;
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for &E {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        (**self).recognize(image)
    }
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Box<E> {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        (**self).recognize(image)
    }
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Arc<E> {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        (**self).recognize(image)
    }
}

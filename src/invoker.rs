use std::{
    panic::{self, AssertUnwindSafe},
    path::Path,
};

use image::DynamicImage;
use tracing::instrument;

use crate::{EngineError, Observation, OcrError, RecognitionEngine};

/// Reads and decodes the image at `path`.
pub fn load_image(path: &Path) -> Result<DynamicImage, OcrError> {
    let bytes = std::fs::read(path).map_err(|source| OcrError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image(&bytes)
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, OcrError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Runs `engine` on `image` and maps its regions into normalized observations.
///
/// A panic inside the engine is caught and reported as [`EngineError::Panicked`].
#[instrument(skip(engine, image), fields(width = image.width(), height = image.height()))]
pub fn recognize_image<E>(engine: &E, image: &DynamicImage) -> Result<Vec<Observation>, OcrError>
where
    E: RecognitionEngine + ?Sized,
{
    let regions = panic::catch_unwind(AssertUnwindSafe(|| engine.recognize(image)))
        .map_err(|payload| EngineError::Panicked(panic_message(payload.as_ref())))??;
    let (width, height) = (image.width(), image.height());
    let observations = regions
        .into_iter()
        .map(|region| Observation::from_region(region, width, height))
        .collect::<Vec<_>>();
    log::debug!("Engine returned {} observations", observations.len());
    Ok(observations)
}

pub fn recognize_path<E>(engine: &E, path: &Path) -> Result<Vec<Observation>, OcrError>
where
    E: RecognitionEngine + ?Sized,
{
    let image = load_image(path)?;
    recognize_image(engine, &image)
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

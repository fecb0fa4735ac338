use std::{mem, path::Path, ptr::NonNull, slice};

use crate::{
    ffi::{self, OcrRecord},
    invoker::{load_image, recognize_image, recognize_path},
    Observation, OcrError, RecognitionEngine,
};

/// Owner of a recognized collection in its C layout. Dropping it releases the collection.
///
/// This is how Rust code holds on to results that will be handed across the boundary later, or
/// adopts a collection obtained from the C entry points.
#[derive(Debug)]
pub struct OcrResults {
    records: NonNull<OcrRecord>,
    len: usize,
}

// SAFETY: the collection is exclusively owned and never mutated after population.
unsafe impl Send for OcrResults {}
unsafe impl Sync for OcrResults {}

impl OcrResults {
    /// Recognizes the image at `path` with the default engine.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OcrError> {
        let image = load_image(path.as_ref())?;
        let engine = ffi::default_engine()?;
        Ok(Self::from_observations(recognize_image(engine, &image)?))
    }

    pub fn recognize<E>(engine: &E, path: impl AsRef<Path>) -> Result<Self, OcrError>
    where
        E: RecognitionEngine + ?Sized,
    {
        let observations = recognize_path(engine, path.as_ref())?;
        Ok(Self::from_observations(observations))
    }

    pub fn from_observations(observations: Vec<Observation>) -> Self {
        let (records, len) = ffi::into_raw(observations);
        // SAFETY: `into_raw` never returns null.
        let records = unsafe { NonNull::new_unchecked(records) };
        Self { records, len }
    }

    /// Adopts a collection returned by one of the C entry points. Returns `None` for null.
    ///
    /// # Safety
    /// `records` and `len` must be exactly what the entry point returned and reported, and the
    /// collection must not be released by anyone else.
    pub unsafe fn from_raw(records: *mut OcrRecord, len: usize) -> Option<Self> {
        NonNull::new(records).map(|records| Self { records, len })
    }

    /// Gives up ownership; the caller becomes responsible for calling `OCRResult_cleanup`.
    pub fn into_raw(self) -> (*mut OcrRecord, usize) {
        let parts = (self.records.as_ptr(), self.len);
        mem::forget(self);
        parts
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[OcrRecord] {
        // SAFETY: `records` points at `len` initialized records for as long as `self` lives.
        unsafe { slice::from_raw_parts(self.records.as_ptr(), self.len) }
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.as_slice().iter().map(|record| {
            // SAFETY: records owned by `self` always hold a valid C string.
            let text = unsafe { record.text() };
            // Texts are copied from `String`s, so they are always UTF-8.
            text.to_str().unwrap_or_default()
        })
    }

    pub fn to_observations(&self) -> Vec<Observation> {
        self.texts()
            .zip(self.as_slice())
            .map(|(text, record)| Observation {
                text: text.to_string(),
                bounds: record.bounds(),
            })
            .collect()
    }
}

impl Drop for OcrResults {
    fn drop(&mut self) {
        // SAFETY: the pair came from `into_raw` or a C entry point and is released only here.
        unsafe { ffi::release(self.records.as_ptr(), self.len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NormalizedRect;

    #[test]
    fn round_trips_observations() {
        let observations = vec![
            Observation {
                text: "héllo".into(),
                bounds: NormalizedRect {
                    origin_x: 0.1,
                    origin_y: 0.2,
                    size_width: 0.3,
                    size_height: 0.4,
                },
            },
            Observation {
                text: String::new(),
                bounds: NormalizedRect::default(),
            },
        ];
        let results = OcrResults::from_observations(observations.clone());
        assert_eq!(results.len(), 2);
        assert_eq!(results.texts().collect::<Vec<_>>(), ["héllo", ""]);
        assert_eq!(results.to_observations(), observations);
    }

    #[test]
    fn into_raw_hands_over_ownership() {
        let results = OcrResults::from_observations(vec![Observation {
            text: "x".into(),
            bounds: NormalizedRect::default(),
        }]);
        let (records, len) = results.into_raw();
        let adopted = unsafe { OcrResults::from_raw(records, len) }.unwrap();
        assert_eq!(adopted.texts().collect::<Vec<_>>(), ["x"]);
        assert!(unsafe { OcrResults::from_raw(std::ptr::null_mut(), 3) }.is_none());
    }
}

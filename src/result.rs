use geo::Rect;
use serde::Serialize;

/// Raw output of a [`RecognitionEngine`](crate::RecognitionEngine): one line of text and its
/// axis-aligned box in image pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub rect: Rect<f32>,
}

impl TextRegion {
    pub fn new(text: impl Into<String>, rect: Rect<f32>) -> Self {
        Self {
            text: text.into(),
            rect,
        }
    }
}

/// A bounding box in normalized image space.
///
/// Coordinates are fractions of the image width and height in `[0, 1]`. The origin is the
/// top-left corner of the image with y pointing down, and `(origin_x, origin_y)` is the
/// top-left corner of the box.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct NormalizedRect {
    pub origin_x: f32,
    pub origin_y: f32,
    pub size_width: f32,
    pub size_height: f32,
}

impl NormalizedRect {
    /// Maps a pixel-space box onto an image of `width` x `height` pixels, clamping it to the
    /// image first.
    pub fn from_pixels(rect: &Rect<f32>, width: u32, height: u32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        let min = rect.min();
        let max = rect.max();
        let (x0, x1) = (min.x.clamp(0.0, width), max.x.clamp(0.0, width));
        let (y0, y1) = (min.y.clamp(0.0, height), max.y.clamp(0.0, height));
        Self {
            origin_x: x0 / width,
            origin_y: y0 / height,
            size_width: (x1 - x0) / width,
            size_height: (y1 - y0) / height,
        }
    }
}

/// One recognized text fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub text: String,
    #[serde(flatten)]
    pub bounds: NormalizedRect,
}

impl Observation {
    pub fn from_region(region: TextRegion, width: u32, height: u32) -> Self {
        let bounds = NormalizedRect::from_pixels(&region.rect, width, height);
        Self {
            text: region.text,
            bounds,
        }
    }
}

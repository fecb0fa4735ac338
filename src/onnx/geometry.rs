use geo::{
    point, Area, BoundingRect, Contains, Coord, EuclideanLength, HasDimensions, LineString,
    MinimumRotatedRect, Polygon, Rect, Translate,
};
use geo_clipper::{Clipper, EndType, JoinType};
use image::{DynamicImage, GrayImage, Pixel, Rgb};
use imageproc::point::Point;
use ndarray::{s, Array3, ArrayView2};
use tracing::instrument;

/// Converts an image into a CHW tensor, computing `pixel * norm - mean * norm` per channel.
#[instrument(level = "trace", skip(image))]
pub(crate) fn normalize_chw(
    image: &DynamicImage,
    mean: &[f32; 3],
    norm: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm);
    let mean = Rgb::<f32>(*mean).map2(&norm, |m, n| m * n);
    for pixel in image.pixels_mut() {
        *pixel = pixel.map2(&norm, |c, n| c * n).map2(&mean, |c, m| c - m);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

/// Renders a `[0, 1]` probability map as an 8-bit grayscale image.
pub(crate) fn probability_image(data: ArrayView2<f32>) -> GrayImage {
    let (height, width) = data.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let p = data[[y as usize, x as usize]].clamp(0.0, 1.0);
        image::Luma([(p * 255.0) as u8])
    })
}

pub(crate) fn contour_polygon(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

pub(crate) fn longest_side(polygon: &Polygon<f32>) -> f32 {
    polygon
        .exterior()
        .lines()
        .map(|line| line.euclidean_length().floor())
        .fold(0.0, f32::max)
}

/// Mean probability of the map pixels inside `polygon`.
pub(crate) fn region_score(polygon: &Polygon<f32>, map: ArrayView2<f32>) -> f32 {
    let Some(bounds) = polygon.bounding_rect() else {
        return 0.0;
    };
    let (height, width) = map.dim();
    let clamp = |v: f32, max: usize| (v.max(0.0) as usize).min(max);
    let (x0, x1) = (clamp(bounds.min().x, width), clamp(bounds.max().x, width));
    let (y0, y1) = (clamp(bounds.min().y, height), clamp(bounds.max().y, height));
    if x0 >= x1 || y0 >= y1 {
        return 0.0;
    }

    let window = map.slice(s![y0..y1, x0..x1]);
    let local = polygon.translate(-(x0 as f32), -(y0 as f32));

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for ((y, x), value) in window.indexed_iter() {
        if local.contains(&point![x: x as f32, y: y as f32]) {
            sum += *value;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Grows a detected box outwards, since the detector's shrunk kernels hug the glyphs.
pub(crate) fn expand(rect: Polygon<f32>, ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = rect.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = rect.unsigned_area() * 0.5 * ratio / perimeter;
    let grown = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);

    if grown.is_empty() {
        None
    } else {
        grown.minimum_rotated_rect()
    }
}

/// How an image gets resized to the detector's input, and how to map boxes back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizePlan {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

/// Fits `width` x `height` into `max_side` while keeping the aspect ratio, then floors both
/// sides to a multiple of 32 (the detector's stride), never going below 32.
pub fn plan_resize(width: u32, height: u32, max_side: u32) -> ResizePlan {
    let (width, height) = (width.max(1), height.max(1));
    let aspect_ratio = width as f32 / height as f32;
    let (target_width, target_height) = if aspect_ratio >= 1.0 {
        let w = width.min(max_side);
        (w, (w as f32 / aspect_ratio) as u32)
    } else {
        let h = height.min(max_side);
        ((h as f32 * aspect_ratio) as u32, h)
    };
    let floor32 = |side: u32| (side / 32 * 32).max(32);
    let (target_width, target_height) = (floor32(target_width), floor32(target_height));
    let plan = ResizePlan {
        factor_x: width as f32 / target_width as f32,
        factor_y: height as f32 / target_height as f32,
        target_width,
        target_height,
    };
    log::debug!("Resizing (w: {width}, h: {height}) for detection: {plan:?}");
    plan
}

/// Cuts the axis-aligned `rect` out of `image`, clamped to the image bounds.
pub(crate) fn crop(image: &DynamicImage, rect: &Rect<f32>) -> DynamicImage {
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
    let (width, height) = (image.width(), image.height());
    let (x0, x1) = (clamp(rect.min().x, width), clamp(rect.max().x, width));
    let (y0, y1) = (clamp(rect.min().y, height), clamp(rect.max().y, height));
    log::trace!("Cropping text region to ({x0}, {y0})..({x1}, {y1})");
    image.crop_imm(x0, y0, x1 - x0, y1 - y0)
}

use std::path::Path;

use geo::{BoundingRect, Coord, MinimumRotatedRect, Rect, Scale};
use image::{imageops::FilterType, DynamicImage, GrayImage};
use imageproc::{
    contours::{find_contours, BorderType},
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
};
use ndarray::{ArrayView2, Axis};
use ort::{inputs, Session};
use tracing::instrument;

use super::{
    geometry::{
        contour_polygon, expand, longest_side, normalize_chw, probability_image, region_score,
        ResizePlan,
    },
    session::SessionSettings,
    DetectionOptions,
};
use crate::EngineError;

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const MIN_SIDE: f32 = 3.0;
const MAX_CANDIDATES: usize = 1000;

/// Differentiable-binarization text detector: predicts a per-pixel text probability map and
/// turns it into boxes.
pub(crate) struct TextDetector {
    session: Session,
}

impl TextDetector {
    pub fn load(path: &Path, settings: &SessionSettings, max_side_len: u32) -> ort::Result<Self> {
        let profile = (
            "x:1x3x32x32".to_string(),
            format!("x:1x3x{max_side_len}x{max_side_len}"),
            format!("x:1x3x{max_side_len}x{max_side_len}"),
        );
        Ok(Self {
            session: settings.load(path, Some(profile))?,
        })
    }

    /// Returns text boxes in the pixel space of `image`.
    #[instrument(skip(self, image), level = "debug")]
    pub fn detect(
        &self,
        image: &DynamicImage,
        plan: ResizePlan,
        options: &DetectionOptions,
    ) -> Result<Vec<Rect<f32>>, EngineError> {
        let resized =
            image.resize_exact(plan.target_width, plan.target_height, FilterType::Nearest);
        let input = normalize_chw(&resized, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| EngineError::Output("detector produced no output".into()))?;
        let prediction = output.try_extract_tensor::<f32>()?;

        let (height, width) = match *prediction.shape() {
            [_, _, height, width] => (height, width),
            ref shape => {
                return Err(EngineError::Output(format!(
                    "detector output has shape {shape:?}, expected 4 dimensions"
                )))
            }
        };
        let map = prediction.to_shape((height, width))?;

        let mut mask = probability_image(map.view());
        threshold_mut(
            &mut mask,
            (options.box_threshold * 255.0) as u8,
            ThresholdType::Binary,
        );
        dilate_mut(&mut mask, Norm::L1, 2);

        Ok(boxes_from_mask(map.view(), &mask, plan, options))
    }
}

#[instrument(skip(map, mask), level = "trace")]
fn boxes_from_mask(
    map: ArrayView2<f32>,
    mask: &GrayImage,
    plan: ResizePlan,
    options: &DetectionOptions,
) -> Vec<Rect<f32>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .take(MAX_CANDIDATES)
        .filter(|contour| contour.points.len() > 2)
        .filter_map(|contour| contour_polygon(&contour.points).minimum_rotated_rect())
        .filter(|rect| longest_side(rect) >= MIN_SIDE)
        .filter(|rect| region_score(rect, map) >= options.box_score_threshold)
        .filter_map(|rect| expand(rect, options.unclip_ratio))
        .filter(|rect| longest_side(rect) >= MIN_SIDE + 2.0)
        .filter_map(|rect| {
            rect.scale_around_point(plan.factor_x, plan.factor_y, Coord::zero())
                .bounding_rect()
        })
        .collect()
}

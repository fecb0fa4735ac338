use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Axis;
use ort::{inputs, Session};
use tracing::instrument;

use super::{geometry::normalize_chw, session::SessionSettings};
use crate::EngineError;

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// Decides whether a cropped text line is upside down (class 1) or upright (class 0).
pub(crate) struct OrientationClassifier {
    session: Session,
}

impl OrientationClassifier {
    pub fn load(path: &Path, settings: &SessionSettings) -> ort::Result<Self> {
        Ok(Self {
            session: settings.load(path, None)?,
        })
    }

    /// One flag per line, `true` when the line should be rotated by 180°. With `vote`, every
    /// line gets the majority orientation.
    #[instrument(level = "debug", skip(self, lines))]
    pub fn upside_down(
        &self,
        lines: &[DynamicImage],
        vote: bool,
    ) -> Result<Vec<bool>, EngineError> {
        let flags = lines
            .iter()
            .map(|line| self.classify(line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(if vote { majority(&flags) } else { flags })
    }

    #[instrument(level = "trace", skip(self, line))]
    fn classify(&self, line: &DynamicImage) -> Result<bool, EngineError> {
        let line = line.resize_exact(DEST_WIDTH, DEST_HEIGHT, FilterType::Nearest);
        let input = normalize_chw(&line, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| EngineError::Output("classifier produced no output".into()))?;
        let scores = output.try_extract_tensor::<f32>()?;

        let class = scores
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map(|(index, _)| index)
            .ok_or_else(|| EngineError::Output("classifier produced no scores".into()))?;
        Ok(class == 1)
    }
}

fn majority(flags: &[bool]) -> Vec<bool> {
    let flipped = flags.iter().filter(|flag| **flag).count();
    let winner = flipped * 2 >= flags.len() && flipped > 0;
    vec![winner; flags.len()]
}

use std::path::Path;

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{ArrayView2, Axis};
use ort::{inputs, Session};
use tracing::instrument;

use super::{geometry::normalize_chw, session::SessionSettings};
use crate::EngineError;

const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

/// CRNN line recognizer with CTC decoding over a character dictionary.
pub(crate) struct LineRecognizer {
    session: Session,
    /// Index 0 is the CTC blank, the last entry is a space.
    keys: Vec<String>,
}

impl LineRecognizer {
    pub fn load(
        model_path: &Path,
        keys_path: &Path,
        settings: &SessionSettings,
    ) -> Result<Self, EngineError> {
        let profile = (
            "x:1x3x48x1".to_string(),
            "x:1x3x48x256".to_string(),
            format!("x:1x3x48x{}", u16::MAX),
        );
        let session = settings.load(model_path, Some(profile))?;

        let dictionary =
            std::fs::read_to_string(keys_path).map_err(|source| EngineError::Dictionary {
                path: keys_path.to_path_buf(),
                source,
            })?;
        let keys = std::iter::once(String::new())
            .chain(dictionary.lines().map(str::to_string))
            .chain([" ".to_string()])
            .collect::<Vec<_>>();
        log::debug!("Loaded {} dictionary entries from {keys_path:?}", keys.len());

        Ok(Self { session, keys })
    }

    #[instrument(level = "trace", skip(self, line))]
    pub fn read(&self, line: &DynamicImage) -> Result<String, EngineError> {
        let scale = DEST_HEIGHT as f32 / line.height().max(1) as f32;
        let dest_width = ((line.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let line = line.resize_exact(dest_width, DEST_HEIGHT, FilterType::Nearest);

        let input = normalize_chw(&line, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| EngineError::Output("recognizer produced no output".into()))?;
        let scores = output.try_extract_tensor::<f32>()?;
        log::trace!("Recognizer output shape: {:?}", scores.shape());

        let (steps, classes) = match *scores.shape() {
            [_, steps, classes] => (steps, classes),
            ref shape => {
                return Err(EngineError::Output(format!(
                    "recognizer output has shape {shape:?}, expected 3 dimensions"
                )))
            }
        };
        let scores = scores.to_shape((steps, classes))?;
        Ok(decode_ctc(scores.view(), &self.keys))
    }
}

/// Greedy CTC decoding: best class per time step, repeats collapsed, blanks dropped.
fn decode_ctc(scores: ArrayView2<f32>, keys: &[String]) -> String {
    let mut previous = 0;
    let mut text = String::new();
    for step in scores.outer_iter() {
        let best = step
            .indexed_iter()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .map_or(0, |(index, _)| index);
        if best != previous && best > 0 {
            if let Some(key) = keys.get(best) {
                text.push_str(key);
            }
        }
        previous = best;
    }
    text
}

//! The bundled recognition engine: a detection, orientation and recognition pipeline running
//! ONNX models through ONNX Runtime.

use std::{path::PathBuf, str::FromStr};

use image::DynamicImage;
use tracing::instrument;

mod classifier;
mod detector;
pub mod geometry;
mod recognizer;
mod session;

use classifier::OrientationClassifier;
use detector::TextDetector;
use geometry::{crop, plan_resize};
use recognizer::LineRecognizer;
use session::SessionSettings;

use crate::{EngineError, RecognitionEngine, TextRegion};

pub struct OnnxEngineBuilder {
    threads: usize,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    pub(crate) options: DetectionOptions,
    pub(crate) cache_path: Option<PathBuf>,
    pub(crate) execution_providers: Vec<ExecutionProvider>,
}

impl OnnxEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    /// Enables the 180° orientation classifier.
    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.options.max_side_len = max_side_len;
        self
    }

    pub fn options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<OnnxEngine, EngineError> {
        let det_path = self
            .det_path
            .unwrap_or_else(|| "models/ch_PP-OCRv4_det_infer.onnx".into());
        let (rec_path, keys_path) = self.rec_paths.unwrap_or_else(|| {
            (
                "models/ch_PP-OCRv4_rec_infer.onnx".into(),
                "models/ppocr_keys_v1.txt".into(),
            )
        });
        let settings = SessionSettings {
            threads: self.threads,
            execution_providers: self.execution_providers,
            cache_path: self.cache_path,
        };

        let detector = TextDetector::load(&det_path, &settings, self.options.max_side_len)?;
        let classifier = self
            .cls_path
            .map(|path| OrientationClassifier::load(&path, &settings))
            .transpose()?;
        let recognizer = LineRecognizer::load(&rec_path, &keys_path, &settings)?;

        Ok(OnnxEngine {
            detector,
            classifier,
            recognizer,
            options: self.options,
        })
    }
}

impl Default for OnnxEngineBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            det_path: None,
            cls_path: None,
            rec_paths: None,
            options: DetectionOptions::default(),
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

pub struct OnnxEngine {
    detector: TextDetector,
    classifier: Option<OrientationClassifier>,
    recognizer: LineRecognizer,
    options: DetectionOptions,
}

impl RecognitionEngine for OnnxEngine {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextRegion>, EngineError> {
        let max_side_len = match self.options.max_side_len {
            0 => u32::MAX,
            len => len,
        };
        let plan = plan_resize(image.width(), image.height(), max_side_len);
        let boxes = self.detector.detect(image, plan, &self.options)?;

        let (boxes, mut lines): (Vec<_>, Vec<_>) = boxes
            .into_iter()
            .map(|rect| (rect, crop(image, &rect)))
            .filter(|(_, line)| line.width() > 0 && line.height() > 0)
            .unzip();
        #[cfg(feature = "debug")]
        for (i, line) in lines.iter().enumerate() {
            if let Err(e) = line.save(format!("part_images/{i}.png")) {
                log::warn!("Failed to save text line {i}: {e}");
            }
        }

        if let Some(classifier) = &self.classifier {
            let flags = classifier.upside_down(&lines, self.options.most_angle)?;
            for (line, flip) in lines.iter_mut().zip(flags) {
                if flip {
                    *line = line.rotate180();
                }
            }
        }

        let mut regions = Vec::with_capacity(boxes.len());
        for (rect, line) in boxes.into_iter().zip(&lines) {
            let text = self.recognizer.read(line)?;
            if text.trim().is_empty() {
                log::trace!("Dropping empty line at {rect:?}");
                continue;
            }
            regions.push(TextRegion { text, rect });
        }
        log::debug!("Recognized {} text regions", regions.len());
        Ok(regions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionOptions {
    /// Longest side the detector sees; 0 disables downscaling.
    pub max_side_len: u32,
    /// Minimum mean probability inside a box for it to be kept.
    pub box_score_threshold: f32,
    /// Probability above which a pixel counts as text.
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    /// Give every line the majority orientation instead of classifying lines individually.
    pub most_angle: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_side_len: 1024,
            box_score_threshold: 0.5,
            box_threshold: 0.3,
            unclip_ratio: 1.6,
            most_angle: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" | "cpu" => Ok(Self::Default),
            #[cfg(feature = "tensorrt")]
            "tensorrt" => Ok(Self::TensorRT),
            #[cfg(feature = "coreml")]
            "coreml" => Ok(Self::CoreML),
            #[cfg(feature = "cuda")]
            "cuda" => Ok(Self::Cuda),
            #[cfg(feature = "directml")]
            "directml" => Ok(Self::DirectML),
            other => Err(format!("unknown or disabled execution provider {other:?}")),
        }
    }
}

pub(crate) const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{onnx::OnnxEngineBuilder, DetectionOptions, ExecutionProvider};

pub const MODEL_DIR_VAR: &str = "OCR_MODEL_DIR";
pub const DET_MODEL_VAR: &str = "OCR_DET_MODEL";
pub const CLS_MODEL_VAR: &str = "OCR_CLS_MODEL";
pub const REC_MODEL_VAR: &str = "OCR_REC_MODEL";
pub const REC_KEYS_VAR: &str = "OCR_REC_KEYS";
pub const THREADS_VAR: &str = "OCR_THREADS";
pub const MAX_SIDE_LEN_VAR: &str = "OCR_MAX_SIDE_LEN";
pub const BOX_SCORE_THRESHOLD_VAR: &str = "OCR_BOX_SCORE_THRESHOLD";
pub const BOX_THRESHOLD_VAR: &str = "OCR_BOX_THRESHOLD";
pub const UNCLIP_RATIO_VAR: &str = "OCR_UNCLIP_RATIO";
pub const ENGINE_CACHE_VAR: &str = "OCR_ENGINE_CACHE";
/// Comma-separated, in order of preference, e.g. `cuda,default`.
pub const EXECUTION_PROVIDERS_VAR: &str = "OCR_EXECUTION_PROVIDERS";

/// Configuration of the default engine used by the C entry points.
///
/// Model paths are resolved against `model_dir` unless they are absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model_dir: PathBuf,
    pub det_model: PathBuf,
    pub cls_model: Option<PathBuf>,
    pub rec_model: PathBuf,
    pub rec_keys: PathBuf,
    pub threads: usize,
    pub detection: DetectionOptions,
    /// Where TensorRT keeps compiled engines. Defaults to `.cache` next to each model.
    pub cache_path: Option<PathBuf>,
    /// `None` keeps the providers enabled at compile time.
    pub execution_providers: Option<Vec<ExecutionProvider>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: "models".into(),
            det_model: "ch_PP-OCRv4_det_infer.onnx".into(),
            cls_model: None,
            rec_model: "ch_PP-OCRv4_rec_infer.onnx".into(),
            rec_keys: "ppocr_keys_v1.txt".into(),
            threads: 4,
            detection: DetectionOptions::default(),
            cache_path: None,
            execution_providers: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source, falling back to defaults for
    /// anything missing or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let detection = defaults.detection;
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        Self {
            model_dir: path(MODEL_DIR_VAR).unwrap_or(defaults.model_dir),
            det_model: path(DET_MODEL_VAR).unwrap_or(defaults.det_model),
            cls_model: path(CLS_MODEL_VAR).or(defaults.cls_model),
            rec_model: path(REC_MODEL_VAR).unwrap_or(defaults.rec_model),
            rec_keys: path(REC_KEYS_VAR).unwrap_or(defaults.rec_keys),
            threads: parse_or(&lookup, THREADS_VAR, defaults.threads),
            detection: DetectionOptions {
                max_side_len: parse_or(&lookup, MAX_SIDE_LEN_VAR, detection.max_side_len),
                box_score_threshold: parse_or(
                    &lookup,
                    BOX_SCORE_THRESHOLD_VAR,
                    detection.box_score_threshold,
                ),
                box_threshold: parse_or(&lookup, BOX_THRESHOLD_VAR, detection.box_threshold),
                unclip_ratio: parse_or(&lookup, UNCLIP_RATIO_VAR, detection.unclip_ratio),
                ..detection
            },
            cache_path: path(ENGINE_CACHE_VAR),
            execution_providers: lookup(EXECUTION_PROVIDERS_VAR)
                .and_then(|raw| providers(&raw))
                .or(defaults.execution_providers),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.model_dir.join(path)
    }

    pub fn builder(&self) -> OnnxEngineBuilder {
        let mut builder = OnnxEngineBuilder::new()
            .threads(self.threads)
            .options(self.detection)
            .det_model(self.resolve(&self.det_model))
            .rec_model(self.resolve(&self.rec_model), self.resolve(&self.rec_keys));
        if let Some(cls_model) = &self.cls_model {
            builder = builder.cls_model(self.resolve(cls_model));
        }
        if let Some(cache_path) = &self.cache_path {
            builder = builder.with_engine_cache_path(cache_path);
        }
        if let Some(providers) = &self.execution_providers {
            builder = builder.with_execution_providers(providers.iter().copied());
        }
        builder
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {key}={raw:?}, using {default}");
            default
        }),
    }
}

/// Parses a provider list, skipping names that are unknown or not compiled in. Returns `None`
/// when nothing usable is left.
fn providers(raw: &str) -> Option<Vec<ExecutionProvider>> {
    let providers = raw
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .filter_map(|name| match name.parse::<ExecutionProvider>() {
            Ok(provider) => Some(provider),
            Err(err) => {
                log::warn!("Ignoring {EXECUTION_PROVIDERS_VAR} entry: {err}");
                None
            }
        })
        .collect::<Vec<_>>();
    (!providers.is_empty()).then_some(providers)
}

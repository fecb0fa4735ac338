use std::path::{Path, PathBuf};

use ort::{ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use super::ExecutionProvider;

/// Settings shared by every model session of one engine.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub threads: usize,
    pub execution_providers: Vec<ExecutionProvider>,
    #[cfg_attr(not(feature = "tensorrt"), allow(dead_code))]
    pub cache_path: Option<PathBuf>,
}

/// TensorRT optimization profile for the `x` input: `(min, opt, max)` shapes.
pub(crate) type ShapeProfile = (String, String, String);

impl SessionSettings {
    fn parallel(&self) -> bool {
        // DirectML sessions don't support parallel execution or memory patterns.
        #[cfg(feature = "directml")]
        return !self
            .execution_providers
            .contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        true
    }

    #[cfg_attr(not(feature = "tensorrt"), allow(unused_variables))]
    fn dispatch(
        &self,
        model_path: &Path,
        profile: Option<&ShapeProfile>,
    ) -> Vec<ExecutionProviderDispatch> {
        self.execution_providers
            .iter()
            .filter_map(|provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => {
                        let cache_path = self.cache_path.clone().unwrap_or_else(|| {
                            model_path
                                .parent()
                                .unwrap_or_else(|| Path::new("."))
                                .join(".cache")
                        });
                        Some(setup_tensorrt(cache_path, profile))
                    }
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => {
                        Some(ort::CoreMLExecutionProvider::default().build())
                    }
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(ort::CUDAExecutionProvider::default().build()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => {
                        Some(ort::DirectMLExecutionProvider::default().build())
                    }
                }
            })
            .collect()
    }

    #[instrument(level = "debug", skip(self, profile))]
    pub fn load(&self, model_path: &Path, profile: Option<ShapeProfile>) -> ort::Result<Session> {
        let parallel = self.parallel();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(self.threads)?
            .with_intra_threads(self.threads)?
            .with_execution_providers(self.dispatch(model_path, profile.as_ref()))?
            .commit_from_file(model_path)?;

        log::debug!("{model_path:?} inputs: {:?}", session.inputs);
        log::debug!("{model_path:?} outputs: {:?}", session.outputs);
        Ok(session)
    }
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(
    cache_path: PathBuf,
    profile: Option<&ShapeProfile>,
) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    let mut provider = TensorRTExecutionProvider::default()
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5);
    if let Some((min, opt, max)) = profile {
        provider = provider
            .with_profile_min_shapes(min)
            .with_profile_opt_shapes(opt)
            .with_profile_max_shapes(max);
    }
    provider.build()
}

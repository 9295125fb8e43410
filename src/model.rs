use crate::config::ModelConfig;
use crate::frame::FrameBuffer;
use crate::tensor::RawOutput;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model file not found: {0:?}")]
    MissingFile(PathBuf),
    #[error("Model is already loaded")]
    AlreadyLoaded,
    #[error("Model has not been loaded")]
    NotLoaded,
    #[error("Failed to build network: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Failed to prepare input blob: {0}")]
    Preprocess(String),
    #[error("Forward pass failed: {0}")]
    Forward(String),
    #[error("Failed to read output tensor: {0}")]
    Output(String),
}

/// Network weights and topology files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub weights: PathBuf,
    pub config: PathBuf,
}

impl ModelPaths {
    pub fn new(weights: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            weights: weights.into(),
            config: config.into(),
        }
    }

    /// Returns the first file that does not exist, if any.
    pub fn missing(&self) -> Option<&Path> {
        [self.weights.as_path(), self.config.as_path()]
            .into_iter()
            .find(|path| !path.exists())
    }
}

impl From<&ModelConfig> for ModelPaths {
    fn from(config: &ModelConfig) -> Self {
        Self::new(config.get_weights_path(), config.get_config_path())
    }
}

/// A loaded network that turns a frame into raw detections.
pub trait Detector<F: FrameBuffer>: Send + 'static {
    /// Names of the output layers that are not consumed by any later layer.
    fn output_names(&self) -> &[String];

    fn forward(&mut self, frame: &F) -> Result<RawOutput, InferenceError>;
}

/// Builds a network from files that are known to exist.
pub trait ModelLoader {
    type Model;

    fn load(&self, paths: &ModelPaths) -> Result<Self::Model, ModelError>;
}

/// Owns the detector for the lifetime of the pipeline.
///
/// The store starts empty and can be loaded exactly once. The handle is then
/// either borrowed or moved into the inference worker, so it is never rebuilt
/// while a worker is using it.
pub struct ModelStore<L: ModelLoader> {
    loader: L,
    paths: ModelPaths,
    handle: Option<L::Model>,
}

impl<L: ModelLoader> ModelStore<L> {
    pub fn new(loader: L, paths: ModelPaths) -> Self {
        Self {
            loader,
            paths,
            handle: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    pub fn into_handle(self) -> Result<L::Model, ModelError> {
        self.handle.ok_or(ModelError::NotLoaded)
    }

    pub fn load(&mut self) -> Result<(), ModelError> {
        if self.handle.is_some() {
            return Err(ModelError::AlreadyLoaded);
        }

        if let Some(path) = self.paths.missing() {
            tracing::error!("Model file not found: {:?}", path);
            return Err(ModelError::MissingFile(path.to_path_buf()));
        }

        let model = self.loader.load(&self.paths)?;
        tracing::info!(
            "Loaded model from {:?} and {:?}",
            self.paths.weights,
            self.paths.config
        );
        self.handle = Some(model);

        Ok(())
    }
}

impl<L> ModelStore<L>
where
    L: ModelLoader,
{
    pub fn output_names<F>(&self) -> Option<&[String]>
    where
        F: FrameBuffer,
        L::Model: Detector<F>,
    {
        self.handle.as_ref().map(|model| model.output_names())
    }
}

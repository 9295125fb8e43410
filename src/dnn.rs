//! OpenCV DNN backend for the TensorFlow detection graph.

use crate::config::InputConfig;
use crate::model::{Detector, InferenceError, ModelError, ModelLoader, ModelPaths};
use crate::tensor::{DetectionTensor, RawOutput};
use opencv::{
    core::{self, Mat, Scalar, Size, Vector},
    dnn,
    prelude::*,
};
use tracing::instrument;

/// Loads the frozen graph and its text topology into an OpenCV network.
#[derive(Debug, Clone, Default)]
pub struct DnnLoader {
    input: InputConfig,
}

impl DnnLoader {
    pub fn new(input: InputConfig) -> Self {
        Self { input }
    }
}

impl ModelLoader for DnnLoader {
    type Model = DnnDetector;

    fn load(&self, paths: &ModelPaths) -> Result<DnnDetector, ModelError> {
        let weights = paths.weights.to_string_lossy();
        let config = paths.config.to_string_lossy();

        let backend = |e: opencv::Error| ModelError::Backend(e.to_string());
        let mut net = dnn::read_net_from_tensorflow(&weights, &config).map_err(backend)?;
        net.set_preferable_backend(dnn::DNN_BACKEND_DEFAULT)
            .map_err(backend)?;
        net.set_preferable_target(dnn::DNN_TARGET_CPU)
            .map_err(backend)?;
        let out_names = net.get_unconnected_out_layers_names().map_err(backend)?;

        tracing::info!("Resolved output layers: {:?}", out_names.to_vec());

        Ok(DnnDetector {
            output_names: out_names.to_vec(),
            out_names,
            net,
            input: self.input.clone(),
        })
    }
}

pub struct DnnDetector {
    net: dnn::Net,
    out_names: Vector<String>,
    output_names: Vec<String>,
    input: InputConfig,
}

impl DnnDetector {
    fn blob(&self, frame: &Mat) -> Result<Mat, InferenceError> {
        dnn::blob_from_image(
            frame,
            self.input.scale,
            Size::new(self.input.width as i32, self.input.height as i32),
            Scalar::default(),
            self.input.swap_rb,
            false,
            core::CV_32F,
        )
        .map_err(|e| InferenceError::Preprocess(e.to_string()))
    }
}

impl Detector<Mat> for DnnDetector {
    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    #[instrument(skip_all)]
    fn forward(&mut self, frame: &Mat) -> Result<RawOutput, InferenceError> {
        let blob = self.blob(frame)?;
        self.net
            .set_input(&blob, "", 1.0, Scalar::default())
            .map_err(|e| InferenceError::Forward(e.to_string()))?;

        let mut outs = Vector::<Mat>::new();
        self.net
            .forward(&mut outs, &self.out_names)
            .map_err(|e| InferenceError::Forward(e.to_string()))?;

        let tensors = outs
            .iter()
            .map(|out| {
                out.data_typed::<f32>()
                    .map(|data| DetectionTensor::new(data.to_vec()))
                    .map_err(|e| InferenceError::Output(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawOutput::new(tensors))
    }
}

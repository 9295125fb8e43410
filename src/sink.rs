use crate::extractor::{DetectionExtractor, ExtractError};
use crate::queue::SharedQueue;
use crate::stop::StopSignal;
use crate::telemetry::Metrics;
use crate::tensor::RawOutput;
use opencv::{
    core::{Mat, Vector},
    imgcodecs,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

const STAGE: &str = "sink";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to write sign image {0:?}")]
    WriteFailed(PathBuf),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),
}

/// Drains prediction/frame pairs and stores every detected sign as a PNG.
pub struct SignSink {
    extractor: DetectionExtractor,
    sign_dir: PathBuf,
    metrics: Arc<Metrics>,
    saved: u64,
}

impl SignSink {
    pub fn new(
        extractor: DetectionExtractor,
        sign_dir: PathBuf,
        metrics: Arc<Metrics>,
    ) -> Result<Self, SinkError> {
        std::fs::create_dir_all(&sign_dir)?;
        Ok(Self {
            extractor,
            sign_dir,
            metrics,
            saved: 0,
        })
    }

    pub fn handle(&mut self, frame: &Mat, raw: &RawOutput) -> Result<Option<PathBuf>, SinkError> {
        let Some(target) = self.extractor.find_target(frame, raw)? else {
            return Ok(None);
        };
        self.metrics.record_sign(STAGE);

        let path = self.sign_dir.join(format!("sign_{:06}.png", self.saved));
        if !imgcodecs::imwrite(&path.to_string_lossy(), &target.sign, &Vector::new())? {
            return Err(SinkError::WriteFailed(path));
        }
        self.saved += 1;
        tracing::info!(
            "Sign detected with confidence {:.3} at ({}, {}, {}, {}), saved to {:?}",
            target.record.confidence,
            target.bbox.left,
            target.bbox.top,
            target.bbox.right,
            target.bbox.bottom,
            path
        );
        Ok(Some(path))
    }

    /// The worker pushes a prediction before its frame, so once a frame is
    /// available its prediction is already queued.
    pub fn spawn(
        mut self,
        predictions: Arc<SharedQueue<RawOutput>>,
        processed: Arc<SharedQueue<Mat>>,
        stop: StopSignal,
    ) -> Result<JoinHandle<u64>, SinkError> {
        processed.wake_on(&stop);
        let handle = thread::Builder::new()
            .name("sign-sink".to_string())
            .spawn(move || {
                while let Some(frame) = processed.wait_one(&stop) {
                    let Some(raw) = predictions.dequeue_one() else {
                        tracing::warn!("Processed frame without a prediction");
                        continue;
                    };
                    if let Err(e) = self.handle(&frame, &raw) {
                        tracing::error!("Failed to handle detection: {}", e);
                    }
                }
                tracing::info!("Sign sink stopped after saving {} signs", self.saved);
                self.saved
            })?;
        Ok(handle)
    }
}

use crate::config::CaptureConfig;
use crate::queue::SharedQueue;
use crate::stop::StopSignal;
use opencv::{core::Mat, prelude::*, videoio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open capture source {0}")]
    OpenCaptureFailed(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
    #[error("Failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Camera or video file feeding the frame queue.
pub struct Camera {
    capture: videoio::VideoCapture,
    source: String,
}

impl Camera {
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let capture = match config.camera_index() {
            Some(index) => videoio::VideoCapture::new(index, videoio::CAP_ANY)?,
            None => videoio::VideoCapture::from_file(&config.source, videoio::CAP_ANY)?,
        };
        if !capture.is_opened()? {
            return Err(CaptureError::OpenCaptureFailed(config.source.clone()));
        }
        tracing::info!("Opened capture source {}", config.source);

        Ok(Self {
            capture,
            source: config.source.clone(),
        })
    }

    /// Reads the next frame; `None` once the source is exhausted.
    pub fn read_frame(&mut self) -> Result<Option<Mat>, CaptureError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(CaptureError::ReadFrameFailed)?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    /// Pushes frames into `frames` until the source ends or `stop` fires.
    pub fn spawn(
        mut self,
        frames: Arc<SharedQueue<Mat>>,
        stop: StopSignal,
        frame_delay_ms: u64,
    ) -> Result<JoinHandle<Result<u64, CaptureError>>, CaptureError> {
        let handle = thread::Builder::new()
            .name("frame-producer".to_string())
            .spawn(move || {
                let mut produced = 0;
                while !stop.is_stopped() {
                    match self.read_frame()? {
                        Some(frame) => {
                            frames.enqueue(frame);
                            produced += 1;
                        }
                        None => {
                            tracing::info!("Capture source {} is exhausted", self.source);
                            break;
                        }
                    }
                    thread::sleep(Duration::from_millis(frame_delay_ms));
                }
                tracing::info!("Frame producer stopped after {} frames", produced);
                Ok(produced)
            })?;
        Ok(handle)
    }
}

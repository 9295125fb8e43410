//! Sign detection stage of a video pipeline.
//!
//! Frames are pulled from a shared queue by a dedicated inference worker,
//! run through a pretrained detector, and published together with the raw
//! detector output. The extractor turns that output into a square crop of
//! the single target class.

mod routes;

pub mod config;
pub mod extractor;
pub mod frame;
pub mod model;
pub mod queue;
pub mod server;
pub mod stop;
pub mod telemetry;
pub mod tensor;
pub mod worker;

#[cfg(feature = "opencv")]
pub mod app;
#[cfg(feature = "opencv")]
pub mod capture;
#[cfg(feature = "opencv")]
pub mod dnn;
#[cfg(feature = "opencv")]
pub mod sink;

#[cfg(feature = "opencv")]
pub use app::start_app;
pub use extractor::{DetectionExtractor, ExtractorConfig, PixelBox, SignTarget};
pub use frame::FrameBuffer;
pub use model::{Detector, ModelLoader, ModelPaths, ModelStore};
pub use queue::SharedQueue;
pub use stop::StopSignal;
pub use tensor::{DetectionRecord, DetectionTensor, RawOutput};
pub use worker::InferenceWorker;

//! The inference loop.
//!
//! The worker owns the detector, always runs on the newest queued frame and
//! publishes each result as a pair: the raw output goes to the prediction
//! queue, immediately followed by the untouched frame on the processed-frame
//! queue. It is the only producer of both queues, so their entries line up.

use crate::config::WorkerConfig;
use crate::extractor::{DetectionExtractor, SignTarget};
use crate::frame::FrameBuffer;
use crate::model::{Detector, InferenceError};
use crate::queue::SharedQueue;
use crate::stop::StopSignal;
use crate::tensor::RawOutput;
use crate::telemetry::Metrics;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const STAGE: &str = "worker";

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Inference failed {failures} times in a row, last error: {source}")]
    PersistentFailure {
        failures: u64,
        #[source]
        source: InferenceError,
    },
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// No frame was queued.
    Idle,
    /// The dequeued frame had no pixels.
    Skipped { dropped: usize },
    /// A forward pass ran and its result was published.
    Published { dropped: usize },
    /// The forward pass returned an error; nothing was published.
    Failed { dropped: usize },
}

/// Totals reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub failures: u64,
    pub signs: u64,
}

struct InlineExtraction<F> {
    extractor: DetectionExtractor,
    signs: Arc<SharedQueue<SignTarget<F>>>,
}

pub struct InferenceWorker<F, D> {
    detector: D,
    frames: Arc<SharedQueue<F>>,
    predictions: Arc<SharedQueue<RawOutput>>,
    processed: Arc<SharedQueue<F>>,
    inline: Option<InlineExtraction<F>>,
    metrics: Option<Arc<Metrics>>,
    config: WorkerConfig,
    state: WorkerState,
    report: WorkerReport,
    consecutive_failures: u64,
    _frame: PhantomData<fn() -> F>,
}

impl<F, D> InferenceWorker<F, D>
where
    F: FrameBuffer,
    D: Detector<F>,
{
    pub fn new(
        detector: D,
        frames: Arc<SharedQueue<F>>,
        predictions: Arc<SharedQueue<RawOutput>>,
        processed: Arc<SharedQueue<F>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            detector,
            frames,
            predictions,
            processed,
            inline: None,
            metrics: None,
            config,
            state: WorkerState::Running,
            report: WorkerReport::default(),
            consecutive_failures: 0,
            _frame: PhantomData,
        }
    }

    /// Also runs the extractor on every published frame and queues the hits.
    pub fn with_inline_extraction(
        mut self,
        extractor: DetectionExtractor,
        signs: Arc<SharedQueue<SignTarget<F>>>,
    ) -> Self {
        self.inline = Some(InlineExtraction { extractor, signs });
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn report(&self) -> WorkerReport {
        self.report
    }

    /// One iteration that never blocks.
    pub fn run_once(&mut self) -> Result<Iteration, WorkerError> {
        match self.frames.take_latest() {
            Some((frame, dropped)) => self.process(frame, dropped),
            None => Ok(Iteration::Idle),
        }
    }

    /// Runs until `stop` is triggered.
    ///
    /// The loop sleeps while the frame queue is empty. A forward pass that has
    /// already started always completes before the worker stops.
    pub fn run(&mut self, stop: StopSignal) -> Result<WorkerReport, WorkerError> {
        self.state = WorkerState::Running;
        self.frames.wake_on(&stop);
        tracing::info!("Inference worker started");

        let result = loop {
            if stop.is_stopped() {
                break Ok(());
            }
            let Some((frame, dropped)) = self.frames.wait_latest(&stop) else {
                break Ok(());
            };
            if let Err(e) = self.process(frame, dropped) {
                break Err(e);
            }
        };

        self.state = WorkerState::Stopped;
        tracing::info!(
            "Inference worker stopped: processed={}, dropped={}, skipped={}, failures={}",
            self.report.processed,
            self.report.dropped,
            self.report.skipped,
            self.report.failures
        );
        result.map(|_| self.report)
    }

    pub fn spawn(
        mut self,
        stop: StopSignal,
    ) -> Result<JoinHandle<Result<WorkerReport, WorkerError>>, WorkerError>
    where
        F: 'static,
        D: 'static,
    {
        let handle = thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || self.run(stop))?;
        Ok(handle)
    }

    #[instrument(skip(self, frame))]
    fn process(&mut self, frame: F, dropped: usize) -> Result<Iteration, WorkerError> {
        self.report.dropped += dropped as u64;
        if dropped > 0 {
            tracing::debug!("Discarded {} stale frames", dropped);
        }

        if frame.is_empty() {
            self.report.skipped += 1;
            return Ok(Iteration::Skipped { dropped });
        }

        let started = Instant::now();
        let raw = match self.detector.forward(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                self.on_failure(e)?;
                return Ok(Iteration::Failed { dropped });
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.consecutive_failures = 0;
        self.report.processed += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_frame(dropped, elapsed_ms, STAGE);
        }
        tracing::debug!(
            "Forward pass produced {} tensors in {} ms",
            raw.tensors.len(),
            elapsed_ms
        );

        if let Some(inline) = &self.inline {
            match inline.extractor.find_target(&frame, &raw) {
                Ok(Some(target)) => {
                    self.report.signs += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_sign(STAGE);
                    }
                    inline.signs.enqueue(target);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to extract sign: {}", e),
            }
        }

        self.predictions.enqueue(raw);
        self.processed.enqueue(frame);

        Ok(Iteration::Published { dropped })
    }

    fn on_failure(&mut self, error: InferenceError) -> Result<(), WorkerError> {
        self.consecutive_failures += 1;
        self.report.failures += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(STAGE);
        }
        tracing::error!(
            "Inference failed ({}/{}): {}",
            self.consecutive_failures,
            self.config.max_consecutive_failures,
            error
        );

        if self.consecutive_failures >= self.config.max_consecutive_failures {
            tracing::error!("Persistent failure detected. Exiting inference loop");
            return Err(WorkerError::PersistentFailure {
                failures: self.consecutive_failures,
                source: error,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::extractor::ExtractorConfig;
    use crate::model::tests::MockDetector;
    use crate::tensor::DetectionTensor;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingDetector {
        output_names: Vec<String>,
        calls: Arc<AtomicUsize>,
    }

    impl Detector<RgbImage> for FailingDetector {
        fn output_names(&self) -> &[String] {
            &self.output_names
        }

        fn forward(&mut self, _frame: &RgbImage) -> Result<RawOutput, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(InferenceError::Forward("layer mismatch".to_string()))
        }
    }

    struct Queues {
        frames: Arc<SharedQueue<RgbImage>>,
        predictions: Arc<SharedQueue<RawOutput>>,
        processed: Arc<SharedQueue<RgbImage>>,
    }

    fn queues() -> Queues {
        Queues {
            frames: Arc::new(SharedQueue::new()),
            predictions: Arc::new(SharedQueue::new()),
            processed: Arc::new(SharedQueue::new()),
        }
    }

    fn sign_output() -> RawOutput {
        RawOutput::new(vec![DetectionTensor::new(vec![
            0.0, 1.0, 0.95, 0.2, 0.2, 0.4, 0.4,
        ])])
    }

    fn mock_detector(calls: &Arc<AtomicUsize>) -> MockDetector {
        MockDetector {
            output_names: vec!["detection_out_final".to_string()],
            calls: calls.clone(),
            output: sign_output(),
        }
    }

    fn worker(
        queues: &Queues,
        calls: &Arc<AtomicUsize>,
    ) -> InferenceWorker<RgbImage, MockDetector> {
        InferenceWorker::new(
            mock_detector(calls),
            queues.frames.clone(),
            queues.predictions.clone(),
            queues.processed.clone(),
            WorkerConfig::default(),
        )
    }

    fn tagged_frame(tag: u8) -> RgbImage {
        RgbImage::from_pixel(100, 100, Rgb([tag, 0, 0]))
    }

    #[test]
    fn test_backlog_is_discarded() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker(&queues, &calls);
        for tag in 1..=5 {
            queues.frames.enqueue(tagged_frame(tag));
        }

        let iteration = worker.run_once().unwrap();

        assert_eq!(iteration, Iteration::Published { dropped: 4 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(queues.frames.is_empty());
        assert_eq!(queues.predictions.len(), 1);
        let processed = queues.processed.dequeue_one().unwrap();
        assert_eq!(processed.get_pixel(0, 0), &Rgb([5, 0, 0]));
        assert_eq!(worker.report().dropped, 4);
    }

    #[test]
    fn test_idle_without_frames() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker(&queues, &calls);

        assert_eq!(worker.run_once().unwrap(), Iteration::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(queues.predictions.is_empty());
    }

    #[test]
    fn test_empty_frame_is_skipped() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker(&queues, &calls);
        queues.frames.enqueue(RgbImage::new(0, 0));

        assert_eq!(
            worker.run_once().unwrap(),
            Iteration::Skipped { dropped: 0 }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(queues.processed.is_empty());
    }

    #[test]
    fn test_predictions_pair_with_frames() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker(&queues, &calls);

        for tag in [7, 9, 11] {
            queues.frames.enqueue(tagged_frame(tag));
            worker.run_once().unwrap();
        }

        assert_eq!(queues.predictions.len(), queues.processed.len());
        let tags: Vec<u8> = std::iter::from_fn(|| queues.processed.dequeue_one())
            .map(|frame| frame.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(tags, vec![7, 9, 11]);
    }

    #[test]
    fn test_inline_extraction_queues_signs() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let signs = Arc::new(SharedQueue::new());
        let extractor = DetectionExtractor::new(ExtractorConfig::from(&DetectionConfig::default()));
        let mut worker = worker(&queues, &calls).with_inline_extraction(extractor, signs.clone());
        queues.frames.enqueue(tagged_frame(3));

        worker.run_once().unwrap();

        let target = signs.dequeue_one().unwrap();
        assert_eq!(target.sign.dimensions(), (64, 64));
        assert_eq!(worker.report().signs, 1);
        assert_eq!(queues.predictions.len(), 1);
        assert_eq!(queues.processed.len(), 1);
    }

    #[test]
    fn test_inline_extraction_miss_still_publishes_pair() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let signs = Arc::new(SharedQueue::new());
        let extractor = DetectionExtractor::new(ExtractorConfig {
            target_class_id: 5,
            ..ExtractorConfig::default()
        });
        let mut worker = worker(&queues, &calls).with_inline_extraction(extractor, signs.clone());
        queues.frames.enqueue(tagged_frame(4));

        assert_eq!(
            worker.run_once().unwrap(),
            Iteration::Published { dropped: 0 }
        );

        assert!(signs.is_empty());
        assert_eq!(worker.report().signs, 0);
        assert_eq!(queues.predictions.len(), 1);
        let frame = queues.processed.dequeue_one().unwrap();
        assert_eq!(frame.get_pixel(0, 0)[0], 4);
    }

    #[test]
    fn test_persistent_failure_stops_worker() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = FailingDetector {
            output_names: vec![],
            calls: calls.clone(),
        };
        let mut worker = InferenceWorker::new(
            detector,
            queues.frames.clone(),
            queues.predictions.clone(),
            queues.processed.clone(),
            WorkerConfig {
                max_consecutive_failures: 2,
            },
        );

        queues.frames.enqueue(tagged_frame(1));
        assert_eq!(worker.run_once().unwrap(), Iteration::Failed { dropped: 0 });

        queues.frames.enqueue(tagged_frame(2));
        let result = worker.run_once();

        assert!(matches!(
            result,
            Err(WorkerError::PersistentFailure { failures: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(queues.predictions.is_empty());
        assert!(queues.processed.is_empty());
    }

    #[test]
    fn test_run_until_stopped() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = worker(&queues, &calls);
        let stop = StopSignal::new();

        let handle = worker.spawn(stop.clone()).unwrap();
        queues.frames.enqueue(tagged_frame(1));

        let deadline = Instant::now() + Duration::from_secs(5);
        while queues.processed.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        stop.trigger();

        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queues.predictions.len(), 1);
    }

    #[test]
    fn test_stopped_worker_does_no_inference() {
        let queues = queues();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut worker = worker(&queues, &calls);
        let stop = StopSignal::new();
        stop.trigger();
        queues.frames.enqueue(tagged_frame(1));

        let report = worker.run(stop).unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(report, WorkerReport::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queues.frames.len(), 1);
    }
}

//! Locates the target sign in raw detector output and cuts it out of the frame.
//!
//! Records are scanned lazily, tensor by tensor, in the order the network
//! produced them. By default the first record that clears the confidence
//! threshold for the target class wins, even if a later record scores higher.

use crate::config::{DetectionConfig, Selection};
use crate::frame::{FrameBuffer, FrameError, Region};
use crate::tensor::{DetectionRecord, RawOutput};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Box in pixel space, inclusive, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.right.abs_diff(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.abs_diff(self.top)
    }

    /// Crop rectangle spanned by the box corners.
    pub fn region(&self) -> Region {
        Region {
            x: self.left.min(self.right),
            y: self.top.min(self.bottom),
            width: self.width(),
            height: self.height(),
        }
    }
}

/// The detected sign.
#[derive(Debug, Clone)]
pub struct SignTarget<F> {
    pub record: DetectionRecord,
    pub bbox: PixelBox,
    pub sign: F,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub target_class_id: i32,
    pub confidence_threshold: f32,
    pub box_margin: f32,
    pub sign_side: u32,
    pub selection: Selection,
}

impl From<&DetectionConfig> for ExtractorConfig {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            target_class_id: config.target_class_id,
            confidence_threshold: config.confidence_threshold,
            box_margin: config.box_margin,
            sign_side: config.sign_side,
            selection: config.selection,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionExtractor {
    config: ExtractorConfig,
}

impl DetectionExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn qualifies(&self, record: &DetectionRecord) -> bool {
        record.confidence > self.config.confidence_threshold
            && record.class_id() == self.config.target_class_id
    }

    /// Qualifying records, lazily, in scan order.
    pub fn candidates<'a>(
        &'a self,
        raw: &'a RawOutput,
    ) -> impl Iterator<Item = DetectionRecord> + 'a {
        raw.records().filter(move |record| self.qualifies(record))
    }

    pub fn select(&self, raw: &RawOutput) -> Option<DetectionRecord> {
        let mut candidates = self.candidates(raw);
        match self.config.selection {
            Selection::First => candidates.next(),
            Selection::HighestConfidence => {
                candidates.reduce(|best, record| {
                    if record.confidence > best.confidence {
                        record
                    } else {
                        best
                    }
                })
            }
        }
    }

    /// Converts a normalized record into a pixel box, grown by the configured
    /// margin on every side and clamped to the frame.
    pub fn locate(&self, record: &DetectionRecord, width: u32, height: u32) -> Option<PixelBox> {
        if width == 0 || height == 0 {
            return None;
        }
        let margin = self.config.box_margin as f64;
        let to_pixel = |value: f32, extend: f64, size: u32| -> u32 {
            let max = (size - 1) as f64;
            ((value as f64 + extend) * size as f64)
                .round()
                .clamp(0.0, max) as u32
        };

        Some(PixelBox {
            left: to_pixel(record.left, -margin, width),
            top: to_pixel(record.top, -margin, height),
            right: to_pixel(record.right, margin, width),
            bottom: to_pixel(record.bottom, margin, height),
        })
    }

    /// Finds the target sign in `raw` and returns it as an independent
    /// `sign_side × sign_side` image.
    ///
    /// `Ok(None)` means nothing qualified in this frame, or the selected box
    /// has no area left after clamping.
    #[instrument(skip_all)]
    pub fn find_target<F: FrameBuffer>(
        &self,
        frame: &F,
        raw: &RawOutput,
    ) -> Result<Option<SignTarget<F>>, ExtractError> {
        if raw.is_empty() || frame.is_empty() {
            return Ok(None);
        }

        let Some(record) = self.select(raw) else {
            return Ok(None);
        };
        let Some(bbox) = self.locate(&record, frame.width(), frame.height()) else {
            return Ok(None);
        };

        let region = bbox.region();
        if region.is_empty() {
            tracing::debug!("Skipping zero-area detection box {:?}", bbox);
            return Ok(None);
        }

        let sign = frame.crop_resized(region, self.config.sign_side)?;
        tracing::debug!(
            "Target found: confidence={:.3}, bbox=({}, {}, {}, {})",
            record.confidence,
            bbox.left,
            bbox.top,
            bbox.right,
            bbox.bottom
        );

        Ok(Some(SignTarget { record, bbox, sign }))
    }
}

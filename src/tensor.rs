//! Typed view over the raw detector output.
//!
//! The detection head emits one or more tensors, each a flat run of
//! `[batch_id, class_id, confidence, left, top, right, bottom]` records with
//! box coordinates normalized to the input frame.

/// Number of `f32` values per detection record.
pub const RECORD_STRIDE: usize = 7;

/// One candidate detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionRecord {
    pub batch_id: f32,
    pub class_id_raw: f32,
    pub confidence: f32,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl DetectionRecord {
    /// Reads a record from exactly `RECORD_STRIDE` values.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match *values {
            [batch_id, class_id_raw, confidence, left, top, right, bottom] => Some(Self {
                batch_id,
                class_id_raw,
                confidence,
                left,
                top,
                right,
                bottom,
            }),
            _ => None,
        }
    }

    /// Label index; the model reserves raw id 0 for the background class.
    ///
    /// The float-to-int cast saturates, so garbage ids (NaN, infinities) map
    /// to the ends of the `i32` range instead of overflowing.
    pub fn class_id(&self) -> i32 {
        (self.class_id_raw as i32).saturating_sub(1)
    }
}

/// A single output blob of the network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionTensor {
    data: Vec<f32>,
}

impl DetectionTensor {
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Number of complete records; a trailing partial record is not counted.
    pub fn len(&self) -> usize {
        self.data.len() / RECORD_STRIDE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> impl Iterator<Item = DetectionRecord> + '_ {
        self.data
            .chunks_exact(RECORD_STRIDE)
            .filter_map(DetectionRecord::from_slice)
    }
}

impl From<Vec<f32>> for DetectionTensor {
    fn from(data: Vec<f32>) -> Self {
        Self::new(data)
    }
}

/// Everything one forward pass produced, in output-layer order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub tensors: Vec<DetectionTensor>,
}

impl RawOutput {
    pub fn new(tensors: Vec<DetectionTensor>) -> Self {
        Self { tensors }
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// All records of all tensors, in scan order.
    pub fn records(&self) -> impl Iterator<Item = DetectionRecord> + '_ {
        self.tensors.iter().flat_map(|tensor| tensor.records())
    }
}

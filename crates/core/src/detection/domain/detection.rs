use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// One accepted face occurrence within a run.
///
/// Its position in the run's detection sequence is its identity; records are
/// never reordered or mutated after acceptance.
#[derive(Clone, Debug)]
pub struct Detection {
    pub embedding: Vec<f32>,
    /// ROI-local coordinates.
    pub bounding_box: BoundingBox,
    pub timestamp: f64,
    pub frame_index: usize,
    pub confidence: f64,
    /// ROI crop cut to `bounding_box`.
    pub face_image: Frame,
}

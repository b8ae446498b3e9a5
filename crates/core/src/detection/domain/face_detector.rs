use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

/// A face reported by a [`FaceDetector`], with its identity embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
    /// Box in the coordinates of the frame passed to `detect`.
    pub bounding_box: BoundingBox,
    /// Fixed-length identity vector; every face from one detector has the
    /// same dimensionality.
    pub embedding: Vec<f32>,
    pub confidence: f64,
}

/// Domain interface for the detect-and-embed capability.
///
/// Implementations may keep per-run state (sessions, caches), hence `&mut self`.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>>;
}

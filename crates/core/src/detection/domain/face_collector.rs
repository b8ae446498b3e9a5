use crate::detection::domain::detection::Detection;
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::frame::Frame;

/// Runs the detector over sampled frames and accumulates the run's
/// detection sequence.
///
/// Faces are appended in detector order within a frame and frame order
/// across the run. Faces whose (frame-clamped) box is narrower or shorter
/// than `min_face_size` are discarded before they reach the sequence.
pub struct FaceCollector {
    detector: Box<dyn FaceDetector>,
    min_face_size: u32,
    detections: Vec<Detection>,
    rejected: usize,
}

impl FaceCollector {
    pub fn new(detector: Box<dyn FaceDetector>, min_face_size: u32) -> Self {
        Self {
            detector,
            min_face_size,
            detections: Vec::new(),
            rejected: 0,
        }
    }

    /// Detects faces in `frame` and appends the qualifying ones.
    ///
    /// Returns how many detections this frame contributed. Detector errors
    /// are returned unchanged; nothing is appended in that case.
    pub fn observe(
        &mut self,
        frame: &Frame,
        timestamp: f64,
    ) -> Result<usize, Box<dyn std::error::Error>> {
        let faces = self.detector.detect(frame)?;
        let min = self.min_face_size as i32;
        let before = self.detections.len();

        for face in faces {
            let bbox = face.bounding_box.clamp_to(frame.width(), frame.height());
            if bbox.width() < min || bbox.height() < min || bbox.is_empty() {
                self.rejected += 1;
                continue;
            }

            let face_image = frame.crop(
                bbox.left as u32,
                bbox.top as u32,
                bbox.width() as u32,
                bbox.height() as u32,
            );

            self.detections.push(Detection {
                embedding: face.embedding,
                bounding_box: bbox,
                timestamp,
                frame_index: frame.index(),
                confidence: face.confidence,
                face_image,
            });
        }

        Ok(self.detections.len() - before)
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Faces dropped by the size filter so far.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

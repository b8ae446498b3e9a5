//! Face detector + embedder backed by two ONNX Runtime sessions.
//!
//! A YOLO face model proposes boxes (letterbox preprocessing, confidence
//! filter, greedy NMS); each surviving box is cropped, resized to 112x112 and
//! passed through an ArcFace model whose output is L2-normalised. Unit-length
//! embeddings keep Euclidean distances in `[0, 2]`, which is the space the
//! clustering `eps` is tuned for.
use std::path::Path;

use crate::detection::domain::face_detector::{DetectedFace, FaceDetector};
use crate::detection::infrastructure::onnx_session::open_session;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;
use crate::shared::math::l2_normalize;

/// Fallback YOLO input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_NORM_MEAN: f32 = 127.5;
const EMBED_NORM_STD: f32 = 127.5;

pub struct OnnxFaceAnalyzer {
    detector: ort::session::Session,
    embedder: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceAnalyzer {
    /// Loads both models. `confidence` is the minimum YOLO score for a box to
    /// be considered a face.
    pub fn new(
        detector_model: &Path,
        embedding_model: &Path,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let detector = open_session(detector_model)?;
        let embedder = open_session(embedding_model)?;

        // NCHW: [1, 3, H, W]; H and W are equal for square inputs.
        let input_size = detector
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { ref shape, .. }
                    if shape.len() >= 4 && shape[2] > 0 =>
                {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded face models (detector input {input_size}px, confidence {confidence:.2})"
        );

        Ok(Self {
            detector,
            embedder,
            confidence,
            input_size,
        })
    }

    fn propose(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.detector.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("face detection model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected YOLO output shape: {shape:?}").into());
        }

        // Either [1, features, detections] (transposed) or [1, detections, features].
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if num_feats < 5 {
            return Ok(Vec::new());
        }

        let feature = |det: usize, feat: usize| -> f64 {
            if transposed {
                tensor[[0, feat, det]] as f64
            } else {
                tensor[[0, det, feat]] as f64
            }
        };

        let mut raw = Vec::new();
        for i in 0..num_dets {
            let conf = feature(i, 4);
            if conf < self.confidence {
                continue;
            }
            let (cx, cy, w, h) = (feature(i, 0), feature(i, 1), feature(i, 2), feature(i, 3));
            raw.push(RawDetection {
                x1: ((cx - w / 2.0) - pad_x as f64) / scale,
                y1: ((cy - h / 2.0) - pad_y as f64) / scale,
                x2: ((cx + w / 2.0) - pad_x as f64) / scale,
                y2: ((cy + h / 2.0) - pad_y as f64) / scale,
                confidence: conf,
            });
        }

        Ok(nms(&mut raw, NMS_IOU_THRESH))
    }

    fn embed(&mut self, face: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = embedding_input(face);
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.embedder.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;

        let mut embedding: Vec<f32> = embedding_array.iter().copied().collect();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceDetector for OnnxFaceAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let proposals = self.propose(frame)?;
        let mut faces = Vec::with_capacity(proposals.len());

        for det in proposals {
            let bbox = det
                .bounding_box()
                .clamp_to(frame.width(), frame.height());
            if bbox.is_empty() {
                continue;
            }
            let crop = frame.crop(
                bbox.left as u32,
                bbox.top as u32,
                bbox.width() as u32,
                bbox.height() as u32,
            );
            let embedding = self.embed(&crop)?;
            faces.push(DetectedFace {
                bounding_box: bbox,
                embedding,
                confidence: det.confidence,
            });
        }

        Ok(faces)
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, the YOLO convention.
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

/// Resize a face crop to 112x112, normalise to [-1, 1], NCHW layout.
fn embedding_input(face: &Frame) -> ndarray::Array4<f32> {
    let src_w = face.width() as usize;
    let src_h = face.height() as usize;
    let src = face.as_ndarray();

    let mut tensor =
        ndarray::Array4::<f32>::zeros((1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE));

    for y in 0..EMBED_INPUT_SIZE {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / EMBED_INPUT_SIZE as f64) as usize)
            .min(src_h - 1);
        for x in 0..EMBED_INPUT_SIZE {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / EMBED_INPUT_SIZE as f64) as usize)
                .min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] =
                    (src[[src_y, src_x, c]] as f32 - EMBED_NORM_MEAN) / EMBED_NORM_STD;
            }
        }
    }

    tensor
}

// ---------------------------------------------------------------------------
// NMS
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
}

impl RawDetection {
    fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_corners(self.x1, self.y1, self.x2, self.y2)
    }
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        let suppressed = keep
            .iter()
            .any(|k| k.bounding_box().iou(&det.bounding_box()) > iou_thresh);
        if !suppressed {
            keep.push(det.clone());
        }
    }
    keep
}

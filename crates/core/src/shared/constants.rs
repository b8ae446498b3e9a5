pub const YOLO_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const YOLO_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const EMBEDDING_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

/// Process every Nth frame.
pub const DEFAULT_FRAME_SKIP: usize = 15;

/// Faces narrower or shorter than this (pixels) are discarded.
pub const DEFAULT_MIN_FACE_SIZE: u32 = 40;

pub const DEFAULT_CLUSTERING_EPS: f64 = 0.5;
pub const DEFAULT_MIN_SAMPLES: usize = 2;

pub const DEFAULT_DETECTION_CONFIDENCE: f64 = 0.5;

pub const DEFAULT_THUMBNAIL_ROOT: &str = "thumbnails";
pub const DEFAULT_DATABASE_PATH: &str = "faceindex.db";

/// Application directory name under the platform config/cache dirs.
pub const APP_DIR_NAME: &str = "FaceIndex";

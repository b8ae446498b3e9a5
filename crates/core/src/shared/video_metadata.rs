use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: usize,
    pub codec: String,
    pub source_path: Option<PathBuf>,
}

impl VideoMetadata {
    /// Presentation time of a frame in seconds, derived from its absolute
    /// index. Sources without a usable frame rate report 0.
    pub fn timestamp_of(&self, frame_index: usize) -> f64 {
        if self.fps > 0.0 {
            frame_index as f64 / self.fps
        } else {
            0.0
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.timestamp_of(self.total_frames)
    }
}

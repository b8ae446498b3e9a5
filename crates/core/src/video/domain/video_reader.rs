use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

pub type FrameResult = Result<Frame, Box<dyn std::error::Error>>;

/// Sequential frame source for the sampling stage.
///
/// Frames come out in decode order and carry their absolute index in the
/// source. An `Err` item describes a single frame that could not be decoded;
/// the stream may continue after it.
pub trait VideoReader: Send {
    /// Opens the source and returns its metadata.
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>>;

    /// Returns an iterator over frames in decode order.
    fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_>;

    /// Releases any resources held by the reader.
    fn close(&mut self);
}

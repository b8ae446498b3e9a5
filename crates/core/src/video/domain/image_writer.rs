use std::path::Path;

use crate::shared::frame::Frame;

/// Persists a frame (typically a face crop) as an image file.
pub trait ImageWriter: Send {
    /// Writes `frame` to `path`. The format follows the file extension.
    /// When `size` is given the image is resized to exactly that many pixels.
    fn write(
        &self,
        path: &Path,
        frame: &Frame,
        size: Option<(u32, u32)>,
    ) -> Result<(), Box<dyn std::error::Error>>;
}

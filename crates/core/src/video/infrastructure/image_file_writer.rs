use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;

use crate::shared::frame::Frame;
use crate::video::domain::image_writer::ImageWriter;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Writes face thumbnails with the `image` crate.
///
/// `.jpg`/`.jpeg` paths are encoded at the configured JPEG quality; any other
/// extension is delegated to `image`'s format detection.
pub struct ImageFileWriter {
    jpeg_quality: u8,
}

impl ImageFileWriter {
    pub fn new() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }
}

impl Default for ImageFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWriter for ImageFileWriter {
    fn write(
        &self,
        path: &Path,
        frame: &Frame,
        size: Option<(u32, u32)>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Err(format!("refusing to write empty image to {}", path.display()).into());
        }
        if frame.channels() != 3 {
            return Err(format!("expected RGB frame, got {} channels", frame.channels()).into());
        }

        let img = image::RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or("Failed to create image from frame data")?;

        let img = match size {
            Some((w, h)) => image::imageops::resize(&img, w, h, image::imageops::FilterType::Triangle),
            None => img,
        };

        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));

        if is_jpeg {
            let file = BufWriter::new(File::create(path)?);
            let mut encoder = JpegEncoder::new_with_quality(file, self.jpeg_quality);
            encoder.encode_image(&img)?;
        } else {
            img.save(path)?;
        }
        Ok(())
    }
}

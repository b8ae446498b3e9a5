use std::path::Path;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::{FrameResult, VideoReader};

/// Decodes video frames via ffmpeg-next (libavformat + libavcodec).
///
/// Every decoded frame is converted to RGB24. Frame indices count decoded
/// frames from the start of the stream, so they stay absolute regardless of
/// how the caller decimates them.
pub struct FfmpegReader {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    video_stream_index: usize,
}

// Safety: FfmpegReader is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegReader {}

impl FfmpegReader {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            video_stream_index: 0,
        }
    }

    fn start_decoding(&mut self) -> Result<FfmpegFrameIter<'_>, Box<dyn std::error::Error>> {
        let video_stream_index = self.video_stream_index;
        let ictx = self.input_ctx.as_mut().ok_or("FfmpegReader: not opened")?;

        let stream = ictx
            .stream(video_stream_index)
            .ok_or("FfmpegReader: video stream disappeared")?;
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(FfmpegFrameIter {
            ictx,
            decoder,
            scaler,
            width,
            height,
            video_stream_index,
            frame_index: 0,
            flushing: false,
            done: false,
        })
    }
}

impl Default for FfmpegReader {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoReader for FfmpegReader {
    fn open(&mut self, path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let ictx = ffmpeg_next::format::input(path)?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;

        let video_stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let rate = stream.avg_frame_rate();
        let rate = if rate.denominator() != 0 && rate.numerator() != 0 {
            rate
        } else {
            stream.rate()
        };
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let total_frames = match stream.frames() {
            n if n > 0 => n as usize,
            _ => estimate_frame_count(ictx.duration(), fps),
        };

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            total_frames,
            codec: decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            source_path: Some(path.to_path_buf()),
        };

        log::debug!(
            "Opened {}: {}x{} @ {:.2} fps, {} frames ({})",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.total_frames,
            metadata.codec
        );

        self.video_stream_index = video_stream_index;
        self.input_ctx = Some(ictx);

        Ok(metadata)
    }

    fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_> {
        match self.start_decoding() {
            Ok(iter) => Box::new(iter),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn close(&mut self) {
        self.input_ctx = None;
    }
}

/// Container duration is in `AV_TIME_BASE` units (microseconds).
fn estimate_frame_count(duration: i64, fps: f64) -> usize {
    if duration <= 0 || fps <= 0.0 {
        return 0;
    }
    let secs = duration as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE);
    (secs * fps).round() as usize
}

/// Lazy iterator that decodes video frames one at a time, avoiding the need
/// to buffer the entire video in memory.
struct FfmpegFrameIter<'a> {
    ictx: &'a mut ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    video_stream_index: usize,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

impl FfmpegFrameIter<'_> {
    fn try_receive(&mut self) -> Option<FrameResult> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return None;
        }

        let index = self.frame_index;
        self.frame_index += 1;

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb_frame) {
            return Some(Err(format!("frame {index}: {e}").into()));
        }

        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        Some(Ok(Frame::new(pixels, self.width, self.height, 3, index)))
    }
}

impl Iterator for FfmpegFrameIter<'_> {
    type Item = FrameResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(result) = self.try_receive() {
            return Some(result);
        }

        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(result) = self.try_receive() {
                    return Some(result);
                }
                self.done = true;
                return None;
            };

            if stream.index() != self.video_stream_index {
                continue;
            }

            if let Err(e) = self.decoder.send_packet(&packet) {
                return Some(reject_packet(&mut self.frame_index, e));
            }

            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }
}

/// A video packet the decoder refused stands in for one frame, so the index
/// still advances and later frames keep their absolute position.
fn reject_packet(frame_index: &mut usize, err: ffmpeg_next::Error) -> FrameResult {
    let index = *frame_index;
    *frame_index += 1;
    Err(format!("frame {index}: undecodable packet: {err}").into())
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
/// This function strips that padding to produce a tightly-packed pixel buffer.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::pipeline::error::PipelineError;
use crate::shared::frame::Frame;
use crate::shared::roi::Roi;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_reader::{FrameResult, VideoReader};

/// Half-open `[start, end)` interval in seconds. `end == None` runs to the
/// end of the video.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: Option<f64>,
}

impl TimeWindow {
    pub fn new(start: f64, end: Option<f64>) -> Self {
        Self { start, end }
    }

    pub fn whole_video() -> Self {
        Self::new(0.0, None)
    }

    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && self.end.map_or(true, |e| t < e)
    }

    /// True once `t` can no longer be followed by a timestamp inside the window.
    fn is_past(&self, t: f64) -> bool {
        self.end.is_some_and(|e| t >= e)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(PipelineError::InvalidParameters(format!(
                "start time must be a non-negative number of seconds, got {}",
                self.start
            )));
        }
        if let Some(end) = self.end {
            if !end.is_finite() || end <= self.start {
                return Err(PipelineError::InvalidParameters(format!(
                    "end time {end} must be after start time {}",
                    self.start
                )));
            }
        }
        Ok(())
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::whole_video()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplingParams {
    /// Source-frame pixel coordinates.
    pub roi: Roi,
    pub frame_skip: usize,
    pub window: TimeWindow,
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.roi.validate()?;
        if self.frame_skip == 0 {
            return Err(PipelineError::InvalidParameters(
                "frame skip must be at least 1".into(),
            ));
        }
        self.window.validate()
    }
}

/// A decimated frame already cropped to the ROI.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    pub frame: Frame,
    pub timestamp: f64,
}

impl SampledFrame {
    /// Index in the full, undecimated source.
    pub fn frame_index(&self) -> usize {
        self.frame.index()
    }
}

/// Lazily decodes a video and yields every `frame_skip`-th frame whose
/// timestamp falls inside the window, cropped to the ROI.
///
/// Undecodable frames are skipped and counted. The cancel flag is checked
/// before each frame is pulled from the reader; once it is set the iterator
/// simply ends.
pub struct FrameSampler<'a> {
    frames: Box<dyn Iterator<Item = FrameResult> + 'a>,
    metadata: VideoMetadata,
    roi: Roi,
    frame_skip: usize,
    window: TimeWindow,
    cancelled: Arc<AtomicBool>,
    decoded: usize,
    skipped: usize,
    finished: bool,
}

impl<'a> FrameSampler<'a> {
    /// Validates `params`, opens `path` and prepares the frame stream.
    ///
    /// Parameter errors are reported before the reader is touched.
    pub fn open(
        reader: &'a mut dyn VideoReader,
        path: &Path,
        params: &SamplingParams,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        params.validate()?;

        let metadata = reader
            .open(path)
            .map_err(|e| PipelineError::SourceUnavailable(format!("{}: {e}", path.display())))?;
        let roi = params.roi.clamp_to(metadata.width, metadata.height)?;

        log::debug!(
            "Sampling {} ({}x{}, {:.2} fps, {} frames) every {} frames inside {roi}",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.total_frames,
            params.frame_skip
        );

        Ok(Self {
            frames: reader.frames(),
            metadata,
            roi,
            frame_skip: params.frame_skip,
            window: params.window,
            cancelled,
            decoded: 0,
            skipped: 0,
            finished: false,
        })
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// The ROI after clamping to the frame bounds.
    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    pub fn decoded_frames(&self) -> usize {
        self.decoded
    }
}

impl Iterator for FrameSampler<'_> {
    type Item = Result<SampledFrame, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.cancelled.load(Ordering::Relaxed) {
                self.finished = true;
                return None;
            }

            let frame = match self.frames.next() {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.skipped += 1;
                    log::warn!("Skipping undecodable frame: {e}");
                    continue;
                }
                None => {
                    self.finished = true;
                    if self.decoded == 0 && self.skipped > 0 {
                        return Some(Err(PipelineError::SourceUnavailable(format!(
                            "none of the {} frames read could be decoded",
                            self.skipped
                        ))));
                    }
                    return None;
                }
            };
            self.decoded += 1;

            let index = frame.index();
            let timestamp = self.metadata.timestamp_of(index);
            if self.window.is_past(timestamp) {
                self.finished = true;
                return None;
            }
            if index % self.frame_skip != 0 || !self.window.contains(timestamp) {
                continue;
            }

            let cropped = frame.crop(self.roi.x, self.roi.y, self.roi.width, self.roi.height);
            return Some(Ok(SampledFrame {
                frame: cropped,
                timestamp,
            }));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    struct StubReader {
        frames: Vec<Result<Frame, Box<dyn std::error::Error + Send + Sync>>>,
        width: u32,
        height: u32,
        fps: f64,
        fail_open: bool,
        opened: Arc<AtomicBool>,
        pulled: Arc<AtomicUsize>,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl StubReader {
        fn with_frames(count: usize) -> Self {
            Self {
                frames: (0..count).map(|i| Ok(frame(i, 40, 30))).collect(),
                width: 40,
                height: 30,
                fps: 30.0,
                fail_open: false,
                opened: Arc::new(AtomicBool::new(false)),
                pulled: Arc::new(AtomicUsize::new(0)),
                cancel_after: None,
            }
        }
    }

    impl VideoReader for StubReader {
        fn open(&mut self, _path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
            self.opened.store(true, Ordering::SeqCst);
            if self.fail_open {
                return Err("no such file".into());
            }
            Ok(VideoMetadata {
                width: self.width,
                height: self.height,
                fps: self.fps,
                total_frames: self.frames.len(),
                codec: "stub".into(),
                source_path: None,
            })
        }

        fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_> {
            let pulled = self.pulled.clone();
            let cancel_after = self.cancel_after.clone();
            Box::new(self.frames.drain(..).map(|r| r.map_err(|e| e as Box<dyn std::error::Error>)).inspect(move |_| {
                let n = pulled.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((after, flag)) = &cancel_after {
                    if n >= *after {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
            }))
        }

        fn close(&mut self) {}
    }

    fn frame(index: usize, width: u32, height: u32) -> Frame {
        let data = (0..(width * height * 3)).map(|v| (v % 251) as u8).collect();
        Frame::new(data, width, height, 3, index)
    }

    fn params(frame_skip: usize) -> SamplingParams {
        SamplingParams {
            roi: Roi::new(0, 0, 40, 30),
            frame_skip,
            window: TimeWindow::whole_video(),
        }
    }

    fn not_cancelled() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    fn indices(reader: &mut StubReader, p: &SamplingParams) -> Vec<usize> {
        FrameSampler::open(reader, Path::new("clip.mp4"), p, not_cancelled())
            .unwrap()
            .map(|s| s.unwrap().frame_index())
            .collect()
    }

    #[test]
    fn test_300_frames_skip_15_yields_ten_frames() {
        let mut reader = StubReader::with_frames(300);
        let got = indices(&mut reader, &params(15));
        assert_eq!(got, (0..10).map(|i| i * 15).collect::<Vec<_>>());
    }

    #[test]
    fn test_timestamps_follow_absolute_index() {
        let mut reader = StubReader::with_frames(60);
        let sampled: Vec<SampledFrame> =
            FrameSampler::open(&mut reader, Path::new("a"), &params(15), not_cancelled())
                .unwrap()
                .map(Result::unwrap)
                .collect();
        let ts: Vec<f64> = sampled.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[rstest]
    #[case(TimeWindow::new(1.0, None), vec![30, 45])]
    #[case(TimeWindow::new(0.0, Some(1.0)), vec![0, 15])]
    #[case(TimeWindow::new(0.5, Some(1.5)), vec![15, 30])]
    fn test_time_window_is_half_open(#[case] window: TimeWindow, #[case] expected: Vec<usize>) {
        let mut reader = StubReader::with_frames(60);
        let p = SamplingParams {
            window,
            ..params(15)
        };
        assert_eq!(indices(&mut reader, &p), expected);
    }

    #[test]
    fn test_stops_decoding_once_past_window_end() {
        let mut reader = StubReader::with_frames(300);
        let pulled = reader.pulled.clone();
        let p = SamplingParams {
            window: TimeWindow::new(0.0, Some(1.0)),
            ..params(15)
        };
        indices(&mut reader, &p);
        // Frame 30 (t = 1.0) is the first one past the end.
        assert_eq!(pulled.load(Ordering::SeqCst), 31);
    }

    #[test]
    fn test_frames_are_cropped_to_roi() {
        let mut reader = StubReader::with_frames(1);
        let p = SamplingParams {
            roi: Roi::new(10, 5, 20, 10),
            ..params(1)
        };
        let s = FrameSampler::open(&mut reader, Path::new("a"), &p, not_cancelled())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!((s.frame.width(), s.frame.height()), (20, 10));

        let original = frame(0, 40, 30);
        assert_eq!(
            s.frame.as_ndarray()[[0, 0, 0]],
            original.as_ndarray()[[5, 10, 0]]
        );
    }

    #[test]
    fn test_roi_is_clamped_to_frame() {
        let mut reader = StubReader::with_frames(1);
        let p = SamplingParams {
            roi: Roi::new(30, 20, 100, 100),
            ..params(1)
        };
        let sampler = FrameSampler::open(&mut reader, Path::new("a"), &p, not_cancelled()).unwrap();
        assert_eq!(sampler.roi(), Roi::new(30, 20, 10, 10));
    }

    #[test]
    fn test_roi_outside_frame_is_invalid_region() {
        let mut reader = StubReader::with_frames(1);
        let p = SamplingParams {
            roi: Roi::new(100, 100, 10, 10),
            ..params(1)
        };
        let err = FrameSampler::open(&mut reader, Path::new("a"), &p, not_cancelled()).err();
        assert!(matches!(err, Some(PipelineError::InvalidRegion(_))));
    }

    #[rstest]
    #[case(Roi::new(0, 0, 0, 30))]
    #[case(Roi::new(0, 0, 40, 0))]
    fn test_zero_area_roi_fails_before_open(#[case] roi: Roi) {
        let mut reader = StubReader::with_frames(10);
        let opened = reader.opened.clone();
        let pulled = reader.pulled.clone();
        let p = SamplingParams { roi, ..params(1) };

        let err = FrameSampler::open(&mut reader, Path::new("a"), &p, not_cancelled()).err();

        assert!(matches!(err, Some(PipelineError::InvalidRegion(_))));
        assert!(!opened.load(Ordering::SeqCst));
        assert_eq!(pulled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_frame_skip_is_rejected() {
        let mut reader = StubReader::with_frames(10);
        let err = FrameSampler::open(&mut reader, Path::new("a"), &params(0), not_cancelled()).err();
        assert!(matches!(err, Some(PipelineError::InvalidParameters(_))));
    }

    #[rstest]
    #[case(TimeWindow::new(-1.0, None))]
    #[case(TimeWindow::new(2.0, Some(1.0)))]
    #[case(TimeWindow::new(1.0, Some(1.0)))]
    fn test_bad_window_is_rejected(#[case] window: TimeWindow) {
        assert!(window.validate().is_err());
    }

    #[test]
    fn test_open_failure_is_source_unavailable() {
        let mut reader = StubReader::with_frames(0);
        reader.fail_open = true;
        let err = FrameSampler::open(&mut reader, Path::new("gone.mp4"), &params(1), not_cancelled()).err();
        assert!(matches!(err, Some(PipelineError::SourceUnavailable(_))));
    }

    #[test]
    fn test_undecodable_frames_are_skipped_and_counted() {
        let mut reader = StubReader::with_frames(0);
        reader.frames = vec![
            Ok(frame(0, 40, 30)),
            Err("corrupt packet".into()),
            Ok(frame(2, 40, 30)),
        ];
        let mut sampler =
            FrameSampler::open(&mut reader, Path::new("a"), &params(1), not_cancelled()).unwrap();
        let got: Vec<usize> = sampler.by_ref().map(|s| s.unwrap().frame_index()).collect();
        assert_eq!(got, vec![0, 2]);
        assert_eq!(sampler.skipped_frames(), 1);
        assert_eq!(sampler.decoded_frames(), 2);
    }

    #[test]
    fn test_all_frames_undecodable_is_source_unavailable() {
        let mut reader = StubReader::with_frames(0);
        reader.frames = vec![Err("bad".into()), Err("bad".into())];
        let items: Vec<_> =
            FrameSampler::open(&mut reader, Path::new("a"), &params(1), not_cancelled())
                .unwrap()
                .collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::SourceUnavailable(_))));
    }

    #[test]
    fn test_empty_video_yields_nothing() {
        let mut reader = StubReader::with_frames(0);
        assert!(indices(&mut reader, &params(1)).is_empty());
    }

    #[test]
    fn test_cancel_stops_after_in_flight_frame() {
        let cancel = not_cancelled();
        let mut reader = StubReader::with_frames(100);
        reader.cancel_after = Some((3, cancel.clone()));
        let pulled = reader.pulled.clone();

        let got: Vec<usize> =
            FrameSampler::open(&mut reader, Path::new("a"), &params(1), cancel)
                .unwrap()
                .map(|s| s.unwrap().frame_index())
                .collect();

        assert_eq!(got, vec![0, 1, 2]);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_already_cancelled_decodes_nothing() {
        let mut reader = StubReader::with_frames(10);
        let pulled = reader.pulled.clone();
        let got: Vec<_> = FrameSampler::open(
            &mut reader,
            Path::new("a"),
            &params(1),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap()
        .collect();
        assert!(got.is_empty());
        assert_eq!(pulled.load(Ordering::SeqCst), 0);
    }
}

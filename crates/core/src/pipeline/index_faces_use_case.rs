use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::clustering::domain::cluster_engine::{ClusterEngine, ClusterSummary};
use crate::detection::domain::face_collector::FaceCollector;
use crate::detection::domain::face_detector::FaceDetector;
use crate::persistence::domain::face_store::{FaceStore, RunId};
use crate::pipeline::error::PipelineError;
use crate::pipeline::face_persister::FacePersister;
use crate::pipeline::frame_sampler::{FrameSampler, SamplingParams};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::pipeline::progress::{
    sampling_percent, MonotonicProgress, CLUSTERING, COMPLETE, OPENING, PERSISTING,
};
use crate::video::domain::image_writer::ImageWriter;
use crate::video::domain::video_reader::VideoReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Sampling,
    Clustering,
    Persisting,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub detections: usize,
    pub persons: usize,
    pub face_instances: usize,
    pub noise: usize,
    /// Frames decoded from the source, sampled or not.
    pub decoded_frames: usize,
    pub skipped_frames: usize,
    /// Faces dropped for being smaller than `min_face_size`.
    pub undersized_faces: usize,
}

impl RunSummary {
    /// False when every detection ended up as clustering noise.
    pub fn has_persons(&self) -> bool {
        self.persons > 0
    }
}

/// How a run ended. Cancellation is its own outcome, never a failure.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Failed(PipelineError),
    Cancelled,
}

impl RunOutcome {
    /// `Some(true)` on completion, `Some(false)` on failure, `None` when
    /// cancelled.
    pub fn success(&self) -> Option<bool> {
        match self {
            RunOutcome::Completed(_) => Some(true),
            RunOutcome::Failed(_) => Some(false),
            RunOutcome::Cancelled => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RunOutcome::Completed(s) if s.has_persons() => format!(
                "Video processed successfully! Found {} people across {} face appearances.",
                s.persons, s.face_instances
            ),
            RunOutcome::Completed(s) => format!(
                "Video processed, but all {} detected faces were classified as noise; \
                 no persons were saved. Try a larger clustering eps or a smaller min_samples.",
                s.detections
            ),
            RunOutcome::Failed(e) => format!("Error: {e}"),
            RunOutcome::Cancelled => "Processing cancelled".to_string(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    Progress { percent: u8, status: String },
    ClustersReady(Vec<ClusterSummary>),
    Finished(RunOutcome),
}

/// Adapters a run is wired from.
pub struct PipelineComponents {
    pub reader: Box<dyn VideoReader>,
    pub detector: Box<dyn FaceDetector>,
    pub cluster_engine: Box<dyn ClusterEngine>,
    pub store: Box<dyn FaceStore>,
    pub image_writer: Box<dyn ImageWriter>,
    pub logger: Box<dyn PipelineLogger>,
    pub min_face_size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub video_path: PathBuf,
    pub sampling: SamplingParams,
}

struct FrameCounts {
    decoded: usize,
    skipped: usize,
}

pub type EventCallback = Box<dyn Fn(PipelineEvent) + Send>;

struct Reporter {
    logger: Box<dyn PipelineLogger>,
    on_event: Option<EventCallback>,
    progress: MonotonicProgress,
}

impl Reporter {
    fn progress(&mut self, percent: u8, status: impl Into<String>) {
        let percent = self.progress.advance(percent);
        let status = status.into();
        self.logger.progress(percent, &status);
        self.emit(PipelineEvent::Progress { percent, status });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}

/// Indexes the faces of one video: sample, detect, cluster, persist.
///
/// Single-use: the detection buffer belongs to the one run `execute`
/// performs. Progress, cluster and completion events go to `on_event`; the
/// cancel flag is honoured per decoded frame and again before persistence
/// starts.
pub struct IndexFacesUseCase {
    reader: Box<dyn VideoReader>,
    collector: FaceCollector,
    cluster_engine: Box<dyn ClusterEngine>,
    store: Box<dyn FaceStore>,
    image_writer: Box<dyn ImageWriter>,
    reporter: Reporter,
    cancelled: Arc<AtomicBool>,
    state: PipelineState,
}

impl IndexFacesUseCase {
    pub fn new(
        components: PipelineComponents,
        on_event: Option<EventCallback>,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            reader: components.reader,
            collector: FaceCollector::new(components.detector, components.min_face_size),
            cluster_engine: components.cluster_engine,
            store: components.store,
            image_writer: components.image_writer,
            reporter: Reporter {
                logger: components.logger,
                on_event,
                progress: MonotonicProgress::new(),
            },
            cancelled: cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs to a terminal state and returns the outcome, which is also sent
    /// as the final `Finished` event. Thumbnails go under `thumbnail_dir`,
    /// which must already exist.
    pub fn execute(&mut self, request: &RunRequest, thumbnail_dir: &Path) -> RunOutcome {
        if self.state != PipelineState::Idle {
            return RunOutcome::Failed(PipelineError::InvalidParameters(
                "pipeline already executed".into(),
            ));
        }

        self.enter(PipelineState::Sampling);
        self.reporter.progress(OPENING, "Opening video...");

        let outcome = match self.run_stages(request, thumbnail_dir) {
            Ok(Some(summary)) => {
                self.enter(PipelineState::Completed);
                RunOutcome::Completed(summary)
            }
            Ok(None) => {
                self.enter(PipelineState::Cancelled);
                RunOutcome::Cancelled
            }
            Err(e) => {
                self.enter(PipelineState::Failed);
                if let Err(mark_err) = self.store.mark_run_failed(request.run_id) {
                    log::warn!("Could not mark run {} as failed: {mark_err}", request.run_id);
                }
                RunOutcome::Failed(e)
            }
        };

        match &outcome {
            RunOutcome::Failed(_) => log::error!("{}", outcome.message()),
            RunOutcome::Completed(s) if !s.has_persons() => log::warn!("{}", outcome.message()),
            _ => self.reporter.logger.info(&outcome.message()),
        }
        self.reporter.logger.summary();
        self.reporter.emit(PipelineEvent::Finished(outcome.clone()));
        outcome
    }

    /// `Ok(None)` means the run was cancelled.
    fn run_stages(
        &mut self,
        request: &RunRequest,
        thumbnail_dir: &Path,
    ) -> Result<Option<RunSummary>, PipelineError> {
        let sampled = self.sample(request);
        self.reader.close();
        let frames = sampled?;

        if self.is_cancelled() {
            return Ok(None);
        }
        if self.collector.is_empty() {
            return Err(PipelineError::NoFacesDetected);
        }

        self.enter(PipelineState::Clustering);
        self.reporter.progress(CLUSTERING, "Clustering faces...");
        let started = Instant::now();
        let clustering = self
            .cluster_engine
            .cluster(self.collector.detections())
            .map_err(|e| PipelineError::Clustering(e.to_string()))?;
        self.reporter.logger.timing("cluster", elapsed_ms(started));
        self.reporter.logger.info(&format!(
            "Clustered {} faces into {} persons ({} noise)",
            self.collector.len(),
            clustering.clusters.len(),
            clustering.noise_count()
        ));
        self.reporter
            .emit(PipelineEvent::ClustersReady(clustering.summaries()));

        if self.is_cancelled() {
            return Ok(None);
        }

        self.enter(PipelineState::Persisting);
        self.reporter.progress(PERSISTING, "Saving to database...");
        let started = Instant::now();
        let report = FacePersister::new(
            self.store.as_mut(),
            self.image_writer.as_ref(),
            thumbnail_dir,
        )
        .persist(request.run_id, self.collector.detections(), &clustering)?;
        self.store
            .mark_run_complete(request.run_id)
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        self.reporter.logger.timing("persist", elapsed_ms(started));
        self.reporter.progress(COMPLETE, "Processing complete!");

        Ok(Some(RunSummary {
            detections: self.collector.len(),
            persons: report.persons,
            face_instances: report.face_instances,
            noise: clustering.noise_count(),
            decoded_frames: frames.decoded,
            skipped_frames: frames.skipped,
            undersized_faces: self.collector.rejected(),
        }))
    }

    /// Feeds every sampled frame through the collector.
    fn sample(&mut self, request: &RunRequest) -> Result<FrameCounts, PipelineError> {
        let mut sampler = FrameSampler::open(
            self.reader.as_mut(),
            &request.video_path,
            &request.sampling,
            self.cancelled.clone(),
        )?;
        let total = sampler.metadata().total_frames;

        for item in sampler.by_ref() {
            let sampled = item?;
            let started = Instant::now();
            let found = self
                .collector
                .observe(&sampled.frame, sampled.timestamp)
                .map_err(|e| PipelineError::Detection(e.to_string()))?;
            self.reporter.logger.timing("detect", elapsed_ms(started));
            self.reporter.logger.metric("faces_per_frame", found as f64);

            let index = sampled.frame_index();
            self.reporter.progress(
                sampling_percent(index, total),
                format!(
                    "Detecting faces... Frame {index}/{total} ({} faces found)",
                    self.collector.len()
                ),
            );
        }

        let counts = FrameCounts {
            decoded: sampler.decoded_frames(),
            skipped: sampler.skipped_frames(),
        };
        if counts.skipped > 0 {
            log::warn!("{} frames could not be decoded and were skipped", counts.skipped);
        }
        self.reporter.logger.info(&format!(
            "Decoded {} frames: kept {} faces, dropped {} undersized",
            counts.decoded,
            self.collector.len(),
            self.collector.rejected()
        ));
        Ok(counts)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn enter(&mut self, next: PipelineState) {
        log::debug!("Pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{PipelineComponents, PipelineEvent, RunRequest};
    use crate::clustering::infrastructure::dbscan_cluster_engine::DbscanClusterEngine;
    use crate::detection::domain::face_detector::{DetectedFace, FaceDetector};
    use crate::pipeline::face_persister::test_support::{CallLog, RecordingImageWriter, RecordingStore};
    use crate::pipeline::frame_sampler::{SamplingParams, TimeWindow};
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::shared::bounding_box::BoundingBox;
    use crate::shared::frame::Frame;
    use crate::shared::roi::Roi;
    use crate::shared::video_metadata::VideoMetadata;
    use crate::video::domain::video_reader::{FrameResult, VideoReader};

    pub const WIDTH: u32 = 100;
    pub const HEIGHT: u32 = 100;

    pub struct StubReader {
        pub total: usize,
        pub fail_open: bool,
        pub opened: Arc<AtomicBool>,
    }

    impl VideoReader for StubReader {
        fn open(&mut self, _path: &Path) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
            self.opened.store(true, Ordering::SeqCst);
            if self.fail_open {
                return Err("moov atom not found".into());
            }
            Ok(VideoMetadata {
                width: WIDTH,
                height: HEIGHT,
                fps: 30.0,
                total_frames: self.total,
                codec: "stub".into(),
                source_path: None,
            })
        }

        fn frames(&mut self) -> Box<dyn Iterator<Item = FrameResult> + '_> {
            Box::new((0..self.total).map(|i| {
                Ok(Frame::new(
                    vec![(i % 256) as u8; (WIDTH * HEIGHT * 3) as usize],
                    WIDTH,
                    HEIGHT,
                    3,
                    i,
                ))
            }))
        }

        fn close(&mut self) {}
    }

    /// Reports scripted faces by absolute frame index (frames are ROI crops
    /// but keep their source index).
    pub struct ScriptedDetector {
        pub faces: HashMap<usize, Vec<DetectedFace>>,
        pub calls: Arc<AtomicUsize>,
        pub fail_at: Option<usize>,
        pub panic_at: Option<usize>,
        /// Sets the flag once this frame index has been processed.
        pub cancel_at: Option<(usize, Arc<AtomicBool>)>,
        /// Signalled when the first call starts.
        pub entered: Option<crossbeam_channel::Sender<()>>,
        /// Blocks the first call until the sender side is dropped.
        pub gate: Option<crossbeam_channel::Receiver<()>>,
    }

    impl ScriptedDetector {
        pub fn new(faces: HashMap<usize, Vec<DetectedFace>>) -> Self {
            Self {
                faces,
                calls: Arc::new(AtomicUsize::new(0)),
                fail_at: None,
                panic_at: None,
                cancel_at: None,
                entered: None,
                gate: None,
            }
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
            if let Some(entered) = self.entered.take() {
                let _ = entered.send(());
            }
            if let Some(gate) = self.gate.take() {
                let _ = gate.recv();
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(frame.index()) {
                return Err("inference failed".into());
            }
            if self.panic_at == Some(frame.index()) {
                panic!("detector crashed on frame {}", frame.index());
            }
            if let Some((at, flag)) = &self.cancel_at {
                if frame.index() >= *at {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(self.faces.get(&frame.index()).cloned().unwrap_or_default())
        }
    }

    pub fn face(size: i32, embedding: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox::new(10, 10 + size, 10 + size, 10),
            embedding,
            confidence: 0.95,
        }
    }

    /// One 50x50 face with near-identical embeddings in frames 0, 15, 30.
    pub fn three_face_script() -> HashMap<usize, Vec<DetectedFace>> {
        [0usize, 15, 30]
            .iter()
            .enumerate()
            .map(|(k, &i)| (i, vec![face(50, vec![0.6, 0.8, 0.001 * k as f32])]))
            .collect()
    }

    pub struct Harness {
        pub calls: CallLog,
        pub events: Arc<Mutex<Vec<PipelineEvent>>>,
        pub detector_calls: Arc<AtomicUsize>,
        pub opened: Arc<AtomicBool>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                events: Arc::new(Mutex::new(Vec::new())),
                detector_calls: Arc::new(AtomicUsize::new(0)),
                opened: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn components(&self, total: usize, mut detector: ScriptedDetector) -> PipelineComponents {
            detector.calls = self.detector_calls.clone();
            PipelineComponents {
                reader: Box::new(StubReader {
                    total,
                    fail_open: false,
                    opened: self.opened.clone(),
                }),
                detector: Box::new(detector),
                cluster_engine: Box::new(DbscanClusterEngine::new(0.5, 2)),
                store: Box::new(RecordingStore::new(self.calls.clone())),
                image_writer: Box::new(RecordingImageWriter {
                    calls: self.calls.clone(),
                    fail: false,
                }),
                logger: Box::new(NullPipelineLogger),
                min_face_size: 40,
            }
        }

        pub fn event_sink(&self) -> super::EventCallback {
            let events = self.events.clone();
            Box::new(move |e| events.lock().unwrap().push(e))
        }

        pub fn progress(&self) -> Vec<u8> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    PipelineEvent::Progress { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect()
        }
    }

    pub fn request(roi: Roi) -> RunRequest {
        RunRequest {
            run_id: 7,
            video_path: "clip.mp4".into(),
            sampling: SamplingParams {
                roi,
                frame_skip: 15,
                window: TimeWindow::whole_video(),
            },
        }
    }
}

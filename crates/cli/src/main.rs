use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};

use faceindex_core::clustering::infrastructure::dbscan_cluster_engine::DbscanClusterEngine;
use faceindex_core::config::settings::Settings;
use faceindex_core::detection::infrastructure::model_resolver::{ModelResolver, ModelSpec};
use faceindex_core::detection::infrastructure::onnx_face_analyzer::OnnxFaceAnalyzer;
use faceindex_core::persistence::domain::face_store::{PersonId, RunId};
use faceindex_core::persistence::infrastructure::sqlite_face_store::SqliteFaceStore;
use faceindex_core::pipeline::frame_sampler::{SamplingParams, TimeWindow};
use faceindex_core::pipeline::index_faces_use_case::{
    PipelineComponents, PipelineEvent, RunOutcome, RunRequest,
};
use faceindex_core::pipeline::infrastructure::pipeline_controller::PipelineController;
use faceindex_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use faceindex_core::shared::constants::{
    EMBEDDING_MODEL_NAME, EMBEDDING_MODEL_URL, YOLO_MODEL_NAME, YOLO_MODEL_URL,
};
use faceindex_core::shared::roi::Roi;
use faceindex_core::video::domain::video_reader::VideoReader;
use faceindex_core::video::infrastructure::ffmpeg_reader::FfmpegReader;
use faceindex_core::video::infrastructure::image_file_writer::ImageFileWriter;

const DETECTOR_MODEL: ModelSpec = ModelSpec {
    name: YOLO_MODEL_NAME,
    url: YOLO_MODEL_URL,
};
const EMBEDDING_MODEL: ModelSpec = ModelSpec {
    name: EMBEDDING_MODEL_NAME,
    url: EMBEDDING_MODEL_URL,
};

/// Find and group the people who appear in a video.
#[derive(Parser)]
#[command(name = "faceindex")]
struct Cli {
    /// Settings file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect, cluster and store the faces in a video.
    Process(ProcessArgs),
    /// List indexed videos.
    Videos,
    /// List the persons found in a video.
    Persons { video_id: RunId },
    /// List the appearances of a person.
    Faces { person_id: PersonId },
    /// Give a person a name.
    Rename { person_id: PersonId, name: String },
    /// Move every appearance of one person onto another.
    Merge { source_id: PersonId, target_id: PersonId },
}

#[derive(Args)]
struct ProcessArgs {
    /// Input video file.
    video: PathBuf,

    /// Region of interest as x,y,width,height (defaults to the full frame).
    #[arg(long)]
    roi: Option<Roi>,

    /// Process every Nth frame.
    #[arg(long)]
    frame_skip: Option<usize>,

    /// Start of the time window in seconds.
    #[arg(long, default_value = "0")]
    start: f64,

    /// End of the time window in seconds (exclusive).
    #[arg(long)]
    end: Option<f64>,

    /// Discard faces smaller than this many pixels on either side.
    #[arg(long)]
    min_face_size: Option<u32>,

    /// DBSCAN neighbourhood radius in embedding space.
    #[arg(long)]
    eps: Option<f64>,

    /// Neighbours a face needs to seed a person.
    #[arg(long)]
    min_samples: Option<usize>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long)]
    confidence: Option<f64>,

    /// Root directory for per-run thumbnail folders.
    #[arg(long)]
    thumbnails: Option<PathBuf>,
}

impl ProcessArgs {
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(v) = self.frame_skip {
            settings.frame_skip = v;
        }
        if let Some(v) = self.min_face_size {
            settings.min_face_size = v;
        }
        if let Some(v) = self.eps {
            settings.clustering_eps = v;
        }
        if let Some(v) = self.min_samples {
            settings.min_samples = v;
        }
        if let Some(v) = self.confidence {
            settings.confidence = v;
        }
        if let Some(v) = &self.thumbnails {
            settings.thumbnail_root = v.clone();
        }
    }
}

fn main() {
    env_logger::init();

    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but did not succeed.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        settings.database_path = db.clone();
    }

    match cli.command {
        Command::Process(args) => {
            args.apply_to(&mut settings);
            settings.validate()?;
            run_process(&args, &settings)
        }
        Command::Videos => {
            list_videos(&open_store(&settings)?)?;
            Ok(true)
        }
        Command::Persons { video_id } => {
            list_persons(&open_store(&settings)?, video_id)?;
            Ok(true)
        }
        Command::Faces { person_id } => {
            list_faces(&open_store(&settings)?, person_id)?;
            Ok(true)
        }
        Command::Rename { person_id, name } => {
            open_store(&settings)?.rename_person(person_id, &name)?;
            println!("Person {person_id} renamed to {name}");
            Ok(true)
        }
        Command::Merge {
            source_id,
            target_id,
        } => {
            open_store(&settings)?.merge_persons(source_id, target_id)?;
            println!("Person {source_id} merged into {target_id}");
            Ok(true)
        }
    }
}

fn run_process(args: &ProcessArgs, settings: &Settings) -> Result<bool, Box<dyn std::error::Error>> {
    if !args.video.is_file() {
        return Err(format!("Input file not found: {}", args.video.display()).into());
    }
    let video_path = fs::canonicalize(&args.video)?;

    // Open once for the metadata the video row and the default ROI need.
    let mut reader = FfmpegReader::new();
    let metadata = reader.open(&video_path)?;
    reader.close();
    let roi = args
        .roi
        .unwrap_or_else(|| Roi::full(metadata.width, metadata.height));

    let mut store = open_store(settings)?;
    let run_id = store.register_video(&metadata, roi)?;
    store.clear_video_results(run_id)?;
    log::info!(
        "Indexing {} as video {run_id} ({}x{}, {:.1}s, roi {roi})",
        video_path.display(),
        metadata.width,
        metadata.height,
        metadata.duration_secs()
    );

    let detector = build_analyzer(settings.confidence)?;
    let components = PipelineComponents {
        reader: Box::new(FfmpegReader::new()),
        detector: Box::new(detector),
        cluster_engine: Box::new(DbscanClusterEngine::new(
            settings.clustering_eps,
            settings.min_samples,
        )),
        store: Box::new(open_store(settings)?),
        image_writer: Box::new(ImageFileWriter::new()),
        logger: Box::new(StdoutPipelineLogger::default()),
        min_face_size: settings.min_face_size,
    };
    let request = RunRequest {
        run_id,
        video_path,
        sampling: SamplingParams {
            roi,
            frame_skip: settings.frame_skip,
            window: TimeWindow::new(args.start, args.end),
        },
    };

    let mut controller = PipelineController::new(&settings.thumbnail_root);
    let events = controller.start(components, request)?;
    let mut outcome = None;
    for event in events.iter() {
        match event {
            PipelineEvent::Progress { percent, status } => {
                eprint!("\r\x1b[K[{percent:3}%] {status}");
            }
            PipelineEvent::ClustersReady(summaries) => {
                eprintln!();
                for s in &summaries {
                    log::debug!("Cluster {}: {} faces", s.label, s.face_count);
                }
            }
            PipelineEvent::Finished(o) => outcome = Some(o),
        }
    }
    controller.wait();
    eprintln!();
    let outcome = outcome.ok_or("pipeline worker exited without reporting a result")?;

    println!("{}", outcome.message());
    match &outcome {
        RunOutcome::Completed(summary) => {
            if summary.skipped_frames > 0 {
                log::warn!("{} frames could not be decoded", summary.skipped_frames);
            }
            if summary.has_persons() {
                list_persons(&store, run_id)?;
            }
            Ok(true)
        }
        RunOutcome::Failed(_) | RunOutcome::Cancelled => Ok(false),
    }
}

fn build_analyzer(confidence: f64) -> Result<OnnxFaceAnalyzer, Box<dyn std::error::Error>> {
    let resolver = ModelResolver::platform_default()?;
    let detector_model = resolve_model(&resolver, &DETECTOR_MODEL)?;
    let embedding_model = resolve_model(&resolver, &EMBEDDING_MODEL)?;
    OnnxFaceAnalyzer::new(&detector_model, &embedding_model, confidence)
}

fn resolve_model(
    resolver: &ModelResolver,
    spec: &ModelSpec,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(path) = resolver.locate(spec) {
        return Ok(path);
    }
    let name = spec.name;
    let path = resolver.resolve(
        spec,
        Some(Box::new(move |downloaded: u64, total: u64| {
            download_progress(name, downloaded, total)
        })),
    )?;
    eprintln!();
    Ok(path)
}

fn open_store(settings: &Settings) -> Result<SqliteFaceStore, Box<dyn std::error::Error>> {
    if let Some(parent) = settings.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(SqliteFaceStore::open(&settings.database_path)?)
}

fn list_videos(store: &SqliteFaceStore) -> Result<(), Box<dyn std::error::Error>> {
    let videos = store.videos()?;
    if videos.is_empty() {
        println!("No videos indexed yet");
    }
    for v in videos {
        println!(
            "{:>4}  {:<10} {:>8.1}s  {}x{}  roi {}  {}",
            v.id,
            v.status,
            v.duration,
            v.width,
            v.height,
            v.roi,
            v.file_name
        );
    }
    Ok(())
}

fn list_persons(store: &SqliteFaceStore, video_id: RunId) -> Result<(), Box<dyn std::error::Error>> {
    if store.video(video_id)?.is_none() {
        return Err(format!("No video with id {video_id}").into());
    }
    for p in store.persons_for_video(video_id)? {
        println!(
            "{:>4}  {:<20} {:>5} faces  {}",
            p.id,
            p.display_name(),
            p.face_count,
            display_path(p.thumbnail_path.as_deref())
        );
    }
    Ok(())
}

fn list_faces(store: &SqliteFaceStore, person_id: PersonId) -> Result<(), Box<dyn std::error::Error>> {
    let Some(person) = store.person(person_id)? else {
        return Err(format!("No person with id {person_id}").into());
    };
    println!("{} ({} faces)", person.display_name(), person.face_count);
    for f in store.face_instances_for_person(person_id)? {
        let (x, y, w, h) = f.bounding_box.to_xywh();
        println!(
            "{:>6}  {:>9.2}s  frame {:>6}  box {x},{y},{w},{h}  conf {:.2}  {}",
            f.id,
            f.timestamp,
            f.frame_index,
            f.confidence,
            display_path(f.thumbnail_path.as_deref())
        );
    }
    Ok(())
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

fn download_progress(name: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {name}... {pct}%");
    } else {
        eprint!("\rDownloading {name}... {downloaded} bytes");
    }
}

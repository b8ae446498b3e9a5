use std::fs::{self, OpenOptions};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::persistence::domain::face_store::RunId;
use crate::pipeline::error::PipelineError;
use crate::pipeline::index_faces_use_case::{
    EventCallback, IndexFacesUseCase, PipelineComponents, PipelineEvent, RunOutcome, RunRequest,
};

const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("a pipeline run is already in progress")]
    AlreadyRunning,
    #[error("thumbnail directory {0} is in use by another run")]
    DirectoryLocked(PathBuf),
    #[error("could not prepare thumbnail directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not spawn pipeline thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Exclusive claim on a run's thumbnail directory, released on drop.
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self, StartError> {
        let path = dir.join(LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StartError::DirectoryLocked(dir.to_path_buf()))
            }
            Err(source) => Err(StartError::Io { path, source }),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Could not release {}: {e}", self.path.display());
        }
    }
}

/// Clears the controller's running flag when the worker exits, including
/// by unwinding.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker thread panicked".to_string()
    }
}

/// Runs one indexing pipeline at a time on a worker thread.
///
/// Events arrive on the channel returned by [`start`](Self::start); the last
/// one is always `Finished`, sent after the run's thumbnail directory has
/// been released. `stop` cancels cooperatively and blocks until the worker
/// has exited, as does dropping the controller.
pub struct PipelineController {
    thumbnail_root: PathBuf,
    cancelled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineController {
    pub fn new(thumbnail_root: impl Into<PathBuf>) -> Self {
        Self {
            thumbnail_root: thumbnail_root.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Directory a run's thumbnails are written to.
    pub fn thumbnail_dir(&self, run_id: RunId) -> PathBuf {
        self.thumbnail_root.join(run_id.to_string())
    }

    pub fn start(
        &mut self,
        components: PipelineComponents,
        request: RunRequest,
    ) -> Result<crossbeam_channel::Receiver<PipelineEvent>, StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }
        // The previous worker has already sent its final event.
        self.join();

        let dir = self.thumbnail_dir(request.run_id);
        fs::create_dir_all(&dir).map_err(|source| StartError::Io {
            path: dir.clone(),
            source,
        })?;
        let lock = DirLock::acquire(&dir)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancelled = cancelled.clone();
        self.active.store(true, Ordering::SeqCst);
        let active = ActiveGuard(self.active.clone());

        let (tx, rx) = crossbeam_channel::unbounded();
        let event_tx = tx.clone();
        let on_event: EventCallback = Box::new(move |event: PipelineEvent| {
            // The final event is sent by the worker once the lock is gone.
            if !matches!(event, PipelineEvent::Finished(_)) {
                let _ = event_tx.send(event);
            }
        });

        let spawned = std::thread::Builder::new()
            .name(format!("faceindex-run-{}", request.run_id))
            .spawn(move || {
                let run = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut use_case =
                        IndexFacesUseCase::new(components, Some(on_event), Some(cancelled));
                    use_case.execute(&request, &dir)
                }));
                let outcome = run.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    log::error!("Pipeline run {} panicked: {message}", request.run_id);
                    RunOutcome::Failed(PipelineError::WorkerPanicked(message))
                });
                drop(lock);
                drop(active);
                let _ = tx.send(PipelineEvent::Finished(outcome));
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(rx)
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(StartError::Spawn(e))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Requests cancellation and waits for the worker to exit. Safe to call
    /// repeatedly and after the run has finished.
    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.join();
    }

    /// Waits for the current run to finish without cancelling it.
    pub fn wait(&mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Pipeline worker thread panicked");
                self.active.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

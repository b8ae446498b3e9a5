use std::path::Path;

use ort::execution_providers::ExecutionProviderDispatch;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

/// Hardware-accelerated providers to try before ONNX Runtime's CPU default.
pub fn accelerated_providers() -> Vec<ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Opens an inference session for `model_path`.
///
/// Both models run once per face per sampled frame on a single worker
/// thread, so inter-op parallelism is pinned to 1 and intra-op threads
/// take every available core.
pub fn open_session(model_path: &Path) -> Result<Session, Box<dyn std::error::Error>> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_inter_threads(1)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers(accelerated_providers())?
        .commit_from_file(model_path)?;
    log::debug!("Opened ONNX session for {}", model_path.display());
    Ok(session)
}

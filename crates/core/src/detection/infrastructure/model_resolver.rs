use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::APP_DIR_NAME;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create model directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine a model cache directory")]
    NoCacheDir,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`.
/// `total_bytes` is 0 if the server didn't provide Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// An ONNX model known by file name and download location.
#[derive(Clone, Copy, Debug)]
pub struct ModelSpec {
    pub name: &'static str,
    pub url: &'static str,
}

/// Locates model files, downloading them into a cache directory on first use.
///
/// Lookup order: cache directory, then the optional bundled directory, then
/// download into the cache.
pub struct ModelResolver {
    cache_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl ModelResolver {
    pub fn new(cache_dir: PathBuf, bundled_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            bundled_dir,
        }
    }

    /// Resolver rooted at the platform cache directory.
    pub fn platform_default() -> Result<Self, ModelResolveError> {
        Ok(Self::new(model_cache_dir()?, None))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the local path of `spec`, if it is already present.
    pub fn locate(&self, spec: &ModelSpec) -> Option<PathBuf> {
        let cached = self.cache_dir.join(spec.name);
        if cached.exists() {
            return Some(cached);
        }
        self.bundled_dir
            .as_ref()
            .map(|dir| dir.join(spec.name))
            .filter(|p| p.exists())
    }

    pub fn resolve(
        &self,
        spec: &ModelSpec,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelResolveError> {
        if let Some(path) = self.locate(spec) {
            log::debug!("Using model {}", path.display());
            return Ok(path);
        }

        fs::create_dir_all(&self.cache_dir).map_err(|e| ModelResolveError::CacheDir {
            path: self.cache_dir.clone(),
            source: e,
        })?;
        let dest = self.cache_dir.join(spec.name);
        log::info!("Downloading {} to {}", spec.name, dest.display());
        download(spec.url, &dest, progress)?;
        Ok(dest)
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/FaceIndex/models/`
/// - Linux: `$XDG_CACHE_HOME/FaceIndex/models/` or `~/.cache/FaceIndex/models/`
/// - Windows: `%LOCALAPPDATA%/FaceIndex/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();

    base.map(|d| d.join(APP_DIR_NAME).join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

/// Streams `url` into `dest` via a `.part` file so an interrupted download
/// never leaves a truncated model behind.
fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = download_inner(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ModelResolveError::Write { path, source }
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;

    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }

    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))?;
    Ok(())
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::shared::constants::{
    APP_DIR_NAME, DEFAULT_CLUSTERING_EPS, DEFAULT_DATABASE_PATH, DEFAULT_DETECTION_CONFIDENCE,
    DEFAULT_FRAME_SKIP, DEFAULT_MIN_FACE_SIZE, DEFAULT_MIN_SAMPLES, DEFAULT_THUMBNAIL_ROOT,
};

const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Indexing parameters and output locations.
///
/// Fields missing from the JSON file keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub frame_skip: usize,
    pub min_face_size: u32,
    pub clustering_eps: f64,
    pub min_samples: usize,
    /// Detector score threshold in `[0, 1]`.
    pub confidence: f64,
    pub thumbnail_root: PathBuf,
    pub database_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frame_skip: DEFAULT_FRAME_SKIP,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            clustering_eps: DEFAULT_CLUSTERING_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
            confidence: DEFAULT_DETECTION_CONFIDENCE,
            thumbnail_root: PathBuf::from(DEFAULT_THUMBNAIL_ROOT),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

impl Settings {
    /// `<config_dir>/FaceIndex/settings.json`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Loads settings from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist and parse. A missing default file is not
    /// an error and yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::read(&path),
                _ => {
                    log::debug!("No settings file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    fn read(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| SettingsError::Write {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        fs::write(path, json).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.frame_skip == 0 {
            return Err(invalid("frame_skip", "must be at least 1"));
        }
        if !self.clustering_eps.is_finite() || self.clustering_eps <= 0.0 {
            return Err(invalid(
                "clustering_eps",
                format!("must be a positive number, got {}", self.clustering_eps),
            ));
        }
        if self.min_samples == 0 {
            return Err(invalid("min_samples", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid(
                "confidence",
                format!("must be between 0 and 1, got {}", self.confidence),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.frame_skip, 15);
        assert_eq!(s.min_face_size, 40);
        assert_relative_eq!(s.clustering_eps, 0.5);
        assert_eq!(s.min_samples, 2);
        assert_relative_eq!(s.confidence, 0.5);
        assert_eq!(s.database_path, PathBuf::from("faceindex.db"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "frame_skip": 5, "clustering_eps": 0.4 }"#).unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.frame_skip, 5);
        assert_relative_eq!(s.clustering_eps, 0.4);
        assert_eq!(s.min_samples, 2);
        assert_eq!(s.thumbnail_root, PathBuf::from("thumbnails"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ frame_skip: ").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let s = Settings {
            min_face_size: 64,
            database_path: PathBuf::from("/tmp/x.db"),
            ..Settings::default()
        };
        s.save(&path).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap(), s);
    }

    #[rstest]
    #[case::zero_skip(Settings { frame_skip: 0, ..Settings::default() }, "frame_skip")]
    #[case::zero_eps(Settings { clustering_eps: 0.0, ..Settings::default() }, "clustering_eps")]
    #[case::nan_eps(Settings { clustering_eps: f64::NAN, ..Settings::default() }, "clustering_eps")]
    #[case::zero_samples(Settings { min_samples: 0, ..Settings::default() }, "min_samples")]
    #[case::high_confidence(Settings { confidence: 1.5, ..Settings::default() }, "confidence")]
    #[case::negative_confidence(Settings { confidence: -0.1, ..Settings::default() }, "confidence")]
    fn test_validate_rejects(#[case] settings: Settings, #[case] expected: &str) {
        match settings.validate() {
            Err(SettingsError::Invalid { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected Invalid({expected}), got {other:?}"),
        }
    }
}

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::clustering::domain::cluster_engine::ClusterLabel;
use crate::shared::bounding_box::BoundingBox;
use crate::shared::roi::Roi;

use super::face_store::{FaceInstanceId, PersonId, RunId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// A processed (or in-progress) video. Its id doubles as the run id.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoRecord {
    pub id: RunId,
    pub file_path: PathBuf,
    pub file_name: String,
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub roi: Roi,
    pub status: RunStatus,
    pub processed_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PersonRecord {
    pub id: PersonId,
    pub video_id: RunId,
    pub cluster_label: ClusterLabel,
    pub name: Option<String>,
    pub thumbnail_path: Option<PathBuf>,
    /// Derived from the face-instance rows at query time.
    pub face_count: usize,
}

impl PersonRecord {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Person {}", self.cluster_label.value() + 1))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaceInstanceRecord {
    pub id: FaceInstanceId,
    pub person_id: PersonId,
    pub video_id: RunId,
    pub timestamp: f64,
    pub frame_index: usize,
    pub bounding_box: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f64,
    pub thumbnail_path: Option<PathBuf>,
}

use std::path::PathBuf;

use crate::clustering::domain::cluster_engine::ClusterLabel;
use crate::shared::bounding_box::BoundingBox;

/// Identifier of one processing run (one row in the store's video table).
pub type RunId = i64;
pub type PersonId = i64;
pub type FaceInstanceId = i64;

#[derive(Clone, Debug, PartialEq)]
pub struct NewPerson {
    pub run_id: RunId,
    pub cluster_label: ClusterLabel,
    pub display_name: String,
    pub thumbnail_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewFaceInstance {
    pub person_id: PersonId,
    pub run_id: RunId,
    pub timestamp: f64,
    pub frame_index: usize,
    pub bounding_box: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f64,
    pub thumbnail_path: PathBuf,
}

/// Durable store the pipeline writes person and face-instance records to.
///
/// Identifiers returned here are opaque to the pipeline. Failed calls are
/// never retried by the caller.
pub trait FaceStore: Send {
    fn create_person(&mut self, person: &NewPerson) -> Result<PersonId, Box<dyn std::error::Error>>;

    fn create_face_instance(
        &mut self,
        instance: &NewFaceInstance,
    ) -> Result<FaceInstanceId, Box<dyn std::error::Error>>;

    fn mark_run_complete(&mut self, run_id: RunId) -> Result<(), Box<dyn std::error::Error>>;

    fn mark_run_failed(&mut self, run_id: RunId) -> Result<(), Box<dyn std::error::Error>>;
}

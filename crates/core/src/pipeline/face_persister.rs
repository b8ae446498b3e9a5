use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::clustering::domain::cluster_engine::{ClusterLabel, Clustering};
use crate::detection::domain::detection::Detection;
use crate::persistence::domain::face_store::{FaceStore, NewFaceInstance, NewPerson, PersonId, RunId};
use crate::pipeline::error::PipelineError;
use crate::video::domain::image_writer::ImageWriter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub persons: usize,
    pub face_instances: usize,
}

pub fn person_thumbnail_name(label: ClusterLabel) -> String {
    format!("person_{}.jpg", label.value())
}

pub fn face_thumbnail_name(detection_index: usize) -> String {
    format!("face_{detection_index}.jpg")
}

/// Writes one clustered run to the store.
///
/// One person per cluster in label order, each after its representative
/// thumbnail is on disk; then one face instance per non-noise detection in
/// detection order, each after its own thumbnail. The first error aborts.
pub struct FacePersister<'a> {
    store: &'a mut dyn FaceStore,
    image_writer: &'a dyn ImageWriter,
    thumbnail_dir: &'a Path,
}

impl<'a> FacePersister<'a> {
    pub fn new(
        store: &'a mut dyn FaceStore,
        image_writer: &'a dyn ImageWriter,
        thumbnail_dir: &'a Path,
    ) -> Self {
        Self {
            store,
            image_writer,
            thumbnail_dir,
        }
    }

    pub fn persist(
        &mut self,
        run_id: RunId,
        detections: &[Detection],
        clustering: &Clustering,
    ) -> Result<PersistReport, PipelineError> {
        if clustering.labels.len() != detections.len() {
            return Err(PipelineError::Persistence(format!(
                "{} labels for {} detections",
                clustering.labels.len(),
                detections.len()
            )));
        }

        let mut person_ids: HashMap<ClusterLabel, PersonId> = HashMap::new();
        for cluster in &clustering.clusters {
            let representative = detections.get(cluster.representative_index).ok_or_else(|| {
                PipelineError::Persistence(format!(
                    "cluster {} points at detection {} of {}",
                    cluster.label,
                    cluster.representative_index,
                    detections.len()
                ))
            })?;
            let thumbnail_path = self.write_thumbnail(
                person_thumbnail_name(cluster.label),
                representative,
            )?;
            let person = NewPerson {
                run_id,
                cluster_label: cluster.label,
                display_name: format!("Person {}", cluster.label.value() + 1),
                thumbnail_path,
            };
            let id = self
                .store
                .create_person(&person)
                .map_err(|e| PipelineError::Persistence(e.to_string()))?;
            person_ids.insert(cluster.label, id);
        }

        let mut face_instances = 0;
        for (index, (detection, label)) in detections.iter().zip(&clustering.labels).enumerate() {
            let Some(&person_id) = person_ids.get(label) else {
                continue;
            };
            let thumbnail_path = self.write_thumbnail(face_thumbnail_name(index), detection)?;
            let instance = NewFaceInstance {
                person_id,
                run_id,
                timestamp: detection.timestamp,
                frame_index: detection.frame_index,
                bounding_box: detection.bounding_box,
                embedding: detection.embedding.clone(),
                confidence: detection.confidence,
                thumbnail_path,
            };
            self.store
                .create_face_instance(&instance)
                .map_err(|e| PipelineError::Persistence(e.to_string()))?;
            face_instances += 1;
        }

        Ok(PersistReport {
            persons: person_ids.len(),
            face_instances,
        })
    }

    fn write_thumbnail(
        &self,
        file_name: String,
        detection: &Detection,
    ) -> Result<PathBuf, PipelineError> {
        let path = self.thumbnail_dir.join(file_name);
        self.image_writer
            .write(&path, &detection.face_image, None)
            .map_err(|e| {
                PipelineError::Persistence(format!("thumbnail {}: {e}", path.display()))
            })?;
        Ok(path)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use crate::persistence::domain::face_store::{
        FaceInstanceId, FaceStore, NewFaceInstance, NewPerson, PersonId, RunId,
    };
    use crate::shared::frame::Frame;
    use crate::video::domain::image_writer::ImageWriter;

    /// Everything a recording store/writer pair saw, in call order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Thumbnail(PathBuf),
        Person(NewPerson),
        FaceInstance(NewFaceInstance),
        Complete(RunId),
        Failed(RunId),
    }

    pub type CallLog = Arc<Mutex<Vec<Call>>>;

    pub struct RecordingStore {
        pub calls: CallLog,
        pub fail_on_face: Option<usize>,
        next_id: i64,
        faces: usize,
    }

    impl RecordingStore {
        pub fn new(calls: CallLog) -> Self {
            Self {
                calls,
                fail_on_face: None,
                next_id: 100,
                faces: 0,
            }
        }
    }

    impl FaceStore for RecordingStore {
        fn create_person(
            &mut self,
            person: &NewPerson,
        ) -> Result<PersonId, Box<dyn std::error::Error>> {
            self.calls.lock().unwrap().push(Call::Person(person.clone()));
            self.next_id += 1;
            Ok(self.next_id)
        }

        fn create_face_instance(
            &mut self,
            instance: &NewFaceInstance,
        ) -> Result<FaceInstanceId, Box<dyn std::error::Error>> {
            if self.fail_on_face == Some(self.faces) {
                return Err("database is locked".into());
            }
            self.faces += 1;
            self.calls
                .lock()
                .unwrap()
                .push(Call::FaceInstance(instance.clone()));
            self.next_id += 1;
            Ok(self.next_id)
        }

        fn mark_run_complete(&mut self, run_id: RunId) -> Result<(), Box<dyn std::error::Error>> {
            self.calls.lock().unwrap().push(Call::Complete(run_id));
            Ok(())
        }

        fn mark_run_failed(&mut self, run_id: RunId) -> Result<(), Box<dyn std::error::Error>> {
            self.calls.lock().unwrap().push(Call::Failed(run_id));
            Ok(())
        }
    }

    pub struct RecordingImageWriter {
        pub calls: CallLog,
        pub fail: bool,
    }

    impl ImageWriter for RecordingImageWriter {
        fn write(
            &self,
            path: &Path,
            _frame: &Frame,
            _size: Option<(u32, u32)>,
        ) -> Result<(), Box<dyn std::error::Error>> {
            if self.fail {
                return Err("disk full".into());
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Thumbnail(path.to_path_buf()));
            Ok(())
        }
    }

    pub fn count<F: Fn(&Call) -> bool>(calls: &CallLog, pred: F) -> usize {
        calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::clustering::domain::cluster_engine::ClusterLabel;
use crate::persistence::domain::face_store::{
    FaceInstanceId, FaceStore, NewFaceInstance, NewPerson, PersonId, RunId,
};
use crate::persistence::domain::records::{
    FaceInstanceRecord, PersonRecord, RunStatus, VideoRecord,
};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::roi::Roi;
use crate::shared::video_metadata::VideoMetadata;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no video with id {0}")]
    UnknownVideo(RunId),
    #[error("no person with id {0}")]
    UnknownPerson(PersonId),
    #[error("cannot merge person {0} into itself")]
    SelfMerge(PersonId),
    #[error("persons {0} and {1} belong to different videos")]
    CrossVideoMerge(PersonId, PersonId),
    #[error("embedding blob has {0} bytes, not a multiple of 4")]
    CorruptEmbedding(usize),
    #[error("unexpected value in column {column}: {value}")]
    BadColumn { column: &'static str, value: String },
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS videos (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  file_path TEXT NOT NULL UNIQUE,
  file_name TEXT NOT NULL,
  duration REAL,
  fps REAL,
  width INTEGER,
  height INTEGER,
  roi_x INTEGER,
  roi_y INTEGER,
  roi_w INTEGER,
  roi_h INTEGER,
  processing_status TEXT NOT NULL DEFAULT 'pending',
  processed_at TIMESTAMP,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS persons (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  video_id INTEGER NOT NULL,
  cluster_id INTEGER NOT NULL,
  name TEXT,
  thumbnail_path TEXT,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  FOREIGN KEY(video_id) REFERENCES videos(id) ON DELETE CASCADE,
  UNIQUE(video_id, cluster_id)
);

CREATE TABLE IF NOT EXISTS face_instances (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  person_id INTEGER NOT NULL,
  video_id INTEGER NOT NULL,
  timestamp REAL NOT NULL,
  frame_number INTEGER NOT NULL,
  bbox_x INTEGER,
  bbox_y INTEGER,
  bbox_w INTEGER,
  bbox_h INTEGER,
  encoding BLOB NOT NULL,
  confidence REAL,
  thumbnail_path TEXT,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE,
  FOREIGN KEY(video_id) REFERENCES videos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_face_instances_person ON face_instances(person_id);
CREATE INDEX IF NOT EXISTS idx_face_instances_video ON face_instances(video_id);
CREATE INDEX IF NOT EXISTS idx_face_instances_timestamp ON face_instances(timestamp);
"#;

const PERSON_COLUMNS: &str = "p.id, p.video_id, p.cluster_id, p.name, p.thumbnail_path, \
     (SELECT COUNT(*) FROM face_instances f WHERE f.person_id = p.id) AS face_count";

/// SQLite-backed face index.
///
/// Each registered video is one run: its row id is the `RunId` the pipeline
/// writes against. Person face counts are always derived from the
/// `face_instances` rows, never stored.
pub struct SqliteFaceStore {
    conn: Connection,
}

impl SqliteFaceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Inserts or refreshes the row for `metadata.source_path` and resets its
    /// status to pending. Returns the run id.
    pub fn register_video(
        &mut self,
        metadata: &VideoMetadata,
        roi: Roi,
    ) -> Result<RunId, StoreError> {
        let path = metadata.source_path.clone().unwrap_or_default();
        let file_path = path.to_string_lossy().into_owned();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.clone());

        self.conn.execute(
            "INSERT INTO videos
               (file_path, file_name, duration, fps, width, height, roi_x, roi_y, roi_w, roi_h)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(file_path) DO UPDATE SET
               file_name = excluded.file_name,
               duration = excluded.duration,
               fps = excluded.fps,
               width = excluded.width,
               height = excluded.height,
               roi_x = excluded.roi_x,
               roi_y = excluded.roi_y,
               roi_w = excluded.roi_w,
               roi_h = excluded.roi_h,
               processing_status = 'pending',
               processed_at = NULL",
            params![
                file_path,
                file_name,
                metadata.duration_secs(),
                metadata.fps,
                metadata.width as i64,
                metadata.height as i64,
                roi.x as i64,
                roi.y as i64,
                roi.width as i64,
                roi.height as i64,
            ],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM videos WHERE file_path = ?1",
            params![file_path],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    /// Deletes every person and face instance of a run.
    pub fn clear_video_results(&mut self, run_id: RunId) -> Result<(), StoreError> {
        self.require_video(run_id)?;
        self.conn
            .execute("DELETE FROM persons WHERE video_id = ?1", params![run_id])?;
        Ok(())
    }

    pub fn videos(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_path, file_name, duration, fps, width, height,
                    roi_x, roi_y, roi_w, roi_h, processing_status, processed_at
             FROM videos ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], raw_video)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?.into_record()?);
        }
        Ok(out)
    }

    pub fn video(&self, run_id: RunId) -> Result<Option<VideoRecord>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, file_path, file_name, duration, fps, width, height,
                        roi_x, roi_y, roi_w, roi_h, processing_status, processed_at
                 FROM videos WHERE id = ?1",
                params![run_id],
                raw_video,
            )
            .optional()?;
        raw.map(RawVideo::into_record).transpose()
    }

    /// Persons of a run, largest first.
    pub fn persons_for_video(&self, run_id: RunId) -> Result<Vec<PersonRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PERSON_COLUMNS} FROM persons p
             WHERE p.video_id = ?1
             ORDER BY face_count DESC, p.cluster_id ASC"
        ))?;
        let rows = stmt.query_map(params![run_id], row_to_person)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn person(&self, person_id: PersonId) -> Result<Option<PersonRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PERSON_COLUMNS} FROM persons p WHERE p.id = ?1"),
                params![person_id],
                row_to_person,
            )
            .optional()?)
    }

    /// Appearances of a person in timestamp order.
    pub fn face_instances_for_person(
        &self,
        person_id: PersonId,
    ) -> Result<Vec<FaceInstanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, person_id, video_id, timestamp, frame_number,
                    bbox_x, bbox_y, bbox_w, bbox_h, encoding, confidence, thumbnail_path
             FROM face_instances
             WHERE person_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![person_id], |row| {
            Ok(RawFaceInstance {
                id: row.get(0)?,
                person_id: row.get(1)?,
                video_id: row.get(2)?,
                timestamp: row.get(3)?,
                frame_number: row.get(4)?,
                bbox: (row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?),
                encoding: row.get(9)?,
                confidence: row.get::<_, Option<f64>>(10)?.unwrap_or(1.0),
                thumbnail_path: row.get(11)?,
            })
        })?;

        let mut out = Vec::new();
        for r in rows {
            let raw = r?;
            let (x, y, w, h) = raw.bbox;
            out.push(FaceInstanceRecord {
                id: raw.id,
                person_id: raw.person_id,
                video_id: raw.video_id,
                timestamp: raw.timestamp,
                frame_index: to_usize("frame_number", raw.frame_number)?,
                bounding_box: BoundingBox::new(y, x + w, y + h, x),
                embedding: decode_embedding(&raw.encoding)?,
                confidence: raw.confidence,
                thumbnail_path: raw.thumbnail_path.map(PathBuf::from),
            });
        }
        Ok(out)
    }

    pub fn rename_person(&mut self, person_id: PersonId, name: &str) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE persons SET name = ?1 WHERE id = ?2",
            params![name, person_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownPerson(person_id));
        }
        Ok(())
    }

    /// Moves every face instance of `source` to `target`, then deletes
    /// `source`. Both persons must belong to the same video.
    pub fn merge_persons(&mut self, source: PersonId, target: PersonId) -> Result<(), StoreError> {
        if source == target {
            return Err(StoreError::SelfMerge(source));
        }
        let source_video = self.person_video(source)?;
        let target_video = self.person_video(target)?;
        if source_video != target_video {
            return Err(StoreError::CrossVideoMerge(source, target));
        }

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE face_instances SET person_id = ?1 WHERE person_id = ?2",
            params![target, source],
        )?;
        tx.execute("DELETE FROM persons WHERE id = ?1", params![source])?;
        tx.commit()?;
        Ok(())
    }

    fn person_video(&self, person_id: PersonId) -> Result<RunId, StoreError> {
        self.conn
            .query_row(
                "SELECT video_id FROM persons WHERE id = ?1",
                params![person_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(StoreError::UnknownPerson(person_id))
    }

    fn require_video(&self, run_id: RunId) -> Result<(), StoreError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?1)",
            params![run_id],
            |r| r.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::UnknownVideo(run_id))
        }
    }

    fn set_status(&mut self, run_id: RunId, status: RunStatus) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE videos SET processing_status = ?1, processed_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![status.as_str(), run_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownVideo(run_id));
        }
        Ok(())
    }

    pub fn insert_person(&mut self, person: &NewPerson) -> Result<PersonId, StoreError> {
        self.conn.execute(
            "INSERT INTO persons (video_id, cluster_id, name, thumbnail_path)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                person.run_id,
                person.cluster_label.value(),
                person.display_name,
                person.thumbnail_path.to_string_lossy(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_face_instance(
        &mut self,
        instance: &NewFaceInstance,
    ) -> Result<FaceInstanceId, StoreError> {
        let (x, y, w, h) = instance.bounding_box.to_xywh();
        self.conn.execute(
            "INSERT INTO face_instances
               (person_id, video_id, timestamp, frame_number,
                bbox_x, bbox_y, bbox_w, bbox_h, encoding, confidence, thumbnail_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                instance.person_id,
                instance.run_id,
                instance.timestamp,
                instance.frame_index as i64,
                x,
                y,
                w,
                h,
                encode_embedding(&instance.embedding),
                instance.confidence,
                instance.thumbnail_path.to_string_lossy(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl FaceStore for SqliteFaceStore {
    fn create_person(&mut self, person: &NewPerson) -> Result<PersonId, Box<dyn std::error::Error>> {
        Ok(self.insert_person(person)?)
    }

    fn create_face_instance(
        &mut self,
        instance: &NewFaceInstance,
    ) -> Result<FaceInstanceId, Box<dyn std::error::Error>> {
        Ok(self.insert_face_instance(instance)?)
    }

    fn mark_run_complete(&mut self, run_id: RunId) -> Result<(), Box<dyn std::error::Error>> {
        Ok(self.set_status(run_id, RunStatus::Completed)?)
    }

    /// Also removes whatever the failed run managed to write, so a failed
    /// video never shows a partial person list.
    fn mark_run_failed(&mut self, run_id: RunId) -> Result<(), Box<dyn std::error::Error>> {
        self.clear_video_results(run_id)?;
        Ok(self.set_status(run_id, RunStatus::Failed)?)
    }
}

/// Little-endian `f32` bytes, 4 per dimension.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::CorruptEmbedding(blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

struct RawVideo {
    id: RunId,
    file_path: String,
    file_name: String,
    duration: Option<f64>,
    fps: Option<f64>,
    size: (Option<i64>, Option<i64>),
    roi: (Option<i64>, Option<i64>, Option<i64>, Option<i64>),
    status: String,
    processed_at: Option<String>,
}

fn raw_video(row: &Row<'_>) -> rusqlite::Result<RawVideo> {
    Ok(RawVideo {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        duration: row.get(3)?,
        fps: row.get(4)?,
        size: (row.get(5)?, row.get(6)?),
        roi: (row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?),
        status: row.get(11)?,
        processed_at: row.get(12)?,
    })
}

impl RawVideo {
    fn into_record(self) -> Result<VideoRecord, StoreError> {
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(|_| StoreError::BadColumn {
                column: "processing_status",
                value: self.status.clone(),
            })?;
        let dim = |column, v: Option<i64>| to_u32(column, v.unwrap_or(0));
        let (x, y, w, h) = self.roi;
        Ok(VideoRecord {
            id: self.id,
            file_path: PathBuf::from(self.file_path),
            file_name: self.file_name,
            duration: self.duration.unwrap_or(0.0),
            fps: self.fps.unwrap_or(0.0),
            width: dim("width", self.size.0)?,
            height: dim("height", self.size.1)?,
            roi: Roi::new(dim("roi_x", x)?, dim("roi_y", y)?, dim("roi_w", w)?, dim("roi_h", h)?),
            status,
            processed_at: self.processed_at,
        })
    }
}

struct RawFaceInstance {
    id: FaceInstanceId,
    person_id: PersonId,
    video_id: RunId,
    timestamp: f64,
    frame_number: i64,
    bbox: (i32, i32, i32, i32),
    encoding: Vec<u8>,
    confidence: f64,
    thumbnail_path: Option<String>,
}

fn row_to_person(row: &Row<'_>) -> rusqlite::Result<PersonRecord> {
    let face_count: i64 = row.get(5)?;
    Ok(PersonRecord {
        id: row.get(0)?,
        video_id: row.get(1)?,
        cluster_label: ClusterLabel(row.get(2)?),
        name: row.get(3)?,
        thumbnail_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        face_count: face_count.max(0) as usize,
    })
}

fn to_u32(column: &'static str, v: i64) -> Result<u32, StoreError> {
    u32::try_from(v).map_err(|_| StoreError::BadColumn {
        column,
        value: v.to_string(),
    })
}

fn to_usize(column: &'static str, v: i64) -> Result<usize, StoreError> {
    usize::try_from(v).map_err(|_| StoreError::BadColumn {
        column,
        value: v.to_string(),
    })
}

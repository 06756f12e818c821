use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{Execution, Job, JobStatus, TrackFile};
use crate::sync_ext::MutexExt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid transition for job {job_id}: {current:?} does not permit this update")]
    InvalidTransition { job_id: Uuid, current: JobStatus },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Transition table for the state machine in spec.md §4.6. `Processing ->
/// Pending` is permitted only for crash recovery (the scheduler's startup
/// scan); everything else a normal enqueue/pick/finish/cancel/rerun cycle
/// can reach is covered by the remaining pairs.
fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Uploaded, Pending)
            | (Pending, Processing)
            | (Pending, Failed)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Pending)
            | (Completed, Pending)
            | (Failed, Pending)
    )
}

/// The Metadata Store contract from §4.1. Implemented once, against
/// SQLite; kept as a trait so the Scheduler/Orchestrator depend on an
/// abstraction rather than a concrete database, matching the teacher's
/// repository-trait pattern.
pub trait MetadataStore: Send + Sync {
    fn get_job(&self, id: Uuid) -> Result<Job>;
    fn save_job(&self, job: &Job) -> Result<()>;
    fn update_job_status(&self, id: Uuid, status: JobStatus, err: Option<String>) -> Result<()>;
    fn find_active_jobs(&self) -> Result<Vec<Job>>;
    fn delete_job(&self, id: Uuid) -> Result<()>;

    fn save_execution(&self, exec: &Execution) -> Result<()>;
    fn update_execution(&self, exec: &Execution) -> Result<()>;
    fn list_executions(&self, job_id: Uuid) -> Result<Vec<Execution>>;
}

/// SQLite-backed Metadata Store. Grounded on the storage crate pattern from
/// the reference pack: a `Mutex<Connection>`, a schema created with
/// `execute_batch` on open, and a `thiserror` error enum with `#[from]`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock_unpoisoned();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                completed_at INTEGER,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS track_files (
                job_id TEXT NOT NULL,
                track_index INTEGER NOT NULL,
                path TEXT NOT NULL,
                display_name TEXT NOT NULL,
                PRIMARY KEY (job_id, track_index)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_executions_job_completed ON executions(job_id, completed_at);
            "#,
        )?;
        Ok(())
    }

    pub fn save_track_files(&self, job_id: Uuid, tracks: &[TrackFile]) -> Result<()> {
        let conn = self.conn.lock_unpoisoned();
        for track in tracks {
            conn.execute(
                "INSERT OR REPLACE INTO track_files (job_id, track_index, path, display_name) VALUES (?1, ?2, ?3, ?4)",
                params![job_id.to_string(), track.track_index, track.path, track.display_name],
            )?;
        }
        Ok(())
    }

    pub fn list_track_files(&self, job_id: Uuid) -> Result<Vec<TrackFile>> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt = conn.prepare(
            "SELECT path, display_name, track_index FROM track_files WHERE job_id = ?1 ORDER BY track_index",
        )?;
        let rows = stmt.query_map(params![job_id.to_string()], |row| {
            Ok(TrackFile {
                path: row.get(0)?,
                display_name: row.get(1)?,
                track_index: row.get(2)?,
            })
        })?;
        let mut tracks = Vec::new();
        for row in rows {
            tracks.push(row?);
        }
        Ok(tracks)
    }
}

fn job_row_to_job(row_id: String, json: String) -> Result<Job> {
    serde_json::from_str(&json).map_err(|e| {
        let _ = row_id;
        StoreError::Serialization(e)
    })
}

impl MetadataStore for SqliteStore {
    fn get_job(&self, id: Uuid) -> Result<Job> {
        let conn = self.conn.lock_unpoisoned();
        let json: String = conn
            .query_row(
                "SELECT data FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        job_row_to_job(id.to_string(), json)
    }

    fn save_job(&self, job: &Job) -> Result<()> {
        let json = serde_json::to_string(job)?;
        let status = serde_json::to_string(&job.status)?;
        let conn = self.conn.lock_unpoisoned();
        conn.execute(
            "INSERT OR REPLACE INTO jobs (id, status, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job.id.to_string(),
                status.trim_matches('"'),
                json,
                job.created_at.timestamp(),
                job.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn update_job_status(&self, id: Uuid, status: JobStatus, err: Option<String>) -> Result<()> {
        let mut job = self.get_job(id)?;
        if job.status != status && !transition_allowed(job.status, status) {
            return Err(StoreError::InvalidTransition {
                job_id: id,
                current: job.status,
            });
        }
        job.status = status;
        job.error_message = err;
        job.updated_at = chrono::Utc::now();
        self.save_job(&job)
    }

    fn find_active_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt = conn.prepare(
            "SELECT id, data FROM jobs WHERE status IN ('pending', 'processing') ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((id, data))
        })?;
        let mut jobs = Vec::new();
        for row in rows {
            let (id, data) = row?;
            jobs.push(job_row_to_job(id, data)?);
        }
        Ok(jobs)
    }

    fn delete_job(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock_unpoisoned();
        let affected = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        conn.execute(
            "DELETE FROM executions WHERE job_id = ?1",
            params![id.to_string()],
        )?;
        conn.execute(
            "DELETE FROM track_files WHERE job_id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn save_execution(&self, exec: &Execution) -> Result<()> {
        let json = serde_json::to_string(exec)?;
        let conn = self.conn.lock_unpoisoned();
        conn.execute(
            "INSERT OR REPLACE INTO executions (id, job_id, completed_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                exec.id.to_string(),
                exec.job_id.to_string(),
                exec.completed_at.map(|t| t.timestamp()),
                json,
            ],
        )?;
        Ok(())
    }

    fn update_execution(&self, exec: &Execution) -> Result<()> {
        self.save_execution(exec)
    }

    fn list_executions(&self, job_id: Uuid) -> Result<Vec<Execution>> {
        let conn = self.conn.lock_unpoisoned();
        let mut stmt = conn.prepare(
            "SELECT data FROM executions WHERE job_id = ?1 ORDER BY completed_at ASC",
        )?;
        let rows = stmt.query_map(params![job_id.to_string()], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;
        let mut executions = Vec::new();
        for row in rows {
            let data = row?;
            executions.push(serde_json::from_str(&data)?);
        }
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionStatus, JobSource, Parameters};
    use chrono::Utc;

    fn sample_job(status: JobStatus) -> Job {
        Job {
            id: Uuid::new_v4(),
            title: None,
            source: JobSource::SingleTrack {
                path: "a.wav".into(),
            },
            is_multi_track: false,
            parameters: Parameters::default(),
            status,
            transcript: None,
            summary: None,
            error_message: None,
            diarization: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn save_and_get_job_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = sample_job(JobStatus::Uploaded);
        store.save_job(&job).unwrap();
        let fetched = store.get_job(job.id).unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Uploaded);
    }

    #[test]
    fn get_missing_job_returns_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.get_job(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn find_active_jobs_filters_by_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let pending = sample_job(JobStatus::Pending);
        let processing = sample_job(JobStatus::Processing);
        let completed = sample_job(JobStatus::Completed);
        store.save_job(&pending).unwrap();
        store.save_job(&processing).unwrap();
        store.save_job(&completed).unwrap();

        let active = store.find_active_jobs().unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|j| j.status != JobStatus::Completed));
    }

    #[test]
    fn delete_job_cascades_to_executions_and_tracks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = sample_job(JobStatus::Completed);
        store.save_job(&job).unwrap();
        let exec = Execution::new(job.id, Parameters::default());
        store.save_execution(&exec).unwrap();
        store
            .save_track_files(
                job.id,
                &[TrackFile {
                    path: "a.wav".into(),
                    display_name: "alice".into(),
                    track_index: 0,
                }],
            )
            .unwrap();

        store.delete_job(job.id).unwrap();
        assert!(store.get_job(job.id).is_err());
        assert!(store.list_executions(job.id).unwrap().is_empty());
        assert!(store.list_track_files(job.id).unwrap().is_empty());
    }

    #[test]
    fn update_job_status_rejects_illegal_transition() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = sample_job(JobStatus::Uploaded);
        store.save_job(&job).unwrap();

        let err = store
            .update_job_status(job.id, JobStatus::Completed, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn update_job_status_allows_crash_recovery_transition() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = sample_job(JobStatus::Processing);
        store.save_job(&job).unwrap();

        store
            .update_job_status(job.id, JobStatus::Pending, None)
            .unwrap();
        assert_eq!(store.get_job(job.id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn update_execution_persists_terminal_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = sample_job(JobStatus::Processing);
        store.save_job(&job).unwrap();
        let mut exec = Execution::new(job.id, Parameters::default());
        store.save_execution(&exec).unwrap();

        exec.finish(ExecutionStatus::Completed, None);
        store.update_execution(&exec).unwrap();

        let executions = store.list_executions(job.id).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
    }
}

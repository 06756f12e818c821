use std::io::Write as _;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Scoped creation/deletion of per-job directories (§4.2). Directory
/// creation is `mkdir -p` with default (0755-equivalent) permissions;
/// result writes are atomic (write-to-temp + rename) so a reader never
/// observes a truncated `result.json`.
pub struct ArtifactLayout {
    upload_dir: PathBuf,
    transcripts_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(upload_dir: PathBuf, transcripts_dir: PathBuf) -> Self {
        Self {
            upload_dir,
            transcripts_dir,
        }
    }

    pub fn job_upload_dir(&self, id: Uuid) -> PathBuf {
        self.upload_dir.join(id.to_string())
    }

    pub fn job_transcript_dir(&self, id: Uuid) -> PathBuf {
        self.transcripts_dir.join(id.to_string())
    }

    pub fn result_path(&self, id: Uuid) -> PathBuf {
        self.job_transcript_dir(id).join("result.json")
    }

    pub fn log_path(&self, id: Uuid) -> PathBuf {
        self.job_transcript_dir(id).join("transcription.log")
    }

    pub fn merged_audio_path(&self, id: Uuid, ext: &str) -> PathBuf {
        self.job_upload_dir(id).join(format!("merged.{ext}"))
    }

    /// Per-track working directory for a multi-track job's Coordinator fan-out;
    /// isolates each track's `result.json` so parallel runs never collide.
    pub fn track_work_dir(&self, id: Uuid, track_index: u32) -> PathBuf {
        self.job_transcript_dir(id)
            .join("tracks")
            .join(track_index.to_string())
    }

    pub fn ensure_job_dir(&self, id: Uuid) -> std::io::Result<()> {
        std::fs::create_dir_all(self.job_transcript_dir(id))?;
        std::fs::create_dir_all(self.job_upload_dir(id))?;
        Ok(())
    }

    /// Writes `bytes` to `result.json` atomically: write to a sibling temp
    /// file, `fsync`, then rename over the destination.
    pub fn write_result(&self, id: Uuid, bytes: &[u8]) -> std::io::Result<()> {
        let dest = self.result_path(id);
        write_atomic(&dest, bytes)
    }

    pub fn read_result(&self, id: Uuid) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.result_path(id))
    }

    pub fn result_exists(&self, id: Uuid) -> bool {
        self.result_path(id).exists()
    }

    /// Appends a line to the job's transcription log, creating the file if
    /// necessary. Log-write failures are the caller's concern to degrade on
    /// (§7: "log-write errors degrade silently, the run continues").
    pub fn append_log(&self, id: Uuid, line: &str) -> std::io::Result<()> {
        let path = self.log_path(id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{line}")
    }

    pub fn read_log_tail(&self, id: Uuid, max_bytes: usize) -> std::io::Result<String> {
        let data = std::fs::read(self.log_path(id)).unwrap_or_default();
        let start = data.len().saturating_sub(max_bytes);
        Ok(String::from_utf8_lossy(&data[start..]).into_owned())
    }

    /// Removes everything this job owns on disk. Best-effort: a missing
    /// directory is not an error.
    pub fn remove_job_artifacts(&self, id: Uuid) -> std::io::Result<()> {
        for dir in [self.job_upload_dir(id), self.job_transcript_dir(id)] {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        Uuid::new_v4()
    ));
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, ArtifactLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path().join("uploads"), dir.path().join("transcripts"));
        (dir, layout)
    }

    #[test]
    fn ensure_job_dir_creates_both_trees() {
        let (_dir, layout) = layout();
        let id = Uuid::new_v4();
        layout.ensure_job_dir(id).unwrap();
        assert!(layout.job_upload_dir(id).is_dir());
        assert!(layout.job_transcript_dir(id).is_dir());
    }

    #[test]
    fn write_result_then_read_round_trips() {
        let (_dir, layout) = layout();
        let id = Uuid::new_v4();
        layout.ensure_job_dir(id).unwrap();
        layout.write_result(id, b"{\"ok\":true}").unwrap();
        assert!(layout.result_exists(id));
        let data = layout.read_result(id).unwrap();
        assert_eq!(data, b"{\"ok\":true}");
    }

    #[test]
    fn write_result_leaves_no_temp_file_behind() {
        let (_dir, layout) = layout();
        let id = Uuid::new_v4();
        layout.ensure_job_dir(id).unwrap();
        layout.write_result(id, b"{}").unwrap();
        let entries: Vec<_> = std::fs::read_dir(layout.job_transcript_dir(id))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("result.json")]);
    }

    #[test]
    fn append_log_creates_file_and_accumulates_lines() {
        let (_dir, layout) = layout();
        let id = Uuid::new_v4();
        layout.append_log(id, "line one").unwrap();
        layout.append_log(id, "line two").unwrap();
        let tail = layout.read_log_tail(id, 4096).unwrap();
        assert!(tail.contains("line one"));
        assert!(tail.contains("line two"));
    }

    #[test]
    fn remove_job_artifacts_deletes_both_trees() {
        let (_dir, layout) = layout();
        let id = Uuid::new_v4();
        layout.ensure_job_dir(id).unwrap();
        layout.write_result(id, b"{}").unwrap();
        layout.remove_job_artifacts(id).unwrap();
        assert!(!layout.job_upload_dir(id).exists());
        assert!(!layout.job_transcript_dir(id).exists());
    }

    #[test]
    fn remove_job_artifacts_on_missing_job_is_not_an_error() {
        let (_dir, layout) = layout();
        layout.remove_job_artifacts(Uuid::new_v4()).unwrap();
    }
}

//! Spool records: one pending e-mail notification per file.
//!
//! mailward-spool writes these, mailward-send consumes and deletes them.
//! Deletion after processing is the only commit step; there is no
//! cross-file state.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One pending notification, serialized as JSON in a `.mail` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolRecord {
    pub job_id: u64,
    pub state: String,
    pub email: String,
    pub array_summary: bool,
}

impl SpoolRecord {
    /// Read a record from a spool file.
    pub fn read(path: &Utf8Path) -> Result<Self, SpoolError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the record into `spool_dir`, named `<jobid>_<micros>.mail` to
    /// avoid collisions between notifications for the same job.
    ///
    /// The write goes through a temp file and rename so mailward-send never
    /// sees a half-written record.
    pub fn write(&self, spool_dir: &Utf8Path) -> Result<Utf8PathBuf, SpoolError> {
        let micros = chrono::Utc::now().timestamp_micros();
        let path = spool_dir.join(format!("{}_{}.mail", self.job_id, micros));
        let tmp = spool_dir.join(format!(".{}_{}.tmp", self.job_id, micros));
        std::fs::write(&tmp, serde_json::to_string(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// List spool files, oldest first by the timestamp in the file name.
pub fn scan_spool_dir(spool_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, SpoolError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(spool_dir)? {
        let entry = entry?;
        let path = match Utf8PathBuf::try_from(entry.path()) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if path.is_file() && path.extension() == Some("mail") {
            files.push(path);
        }
    }
    files.sort_by_key(|p| spool_timestamp(p));
    Ok(files)
}

// `<jobid>_<micros>.mail`; files not written by mailward-spool sort first
fn spool_timestamp(path: &Utf8Path) -> u64 {
    path.file_stem()
        .and_then(|stem| stem.rsplit_once('_'))
        .and_then(|(_, micros)| micros.parse().ok())
        .unwrap_or(0)
}

/// Remove a processed spool file.
pub fn delete_spool_file(path: &Utf8Path) {
    tracing::info!("deleting: {}", path);
    if let Err(e) = std::fs::remove_file(path) {
        tracing::error!("failed to delete {}: {}", path, e);
    }
}

//! Ingestion checkpoint: the set of external ids already indexed.
//!
//! Flushed every N newly-recorded ids rather than per item, so resume is
//! at-least-once; reprocessing is safe only because upsert is
//! idempotent. The file is written atomically (temp file + rename) so a
//! crash mid-flush never leaves a truncated checkpoint behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, SearchError, SearchResult};

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    timestamp: chrono::DateTime<Utc>,
    indexed: Vec<String>,
}

#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    indexed: HashSet<String>,
    flush_every: usize,
    pending: usize,
}

impl Checkpoint {
    /// Load an existing checkpoint or start an empty one.
    pub fn load(path: &Path, flush_every: usize) -> SearchResult<Self> {
        let indexed = match std::fs::read(path) {
            Ok(bytes) => {
                let file: CheckpointFile = serde_json::from_slice(&bytes).map_err(|e| {
                    SearchError::new(
                        ErrorCode::CheckpointError,
                        ErrorCategory::Ingestion,
                        ErrorSeverity::High,
                        &format!("corrupt checkpoint {}: {}", path.display(), e),
                    )
                })?;
                tracing::info!(
                    path = %path.display(),
                    count = file.indexed.len(),
                    "loaded ingestion checkpoint"
                );
                file.indexed.into_iter().collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => {
                return Err(SearchError::new(
                    ErrorCode::CheckpointError,
                    ErrorCategory::Ingestion,
                    ErrorSeverity::High,
                    &format!("cannot read checkpoint {}: {}", path.display(), err),
                ))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            indexed,
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.indexed.contains(external_id)
    }

    pub fn len(&self) -> usize {
        self.indexed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty()
    }

    /// Record a newly-succeeded id and flush when the flush interval is
    /// reached. Returns whether a flush happened.
    pub fn record(&mut self, external_id: &str) -> SearchResult<bool> {
        if self.indexed.insert(external_id.to_string()) {
            self.pending += 1;
        }
        if self.pending >= self.flush_every {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Write the checkpoint to disk atomically.
    pub fn flush(&mut self) -> SearchResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error("create dir", e))?;
        }

        let mut indexed: Vec<String> = self.indexed.iter().cloned().collect();
        indexed.sort();
        let file = CheckpointFile {
            timestamp: Utc::now(),
            indexed,
        };

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&tmp, body).map_err(|e| self.io_error("write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error("rename", e))?;

        self.pending = 0;
        tracing::debug!(path = %self.path.display(), count = self.indexed.len(), "checkpoint flushed");
        Ok(())
    }

    fn io_error(&self, op: &str, err: std::io::Error) -> SearchError {
        SearchError::new(
            ErrorCode::CheckpointError,
            ErrorCategory::Ingestion,
            ErrorSeverity::High,
            &format!("checkpoint {} {} failed: {}", self.path.display(), op, err),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("visearch-checkpoint-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_record_flushes_periodically_and_survives_reload() {
        let path = temp_path("reload");
        let _ = std::fs::remove_file(&path);

        let mut checkpoint = Checkpoint::load(&path, 2).unwrap();
        assert!(checkpoint.is_empty());

        assert!(!checkpoint.record("p1").unwrap());
        // Second record hits the flush interval.
        assert!(checkpoint.record("p2").unwrap());
        // Not yet flushed again.
        assert!(!checkpoint.record("p3").unwrap());

        // Only the flushed ids survive a reload.
        let reloaded = Checkpoint::load(&path, 2).unwrap();
        assert!(reloaded.contains("p1"));
        assert!(reloaded.contains("p2"));
        assert!(!reloaded.contains("p3"));

        checkpoint.flush().unwrap();
        let reloaded = Checkpoint::load(&path, 2).unwrap();
        assert_eq!(reloaded.len(), 3);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_duplicate_records_do_not_inflate_the_set() {
        let path = temp_path("dupes");
        let _ = std::fs::remove_file(&path);

        let mut checkpoint = Checkpoint::load(&path, 100).unwrap();
        checkpoint.record("p1").unwrap();
        checkpoint.record("p1").unwrap();
        assert_eq!(checkpoint.len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = Checkpoint::load(&path, 10).unwrap_err();
        assert_eq!(err.code, ErrorCode::CheckpointError);

        let _ = std::fs::remove_file(&path);
    }
}

//! On-disk holder of the latest metrics snapshot.
//!
//! The collector owns writes; this side only reads. Readers never take a
//! lock: a snapshot is always replaced by renaming a fully written temp file
//! over the old one, so a read sees either the old or the new content.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::SnapshotError;

/// Distinguishes temp files of overlapping `replace` calls.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// An immutable copy of the snapshot file at the time it was read.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub content: Vec<u8>,
    pub produced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current snapshot. The bytes are passed through unparsed.
    pub async fn read(&self) -> Result<Snapshot, SnapshotError> {
        let content = tokio::fs::read(&self.path).await.map_err(map_io)?;
        // mtime is advisory; a platform without it just yields None
        let produced_at = self.produced_at().await.ok().flatten();
        Ok(Snapshot {
            content,
            produced_at,
        })
    }

    /// Modification time of the snapshot file, `None` if unavailable.
    pub async fn produced_at(&self) -> Result<Option<DateTime<Utc>>, SnapshotError> {
        let meta = tokio::fs::metadata(&self.path).await.map_err(map_io)?;
        Ok(meta.modified().ok().map(DateTime::<Utc>::from))
    }

    /// Atomically replace the snapshot: write a sibling temp file, flush it,
    /// then rename it over the target.
    pub async fn replace(&self, content: &[u8]) -> Result<(), SnapshotError> {
        let tmp = self.temp_path();

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(SnapshotError::Write)?;
        let written = async {
            file.write_all(content).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SnapshotError::Write(e));
        }

        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            SnapshotError::Write(e)
        })
    }

    /// Temp file in the same directory so the rename never crosses devices.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".into());
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
    }
}

fn map_io(e: std::io::Error) -> SnapshotError {
    if e.kind() == ErrorKind::NotFound {
        SnapshotError::NotFound
    } else {
        SnapshotError::Read(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("data.json"));

        assert!(matches!(store.read().await, Err(SnapshotError::NotFound)));
        assert!(matches!(store.produced_at().await, Err(SnapshotError::NotFound)));
    }

    #[tokio::test]
    async fn test_read_returns_bytes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let raw = br#"{"gateway":{"status":"online"},"crons":[]}"#;
        std::fs::write(&path, raw).unwrap();

        let snapshot = SnapshotStore::new(&path).read().await.unwrap();
        assert_eq!(snapshot.content, raw);
        assert!(snapshot.produced_at.is_some());
    }

    #[tokio::test]
    async fn test_read_directory_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        assert!(matches!(store.read().await, Err(SnapshotError::Read(_))));
    }

    #[tokio::test]
    async fn test_replace_swaps_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("data.json"));

        store.replace(b"{\"v\":1}").await.unwrap();
        store.replace(b"{\"v\":2}").await.unwrap();

        assert_eq!(store.read().await.unwrap().content, b"{\"v\":2}");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_never_see_partial_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path().join("data.json")));

        // Large enough that a non-atomic write would be observable mid-way
        let old = vec![b'a'; 256 * 1024];
        let new = vec![b'b'; 256 * 1024];
        store.replace(&old).await.unwrap();

        let writer = {
            let store = store.clone();
            let (old, new) = (old.clone(), new.clone());
            tokio::spawn(async move {
                for i in 0..20 {
                    let next = if i % 2 == 0 { &new } else { &old };
                    store.replace(next).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let (old, new) = (old.clone(), new.clone());
            readers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let content = store.read().await.unwrap().content;
                    assert!(content == old || content == new, "observed torn snapshot");
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }
}

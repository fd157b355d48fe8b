//! Content-addressed object store.
//!
//! Objects live at `<data-dir>/D1/D2/<md5>` as container files (payload plus
//! a reference-count footer, see [`container`]). Concurrent uploads of
//! identical content race on the same path; `put` serializes the
//! exists-check, the rename and the footer increment behind a per-path lock
//! so exactly one writer commits and the rest increment.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod container;
pub mod fid;

use fid::FileId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid format file")]
    InvalidContainer,
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// How `put` resolved an ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The temp file became the object (first ingest of this content).
    Created,
    /// The object already existed; its reference count was bumped.
    Incremented,
}

/// Metadata reported upward for an object; sizes are payload sizes.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub payload_len: u64,
    /// Modification time in milliseconds since the epoch.
    pub modified_ms: i64,
}

pub struct ObjectStore {
    data_dir: PathBuf,
    tmp_dir: PathBuf,
    /// Per-object-path locks serializing commit-vs-increment and
    /// increment-vs-increment. Entries are tiny and never evicted; the table
    /// is bounded by the number of distinct objects touched since startup.
    path_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ObjectStore {
    /// Open a store rooted at `data_dir`, staging uploads under `tmp_dir`.
    /// Both directories are created if missing.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        let tmp_dir = tmp_dir.into();
        fs::create_dir_all(&data_dir).await?;
        fs::create_dir_all(&tmp_dir).await?;
        Ok(Self {
            data_dir,
            tmp_dir,
            path_locks: DashMap::new(),
        })
    }

    /// A fresh unique staging path for an in-flight upload.
    pub fn temp_path(&self) -> PathBuf {
        self.tmp_dir.join(Uuid::new_v4().to_string())
    }

    pub fn object_path(&self, fid: &FileId) -> PathBuf {
        self.data_dir.join(fid.relative_path())
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Commit a completed temp file (payload plus footer) under its content
    /// address, or bump the reference count if the object already exists.
    pub async fn put(&self, temp: &Path, fid: &FileId) -> Result<PutOutcome, StorageError> {
        let target = self.object_path(fid);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }

        let lock = self.lock_for(&target);
        let _guard = lock.lock().await;
        match fs::metadata(&target).await {
            Ok(_) => {
                let count = container::increment(&target).await?;
                tracing::debug!(fid = %fid, count, "duplicate content, reference count bumped");
                Ok(PutOutcome::Incremented)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                container::commit(temp, &target).await?;
                Ok(PutOutcome::Created)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, fid: &FileId) -> bool {
        fs::metadata(self.object_path(fid)).await.is_ok()
    }

    /// Stat an object; the reported size excludes the footer.
    pub async fn stat(&self, fid: &FileId) -> Result<ObjectMeta, StorageError> {
        let path = self.object_path(fid);
        let md = match fs::metadata(&path).await {
            Ok(md) => md,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(fid.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if md.len() < container::FOOTER_LEN {
            return Err(StorageError::InvalidContainer);
        }
        let modified = md.modified()?;
        Ok(ObjectMeta {
            payload_len: md.len() - container::FOOTER_LEN,
            modified_ms: DateTime::<Utc>::from(modified).timestamp_millis(),
        })
    }

    /// Bounded reader over an object's payload range; see
    /// [`container::payload_reader`] for the clamping rules.
    pub async fn payload_reader(
        &self,
        fid: &FileId,
        offset: u64,
        length: i64,
    ) -> Result<(fs::File, u64), StorageError> {
        container::payload_reader(&self.object_path(fid), offset, length).await
    }
}

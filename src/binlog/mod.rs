// Copyright PingCAP Inc. 2025.

//! Append-only change log of successful ingests.
//!
//! Peers replicate a node by replaying this log. One record per committed
//! upload, on disk as:
//!
//! ```text
//! [4 bytes: record length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized BinlogRecord)]
//! ```
//!
//! Appends are serialized by the writer and synced before returning, so a
//! record that `append` acknowledged survives a crash. Records carry no
//! ordering key beyond file position; append order is commit order.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const RECORD_HEADER_LEN: u64 = 8;

/// One ingest, as seen by the replication side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogRecord {
    /// Content address of the committed object.
    pub fid: String,
    /// Original payload length in bytes, excluding the container footer.
    pub payload_len: u64,
    /// Instance that performed the ingest.
    pub instance_id: String,
}

#[derive(Debug, Error)]
pub enum BinlogError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("encode record: {0}")]
    Encode(String),
}

struct WriterState {
    file: File,
    offset: u64,
}

/// Durable appender for the node's change log.
pub struct BinlogWriter {
    path: PathBuf,
    state: Mutex<WriterState>,
}

impl BinlogWriter {
    /// Open (or create) the log file, positioning new appends at its end.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BinlogError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let offset = file.metadata().await?.len();
        Ok(Self {
            path,
            state: Mutex::new(WriterState { file, offset }),
        })
    }

    /// Append one record and sync it to disk. Returns the record's byte
    /// offset in the log.
    pub async fn append(&self, record: &BinlogRecord) -> Result<u64, BinlogError> {
        let payload = bincode::serialize(record).map_err(|e| BinlogError::Encode(e.to_string()))?;
        let crc = crc32fast::hash(&payload);

        let mut frame = Vec::with_capacity(RECORD_HEADER_LEN as usize + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut state = self.state.lock().await;
        let record_offset = state.offset;
        state.file.write_all(&frame).await?;
        state.file.sync_data().await?;
        state.offset += frame.len() as u64;

        tracing::debug!(fid = %record.fid, offset = record_offset, "binlog append");
        Ok(record_offset)
    }

    /// Read every intact record front-to-back. A torn tail (incomplete
    /// record from a crash mid-append) ends the scan; a record failing its
    /// CRC is skipped.
    pub async fn recover(&self) -> Result<Vec<BinlogRecord>, BinlogError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset + RECORD_HEADER_LEN as usize <= bytes.len() {
            let length = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]) as usize;
            let expected_crc = u32::from_le_bytes([
                bytes[offset + 4],
                bytes[offset + 5],
                bytes[offset + 6],
                bytes[offset + 7],
            ]);
            let payload_start = offset + RECORD_HEADER_LEN as usize;

            if length == 0 || payload_start + length > bytes.len() {
                tracing::warn!(offset, length, "truncated binlog record, stopping recovery");
                break;
            }
            let payload = &bytes[payload_start..payload_start + length];

            if crc32fast::hash(payload) != expected_crc {
                tracing::warn!(offset, "binlog CRC mismatch, skipping record");
                offset = payload_start + length;
                continue;
            }
            match bincode::deserialize::<BinlogRecord>(payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(offset, error = %e, "undecodable binlog record, skipping")
                }
            }
            offset = payload_start + length;
        }

        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

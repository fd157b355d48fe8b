//! Request handlers for the three storage operations.
//!
//! The connection loop owns framing and authentication; everything after
//! dispatch lives here. Handlers never tear down the connection: they turn
//! every failure into a reply header and leave transport errors to the loop.

use crate::binlog::{BinlogError, BinlogRecord, BinlogWriter};
use crate::proto::{attrs, FileInfo, Header, ResultCode};
use crate::storage::fid::FileId;
use crate::storage::{container, ObjectStore, StorageError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Chunk size for streaming an upload body into the digests and temp file.
const UPLOAD_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
enum UploadError {
    #[error("mismatch body length")]
    BodyLengthMismatch,
    #[error("error writing binlog")]
    Binlog(#[source] BinlogError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// Deletes the staged upload file on drop. Once the file has been renamed
/// into the store the removal quietly misses, which is the intended end
/// state for a committed upload.
struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub struct NodeHandler {
    group: String,
    instance_id: String,
    store: Arc<ObjectStore>,
    binlog: Arc<BinlogWriter>,
    buffer_size: usize,
}

impl NodeHandler {
    pub fn new(
        group: impl Into<String>,
        instance_id: impl Into<String>,
        store: Arc<ObjectStore>,
        binlog: Arc<BinlogWriter>,
    ) -> Self {
        Self {
            group: group.into(),
            instance_id: instance_id.into(),
            store,
            binlog,
            buffer_size: UPLOAD_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// UPLOAD: stream the body into the store and log the ingest.
    pub async fn upload<B>(&self, body: &mut B, declared_len: u64) -> Header
    where
        B: AsyncRead + Unpin,
    {
        match self.ingest(body, declared_len).await {
            Ok(fid) => Header::reply(ResultCode::Success)
                .with_attr(attrs::FID, fid.to_string())
                .with_attr(attrs::INSTANCE_ID, self.instance_id.clone())
                .with_attr(attrs::GROUP, self.group.clone()),
            Err(e) => {
                tracing::error!(error = %e, declared_len, "upload failed");
                Header::reply(ResultCode::Error).with_msg(e.to_string())
            }
        }
    }

    async fn ingest<B>(&self, body: &mut B, declared_len: u64) -> Result<FileId, UploadError>
    where
        B: AsyncRead + Unpin,
    {
        let temp = self.store.temp_path();
        let _cleanup = TempFileGuard(temp.clone());

        let mut out = fs::File::create(&temp).await?;
        let mut crc = crc32fast::Hasher::new();
        let mut md5 = md5::Context::new();
        let mut buf = vec![0u8; self.buffer_size];
        let mut received: u64 = 0;

        loop {
            let n = body.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            crc.update(&buf[..n]);
            md5.consume(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            received += n as u64;
        }

        out.write_all(&container::INITIAL_FOOTER).await?;
        out.sync_all().await?;
        drop(out);

        if received != declared_len {
            return Err(UploadError::BodyLengthMismatch);
        }

        let crc_hex = format!("{:08x}", crc.finalize());
        let md5_hex = format!("{:x}", md5.compute());
        let fid = FileId::from_digests(&self.group, &crc_hex, &md5_hex);

        let outcome = self.store.put(&temp, &fid).await?;
        self.binlog
            .append(&BinlogRecord {
                fid: fid.to_string(),
                payload_len: declared_len,
                instance_id: self.instance_id.clone(),
            })
            .await
            .map_err(UploadError::Binlog)?;

        tracing::debug!(fid = %fid, bytes = declared_len, ?outcome, "object ingested");
        Ok(fid)
    }

    /// DOWNLOAD: resolve the request to a positioned payload reader. The
    /// caller streams `len` bytes from the returned file into the reply.
    pub async fn download(&self, request: &Header) -> (Header, Option<(fs::File, u64)>) {
        let Some(req) = RangeRequest::parse(request) else {
            return (Header::reply(ResultCode::NotFound), None);
        };

        match self
            .store
            .payload_reader(&req.fid, req.offset, req.length)
            .await
        {
            Ok((file, len)) => (Header::reply(ResultCode::Success), Some((file, len))),
            Err(StorageError::NotFound(_)) => (Header::reply(ResultCode::NotFound), None),
            Err(e) => {
                tracing::error!(fid = %req.fid, error = %e, "download failed");
                (Header::reply(ResultCode::Error).with_msg(e.to_string()), None)
            }
        }
    }

    /// QUERY: object metadata as a JSON `info` attribute.
    pub async fn inspect(&self, request: &Header) -> Header {
        let Some(fid) = request.attr(attrs::FILE_ID).and_then(FileId::parse) else {
            return Header::reply(ResultCode::NotFound);
        };

        match self.store.stat(&fid).await {
            Ok(meta) => {
                let info = FileInfo {
                    group: self.group.clone(),
                    file_id: fid.to_string(),
                    file_length: meta.payload_len,
                    create_time: meta.modified_ms,
                };
                match serde_json::to_string(&info) {
                    Ok(json) => {
                        Header::reply(ResultCode::Success).with_attr(attrs::INFO, json)
                    }
                    Err(e) => Header::reply(ResultCode::Error).with_msg(e.to_string()),
                }
            }
            Err(StorageError::NotFound(_)) => Header::reply(ResultCode::NotFound),
            Err(e) => {
                tracing::error!(fid = %fid, error = %e, "inspect failed");
                Header::reply(ResultCode::Error).with_msg(e.to_string())
            }
        }
    }
}

/// Typed view of a download request's attributes.
struct RangeRequest {
    fid: FileId,
    offset: u64,
    length: i64,
}

impl RangeRequest {
    /// Any malformed attribute maps to NOT_FOUND, so parsing is all-or-nothing.
    fn parse(header: &Header) -> Option<Self> {
        let fid = FileId::parse(header.attr(attrs::FILE_ID)?)?;
        let offset = header.attr(attrs::OFFSET)?.parse::<u64>().ok()?;
        let length = header.attr(attrs::LENGTH)?.parse::<i64>().ok()?;
        Some(Self {
            fid,
            offset,
            length,
        })
    }
}

//! On-disk object container: payload bytes followed by a 4-byte big-endian
//! reference-count footer.
//!
//! A freshly committed container carries a zero footer; every duplicate
//! ingest bumps it by one, so the footer counts references minus one. All
//! read paths subtract the footer from the file size and never expose its
//! bytes.

use crate::storage::StorageError;
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

/// Size of the trailing reference-count footer.
pub const FOOTER_LEN: u64 = 4;

/// Footer appended to a container on first ingest.
pub(crate) const INITIAL_FOOTER: [u8; FOOTER_LEN as usize] = [0, 0, 0, 0];

/// Atomically move a completed temp file into its content-addressed
/// location. The temp file must already end with the footer.
pub async fn commit(temp: &Path, target: &Path) -> io::Result<()> {
    tokio::fs::rename(temp, target).await
}

/// Read the current reference count from the container's tail.
pub async fn read_ref_count(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::End(-(FOOTER_LEN as i64))).await?;
    let mut footer = [0u8; FOOTER_LEN as usize];
    file.read_exact(&mut footer).await?;
    Ok(u32::from_be_bytes(footer))
}

/// Bump the container's reference count by one and return the new value.
///
/// Callers must hold the store's per-path lock: the read-modify-write of the
/// footer is not atomic on its own.
pub async fn increment(path: &Path) -> io::Result<u32> {
    let mut file = OpenOptions::new().read(true).write(true).open(path).await?;
    file.seek(SeekFrom::End(-(FOOTER_LEN as i64))).await?;
    let mut footer = [0u8; FOOTER_LEN as usize];
    file.read_exact(&mut footer).await?;

    let count = u32::from_be_bytes(footer)
        .checked_add(1)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "reference count overflow"))?;

    file.seek(SeekFrom::End(-(FOOTER_LEN as i64))).await?;
    file.write_all(&count.to_be_bytes()).await?;
    file.sync_data().await?;
    Ok(count)
}

/// Open a bounded reader over `[offset, offset+length)` of the payload.
///
/// `length < 0` means "to end of payload". Offsets past the payload clamp to
/// an empty range; overlong lengths clamp to the payload end. Returns the
/// positioned file and the clamped length; footer bytes are never readable
/// through the result.
pub async fn payload_reader(
    path: &Path,
    offset: u64,
    length: i64,
) -> Result<(File, u64), StorageError> {
    let mut file = match File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let size = file.metadata().await?.len();
    if size < FOOTER_LEN {
        return Err(StorageError::InvalidContainer);
    }
    let payload = size - FOOTER_LEN;

    let offset = offset.min(payload);
    let length = if length < 0 || offset.saturating_add(length as u64) >= payload {
        payload - offset
    } else {
        length as u64
    };

    file.seek(SeekFrom::Start(offset)).await?;
    Ok((file, length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn write_container(dir: &Path, name: &str, payload: &[u8], count: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut bytes = payload.to_vec();
        bytes.extend_from_slice(&count.to_be_bytes());
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }

    async fn read_payload(path: &Path, offset: u64, length: i64) -> Vec<u8> {
        let (file, len) = payload_reader(path, offset, length).await.unwrap();
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len() as u64, len);
        buf
    }

    #[tokio::test]
    async fn increment_bumps_footer_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_container(dir.path(), "obj", b"hello", 0).await;

        assert_eq!(read_ref_count(&path).await.unwrap(), 0);
        assert_eq!(increment(&path).await.unwrap(), 1);
        assert_eq!(increment(&path).await.unwrap(), 2);
        assert_eq!(read_ref_count(&path).await.unwrap(), 2);

        // Size never changes; only the footer does.
        let md = tokio::fs::metadata(&path).await.unwrap();
        assert_eq!(md.len(), 5 + FOOTER_LEN);
        assert_eq!(read_payload(&path, 0, -1).await, b"hello");
    }

    #[tokio::test]
    async fn payload_reader_clamps_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_container(dir.path(), "obj", b"hello", 3).await;

        assert_eq!(read_payload(&path, 0, -1).await, b"hello");
        assert_eq!(read_payload(&path, 1, 3).await, b"ell");
        assert_eq!(read_payload(&path, 0, 5).await, b"hello");
        // Overlong length clamps to payload end; footer stays hidden.
        assert_eq!(read_payload(&path, 2, 100).await, b"llo");
        // Offset past the payload yields an empty range.
        assert_eq!(read_payload(&path, 100, 10).await, b"");
        assert_eq!(read_payload(&path, 5, -1).await, b"");
    }

    #[tokio::test]
    async fn payload_reader_rejects_truncated_containers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runt");
        tokio::fs::write(&path, [0u8; 3]).await.unwrap();

        match payload_reader(&path, 0, -1).await {
            Err(StorageError::InvalidContainer) => {}
            other => panic!("expected InvalidContainer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn payload_reader_maps_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        match payload_reader(&dir.path().join("absent"), 0, -1).await {
            Err(StorageError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_payload_container_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_container(dir.path(), "empty", b"", 0).await;
        assert_eq!(read_payload(&path, 0, -1).await, b"");
        assert_eq!(read_ref_count(&path).await.unwrap(), 0);
    }
}

//! Module `file_ops`
//!
//! Streams file contents between a byte source or sink and disk in
//! fixed-size chunks. Peak memory per transfer is one chunk.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use log::{debug, error, info};
use std::io;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;
use crate::transfer::results::UploadResult;

/// Default transfer chunk: 5 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Lazy, single-pass sequence of file chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Copies `source` into `sink` one full chunk at a time.
///
/// Every write except the last carries exactly `chunk_size` bytes. When
/// `max_bytes` is set the transfer aborts as soon as the limit is passed.
/// On error the sink holds a partial file the caller must discard.
pub async fn upload<R, W>(
    sink: &mut W,
    source: &mut R,
    chunk_size: usize,
    max_bytes: Option<u64>,
) -> Result<UploadResult, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut buffer = vec![0u8; chunk_size];
    let mut result = UploadResult::default();

    loop {
        let filled = fill_chunk(source, &mut buffer).await.map_err(|e| {
            error!("Read failure after {} bytes: {}", result.bytes, e);
            TransferError::UploadFailed(e)
        })?;

        if filled == 0 {
            break;
        }

        result.bytes += filled as u64;
        if let Some(limit) = max_bytes {
            if result.bytes > limit {
                error!(
                    "File size limit exceeded: {} bytes > {} bytes",
                    result.bytes, limit
                );
                return Err(TransferError::FileTooLarge { limit });
            }
        }

        sink.write_all(&buffer[..filled]).await.map_err(|e| {
            error!("Failed to write chunk {}: {}", result.chunks + 1, e);
            TransferError::UploadFailed(e)
        })?;
        result.chunks += 1;

        if filled < chunk_size {
            break;
        }
    }

    sink.flush().await.map_err(TransferError::UploadFailed)?;

    debug!(
        "Upload stream finished: {} bytes in {} chunks",
        result.bytes, result.chunks
    );
    Ok(result)
}

enum DownloadState {
    Pending(PathBuf),
    Reading { file: File, path: PathBuf },
    Done,
}

/// Lazily streams the file at `path` in chunks of `chunk_size`.
///
/// Nothing is opened until the stream is first polled. A failure to open or
/// read yields a single `DownloadFailed` item and ends the stream. Dropping
/// the stream releases the file handle.
pub fn download(path: PathBuf, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);

    stream::unfold(DownloadState::Pending(path), move |state| async move {
        let (mut file, path) = match state {
            DownloadState::Done => return None,
            DownloadState::Reading { file, path } => (file, path),
            DownloadState::Pending(path) => match File::open(&path).await {
                Ok(file) => {
                    debug!("Opened {} for download", path.display());
                    (file, path)
                }
                Err(e) => {
                    error!("Failed to open file {}: {}", path.display(), e);
                    return Some((Err(TransferError::DownloadFailed(e)), DownloadState::Done));
                }
            },
        };

        let mut buffer = vec![0u8; chunk_size];
        match fill_chunk(&mut file, &mut buffer).await {
            Ok(0) => {
                info!("File download completed: {}", path.display());
                None
            }
            Ok(n) => {
                buffer.truncate(n);
                Some((Ok(Bytes::from(buffer)), DownloadState::Reading { file, path }))
            }
            Err(e) => {
                error!("Read error on {}: {}", path.display(), e);
                Some((Err(TransferError::DownloadFailed(e)), DownloadState::Done))
            }
        }
    })
    .boxed()
}

/// Reads until `buffer` is full or the source is exhausted
async fn fill_chunk<R>(source: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buffer.len() {
        match source.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

//! Write coordinator: the single owner of the destination file handle.
//!
//! Fetchers never touch the file. They send positioned writes through a
//! bounded FIFO channel to one writer task, which seeks and writes them one
//! at a time. Each write is acknowledged, so a fetcher that awaits its ack
//! before sending the next buffer gets strictly increasing offsets within its
//! own stream while chunks stay unordered relative to each other.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::DownloadError;
use super::constants::WRITE_QUEUE_CAPACITY;

type Ack = oneshot::Sender<std::io::Result<()>>;

#[derive(Debug)]
enum WriteCommand {
    Write { offset: u64, data: Bytes, ack: Ack },
    Flush { sync: bool, ack: Ack },
    Truncate { len: u64, ack: Ack },
    Close { ack: Ack },
}

/// Cloneable sender side of the write queue.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<WriteCommand>,
    path: Arc<PathBuf>,
}

/// Owns the writer task for one temp file.
#[derive(Debug)]
pub struct WriteCoordinator {
    handle: WriteHandle,
    task: JoinHandle<()>,
}

impl WriteCoordinator {
    /// Opens `path` for positioned writes and starts the writer task.
    ///
    /// Existing contents are kept unless `truncate` is set.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::WriteFailure`] if the file cannot be opened.
    pub async fn open(path: &Path, truncate: bool) -> Result<Self, DownloadError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)
            .await
            .map_err(|e| DownloadError::write_failure(path, e))?;
        debug!(path = %path.display(), truncate, "write coordinator opened file");

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let task = tokio::spawn(writer_loop(file, rx));
        Ok(Self {
            handle: WriteHandle {
                tx,
                path: Arc::new(path.to_path_buf()),
            },
            task,
        })
    }

    /// Returns a sender for fetchers.
    #[must_use]
    pub fn handle(&self) -> WriteHandle {
        self.handle.clone()
    }

    /// Flushes, closes the file and waits for the writer task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::WriteFailure`] if the final flush fails.
    pub async fn close(self) -> Result<(), DownloadError> {
        let result = self
            .handle
            .request(|ack| WriteCommand::Close { ack })
            .await;
        if let Err(error) = self.task.await {
            warn!(error = %error, "writer task panicked");
        }
        result
    }
}

impl WriteHandle {
    /// Writes `data` at `offset`, returning once it has reached the file.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::WriteFailure`] on seek/write failure or if the
    /// coordinator has closed.
    pub async fn write_at(&self, offset: u64, data: Bytes) -> Result<(), DownloadError> {
        self.request(|ack| WriteCommand::Write { offset, data, ack })
            .await
    }

    /// Flushes buffered data; with `sync` also forces it to stable storage.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::WriteFailure`] if the flush fails.
    pub async fn flush(&self, sync: bool) -> Result<(), DownloadError> {
        self.request(|ack| WriteCommand::Flush { sync, ack }).await
    }

    /// Truncates (or extends) the file to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::WriteFailure`] if the resize fails.
    pub async fn truncate(&self, len: u64) -> Result<(), DownloadError> {
        self.request(|ack| WriteCommand::Truncate { len, ack }).await
    }

    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn request(&self, build: impl FnOnce(Ack) -> WriteCommand) -> Result<(), DownloadError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(build(ack))
            .await
            .map_err(|_| self.closed_error())?;
        done.await
            .map_err(|_| self.closed_error())?
            .map_err(|e| DownloadError::write_failure(self.path.as_path(), e))
    }

    fn closed_error(&self) -> DownloadError {
        DownloadError::write_failure(
            self.path.as_path(),
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "write coordinator closed"),
        )
    }
}

async fn writer_loop(mut file: File, mut rx: mpsc::Receiver<WriteCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Write { offset, data, ack } => {
                trace!(offset, len = data.len(), "positioned write");
                let result = write_at(&mut file, offset, &data).await;
                let _ = ack.send(result);
            }
            WriteCommand::Flush { sync, ack } => {
                let result = match file.flush().await {
                    Ok(()) if sync => file.sync_data().await,
                    other => other,
                };
                let _ = ack.send(result);
            }
            WriteCommand::Truncate { len, ack } => {
                let result = match file.flush().await {
                    Ok(()) => file.set_len(len).await,
                    Err(error) => Err(error),
                };
                let _ = ack.send(result);
            }
            WriteCommand::Close { ack } => {
                let _ = ack.send(file.flush().await);
                break;
            }
        }
    }
    debug!("write coordinator stopped");
}

async fn write_at(file: &mut File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(data).await
}

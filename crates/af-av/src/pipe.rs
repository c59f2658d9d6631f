//! Named pipes between stream sources and the packager.
//!
//! In streaming mode every packager input is a FIFO in the working
//! directory. A producer task writes the source into the FIFO while the
//! packager reads it, so inputs never touch the disk. The kernel pipe buffer
//! bounds what is in flight: a producer whose consumer stops reading blocks
//! until the consumer resumes or the run is cancelled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use af_core::{Error, Result};
use af_source::{StreamSource, Transfer};
use nix::errno::Errno;
use nix::sys::stat::Mode;
use tokio::net::unix::pipe;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Delay between attempts to open a FIFO that has no reader yet.
const OPEN_RETRY: Duration = Duration::from_millis(20);

/// A named FIFO. The file is removed when the pipe is dropped.
#[derive(Debug)]
pub struct Pipe {
    path: PathBuf,
}

impl Pipe {
    /// Create the FIFO at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        nix::unistd::mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| {
            Error::Io {
                source: std::io::Error::from(e),
            }
        })?;
        tracing::trace!(path = %path.display(), "Created pipe");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawn a producer that writes `source` into the pipe once a consumer
    /// opens it. The task ends with [`Error::Cancelled`] when `cancel` fires
    /// first, whether it is still waiting for a consumer or blocked on a
    /// full pipe.
    pub fn feed(
        &self,
        source: Arc<dyn StreamSource>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<Transfer>> {
        let path = self.path.clone();
        tokio::spawn(async move {
            let mut sender = open_sender(&path, &cancel).await?;
            tracing::debug!(
                path = %path.display(),
                source = %source.describe(),
                "Feeding pipe"
            );
            // The sender is dropped on return, which signals end of input.
            let transfer = source.copy_to(&mut sender, &cancel).await?;
            tracing::debug!(path = %path.display(), bytes = transfer.bytes, "Pipe fed");
            Ok(transfer)
        })
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pipe");
            }
        }
    }
}

/// Open the write end, waiting until a reader has the FIFO open.
async fn open_sender(path: &Path, cancel: &CancellationToken) -> Result<pipe::Sender> {
    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(sender),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {}
            Err(e) => return Err(e.into()),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(OPEN_RETRY) => {}
        }
    }
}

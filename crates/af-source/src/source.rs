//! Pull-based stream sources.
//!
//! Every packager input, whether a single object, a virtual stream built
//! from live-archive fragments or a demuxed elementary stream, is a
//! [`StreamSource`]: something that can write its bytes into a destination
//! on request. Decryption happens inside the source, so consumers only ever
//! see plaintext.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use af_core::{DecryptionInfo, Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::decrypt::Decryptor;
use crate::store::ObjectStore;

/// Buffer size used when copying between streams.
pub const COPY_BUFFER: usize = 64 * 1024;

/// Outcome of one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes produced by the underlying source.
    pub bytes: u64,
    /// Fragments read (or rewritten, for live sources).
    pub fragments: u64,
    /// First decode time seen by a fragment rewriter.
    pub first_decode_time: Option<u64>,
    /// Whether a fragment rewriter found timeline gaps.
    pub discontinuities: bool,
}

/// A producer of input bytes.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Write the whole stream into `writer`. Stops with [`Error::Cancelled`]
    /// as soon as `cancel` fires.
    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer>;
}

/// Copy `reader` into `writer`, decrypting on the way when a decryptor is
/// given. Both the read and the write side observe `cancel`.
pub async fn copy_cancellable<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut decryptor: Option<Decryptor>,
    cancel: &CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }
        if let Some(d) = decryptor.as_mut() {
            d.apply(&mut buf[..n]);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            written = writer.write_all(&buf[..n]) => written?,
        }
        total += n as u64;
    }

    Ok(total)
}

/// Pull `source` into a local file.
///
/// Bytes go to `<path>.part` first; the file only appears under its final
/// name when the pull succeeded. On any failure the partial file is removed.
pub async fn download(
    source: &dyn StreamSource,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Transfer> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let result = async {
        let mut file = tokio::fs::File::create(&part).await?;
        let transfer = source.copy_to(&mut file, cancel).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<_, Error>(transfer)
    }
    .await;

    match result {
        Ok(transfer) => {
            tokio::fs::rename(&part, path).await?;
            tracing::debug!(
                source = %source.describe(),
                path = %path.display(),
                bytes = transfer.bytes,
                "Downloaded input"
            );
            Ok(transfer)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&part).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %part.display(), error = %rm, "Failed to remove partial download");
                }
            }
            Err(e)
        }
    }
}

/// A local file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StreamSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let bytes = copy_cancellable(&mut file, writer, None, cancel).await?;
        writer.flush().await?;
        Ok(Transfer {
            bytes,
            fragments: 1,
            ..Transfer::default()
        })
    }
}

/// One object of an asset container, decrypted when the asset is
/// storage-encrypted.
#[derive(Clone)]
pub struct ObjectSource {
    store: Arc<dyn ObjectStore>,
    container: String,
    name: String,
    decryption: Option<Arc<DecryptionInfo>>,
}

impl ObjectSource {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        container: impl Into<String>,
        name: impl Into<String>,
        decryption: Option<Arc<DecryptionInfo>>,
    ) -> Self {
        Self {
            store,
            container: container.into(),
            name: name.into(),
            decryption,
        }
    }
}

#[async_trait]
impl StreamSource for ObjectSource {
    fn describe(&self) -> String {
        format!("{}/{}", self.container, self.name)
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let decryptor = self
            .decryption
            .as_deref()
            .map(|info| Decryptor::for_object(info, &self.name))
            .transpose()?;
        let mut reader = self.store.open(&self.container, &self.name).await?;
        let bytes = copy_cancellable(&mut reader, writer, decryptor, cancel).await?;
        writer.flush().await?;
        Ok(Transfer {
            bytes,
            fragments: 1,
            ..Transfer::default()
        })
    }
}

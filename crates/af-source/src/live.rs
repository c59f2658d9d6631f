//! Sources that rewrite live-archive fragments while they stream.
//!
//! The wrapped source writes into one end of a bounded in-memory pipe and
//! the fragment rewriter reads from the other, so neither side buffers more
//! than the pipe capacity plus one `moof`.

use af_core::{Error, Result};
use af_media::{fix_live_video, rebase_live_audio, FragmentStats};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use crate::source::{StreamSource, Transfer};

/// Default capacity of the pipe between a source and its rewriter.
pub const DEFAULT_REWRITE_CAPACITY: usize = 1024 * 1024;

/// Live video, normalized to `tfdt` timing with decode times kept.
pub struct LiveVideoSource {
    inner: Box<dyn StreamSource>,
    capacity: usize,
}

impl LiveVideoSource {
    pub fn new(inner: Box<dyn StreamSource>) -> Self {
        Self {
            inner,
            capacity: DEFAULT_REWRITE_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl StreamSource for LiveVideoSource {
    fn describe(&self) -> String {
        format!("{} (live video fix-up)", self.inner.describe())
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        rewrite_through(self.inner.as_ref(), self.capacity, Rewrite::Video, writer, cancel).await
    }
}

/// Live audio, normalized and rebased so that `audio_start` lands on
/// `origin` (the video start expressed in audio ticks).
pub struct LiveAudioSource {
    inner: Box<dyn StreamSource>,
    audio_start: u64,
    origin: u64,
    capacity: usize,
}

impl LiveAudioSource {
    pub fn new(inner: Box<dyn StreamSource>, audio_start: u64, origin: u64) -> Self {
        Self {
            inner,
            audio_start,
            origin,
            capacity: DEFAULT_REWRITE_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl StreamSource for LiveAudioSource {
    fn describe(&self) -> String {
        format!(
            "{} (live audio rebased {} -> {})",
            self.inner.describe(),
            self.audio_start,
            self.origin
        )
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let rewrite = Rewrite::Audio {
            audio_start: self.audio_start,
            origin: self.origin,
        };
        rewrite_through(self.inner.as_ref(), self.capacity, rewrite, writer, cancel).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Rewrite {
    Video,
    Audio { audio_start: u64, origin: u64 },
}

impl Rewrite {
    async fn run(
        self,
        reader: &mut DuplexStream,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<FragmentStats> {
        match self {
            Rewrite::Video => fix_live_video(reader, writer).await,
            Rewrite::Audio {
                audio_start,
                origin,
            } => rebase_live_audio(reader, writer, audio_start, origin).await,
        }
    }
}

/// Run `inner` into a bounded pipe and `rewrite` from the pipe into
/// `writer`, concurrently. The first failure on either side wins.
async fn rewrite_through(
    inner: &dyn StreamSource,
    capacity: usize,
    rewrite: Rewrite,
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    cancel: &CancellationToken,
) -> Result<Transfer> {
    let (mut tx, mut rx) = tokio::io::duplex(capacity);

    let produce = async move {
        let transfer = inner.copy_to(&mut tx, cancel).await?;
        tx.shutdown().await?;
        Ok::<_, Error>(transfer)
    };
    let consume = async {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            stats = rewrite.run(&mut rx, writer) => stats,
        }
    };

    let (transfer, stats) = tokio::try_join!(produce, consume)?;
    tracing::debug!(
        source = %inner.describe(),
        fragments = stats.fragments,
        discontinuities = stats.discontinuities,
        "Rewrote live fragments"
    );
    Ok(Transfer {
        bytes: transfer.bytes,
        fragments: stats.fragments,
        first_decode_time: stats.first_decode_time,
        discontinuities: stats.has_discontinuities(),
    })
}

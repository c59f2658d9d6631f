//! Virtual streams assembled from live-archive fragments.
//!
//! A multi-file track with source stem `S` is stored as `S/header` (the
//! initialization segment) followed by one object per chunk, `S/<start>`, in
//! the order the client manifest lists them. Text tracks have no header
//! object; their fragments are standalone WebVTT documents that are merged
//! into one.

use std::sync::Arc;

use af_core::{DecryptionInfo, Error, Result, StreamIndex, Track, TrackKind};
use af_media::vtt;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::decrypt::Decryptor;
use crate::source::{copy_cancellable, StreamSource, Transfer};
use crate::store::ObjectStore;

/// Object name of a multi-file track's initialization segment.
pub const HEADER_OBJECT: &str = "header";

/// How fragments are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentFormat {
    /// Byte-wise concatenation.
    Binary,
    /// WebVTT documents merged under a single header.
    WebVtt,
}

/// A track reassembled from its fragment objects.
pub struct MultiFileSource {
    store: Arc<dyn ObjectStore>,
    container: String,
    track: String,
    objects: Vec<String>,
    format: FragmentFormat,
    decryption: Option<Arc<DecryptionInfo>>,
}

impl MultiFileSource {
    /// Build the fragment list of `track` from its client-manifest stream.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        container: impl Into<String>,
        track: &Track,
        stream: &StreamIndex,
        decryption: Option<Arc<DecryptionInfo>>,
    ) -> Self {
        let stem = track.source.trim_end_matches('/');
        let format = match track.kind {
            TrackKind::Text => FragmentFormat::WebVtt,
            TrackKind::Video | TrackKind::Audio => FragmentFormat::Binary,
        };

        let mut objects = Vec::with_capacity(stream.chunks.len() + 1);
        if format == FragmentFormat::Binary {
            objects.push(format!("{stem}/{HEADER_OBJECT}"));
        }
        objects.extend(stream.chunks.iter().map(|c| format!("{stem}/{}", c.start)));

        Self {
            store,
            container: container.into(),
            track: track.name.clone(),
            objects,
            format,
            decryption,
        }
    }

    /// Object names in stream order.
    pub fn objects(&self) -> &[String] {
        &self.objects
    }

    pub fn format(&self) -> FragmentFormat {
        self.format
    }

    fn decryptor(&self, object: &str) -> Result<Option<Decryptor>> {
        self.decryption
            .as_deref()
            .map(|info| Decryptor::for_object(info, object))
            .transpose()
    }

    /// Attach the track name to any failure that is not a cancellation.
    fn fault(&self, object: &str, err: Error) -> Error {
        match err {
            Error::Cancelled => Error::Cancelled,
            Error::NotFound { .. } => {
                Error::reconstruction(&self.track, format!("fragment {object} is missing"))
            }
            other => Error::reconstruction(&self.track, format!("fragment {object}: {other}")),
        }
    }

    async fn copy_binary(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut total = 0u64;
        for object in &self.objects {
            let copied = async {
                let decryptor = self.decryptor(object)?;
                let mut reader = self.store.open(&self.container, object).await?;
                copy_cancellable(&mut reader, &mut *writer, decryptor, cancel).await
            }
            .await
            .map_err(|e| self.fault(object, e))?;
            tracing::trace!(track = %self.track, object = %object, bytes = copied, "Appended fragment");
            total += copied;
        }
        Ok(total)
    }

    async fn copy_webvtt(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut fragments = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            let text = async {
                let decryptor = self.decryptor(object)?;
                let mut reader = self.store.open(&self.container, object).await?;
                let mut raw = Vec::new();
                copy_cancellable(&mut reader, &mut raw, decryptor, cancel).await?;
                String::from_utf8(raw)
                    .map_err(|_| Error::media("caption fragment is not valid UTF-8"))
            }
            .await
            .map_err(|e| self.fault(object, e))?;
            fragments.push(text);
        }

        let merged = vtt::merge_fragments(&fragments);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            written = writer.write_all(merged.as_bytes()) => written?,
        }
        Ok(merged.len() as u64)
    }
}

#[async_trait]
impl StreamSource for MultiFileSource {
    fn describe(&self) -> String {
        format!(
            "{}/{} ({} fragments)",
            self.container,
            self.track,
            self.objects.len()
        )
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        tracing::debug!(
            container = %self.container,
            track = %self.track,
            fragments = self.objects.len(),
            "Reconstructing multi-file track"
        );
        let bytes = match self.format {
            FragmentFormat::Binary => self.copy_binary(writer, cancel).await?,
            FragmentFormat::WebVtt => self.copy_webvtt(writer, cancel).await?,
        };
        writer.flush().await?;
        Ok(Transfer {
            bytes,
            fragments: self.objects.len() as u64,
            ..Transfer::default()
        })
    }
}

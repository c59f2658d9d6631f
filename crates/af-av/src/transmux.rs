//! Demuxing tracks out of multi-track Smooth files.
//!
//! Legacy `.ismv`/`.isma` files may multiplex several tracks. ffmpeg copies
//! one track, selected by its MP4 track ID, into a fragmented MP4 on stdout
//! without re-encoding.

use std::path::{Path, PathBuf};

use af_core::{Result, MEDIA_EXTENSION};
use af_source::{StreamSource, Transfer};
use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolConfig;

/// ffmpeg arguments that copy track `track_id` of `input` to stdout.
pub fn demux_args(input: &Path, track_id: u32) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-map".into(),
        format!("0:i:{track_id}"),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "mp4".into(),
        "-movflags".into(),
        "+frag_keyframe+empty_moov+default_base_moof".into(),
        "pipe:1".into(),
    ]
}

/// Name of the file a demuxed track is written to.
///
/// The whole shared name is kept, extension included, so `lecture.ismv` and
/// `lecture.isma` demux to different files. The track ID is appended when
/// more than one track shares the file.
pub fn demuxed_name(shared: &str, track_id: u32, sharing: usize) -> String {
    let stem = shared.replace('.', "_");
    if sharing == 1 {
        format!("{stem}{MEDIA_EXTENSION}")
    } else {
        format!("{stem}_{track_id}{MEDIA_EXTENSION}")
    }
}

/// One track of a local Smooth file, demuxed by ffmpeg as it is pulled.
#[derive(Debug, Clone)]
pub struct TransmuxSource {
    ffmpeg: ToolConfig,
    input: PathBuf,
    track_id: u32,
}

impl TransmuxSource {
    pub fn new(ffmpeg: ToolConfig, input: impl Into<PathBuf>, track_id: u32) -> Self {
        Self {
            ffmpeg,
            input: input.into(),
            track_id,
        }
    }
}

#[async_trait]
impl StreamSource for TransmuxSource {
    fn describe(&self) -> String {
        format!("{} (track {})", self.input.display(), self.track_id)
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let mut cmd = self.ffmpeg.command();
        cmd.args(demux_args(&self.input, self.track_id));
        let bytes = cmd.run_piped(writer, cancel).await?;
        tracing::debug!(
            input = %self.input.display(),
            track_id = self.track_id,
            bytes,
            "Demuxed track"
        );
        Ok(Transfer {
            bytes,
            fragments: 1,
            ..Transfer::default()
        })
    }
}

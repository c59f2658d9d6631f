//! Rebuilding packager inputs from an asset's objects.
//!
//! Reconstruction runs in two phases. Phase 1 rebuilds the live-archive
//! video track and returns its timeline origin as a [`VideoSync`]. Phase 2
//! takes that value to rebase audio and shift captions, and handles every
//! other input. Audio rebasing and caption shifting take a `&VideoSync`, so
//! they cannot run before the video origin exists.
//!
//! In staged mode every input is pulled into the workspace's `input/`
//! directory. In streaming mode inputs are returned as sources for the
//! caller to feed into pipes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use af_av::{demuxed_name, ToolRegistry, TransmuxSource, Workspace, FFMPEG};
use af_core::config::PackagingConfig;
use af_core::{
    AssetDetails, DecryptionInfo, Error, Result, StreamIndex, SyncState, Track, TrackKind,
    VideoSync,
};
use af_media::vtt;
use af_source::{
    download, LiveAudioSource, LiveVideoSource, MultiFileSource, ObjectSource, ObjectStore,
    StreamSource, Transfer,
};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::plan::{stream_selector, InputEntry, InputPlan, PlannedTrack};

/// Suffix of captions staged before their timestamps are adjusted.
const STAGED_SUFFIX: &str = ".staged";

/// Switches that shape reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructOptions {
    pub streaming: bool,
    pub live_video_fixup: bool,
    pub live_audio_fixup: bool,
    pub adjust_vtt: bool,
    pub transmux_smooth: bool,
    pub pipe_capacity: usize,
}

impl From<&PackagingConfig> for ReconstructOptions {
    fn from(config: &PackagingConfig) -> Self {
        Self {
            streaming: config.streaming,
            live_video_fixup: config.live_video_fixup,
            live_audio_fixup: config.live_audio_fixup,
            adjust_vtt: config.adjust_vtt,
            transmux_smooth: config.transmux_smooth,
            pipe_capacity: config.pipe_capacity,
        }
    }
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self::from(&PackagingConfig::default())
    }
}

/// Where a packager input's bytes are.
pub enum InputData {
    /// A file under the workspace input directory.
    Staged(PathBuf),
    /// A source still to be pulled, for streaming mode.
    Streamed(Arc<dyn StreamSource>),
}

impl std::fmt::Debug for InputData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputData::Staged(path) => f.debug_tuple("Staged").field(path).finish(),
            InputData::Streamed(source) => {
                f.debug_tuple("Streamed").field(&source.describe()).finish()
            }
        }
    }
}

/// A track read from a packager input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStream {
    pub track: PlannedTrack,
    /// Packager stream selector within the input.
    pub selector: String,
}

/// One input handed to the packager.
#[derive(Debug)]
pub struct PackagerInput {
    /// File name within the workspace input directory.
    pub name: String,
    pub data: InputData,
    pub streams: Vec<PlannedStream>,
}

impl PackagerInput {
    fn first_index(&self) -> usize {
        self.streams
            .iter()
            .map(|s| s.track.index)
            .min()
            .unwrap_or(usize::MAX)
    }
}

/// Packager inputs plus the timing record they were aligned with.
#[derive(Debug)]
pub struct Reconstruction {
    pub inputs: Vec<PackagerInput>,
    pub sync: SyncState,
}

/// Caption offset in milliseconds for a video origin.
pub fn caption_offset(video: &VideoSync) -> Result<i64> {
    let ms = video.offset_ms()?;
    i64::try_from(ms).map_err(|_| Error::Validation(format!("caption offset {ms} ms is too large")))
}

/// Every input must land on its own file in the input directory.
fn ensure_distinct_names(workspace: &Workspace, inputs: &[PackagerInput]) -> Result<()> {
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in inputs {
        if !seen.insert(workspace.input_path(&input.name)) {
            return Err(Error::Internal(format!(
                "duplicate packager input {}",
                input.name
            )));
        }
    }
    Ok(())
}

/// Rebuilds the inputs of one asset.
pub struct Reconstructor<'a> {
    asset: &'a AssetDetails,
    store: Arc<dyn ObjectStore>,
    workspace: &'a Workspace,
    tools: &'a ToolRegistry,
    options: &'a ReconstructOptions,
    decryption: Option<Arc<DecryptionInfo>>,
}

impl<'a> Reconstructor<'a> {
    pub fn new(
        asset: &'a AssetDetails,
        store: Arc<dyn ObjectStore>,
        workspace: &'a Workspace,
        tools: &'a ToolRegistry,
        options: &'a ReconstructOptions,
    ) -> Self {
        Self {
            asset,
            store,
            workspace,
            tools,
            options,
            decryption: asset.decryption.clone().map(Arc::new),
        }
    }

    /// Rebuild every input of `plan`: live video first, then the rest.
    pub async fn reconstruct(
        &self,
        plan: &InputPlan,
        cancel: &CancellationToken,
    ) -> Result<Reconstruction> {
        let (video_entries, dependent): (Vec<&InputEntry>, Vec<&InputEntry>) =
            plan.entries.iter().partition(|e| e.is_live_video());

        let mut inputs = Vec::with_capacity(plan.entries.len());
        let mut video: Option<VideoSync> = None;
        for entry in video_entries {
            let (input, sync) = self.reconstruct_video(entry, cancel).await?;
            inputs.push(input);
            if video.is_none() {
                video = Some(sync);
            }
        }

        let mut sync = video.map(SyncState::from_video).unwrap_or_default();
        if video.is_none() && self.asset.manifest.is_live_archive {
            tracing::warn!(
                container = %self.asset.container,
                "Live archive has no fragmented video track; audio and captions keep their own timelines"
            );
        }

        let rest = self
            .reconstruct_dependent(&dependent, video.as_ref(), &mut sync, cancel)
            .await?;
        inputs.extend(rest);
        inputs.sort_by_key(PackagerInput::first_index);
        ensure_distinct_names(self.workspace, &inputs)?;

        Ok(Reconstruction { inputs, sync })
    }

    /// Phase 1: rebuild a live video input and return its timeline origin.
    ///
    /// The origin comes from the client manifest. When the video fix-up runs
    /// in staged mode, the first decode time seen in the fragments wins.
    pub async fn reconstruct_video(
        &self,
        entry: &InputEntry,
        cancel: &CancellationToken,
    ) -> Result<(PackagerInput, VideoSync)> {
        let planned = entry
            .tracks
            .iter()
            .find(|t| t.track.is_multi_file && t.track.kind == TrackKind::Video)
            .ok_or_else(|| {
                Error::Internal(format!("{} has no fragmented video track", entry.identifier))
            })?;
        let track = &planned.track;
        let stream = self.client_stream(track)?;
        let mut video = VideoSync::new(stream.start_time().unwrap_or(0), stream.time_scale)
            .map_err(|e| track_error(track, e))?;

        let fragments = self.fragments(track, stream);
        let source: Box<dyn StreamSource> = if self.options.live_video_fixup {
            Box::new(LiveVideoSource::new(fragments).with_capacity(self.options.pipe_capacity))
        } else {
            fragments
        };

        let data = if self.options.streaming {
            InputData::Streamed(Arc::from(source))
        } else {
            let (path, transfer) = self.stage(track, source.as_ref(), &entry.identifier, cancel).await?;
            if let Some(first) = transfer.first_decode_time {
                if first != video.start_time() {
                    tracing::warn!(
                        container = %self.asset.container,
                        track = %track.name,
                        manifest = video.start_time(),
                        fragments = first,
                        "Video start time differs from the client manifest; using the fragment time"
                    );
                    video = VideoSync::new(first, video.time_scale())?;
                }
            }
            InputData::Staged(path)
        };

        tracing::info!(
            container = %self.asset.container,
            track = %track.name,
            start_time = video.start_time(),
            time_scale = video.time_scale(),
            "Recorded video timeline"
        );

        Ok((self.input_for(entry, data), video))
    }

    /// Phase 2: every input that is not live video. Audio is rebased and
    /// captions shifted only when a video origin is given.
    pub async fn reconstruct_dependent(
        &self,
        entries: &[&InputEntry],
        video: Option<&VideoSync>,
        sync: &mut SyncState,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackagerInput>> {
        let mut inputs = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_multi_file() {
                inputs.push(self.reconstruct_fragmented(entry, video, sync, cancel).await?);
            } else if entry.is_smooth() && self.options.transmux_smooth {
                inputs.extend(self.transmux(entry, cancel).await?);
            } else {
                inputs.push(self.reconstruct_plain(entry, video, cancel).await?);
            }
        }
        Ok(inputs)
    }

    async fn reconstruct_fragmented(
        &self,
        entry: &InputEntry,
        video: Option<&VideoSync>,
        sync: &mut SyncState,
        cancel: &CancellationToken,
    ) -> Result<PackagerInput> {
        let planned = entry
            .tracks
            .iter()
            .find(|t| t.track.is_multi_file)
            .ok_or_else(|| Error::Internal(format!("{} is not fragmented", entry.identifier)))?;
        let track = &planned.track;
        let stream = self.client_stream(track)?;
        let fragments = self.fragments(track, stream);

        let data = match (track.kind, video) {
            (TrackKind::Audio, Some(video)) => {
                let source = self.live_audio(fragments, track, stream, video, sync)?;
                self.audio_input(entry, track, source, sync, cancel).await?
            }
            (TrackKind::Text, Some(video)) if self.caption_adjustment_wanted() => {
                let offset = caption_offset(video)?;
                self.caption_input(entry, track, fragments, Some(offset), cancel)
                    .await?
            }
            (TrackKind::Text, _) => {
                self.caption_input(entry, track, fragments, None, cancel)
                    .await?
            }
            _ => self.source_input(entry, track, fragments, cancel).await?,
        };

        Ok(self.input_for(entry, data))
    }

    /// Record the audio timeline against `video` and wrap `fragments` in
    /// the audio rebaser when the fix-up is on.
    pub fn live_audio(
        &self,
        fragments: Box<dyn StreamSource>,
        track: &Track,
        stream: &StreamIndex,
        video: &VideoSync,
        sync: &mut SyncState,
    ) -> Result<Box<dyn StreamSource>> {
        let audio_start = stream.start_time().unwrap_or(0);
        sync.record_audio(video, audio_start, stream.time_scale)
            .map_err(|e| track_error(track, e))?;

        tracing::info!(
            container = %self.asset.container,
            track = %track.name,
            audio_start,
            audio_time_scale = stream.time_scale,
            video_start_in_audio = sync.video_start_time_in_audio_time_scale,
            "Aligned audio timeline to video"
        );

        if !self.options.live_audio_fixup {
            return Ok(fragments);
        }
        Ok(Box::new(
            LiveAudioSource::new(
                fragments,
                audio_start,
                sync.video_start_time_in_audio_time_scale,
            )
            .with_capacity(self.options.pipe_capacity),
        ))
    }

    async fn audio_input(
        &self,
        entry: &InputEntry,
        track: &Track,
        source: Box<dyn StreamSource>,
        sync: &mut SyncState,
        cancel: &CancellationToken,
    ) -> Result<InputData> {
        if self.options.streaming {
            return Ok(InputData::Streamed(Arc::from(source)));
        }
        let (path, transfer) = self.stage(track, source.as_ref(), &entry.identifier, cancel).await?;
        note_discontinuities(&self.asset.container, track, &transfer, sync);
        Ok(InputData::Staged(path))
    }

    fn caption_adjustment_wanted(&self) -> bool {
        self.options.adjust_vtt && self.asset.manifest.is_live_archive
    }

    /// A caption input, shifted by `offset_ms` when given.
    ///
    /// Staged captions are pulled to a side file first and adjusted into
    /// their final name.
    async fn caption_input(
        &self,
        entry: &InputEntry,
        track: &Track,
        source: Box<dyn StreamSource>,
        offset_ms: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<InputData> {
        let Some(offset_ms) = offset_ms else {
            return self.source_input(entry, track, source, cancel).await;
        };

        if self.options.streaming {
            return Ok(InputData::Streamed(Arc::new(ShiftedCaptions {
                inner: source,
                offset_ms,
            })));
        }

        let staged_name = format!("{}{STAGED_SUFFIX}", entry.identifier);
        let (staged, _) = self.stage(track, source.as_ref(), &staged_name, cancel).await?;
        let path = self.workspace.input_path(&entry.identifier);
        let cues = vtt::adjust_file(&staged, &path, offset_ms)
            .await
            .map_err(|e| track_error(track, e))?;
        tokio::fs::remove_file(&staged).await?;

        tracing::info!(
            container = %self.asset.container,
            track = %track.name,
            offset_ms,
            cues,
            "Adjusted caption timestamps"
        );
        Ok(InputData::Staged(path))
    }

    /// A single-object input, staged or streamed as is.
    async fn reconstruct_plain(
        &self,
        entry: &InputEntry,
        video: Option<&VideoSync>,
        cancel: &CancellationToken,
    ) -> Result<PackagerInput> {
        let planned = entry
            .tracks
            .first()
            .ok_or_else(|| Error::Internal(format!("{} has no tracks", entry.identifier)))?;
        let track = &planned.track;
        let source = Box::new(self.object(&entry.identifier));

        let offset = match video {
            Some(video) if track.is_text() && self.caption_adjustment_wanted() => {
                Some(caption_offset(video)?)
            }
            _ => None,
        };
        let data = self.caption_input(entry, track, source, offset, cancel).await?;
        Ok(self.input_for(entry, data))
    }

    /// Download a multiplexed Smooth file once and demux one input per
    /// track from it.
    async fn transmux(
        &self,
        entry: &InputEntry,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackagerInput>> {
        let ffmpeg = self.tools.require(FFMPEG)?;
        let first = entry
            .tracks
            .first()
            .ok_or_else(|| Error::Internal(format!("{} has no tracks", entry.identifier)))?;

        // The shared file is read by ffmpeg, so it is staged in both modes.
        let shared = self.workspace.input_path(&entry.identifier);
        let object = self.object(&entry.identifier);
        download(&object, &shared, cancel)
            .await
            .map_err(|e| track_error(&first.track, e))?;

        let sharing = entry.tracks.len();
        let mut inputs = Vec::with_capacity(sharing);
        for planned in &entry.tracks {
            let track = &planned.track;
            let name = demuxed_name(&entry.identifier, track.track_id, sharing);
            let source = TransmuxSource::new(ffmpeg.clone(), shared.clone(), track.track_id);

            let data = if self.options.streaming {
                InputData::Streamed(Arc::new(source))
            } else {
                let (path, _) = self.stage(track, &source, &name, cancel).await?;
                InputData::Staged(path)
            };

            tracing::debug!(
                container = %self.asset.container,
                track = %track.name,
                track_id = track.track_id,
                input = %name,
                "Demuxed Smooth track"
            );
            inputs.push(PackagerInput {
                name,
                data,
                streams: vec![PlannedStream {
                    track: planned.clone(),
                    selector: stream_selector(track, false),
                }],
            });
        }
        Ok(inputs)
    }

    async fn source_input(
        &self,
        entry: &InputEntry,
        track: &Track,
        source: Box<dyn StreamSource>,
        cancel: &CancellationToken,
    ) -> Result<InputData> {
        if self.options.streaming {
            return Ok(InputData::Streamed(Arc::from(source)));
        }
        let (path, _) = self.stage(track, source.as_ref(), &entry.identifier, cancel).await?;
        Ok(InputData::Staged(path))
    }

    /// Pull `source` into the input directory under `name`.
    async fn stage(
        &self,
        track: &Track,
        source: &dyn StreamSource,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, Transfer)> {
        let path = self.workspace.input_path(name);
        let transfer = download(source, &path, cancel).await.map_err(|e| {
            let e = track_error(track, e);
            if !e.is_cancelled() {
                tracing::error!(
                    container = %self.asset.container,
                    track = %track.name,
                    source = %source.describe(),
                    error = %e,
                    "Failed to reconstruct input"
                );
            }
            e
        })?;
        tracing::debug!(
            container = %self.asset.container,
            track = %track.name,
            input = %name,
            bytes = transfer.bytes,
            fragments = transfer.fragments,
            "Staged input"
        );
        Ok((path, transfer))
    }

    fn client_stream(&self, track: &Track) -> Result<&'a StreamIndex> {
        self.asset
            .client_manifest
            .as_ref()
            .and_then(|c| c.stream(track.kind, &track.name))
            .ok_or_else(|| Error::reconstruction(&track.name, "no matching client manifest stream"))
    }

    fn fragments(&self, track: &Track, stream: &StreamIndex) -> Box<dyn StreamSource> {
        Box::new(MultiFileSource::new(
            self.store.clone(),
            self.asset.container.clone(),
            track,
            stream,
            self.decryption.clone(),
        ))
    }

    fn object(&self, name: &str) -> ObjectSource {
        ObjectSource::new(
            self.store.clone(),
            self.asset.container.clone(),
            name,
            self.decryption.clone(),
        )
    }

    fn input_for(&self, entry: &InputEntry, data: InputData) -> PackagerInput {
        PackagerInput {
            name: entry.identifier.clone(),
            data,
            streams: entry
                .tracks
                .iter()
                .map(|planned| PlannedStream {
                    selector: entry.selector(&planned.track),
                    track: planned.clone(),
                })
                .collect(),
        }
    }
}

/// Fold a finished audio transfer into the sync record.
pub fn note_discontinuities(container: &str, track: &Track, transfer: &Transfer, sync: &mut SyncState) {
    if transfer.discontinuities {
        tracing::warn!(container, track = %track.name, "Audio timeline has discontinuities");
        sync.audio_has_discontinuities = true;
    }
}

/// Keep the track identity on faults that do not already carry one.
fn track_error(track: &Track, err: Error) -> Error {
    match err {
        Error::Cancelled | Error::Tool { .. } | Error::Reconstruction { .. } => err,
        other => Error::reconstruction(&track.name, other),
    }
}

/// Captions shifted in memory while they stream.
struct ShiftedCaptions {
    inner: Box<dyn StreamSource>,
    offset_ms: i64,
}

#[async_trait]
impl StreamSource for ShiftedCaptions {
    fn describe(&self) -> String {
        format!("{} (shifted {} ms)", self.inner.describe(), self.offset_ms)
    }

    async fn copy_to(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let mut raw = Vec::new();
        let mut transfer = self.inner.copy_to(&mut raw, cancel).await?;
        let text = String::from_utf8(raw)
            .map_err(|e| Error::media(format!("captions are not UTF-8: {e}")))?;
        let (shifted, cues) = vtt::shift_cues(&text, self.offset_ms);
        writer.write_all(shifted.as_bytes()).await?;
        writer.flush().await?;
        tracing::debug!(source = %self.inner.describe(), cues, "Shifted captions");
        transfer.bytes = shifted.len() as u64;
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::build_input_plan;
    use crate::selection::select_tracks;
    use af_core::{ClientManifest, Manifest};
    use af_source::LocalStore;

    const VTT: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nHello\n";

    fn text_track(source: &str) -> Track {
        Track {
            kind: TrackKind::Text,
            source: source.into(),
            track_id: 3,
            is_multi_file: false,
            parameters: Vec::new(),
            name: "textstream".into(),
            language: Some("en".into()),
        }
    }

    fn asset(live: bool, tracks: Vec<Track>) -> AssetDetails {
        AssetDetails {
            container: "lecture".into(),
            manifest: Manifest {
                file_name: "lecture.ism".into(),
                is_live_archive: live,
                tracks,
            },
            client_manifest: Some(ClientManifest {
                time_scale: 10_000_000,
                streams: Vec::new(),
            }),
            decryption: None,
        }
    }

    async fn setup(body: &str) -> (tempfile::TempDir, Arc<dyn ObjectStore>, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("store/lecture/captions.vtt");
        std::fs::create_dir_all(object.parent().unwrap()).unwrap();
        std::fs::write(&object, body).unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("store")));
        let ws = Workspace::create(&dir.path().join("work"), "lecture", false)
            .await
            .unwrap();
        (dir, store, ws)
    }

    #[tokio::test]
    async fn phase_two_shifts_captions_with_given_video_origin() {
        let (_dir, store, ws) = setup(VTT).await;
        let asset = asset(true, vec![text_track("captions.vtt")]);
        let tools = ToolRegistry::default();
        let options = ReconstructOptions::default();
        let recon = Reconstructor::new(&asset, store, &ws, &tools, &options);

        let selected = select_tracks(&asset.manifest, asset.client_manifest.as_ref());
        let plan = build_input_plan(asset.manifest.base_name(), &selected);
        let entries: Vec<&InputEntry> = plan.entries.iter().collect();

        // 2.5 s at 10 MHz.
        let video = VideoSync::new(25_000_000, 10_000_000).unwrap();
        let mut sync = SyncState::from_video(video);
        let inputs = recon
            .reconstruct_dependent(&entries, Some(&video), &mut sync, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].streams[0].selector, "text");
        let InputData::Staged(path) = &inputs[0].data else {
            panic!("expected a staged input");
        };
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("00:00:03.500 --> 00:00:04.500"), "{text}");
        assert!(!ws.input_path("captions.vtt.staged").exists());
    }

    #[tokio::test]
    async fn on_demand_captions_are_not_shifted() {
        let (_dir, store, ws) = setup(VTT).await;
        let asset = asset(false, vec![text_track("captions.vtt")]);
        let tools = ToolRegistry::default();
        let options = ReconstructOptions::default();
        let recon = Reconstructor::new(&asset, store, &ws, &tools, &options);

        let plan = build_input_plan("lecture", &asset.manifest.tracks);
        let out = recon.reconstruct(&plan, &CancellationToken::new()).await.unwrap();
        assert_eq!(out.sync, SyncState::default());
        let InputData::Staged(path) = &out.inputs[0].data else {
            panic!("expected a staged input");
        };
        assert_eq!(std::fs::read_to_string(path).unwrap(), VTT);
    }

    #[tokio::test]
    async fn streamed_captions_are_shifted_on_pull() {
        let (_dir, store, ws) = setup(VTT).await;
        let asset = asset(true, vec![text_track("captions.vtt")]);
        let tools = ToolRegistry::default();
        let options = ReconstructOptions {
            streaming: true,
            ..ReconstructOptions::default()
        };
        let recon = Reconstructor::new(&asset, store, &ws, &tools, &options);

        let plan = build_input_plan("lecture", &asset.manifest.tracks);
        let entries: Vec<&InputEntry> = plan.entries.iter().collect();
        let video = VideoSync::new(10_000_000, 10_000_000).unwrap();
        let mut sync = SyncState::from_video(video);
        let inputs = recon
            .reconstruct_dependent(&entries, Some(&video), &mut sync, &CancellationToken::new())
            .await
            .unwrap();

        let InputData::Streamed(source) = &inputs[0].data else {
            panic!("expected a streamed input");
        };
        let mut out = Vec::new();
        source.copy_to(&mut out, &CancellationToken::new()).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("00:00:02.000 --> 00:00:03.000"), "{text}");
    }

    #[tokio::test]
    async fn missing_object_is_a_reconstruction_fault() {
        let (_dir, store, ws) = setup(VTT).await;
        let asset = asset(false, vec![text_track("absent.vtt")]);
        let tools = ToolRegistry::default();
        let options = ReconstructOptions::default();
        let recon = Reconstructor::new(&asset, store, &ws, &tools, &options);

        let plan = build_input_plan("lecture", &asset.manifest.tracks);
        let err = recon
            .reconstruct(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reconstruction { ref track, .. } if track == "textstream"));
        assert!(!ws.input_path("absent.vtt").exists());
        assert!(!ws.input_path("absent.vtt.part").exists());
    }

    #[tokio::test]
    async fn smooth_transmux_requires_ffmpeg() {
        let (_dir, store, ws) = setup(VTT).await;
        let mut video = text_track("lecture.ismv");
        video.kind = TrackKind::Video;
        let asset = asset(false, vec![video]);
        let tools = ToolRegistry::default();
        let options = ReconstructOptions {
            transmux_smooth: true,
            ..ReconstructOptions::default()
        };
        let recon = Reconstructor::new(&asset, store, &ws, &tools, &options);

        let plan = build_input_plan("lecture", &asset.manifest.tracks);
        let err = recon
            .reconstruct(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn inputs_sharing_a_file_name_are_rejected() {
        let (_dir, _store, ws) = setup(VTT).await;
        let staged = |name: &str| PackagerInput {
            name: name.to_string(),
            data: InputData::Staged(ws.input_path(name)),
            streams: Vec::new(),
        };

        let distinct = [staged("lecture_ismv.mp4"), staged("lecture_isma.mp4")];
        assert!(ensure_distinct_names(&ws, &distinct).is_ok());

        // Names that flatten onto the same path collide too.
        let clashing = [staged("a/b.mp4"), staged("a_b.mp4")];
        let err = ensure_distinct_names(&ws, &clashing).unwrap_err();
        assert!(matches!(err, Error::Internal(ref m) if m.contains("a_b.mp4")));
    }

    #[test]
    fn caption_offset_in_ms() {
        let video = VideoSync::new(1000, 10_000_000).unwrap();
        assert_eq!(caption_offset(&video).unwrap(), 0);
        let video = VideoSync::new(123_456_789, 10_000_000).unwrap();
        assert_eq!(caption_offset(&video).unwrap(), 12_346);
    }
}

//! Mapping selected tracks to packager inputs and output names.
//!
//! An [`InputPlan`] groups the selected tracks by the input they are read
//! from. Several tracks may share one input (a legacy `.ismv` carrying both
//! audio and video), and every selected track appears in exactly one entry.
//! Output names depend only on the asset base name and the selection order,
//! so planning the same selection twice gives the same names.

use af_core::{has_extension, Track, TrackKind, CAPTION_EXTENSION, MEDIA_EXTENSION};
use serde::Serialize;

/// Extensions of multiplexed Smooth Streaming files.
const SMOOTH_EXTENSIONS: &[&str] = &[".ismv", ".isma"];

/// A selected track and the output it is packaged into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTrack {
    /// Position in the selection.
    pub index: usize,
    pub track: Track,
    /// `<base>_<index><ext>`.
    pub output: String,
}

/// One input and the tracks read from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputEntry {
    /// File name of the input in the working directory.
    pub identifier: String,
    pub tracks: Vec<PlannedTrack>,
}

impl InputEntry {
    /// Whether the input is rebuilt from fragment objects.
    pub fn is_multi_file(&self) -> bool {
        self.tracks.iter().any(|t| t.track.is_multi_file)
    }

    /// Whether the input is a multiplexed Smooth file.
    pub fn is_smooth(&self) -> bool {
        !self.is_multi_file()
            && SMOOTH_EXTENSIONS
                .iter()
                .any(|ext| has_extension(&self.identifier, ext))
    }

    /// Whether the input is a live-archive video track, whose start time
    /// every other track is aligned to.
    pub fn is_live_video(&self) -> bool {
        self.tracks
            .iter()
            .any(|t| t.track.is_multi_file && t.track.kind == TrackKind::Video)
    }

    /// Packager stream selector for `track` when read from this input.
    pub fn selector(&self, track: &Track) -> String {
        let same_kind = self
            .tracks
            .iter()
            .filter(|t| t.track.kind == track.kind)
            .count();
        stream_selector(track, same_kind > 1)
    }
}

/// Stream selector: the track kind, or the zero-based track index when
/// several tracks of that kind share the input.
pub fn stream_selector(track: &Track, shared: bool) -> String {
    if shared {
        track.track_id.saturating_sub(1).to_string()
    } else {
        track.kind.as_str().to_string()
    }
}

/// Selected tracks grouped by input, in selection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputPlan {
    pub base_name: String,
    pub entries: Vec<InputEntry>,
}

impl InputPlan {
    /// Output names in selection order.
    pub fn outputs(&self) -> Vec<String> {
        let mut planned: Vec<&PlannedTrack> =
            self.entries.iter().flat_map(|e| e.tracks.iter()).collect();
        planned.sort_by_key(|t| t.index);
        planned.into_iter().map(|t| t.output.clone()).collect()
    }

    /// DASH manifest name.
    pub fn dash_manifest(&self) -> String {
        format!("{}.mpd", self.base_name)
    }

    /// HLS master playlist name.
    pub fn hls_manifest(&self) -> String {
        format!("{}.m3u8", self.base_name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The input a track is read from.
///
/// Multi-file tracks are rebuilt into `<source>.mp4` (or `<source>.vtt` for
/// text). A single caption track reads its own `.vtt` object, or the
/// transcript source it declares. Anything else reads its source object.
pub fn input_identifier(track: &Track) -> String {
    if track.is_multi_file {
        let ext = if track.is_text() {
            CAPTION_EXTENSION
        } else {
            MEDIA_EXTENSION
        };
        return format!("{}{ext}", track.source);
    }
    if track.is_text() && !track.is_caption_file() {
        if let Some(transcript) = track.transcript_source() {
            return transcript.to_string();
        }
    }
    track.source.clone()
}

/// Output name of the `index`th selected track.
pub fn output_name(base_name: &str, index: usize, track: &Track) -> String {
    let ext = if track.is_text() {
        CAPTION_EXTENSION
    } else {
        MEDIA_EXTENSION
    };
    format!("{base_name}_{index}{ext}")
}

/// Group `selected` by input.
pub fn build_input_plan(base_name: &str, selected: &[Track]) -> InputPlan {
    let mut entries: Vec<InputEntry> = Vec::new();

    for (index, track) in selected.iter().enumerate() {
        let planned = PlannedTrack {
            index,
            track: track.clone(),
            output: output_name(base_name, index, track),
        };
        let identifier = input_identifier(track);
        match entries.iter_mut().find(|e| e.identifier == identifier) {
            Some(entry) => entry.tracks.push(planned),
            None => entries.push(InputEntry {
                identifier,
                tracks: vec![planned],
            }),
        }
    }

    InputPlan {
        base_name: base_name.to_string(),
        entries,
    }
}

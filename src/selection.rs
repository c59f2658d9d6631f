//! Choosing which tracks of an asset get packaged.

use af_core::{ClientManifest, Manifest, Track};

/// The ordered subset of `manifest`'s tracks to package.
///
/// Audio and video are always taken. Text tracks are taken only when they
/// can be packaged as captions:
///
/// - in a live archive, a single `.vtt` object, or a multi-file track whose
///   name matches a caption stream of the client manifest;
/// - otherwise, a single `.vtt` object or a track that declares a transcript
///   source.
///
/// A multi-file text track without a matching caption stream is left out;
/// there is no fragment index to rebuild it from.
pub fn select_tracks(manifest: &Manifest, client: Option<&ClientManifest>) -> Vec<Track> {
    manifest
        .tracks
        .iter()
        .filter(|track| is_selected(track, manifest.is_live_archive, client))
        .cloned()
        .collect()
}

fn is_selected(track: &Track, live_archive: bool, client: Option<&ClientManifest>) -> bool {
    if !track.is_text() {
        return true;
    }

    let selected = if live_archive {
        if track.is_multi_file {
            client.is_some_and(|c| c.has_caption_stream(&track.name))
        } else {
            track.is_caption_file()
        }
    } else {
        track.is_caption_file() || track.transcript_source().is_some()
    };

    if !selected {
        tracing::debug!(track = %track.name, source = %track.source, "Skipping text track");
    }
    selected
}

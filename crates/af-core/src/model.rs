//! Asset model: manifests, tracks and storage decryption material.
//!
//! These types are built once when an asset is loaded and never mutated
//! afterwards. Parsing lives in `af-media`; this module only describes the
//! shape of a loaded asset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Extension of caption (WebVTT) files.
pub const CAPTION_EXTENSION: &str = ".vtt";

/// Extension given to reconstructed and packaged media files.
pub const MEDIA_EXTENSION: &str = ".mp4";

/// Track parameter naming an alternate transcript source for a text track.
pub const TRANSCRIPT_SOURCE_PARAM: &str = "transcriptsrc";

/// Client manifest subtype of text streams carrying captions.
pub const CAPTION_SUBTYPE: &str = "SUBT";

/// Default Smooth Streaming time scale (100ns ticks).
pub const DEFAULT_TIME_SCALE: u64 = 10_000_000;

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

/// Kind of media carried by a track or client-manifest stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

impl TrackKind {
    /// Lowercase name, as used by the packager stream selector.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Text => "text",
        }
    }

    /// Parse a client manifest `Type` attribute (case-insensitive).
    pub fn from_stream_type(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Some(TrackKind::Video),
            "audio" => Some(TrackKind::Audio),
            "text" => Some(TrackKind::Text),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single track declared in the server manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub kind: TrackKind,
    /// Object name, or the fragment-name stem for multi-file tracks.
    pub source: String,
    pub track_id: u32,
    /// True when the track is spread across many fragment objects.
    pub is_multi_file: bool,
    /// Auxiliary name/value pairs in declaration order.
    pub parameters: Vec<(String, String)>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Track {
    /// Look up a parameter by name (case-insensitive).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The alternate transcript source declared for this track, if any.
    pub fn transcript_source(&self) -> Option<&str> {
        self.parameter(TRANSCRIPT_SOURCE_PARAM)
            .filter(|v| !v.is_empty())
    }

    /// Whether the track's source object is itself a caption file.
    pub fn is_caption_file(&self) -> bool {
        has_extension(&self.source, CAPTION_EXTENSION)
    }

    pub fn is_text(&self) -> bool {
        self.kind == TrackKind::Text
    }
}

/// Case-insensitive extension check; `ext` includes the leading dot.
pub fn has_extension(name: &str, ext: &str) -> bool {
    name.len() >= ext.len()
        && name.is_char_boundary(name.len() - ext.len())
        && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Asset-level description loaded from the server manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Object name of the server manifest (e.g. `lecture.ism`).
    pub file_name: String,
    pub is_live_archive: bool,
    pub tracks: Vec<Track>,
}

impl Manifest {
    /// Base name used for output files: the manifest file name without its
    /// directory or extension.
    pub fn base_name(&self) -> &str {
        let name = self
            .file_name
            .rsplit('/')
            .next()
            .unwrap_or(self.file_name.as_str());
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }
}

/// One chunk (fragment) entry of a client-manifest stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Start time in the stream's time scale.
    pub start: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// A logical stream in the client manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamIndex {
    pub kind: TrackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub name: String,
    pub time_scale: u64,
    pub chunks: Vec<Chunk>,
}

impl StreamIndex {
    /// Start time of the first chunk, if the stream has any.
    pub fn start_time(&self) -> Option<u64> {
        self.chunks.first().map(|c| c.start)
    }

    /// Whether this is a caption stream (text with the `SUBT` subtype).
    pub fn is_caption(&self) -> bool {
        self.kind == TrackKind::Text
            && self
                .subtype
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(CAPTION_SUBTYPE))
    }
}

/// Fragment index of a live-archive asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientManifest {
    pub time_scale: u64,
    pub streams: Vec<StreamIndex>,
}

impl ClientManifest {
    /// Find the stream for a track of the given kind and name.
    ///
    /// An exact name match wins. Video and audio fall back to the only
    /// stream of that kind when the names disagree; text never falls back,
    /// because a wrong caption stream is worse than none.
    pub fn stream(&self, kind: TrackKind, name: &str) -> Option<&StreamIndex> {
        let mut of_kind = self.streams.iter().filter(|s| s.kind == kind);
        if let Some(exact) = of_kind.clone().find(|s| s.name == name) {
            return Some(exact);
        }
        if kind == TrackKind::Text {
            return None;
        }
        match (of_kind.next(), of_kind.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Whether a caption stream with this name exists.
    pub fn has_caption_stream(&self, name: &str) -> bool {
        self.streams
            .iter()
            .any(|s| s.is_caption() && s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Storage-encryption material for an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionInfo {
    /// AES content key (16 or 32 bytes).
    pub key: Vec<u8>,
    /// Per-object initialization vectors, keyed by object name.
    pub ivs: HashMap<String, u64>,
}

impl DecryptionInfo {
    /// The initialization vector for an object.
    pub fn iv_for(&self, object: &str) -> Result<u64> {
        self.ivs.get(object).copied().ok_or_else(|| {
            Error::Decryption(format!("no initialization vector for {object}"))
        })
    }
}

/// Everything the packaging core needs to know about one asset.
#[derive(Debug, Clone)]
pub struct AssetDetails {
    /// Storage container holding the asset's objects.
    pub container: String,
    pub manifest: Manifest,
    pub client_manifest: Option<ClientManifest>,
    pub decryption: Option<DecryptionInfo>,
}

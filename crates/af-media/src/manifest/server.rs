use af_core::{Error, Manifest, Result, Track, TrackKind};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attributes, local_name};

/// `formats` meta value marking a live archive.
const LIVE_ARCHIVE_FORMAT: &str = "fmp4";

struct PendingTrack {
    kind: TrackKind,
    element: String,
    source: String,
    language: Option<String>,
    parameters: Vec<(String, String)>,
}

impl PendingTrack {
    fn finish(self, is_live_archive: bool) -> Track {
        let track_id = self
            .parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("trackID"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);
        let name = self
            .parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("trackName"))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.element.clone());
        let file_part = self.source.rsplit('/').next().unwrap_or(&self.source);
        let is_multi_file = is_live_archive && !file_part.contains('.');

        Track {
            kind: self.kind,
            source: self.source,
            track_id,
            is_multi_file,
            parameters: self.parameters,
            name,
            language: self.language,
        }
    }
}

fn track_kind(element: &str) -> Option<TrackKind> {
    match element {
        "video" => Some(TrackKind::Video),
        "audio" => Some(TrackKind::Audio),
        "textstream" => Some(TrackKind::Text),
        _ => None,
    }
}

/// Parse a SMIL server manifest.
///
/// `file_name` is the manifest's object name; its stem becomes the asset
/// base name.
pub fn parse_server_manifest(file_name: &str, xml: &str) -> Result<Manifest> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut is_live_archive = false;
    let mut saw_smil = false;
    let mut pending: Vec<PendingTrack> = Vec::new();
    let mut current: Option<PendingTrack> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Manifest(format!("{file_name}: {e}")))?;
        match event {
            Event::Start(ref e) => {
                if let Some(track) = start_element(e, &mut current, &mut is_live_archive, &mut saw_smil)? {
                    current = Some(track);
                }
            }
            Event::Empty(ref e) => {
                if let Some(track) = start_element(e, &mut current, &mut is_live_archive, &mut saw_smil)? {
                    pending.push(track);
                }
            }
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                if current.as_ref().is_some_and(|t| t.element == name) {
                    pending.extend(current.take());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_smil {
        return Err(Error::Manifest(format!("{file_name}: not a SMIL document")));
    }

    let tracks = pending
        .into_iter()
        .map(|t| t.finish(is_live_archive))
        .collect();

    Ok(Manifest {
        file_name: file_name.to_string(),
        is_live_archive,
        tracks,
    })
}

/// Handle an opening (or empty) element. Returns a new track when the
/// element declares one.
fn start_element(
    e: &BytesStart<'_>,
    current: &mut Option<PendingTrack>,
    is_live_archive: &mut bool,
    saw_smil: &mut bool,
) -> Result<Option<PendingTrack>> {
    let element = local_name(e);
    match element.as_str() {
        "smil" => *saw_smil = true,
        "meta" => {
            let attrs = attributes(e)?;
            if attrs.get("name").is_some_and(|n| n.eq_ignore_ascii_case("formats")) {
                *is_live_archive = attrs
                    .get("content")
                    .is_some_and(|c| c.eq_ignore_ascii_case(LIVE_ARCHIVE_FORMAT));
            }
        }
        "param" => {
            if let Some(track) = current.as_mut() {
                let attrs = attributes(e)?;
                if let Some(name) = attrs.get("name") {
                    let value = attrs.get("value").cloned().unwrap_or_default();
                    track.parameters.push((name.clone(), value));
                }
            }
        }
        other => {
            if let Some(kind) = track_kind(other) {
                let mut attrs = attributes(e)?;
                let source = attrs.remove("src").ok_or_else(|| {
                    Error::Manifest(format!("<{other}> element without src"))
                })?;
                return Ok(Some(PendingTrack {
                    kind,
                    element: other.to_string(),
                    source,
                    language: attrs.remove("systemlanguage"),
                    parameters: Vec::new(),
                }));
            }
        }
    }
    Ok(None)
}

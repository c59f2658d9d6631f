use af_core::{Chunk, ClientManifest, Error, Result, StreamIndex, TrackKind, DEFAULT_TIME_SCALE};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attributes, local_name};

/// Upper bound on a chunk's `r` attribute.
const MAX_REPEAT: u64 = 1_000_000;

fn parse_number(attr: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::Manifest(format!("invalid {attr} value {value:?}")))
}

/// Parse a Smooth Streaming client manifest.
///
/// Chunk start times are resolved: a `c` element without `t` starts where
/// the previous chunk ended, and `r` repeats a chunk that many times in
/// total.
pub fn parse_client_manifest(xml: &str) -> Result<ClientManifest> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root_time_scale: Option<u64> = None;
    let mut saw_root = false;
    let mut streams: Vec<(StreamIndex, bool)> = Vec::new();
    let mut current: Option<(StreamIndex, bool)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Manifest(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match local_name(e).as_str() {
                    "smoothstreamingmedia" => {
                        saw_root = true;
                        let attrs = attributes(e)?;
                        if let Some(ts) = attrs.get("timescale") {
                            root_time_scale = Some(parse_number("TimeScale", ts)?);
                        }
                    }
                    "streamindex" => {
                        let stream = stream_index(e)?;
                        if is_empty {
                            streams.push(stream);
                        } else {
                            current = Some(stream);
                        }
                    }
                    "c" => {
                        if let Some((stream, _)) = current.as_mut() {
                            push_chunks(stream, e)?;
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => {
                if e.local_name().as_ref().eq_ignore_ascii_case(b"StreamIndex") {
                    streams.extend(current.take());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::Manifest("missing SmoothStreamingMedia root".into()));
    }

    let time_scale = root_time_scale.unwrap_or(DEFAULT_TIME_SCALE);
    let streams = streams
        .into_iter()
        .map(|(mut stream, explicit_scale)| {
            if !explicit_scale {
                stream.time_scale = time_scale;
            }
            stream
        })
        .collect();

    Ok(ClientManifest {
        time_scale,
        streams,
    })
}

/// Build a stream from a `StreamIndex` element. The flag reports whether
/// the stream declared its own time scale.
fn stream_index(e: &BytesStart<'_>) -> Result<(StreamIndex, bool)> {
    let attrs = attributes(e)?;
    let type_attr = attrs
        .get("type")
        .ok_or_else(|| Error::Manifest("StreamIndex without Type".into()))?;
    let kind = TrackKind::from_stream_type(type_attr)
        .ok_or_else(|| Error::Manifest(format!("unknown StreamIndex Type {type_attr:?}")))?;
    let time_scale = attrs
        .get("timescale")
        .map(|ts| parse_number("TimeScale", ts))
        .transpose()?;

    Ok((
        StreamIndex {
            kind,
            subtype: attrs.get("subtype").filter(|s| !s.is_empty()).cloned(),
            name: attrs
                .get("name")
                .cloned()
                .unwrap_or_else(|| kind.as_str().to_string()),
            time_scale: time_scale.unwrap_or(DEFAULT_TIME_SCALE),
            chunks: Vec::new(),
        },
        time_scale.is_some(),
    ))
}

fn push_chunks(stream: &mut StreamIndex, e: &BytesStart<'_>) -> Result<()> {
    let attrs = attributes(e)?;
    let duration = attrs.get("d").map(|d| parse_number("d", d)).transpose()?;
    let repeat = attrs
        .get("r")
        .map(|r| parse_number("r", r))
        .transpose()?
        .unwrap_or(1);

    let start = match attrs.get("t") {
        Some(t) => parse_number("t", t)?,
        None => match stream.chunks.last() {
            None => 0,
            Some(Chunk {
                start,
                duration: Some(d),
            }) => start.checked_add(*d).ok_or_else(|| overflow(stream))?,
            Some(_) => {
                return Err(Error::Manifest(format!(
                    "chunk in stream {} has no start time and follows a chunk without duration",
                    stream.name
                )))
            }
        },
    };

    if repeat > MAX_REPEAT {
        return Err(Error::Manifest(format!(
            "chunk in stream {} repeats {repeat} times, more than {MAX_REPEAT}",
            stream.name
        )));
    }
    if repeat > 1 && duration.is_none() {
        return Err(Error::Manifest(format!(
            "repeated chunk in stream {} has no duration",
            stream.name
        )));
    }

    let mut t = start;
    for i in 0..repeat {
        if i > 0 {
            t = t
                .checked_add(duration.unwrap_or(0))
                .ok_or_else(|| overflow(stream))?;
        }
        stream.chunks.push(Chunk { start: t, duration });
    }
    Ok(())
}

fn overflow(stream: &StreamIndex) -> Error {
    Error::Manifest(format!("chunk times in stream {} overflow", stream.name))
}

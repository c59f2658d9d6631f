//! WebVTT cue timing.
//!
//! Captions recorded alongside a live archive are timed from zero while the
//! media keeps its absolute live timeline. [`shift_cues`] moves every cue by
//! a fixed offset; [`merge_fragments`] joins caption fragments into one
//! document.

use std::path::Path;
use std::sync::OnceLock;

use af_core::Result;
use regex::Regex;

const HEADER: &str = "WEBVTT";

fn timing_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<start>(?:\d+:)?\d{2}:\d{2}[.,]\d{3})\s+-->\s+(?P<end>(?:\d+:)?\d{2}:\d{2}[.,]\d{3})(?P<rest>.*)$",
        )
        .expect("valid cue timing regex")
    })
}

/// Parse a cue timestamp (`[hh:]mm:ss.ttt`) into milliseconds.
pub fn parse_timestamp(s: &str) -> Option<u64> {
    let (clock, millis) = s.split_once(['.', ','])?;
    let millis: u64 = millis.parse().ok()?;
    let parts: Vec<&str> = clock.split(':').collect();
    let (h, m, sec) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        [m, s] => (0, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        _ => return None,
    };
    if m >= 60 || sec >= 60 || millis >= 1000 {
        return None;
    }
    h.checked_mul(3600)?
        .checked_add(m * 60 + sec)?
        .checked_mul(1000)?
        .checked_add(millis)
}

/// Format milliseconds as a cue timestamp. Hours are written when asked for
/// or when the value needs them.
pub fn format_timestamp(ms: u64, with_hours: bool) -> String {
    let millis = ms % 1000;
    let total_secs = ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    if with_hours || hours > 0 {
        format!("{hours:02}:{mins:02}:{secs:02}.{millis:03}")
    } else {
        format!("{mins:02}:{secs:02}.{millis:03}")
    }
}

fn shift(ts: &str, offset_ms: i64) -> Option<String> {
    let ms = parse_timestamp(ts)?;
    let shifted = i64::try_from(ms).ok()?.saturating_add(offset_ms).max(0) as u64;
    let had_hours = ts.matches(':').count() == 2;
    Some(format_timestamp(shifted, had_hours))
}

/// Shift every cue in a WebVTT document by `offset_ms`. Results below zero
/// clamp to zero. Returns the new document and the number of cues shifted.
pub fn shift_cues(input: &str, offset_ms: i64) -> (String, usize) {
    let re = timing_line();
    let mut out = String::with_capacity(input.len() + 64);
    let mut cues = 0;

    for line in input.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        match re.captures(body) {
            Some(caps) => {
                let start = shift(&caps["start"], offset_ms);
                let end = shift(&caps["end"], offset_ms);
                match (start, end) {
                    (Some(start), Some(end)) => {
                        out.push_str(&start);
                        out.push_str(" --> ");
                        out.push_str(&end);
                        out.push_str(&caps["rest"]);
                        cues += 1;
                    }
                    _ => out.push_str(body),
                }
            }
            None => out.push_str(body),
        }
        out.push_str(ending);
    }

    (out, cues)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Drop the `WEBVTT` header block (everything up to the first blank line)
/// from a caption fragment. Fragments without a header are returned as is.
pub fn strip_header(fragment: &str) -> &str {
    let trimmed = fragment.trim_start_matches('\u{feff}');
    if !trimmed.starts_with(HEADER) {
        return fragment;
    }
    let normalized_break = trimmed
        .find("\n\n")
        .map(|i| i + 2)
        .or_else(|| trimmed.find("\r\n\r\n").map(|i| i + 4));
    match normalized_break {
        Some(i) => &trimmed[i..],
        None => "",
    }
}

/// Join caption fragments into one document. The first fragment keeps its
/// header; later fragments contribute only their cues.
pub fn merge_fragments<S: AsRef<str>>(fragments: &[S]) -> String {
    let mut out = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        let text = if i == 0 {
            fragment.as_ref()
        } else {
            strip_header(fragment.as_ref())
        };
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push_str(if out.ends_with('\n') { "\n" } else { "\n\n" });
        }
        out.push_str(text);
    }
    if out.is_empty() {
        out.push_str(HEADER);
        out.push_str("\n\n");
    }
    out
}

/// Shift a caption file on disk, writing the result to `output`.
pub async fn adjust_file(input: &Path, output: &Path, offset_ms: i64) -> Result<usize> {
    let text = tokio::fs::read_to_string(input).await?;
    let (shifted, cues) = shift_cues(&text, offset_ms);
    tokio::fs::write(output, shifted).await?;
    tracing::debug!(
        input = %input.display(),
        output = %output.display(),
        offset_ms,
        cues,
        "shifted caption cues"
    );
    Ok(cues)
}

//! Streaming rewrite of live-archive fragments.
//!
//! Live-archive fragments carry their timing in the Smooth Streaming `tfxd`
//! extension box instead of a `tfdt`. Packagers expect `tfdt`, so every
//! `moof/traf` is normalized: the decode time moves into a version 1 `tfdt`,
//! `tfxd` and `tfrf` are dropped, and `trun` data offsets are patched for the
//! change in `moof` size. Everything that is not a `moof` is streamed through
//! untouched, which keeps memory bounded by the largest `moof`.

use af_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::boxes::{
    children, full_box_header, fullbox_header, read_header, read_u32, read_u64, write_box,
    BoxType, RawBox, MAX_BUFFERED_BOX,
};

/// Extended type of the Smooth Streaming fragment-time box.
pub const TFXD_UUID: [u8; 16] = [
    0x6D, 0x1D, 0x9B, 0x05, 0x42, 0xD5, 0x44, 0xE6, 0x80, 0xE2, 0x14, 0x1D, 0xAF, 0xF7, 0x57, 0xB2,
];

/// Extended type of the Smooth Streaming fragment-reference box.
pub const TFRF_UUID: [u8; 16] = [
    0xD4, 0x80, 0x7E, 0xF2, 0xCA, 0x39, 0x46, 0x95, 0x8E, 0x54, 0x26, 0xCB, 0x9E, 0x46, 0xA7, 0x9F,
];

const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x02;
const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x08;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

const TRUN_DATA_OFFSET: u32 = 0x01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x04;
const TRUN_SAMPLE_DURATION: u32 = 0x100;

/// How decode times are mapped while rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeline {
    /// Keep decode times as found.
    Keep,
    /// Shift every decode time so that `from` lands on `to`. Results below
    /// zero clamp to zero.
    Rebase { from: u64, to: u64 },
}

impl Timeline {
    fn map(&self, t: u64) -> u64 {
        match *self {
            Timeline::Keep => t,
            Timeline::Rebase { from, to } => {
                let shifted = t as i128 - from as i128 + to as i128;
                shifted.clamp(0, u64::MAX as i128) as u64
            }
        }
    }
}

/// What the rewriter saw while walking the fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentStats {
    /// Number of track fragments rewritten.
    pub fragments: u64,
    /// Original decode time of the first fragment.
    pub first_decode_time: Option<u64>,
    /// Fragments that did not start where the previous one ended.
    pub discontinuities: u64,
    expected_next: Option<u64>,
}

impl FragmentStats {
    pub fn has_discontinuities(&self) -> bool {
        self.discontinuities > 0
    }

    fn observe(&mut self, decode_time: u64, duration: Option<u64>) {
        self.fragments += 1;
        self.first_decode_time.get_or_insert(decode_time);
        if let Some(expected) = self.expected_next {
            if expected != decode_time {
                tracing::debug!(expected, actual = decode_time, "fragment discontinuity");
                self.discontinuities += 1;
            }
        }
        self.expected_next = duration.map(|d| decode_time.saturating_add(d));
    }
}

/// Normalize live video fragments, keeping their decode times.
pub async fn fix_live_video<R, W>(reader: &mut R, writer: &mut W) -> Result<FragmentStats>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    rewrite_fragments(reader, writer, Timeline::Keep).await
}

/// Normalize live audio fragments and rebase them so that `audio_start`
/// lands on `origin` (the video start in audio ticks).
pub async fn rebase_live_audio<R, W>(
    reader: &mut R,
    writer: &mut W,
    audio_start: u64,
    origin: u64,
) -> Result<FragmentStats>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    rewrite_fragments(
        reader,
        writer,
        Timeline::Rebase {
            from: audio_start,
            to: origin,
        },
    )
    .await
}

/// Stream `reader` to `writer`, rewriting every `moof` on the way.
pub async fn rewrite_fragments<R, W>(
    reader: &mut R,
    writer: &mut W,
    timeline: Timeline,
) -> Result<FragmentStats>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut stats = FragmentStats::default();

    while let Some((header, raw)) = read_header(reader).await? {
        match (header.box_type, header.size) {
            (BoxType::MOOF, Some(size)) => {
                if size > MAX_BUFFERED_BOX {
                    return Err(Error::media(format!("moof of {size} bytes is too large")));
                }
                let mut payload = vec![0u8; (size - header.header_size as u64) as usize];
                reader.read_exact(&mut payload).await?;
                let moof = rewrite_moof(&payload, size, timeline, &mut stats)?;
                writer.write_all(&moof).await?;
            }
            (BoxType::MOOF, None) => {
                return Err(Error::media("moof without a size"));
            }
            (box_type, Some(size)) => {
                writer.write_all(&raw).await?;
                let remaining = size - header.header_size as u64;
                let mut body = (&mut *reader).take(remaining);
                let copied = tokio::io::copy(&mut body, &mut *writer).await?;
                if copied != remaining {
                    return Err(Error::media(format!(
                        "box {box_type} truncated: expected {remaining} bytes, got {copied}"
                    )));
                }
            }
            (_, None) => {
                writer.write_all(&raw).await?;
                tokio::io::copy(reader, &mut *writer).await?;
                break;
            }
        }
    }

    writer.flush().await?;
    Ok(stats)
}

/// Rewrite one `moof` payload. `original_size` is the size of the box as
/// read, header included.
pub fn rewrite_moof(
    payload: &[u8],
    original_size: u64,
    timeline: Timeline,
    stats: &mut FragmentStats,
) -> Result<Vec<u8>> {
    let mut content = Vec::with_capacity(payload.len() + 32);
    let mut patches = Vec::new();
    let mut traf_index = 0usize;

    for child in children(payload)? {
        if child.box_type == BoxType::TRAF {
            let traf = rewrite_traf(child.payload, traf_index == 0, timeline, stats)?;
            let base = 8 + content.len();
            patches.extend(traf.offset_fields.iter().map(|p| base + p));
            content.extend_from_slice(&traf.bytes);
            traf_index += 1;
        } else {
            content.extend_from_slice(child.bytes);
        }
    }

    let mut moof = write_box(BoxType::MOOF, &content);
    let delta = moof.len() as i64 - original_size as i64;
    if delta != 0 {
        for pos in patches {
            let old = read_u32(&moof, pos)? as i32;
            let new = i32::try_from(old as i64 + delta)
                .map_err(|_| Error::media(format!("trun data offset {old} overflows")))?;
            moof[pos..pos + 4].copy_from_slice(&new.to_be_bytes());
        }
    }
    Ok(moof)
}

struct RewrittenTraf {
    bytes: Vec<u8>,
    /// Positions of moof-relative `trun` data offsets within `bytes`.
    offset_fields: Vec<usize>,
}

struct Tfhd {
    moof_relative: bool,
    default_duration: Option<u32>,
}

fn rewrite_traf(
    payload: &[u8],
    first_in_moof: bool,
    timeline: Timeline,
    stats: &mut FragmentStats,
) -> Result<RewrittenTraf> {
    let mut tfhd_box: Option<RawBox<'_>> = None;
    let mut tfdt_time = None;
    let mut tfxd = None;
    let mut kept = Vec::new();

    for child in children(payload)? {
        match child.box_type {
            BoxType::TFHD => tfhd_box = Some(child),
            BoxType::TFDT => tfdt_time = Some(parse_tfdt(child.payload)?),
            BoxType::UUID => match child.user_type() {
                Some(TFXD_UUID) => tfxd = Some(parse_tfxd(&child.payload[16..])?),
                Some(TFRF_UUID) => {}
                _ => kept.push(child),
            },
            _ => kept.push(child),
        }
    }

    let tfhd_box = tfhd_box.ok_or_else(|| Error::media("traf without tfhd"))?;
    let tfhd = parse_tfhd(tfhd_box.payload, first_in_moof)?;

    let decode_time = tfdt_time
        .or(tfxd.map(|(t, _)| t))
        .ok_or_else(|| Error::media("fragment has neither tfdt nor tfxd timing"))?;

    let mut duration = Some(0u64);
    for trun in kept.iter().filter(|b| b.box_type == BoxType::TRUN) {
        duration = match (duration, trun_duration(trun.payload, tfhd.default_duration)?) {
            (Some(total), Some(d)) => Some(total + d),
            _ => None,
        };
    }
    let duration = duration.filter(|d| *d > 0).or(tfxd.map(|(_, d)| d));
    stats.observe(decode_time, duration);

    let mut content = Vec::with_capacity(payload.len() + 20);
    content.extend_from_slice(tfhd_box.bytes);
    content.extend_from_slice(&write_tfdt(timeline.map(decode_time)));

    let mut offset_fields = Vec::new();
    for child in kept {
        if child.box_type == BoxType::TRUN && tfhd.moof_relative {
            let (_, flags) = full_box_header(child.payload)?;
            if flags & TRUN_DATA_OFFSET != 0 {
                let header_len = child.bytes.len() - child.payload.len();
                offset_fields.push(8 + content.len() + header_len + 8);
            }
        }
        content.extend_from_slice(child.bytes);
    }

    Ok(RewrittenTraf {
        bytes: write_box(BoxType::TRAF, &content),
        offset_fields,
    })
}

fn parse_tfhd(payload: &[u8], first_in_moof: bool) -> Result<Tfhd> {
    let (_, flags) = full_box_header(payload)?;
    let mut pos = 8;
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        pos += 8;
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        pos += 4;
    }
    let default_duration = if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
        Some(read_u32(payload, pos)?)
    } else {
        None
    };
    let moof_relative = flags & TFHD_BASE_DATA_OFFSET == 0
        && (first_in_moof || flags & TFHD_DEFAULT_BASE_IS_MOOF != 0);
    Ok(Tfhd {
        moof_relative,
        default_duration,
    })
}

fn parse_tfdt(payload: &[u8]) -> Result<u64> {
    let (version, _) = full_box_header(payload)?;
    if version == 1 {
        read_u64(payload, 4)
    } else {
        Ok(read_u32(payload, 4)? as u64)
    }
}

/// Returns (absolute time, duration) from a `tfxd` payload (after the uuid).
fn parse_tfxd(payload: &[u8]) -> Result<(u64, u64)> {
    let (version, _) = full_box_header(payload)?;
    if version == 1 {
        Ok((read_u64(payload, 4)?, read_u64(payload, 12)?))
    } else {
        Ok((read_u32(payload, 4)? as u64, read_u32(payload, 8)? as u64))
    }
}

/// Total sample duration of one `trun`, if it can be determined.
fn trun_duration(payload: &[u8], default_duration: Option<u32>) -> Result<Option<u64>> {
    let (_, flags) = full_box_header(payload)?;
    let count = read_u32(payload, 4)? as u64;

    if flags & TRUN_SAMPLE_DURATION == 0 {
        return Ok(default_duration.map(|d| d as u64 * count));
    }

    let mut pos = 8;
    if flags & TRUN_DATA_OFFSET != 0 {
        pos += 4;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        pos += 4;
    }
    let record = 4 * (flags & 0xF00).count_ones() as usize;
    let mut total = 0u64;
    for i in 0..count as usize {
        total += read_u32(payload, pos + i * record)? as u64;
    }
    Ok(Some(total))
}

fn write_tfdt(decode_time: u64) -> Vec<u8> {
    let mut content = Vec::with_capacity(12);
    content.extend_from_slice(&fullbox_header(1, 0));
    content.extend_from_slice(&decode_time.to_be_bytes());
    write_box(BoxType::TFDT, &content)
}

//! ISO BMFF box primitives.
//!
//! Each box follows the standard layout: 4-byte size (big-endian u32),
//! 4-byte type (ASCII), an optional 8-byte extended size when the size field
//! is 1, then box-specific content. A size of 0 means "to the end of the
//! enclosing data".

use af_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum size of a box that is buffered in memory for rewriting.
pub const MAX_BUFFERED_BOX: u64 = 64 * 1024 * 1024;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MFRA: Self = Self(*b"mfra");
    pub const UUID: Self = Self(*b"uuid");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: BoxType,
    /// Total size including the header; `None` when the box extends to the
    /// end of the stream.
    pub size: Option<u64>,
    /// 8, or 16 with an extended size.
    pub header_size: u8,
}

impl BoxHeader {
    /// Payload size, when the total size is known.
    pub fn payload_size(&self) -> Option<u64> {
        self.size.map(|s| s - self.header_size as u64)
    }
}

/// A box borrowed from a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct RawBox<'a> {
    pub box_type: BoxType,
    /// The whole box, header included.
    pub bytes: &'a [u8],
    /// The payload after the header.
    pub payload: &'a [u8],
}

impl<'a> RawBox<'a> {
    /// The 16-byte extended type of a `uuid` box.
    pub fn user_type(&self) -> Option<[u8; 16]> {
        if self.box_type != BoxType::UUID || self.payload.len() < 16 {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&self.payload[..16]);
        Some(id)
    }
}

/// Split a byte slice into its sibling boxes.
pub fn children(data: &[u8]) -> Result<Vec<RawBox<'_>>> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let rest = &data[pos..];
        if rest.len() < 8 {
            return Err(Error::media(format!(
                "truncated box header at offset {pos} ({} bytes left)",
                rest.len()
            )));
        }
        let size32 = read_u32(rest, 0)? as u64;
        let box_type = BoxType([rest[4], rest[5], rest[6], rest[7]]);
        let (size, header_size) = match size32 {
            0 => (rest.len() as u64, 8usize),
            1 => (read_u64(rest, 8)?, 16usize),
            s => (s, 8usize),
        };
        if size < header_size as u64 || size > rest.len() as u64 {
            return Err(Error::media(format!(
                "box {box_type} at offset {pos} has invalid size {size}"
            )));
        }
        let size = size as usize;
        boxes.push(RawBox {
            box_type,
            bytes: &rest[..size],
            payload: &rest[header_size..size],
        });
        pos += size;
    }

    Ok(boxes)
}

/// Read the next box header from a stream, returning the header and its raw
/// bytes. Returns `None` on a clean end of stream.
pub async fn read_header<R>(reader: &mut R) -> Result<Option<(BoxHeader, Vec<u8>)>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = vec![0u8; 8];
    let mut filled = 0;
    while filled < 8 {
        let n = reader.read(&mut raw[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::media(format!("truncated box header ({filled} bytes)")));
        }
        filled += n;
    }

    let size32 = read_u32(&raw, 0)?;
    let box_type = BoxType([raw[4], raw[5], raw[6], raw[7]]);
    let header = match size32 {
        0 => BoxHeader {
            box_type,
            size: None,
            header_size: 8,
        },
        1 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            raw.extend_from_slice(&ext);
            BoxHeader {
                box_type,
                size: Some(u64::from_be_bytes(ext)),
                header_size: 16,
            }
        }
        s => BoxHeader {
            box_type,
            size: Some(s as u64),
            header_size: 8,
        },
    };

    if let Some(size) = header.size {
        if size < header.header_size as u64 {
            return Err(Error::media(format!("box {box_type} has invalid size {size}")));
        }
    }

    Ok(Some((header, raw)))
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

pub fn read_u32(data: &[u8], at: usize) -> Result<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| underflow(at + 4, data.len()))
}

pub fn read_u64(data: &[u8], at: usize) -> Result<u64> {
    data.get(at..at + 8)
        .map(|b| {
            let mut a = [0u8; 8];
            a.copy_from_slice(b);
            u64::from_be_bytes(a)
        })
        .ok_or_else(|| underflow(at + 8, data.len()))
}

/// Split a full box payload into (version, flags).
pub fn full_box_header(payload: &[u8]) -> Result<(u8, u32)> {
    let word = read_u32(payload, 0)?;
    Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
}

fn underflow(need: usize, have: usize) -> Error {
    Error::media(format!("buffer underflow: need {need} bytes, have {have}"))
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write a complete box: size (u32 BE) + type + content.
pub fn write_box(box_type: BoxType, content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&box_type.0);
    out.extend_from_slice(content);
    out
}

/// Full box version + flags word.
pub fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    (((version as u32) << 24) | (flags & 0x00FF_FFFF)).to_be_bytes()
}

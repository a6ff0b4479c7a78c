//! Frame encoding and decoding primitives for container files.

use std::convert::TryFrom;

use crate::error::{SweepError, SweepResult};

/// Maximum supported frame version.
pub const FRAME_VERSION: u16 = 1;

/// Magic constant identifying sweepstore container frames (`"SWPC"`).
pub const FRAME_MAGIC: u32 = 0x5357_5043;

/// First sequence number written to a container file.
///
/// `0` stays reserved so a zeroed header is never mistaken for a frame.
pub const INITIAL_FRAME_SEQ: u64 = 1;

/// Total number of header bytes emitted for each frame.
pub const FRAME_HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 4 + 4;

/// Discriminant describing what a frame's rows belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Rows of a multi-indexed sweep table.
    Table,
    /// Rows of a dictionary record table.
    Record,
}

impl FrameKind {
    /// Return the on-disk discriminant for the frame kind.
    pub const fn as_u16(self) -> u16 {
        match self {
            FrameKind::Table => 1,
            FrameKind::Record => 2,
        }
    }

    /// Human-readable name used in errors and logs.
    pub const fn name(self) -> &'static str {
        match self {
            FrameKind::Table => "sweep table",
            FrameKind::Record => "dictionary",
        }
    }
}

impl From<FrameKind> for u16 {
    fn from(value: FrameKind) -> Self {
        value.as_u16()
    }
}

impl TryFrom<u16> for FrameKind {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::Table),
            2 => Ok(FrameKind::Record),
            _ => Err(()),
        }
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameFault {
    /// Fewer bytes than a header.
    HeaderTruncated,
    /// Header is intact but the payload is cut short.
    PayloadTruncated,
    /// Payload bytes do not hash to the stored checksum.
    ChecksumMismatch {
        /// Length of the whole frame, header included.
        frame_len: usize,
    },
    /// Magic, version, kind or sequence is invalid.
    BadHeader(&'static str),
}

impl FrameFault {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            FrameFault::HeaderTruncated => "frame header truncated",
            FrameFault::PayloadTruncated => "frame payload truncated",
            FrameFault::ChecksumMismatch { .. } => "frame payload crc32 mismatch",
            FrameFault::BadHeader(reason) => reason,
        }
    }
}

/// Header prepended to every frame on disk.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Magic constant.
    pub magic: u32,
    /// Version number of the frame format.
    pub version: u16,
    /// Frame discriminant.
    pub kind: FrameKind,
    /// Strictly increasing sequence within one file, starting at [`INITIAL_FRAME_SEQ`].
    pub seq: u64,
    /// Payload length in bytes.
    pub len: u32,
    /// CRC32 checksum covering only the payload bytes.
    pub crc32: u32,
}

impl FrameHeader {
    /// Serialize the header into the provided buffer.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&u16::from(self.kind).to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
    }

    /// Parse a header and verify its payload, returning the payload and the remaining bytes.
    pub(crate) fn decode_from(bytes: &[u8]) -> Result<(Self, &[u8], &[u8]), FrameFault> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(FrameFault::HeaderTruncated);
        }

        let (header_bytes, rest) = bytes.split_at(FRAME_HEADER_SIZE);
        let magic = u32::from_le_bytes(le_array(&header_bytes[0..4]));
        if magic != FRAME_MAGIC {
            return Err(FrameFault::BadHeader("frame magic mismatch"));
        }

        let version = u16::from_le_bytes(le_array(&header_bytes[4..6]));
        if version != FRAME_VERSION {
            return Err(FrameFault::BadHeader("unsupported frame version"));
        }

        let kind = FrameKind::try_from(u16::from_le_bytes(le_array(&header_bytes[6..8])))
            .map_err(|_| FrameFault::BadHeader("unknown frame kind"))?;

        let seq = u64::from_le_bytes(le_array(&header_bytes[8..16]));
        if seq == 0 {
            return Err(FrameFault::BadHeader("frame sequence zero is reserved"));
        }

        let len = u32::from_le_bytes(le_array(&header_bytes[16..20]));
        let crc32_expected = u32::from_le_bytes(le_array(&header_bytes[20..24]));

        let payload_len = len as usize;
        if rest.len() < payload_len {
            return Err(FrameFault::PayloadTruncated);
        }

        let (payload, remaining) = rest.split_at(payload_len);
        if crc32fast::hash(payload) != crc32_expected {
            return Err(FrameFault::ChecksumMismatch {
                frame_len: FRAME_HEADER_SIZE + payload_len,
            });
        }

        let header = FrameHeader {
            magic,
            version,
            kind,
            seq,
            len,
            crc32: crc32_expected,
        };
        Ok((header, payload, remaining))
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Encode one complete frame (header followed by payload).
pub fn encode_frame(kind: FrameKind, seq: u64, payload: &[u8]) -> SweepResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        SweepError::Shape(format!(
            "frame payload of {} bytes exceeds the 4 GiB frame limit",
            payload.len()
        ))
    })?;
    let header = FrameHeader {
        magic: FRAME_MAGIC,
        version: FRAME_VERSION,
        kind,
        seq,
        len,
        crc32: crc32fast::hash(payload),
    };
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    header.encode_into(&mut buf);
    buf.extend_from_slice(payload);
    Ok(buf)
}

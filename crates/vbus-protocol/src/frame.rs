//! VBUS frame structure: header, septet reintegration, payload assembly

use crate::types::ProtocolError;

/// Fixed header size: dest(2) + src(2) + version(1) + cmd(2) + frame count(1) + crc(1)
pub const HEADER_LEN: usize = 9;

/// Each sub-frame carries 4 data bytes + 1 septet byte + 1 checksum byte
pub const SUBFRAME_LEN: usize = 6;

/// Protocol version marker from header byte 4
///
/// Only version 1 messages carry the sub-frame payload decoded by this
/// crate; versions 2 and 3 use a different body layout and are recognized
/// but not decoded further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Pv1,
    Pv2,
    Pv3,
    Unknown(u8),
}

impl ProtocolVersion {
    #[must_use]
    pub fn from_marker(marker: u8) -> Self {
        match marker {
            0x10 => ProtocolVersion::Pv1,
            0x20 => ProtocolVersion::Pv2,
            0x30 => ProtocolVersion::Pv3,
            other => ProtocolVersion::Unknown(other),
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVersion::Pv1 => write!(f, "PV1"),
            ProtocolVersion::Pv2 => write!(f, "PV2"),
            ProtocolVersion::Pv3 => write!(f, "PV3"),
            ProtocolVersion::Unknown(marker) => write!(f, "UNKNOWN({marker:#04x})"),
        }
    }
}

/// Decoded VBUS message header
///
/// Header format (offsets into the frame, after the sync byte):
/// ```text
/// [Destination: 2 bytes LE]
/// [Source: 2 bytes LE]
/// [Protocol version marker: 1 byte]
/// [Command: 2 bytes LE]
/// [Frame count: 1 byte, signed]
/// [Checksum: 1 byte]
/// ```
#[derive(Debug, Clone)]
pub struct Header {
    pub destination: u16,
    pub source: u16,
    pub version: ProtocolVersion,
    pub command: u16,
    pub frame_count: i64,
    pub checksum: u8,
}

impl Header {
    /// Decode a header from a raw frame
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::FrameTooShort(frame.len()));
        }

        Ok(Self {
            destination: u16::from_le_bytes([frame[0], frame[1]]),
            source: u16::from_le_bytes([frame[2], frame[3]]),
            version: ProtocolVersion::from_marker(frame[4]),
            command: u16::from_le_bytes([frame[5], frame[6]]),
            frame_count: read_signed(&frame[7..8]),
            checksum: frame[8],
        })
    }

    /// Destination address as 4 hex digits, high byte first
    #[must_use]
    pub fn destination_hex(&self) -> String {
        format!("{:04x}", self.destination)
    }

    /// Source address as 4 hex digits, high byte first
    #[must_use]
    pub fn source_hex(&self) -> String {
        format!("{:04x}", self.source)
    }

    /// Command as 4 hex digits, high byte first
    #[must_use]
    pub fn command_hex(&self) -> String {
        format!("{:04x}", self.command)
    }
}

/// Decode a little-endian signed integer from a byte segment
///
/// The bus does not use two's complement. With `s` the unsigned value and
/// `wbg = 2^(8*len) - 1`, values at or above `wbg / 2` wrap to `-(wbg - s)`.
/// The asymmetry at the top of the range is deliberate: for one byte, 0x80
/// decodes to -127 and 0xFF decodes to 0, not -1. Historical captures were
/// recorded with this rule, so it must not be "corrected".
///
/// Supports segments up to 8 bytes; an empty segment decodes to 0.
#[must_use]
pub fn read_signed(segment: &[u8]) -> i64 {
    debug_assert!(segment.len() <= 8);

    let mut s: i128 = 0;
    let mut wbg: i128 = 0;
    for (i, &byte) in segment.iter().enumerate() {
        s += i128::from(byte) << (8 * i);
        wbg += 0xff_i128 << (8 * i);
    }

    // wbg is odd, so 2*s >= wbg is the integer form of s >= wbg / 2
    if 2 * s >= wbg {
        (s - wbg) as i64
    } else {
        s as i64
    }
}

/// Reintegrate the high bits of one sub-frame
///
/// The transport is 7-bit clean, so each group of 4 data bytes travels with
/// a septet byte whose bit `j` records the high bit of data byte `j`. The
/// trailing checksum byte of the sub-frame is not consumed here.
#[must_use]
pub fn integrate_septet(subframe: &[u8]) -> [u8; 4] {
    debug_assert!(subframe.len() >= 5);

    let septet = subframe[4];
    let mut out = [0u8; 4];
    for (j, slot) in out.iter_mut().enumerate() {
        *slot = if septet & (1 << j) != 0 {
            subframe[j] | 0x80
        } else {
            subframe[j]
        };
    }
    out
}

/// Assemble the payload of a version 1 message
///
/// Concatenates the reintegrated data bytes of `frame_count` sub-frames
/// following the header, yielding `4 * frame_count` payload bytes. A
/// non-positive frame count yields an empty payload; a frame without enough
/// bytes for its declared count fails without partial output.
pub fn assemble_payload(frame: &[u8], frame_count: i64) -> Result<Vec<u8>, ProtocolError> {
    let count = usize::try_from(frame_count).unwrap_or(0);

    let mut payload = Vec::with_capacity(count * 4);
    for i in 0..count {
        let start = HEADER_LEN + i * SUBFRAME_LEN;
        let subframe = frame
            .get(start..start + SUBFRAME_LEN)
            .ok_or(ProtocolError::FrameTooShort(frame.len()))?;
        payload.extend_from_slice(&integrate_septet(subframe));
    }
    Ok(payload)
}

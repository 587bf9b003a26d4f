//! The layout record that travels with a dma-buf handle.
//!
//! The wire form is `{ i32 fourcc; i32 offset; i32 stride; }` in native byte
//! order. Producer and consumer run on the same machine, so no endianness
//! negotiation is done.

use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

use crate::bytes::AsBytes;

/// DRM pixel format code (`fourcc_code(a, b, c, d)` in `drm_fourcc.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    /// `DRM_FORMAT_ABGR8888`: `[R, G, B, A]` bytes in memory.
    pub const ABGR8888: FourCc = FourCc::from_chars(*b"AB24");
    /// `DRM_FORMAT_XBGR8888`: like `ABGR8888` with the alpha byte ignored.
    pub const XBGR8888: FourCc = FourCc::from_chars(*b"XB24");
    /// `DRM_FORMAT_ARGB8888`: `[B, G, R, A]` bytes in memory.
    pub const ARGB8888: FourCc = FourCc::from_chars(*b"AR24");
    /// `DRM_FORMAT_XRGB8888`.
    pub const XRGB8888: FourCc = FourCc::from_chars(*b"XR24");

    pub const fn from_chars(c: [u8; 4]) -> Self {
        FourCc(c[0] as u32 | (c[1] as u32) << 8 | (c[2] as u32) << 16 | (c[3] as u32) << 24)
    }

    pub const fn to_chars(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Bytes per pixel for the single-plane 32-bit formats this crate knows.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            FourCc::ABGR8888 | FourCc::XBGR8888 | FourCc::ARGB8888 | FourCc::XRGB8888 => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.to_chars() {
            let c = if c.is_ascii_graphic() || c == b' ' { c as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Pixel dimensions of the shared buffer.
///
/// Known to both sides out-of-band; it is not part of the handshake payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Why a metadata record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMetadata {
    #[error("payload is {0} bytes, expected {expected}", expected = BufferMetadata::WIRE_SIZE)]
    Size(usize),
    #[error("pixel format code is zero")]
    ZeroFourCc,
    #[error("byte offset {0} is out of range")]
    Offset(i64),
    #[error("row stride {0} is not positive")]
    Stride(i64),
}

/// Pixel format and memory geometry of plane 0 of a shared buffer.
///
/// All three fields are set by one constructor call, so a partially filled
/// record cannot be built or sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMetadata {
    fourcc: FourCc,
    offset: u32,
    stride: NonZeroU32,
}

/// C layout of the handshake payload.
#[repr(C)]
struct WireMetadata {
    fourcc: i32,
    offset: i32,
    stride: i32,
}

// SAFETY: three `i32`s, `#[repr(C)]`, no padding.
unsafe impl AsBytes for WireMetadata {}

impl BufferMetadata {
    /// Size of the encoded record in bytes.
    pub const WIRE_SIZE: usize = std::mem::size_of::<WireMetadata>();

    /// Build a record from the three values an export produces.
    ///
    /// Every field must also fit the `i32` wire representation.
    pub fn new(fourcc: FourCc, offset: u32, stride: u32) -> Result<Self, InvalidMetadata> {
        if fourcc.0 == 0 {
            return Err(InvalidMetadata::ZeroFourCc);
        }
        if offset > i32::MAX as u32 {
            return Err(InvalidMetadata::Offset(offset as i64));
        }
        let stride = NonZeroU32::new(stride)
            .filter(|s| s.get() <= i32::MAX as u32)
            .ok_or(InvalidMetadata::Stride(stride as i64))?;
        Ok(Self {
            fourcc,
            offset,
            stride,
        })
    }

    pub fn fourcc(&self) -> FourCc {
        self.fourcc
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn stride(&self) -> u32 {
        self.stride.get()
    }

    /// Smallest allocation, in bytes, that can hold `extent` pixels of
    /// `bytes_per_pixel` with this layout.
    pub fn required_len(&self, extent: Extent, bytes_per_pixel: u32) -> u64 {
        if extent.height == 0 {
            return self.offset as u64;
        }
        self.offset as u64
            + self.stride() as u64 * (extent.height as u64 - 1)
            + extent.width as u64 * bytes_per_pixel as u64
    }

    /// Encode the record as the fixed 12-byte payload.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let wire = WireMetadata {
            fourcc: self.fourcc.0 as i32,
            offset: self.offset as i32,
            stride: self.stride.get() as i32,
        };
        let mut out = [0u8; Self::WIRE_SIZE];
        out.copy_from_slice(wire.as_bytes());
        out
    }

    /// Decode a received payload. Anything but exactly [`Self::WIRE_SIZE`]
    /// bytes describing a valid record is rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, InvalidMetadata> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(InvalidMetadata::Size(bytes.len()));
        }
        let field = |i: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            i32::from_ne_bytes(b)
        };
        let (fourcc, offset, stride) = (field(0), field(1), field(2));
        if offset < 0 {
            return Err(InvalidMetadata::Offset(offset as i64));
        }
        if stride <= 0 {
            return Err(InvalidMetadata::Stride(stride as i64));
        }
        Self::new(FourCc(fourcc as u32), offset as u32, stride as u32)
    }
}

impl fmt::Display for BufferMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format {} ({:#010x}), offset {}, stride {}",
            self.fourcc,
            self.fourcc.0,
            self.offset,
            self.stride
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_matches_drm_codes() {
        // Values from drm_fourcc.h.
        assert_eq!(FourCc::ABGR8888.0, 0x3432_4241);
        assert_eq!(FourCc::XRGB8888.0, 0x3432_5258);
        assert_eq!(FourCc::ABGR8888.to_string(), "AB24");
    }

    #[test]
    fn wire_layout_is_three_native_i32() {
        let md = BufferMetadata::new(FourCc::ABGR8888, 16, 256).unwrap();
        let bytes = md.encode();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &(FourCc::ABGR8888.0 as i32).to_ne_bytes());
        assert_eq!(&bytes[4..8], &16i32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &256i32.to_ne_bytes());
        assert_eq!(BufferMetadata::decode(&bytes).unwrap(), md);
    }

    #[test]
    fn decode_rejects_wrong_size() {
        let md = BufferMetadata::new(FourCc::XRGB8888, 0, 64).unwrap();
        let bytes = md.encode();
        assert_eq!(
            BufferMetadata::decode(&bytes[..8]),
            Err(InvalidMetadata::Size(8))
        );
        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(BufferMetadata::decode(&long), Err(InvalidMetadata::Size(13)));
    }

    #[test]
    fn decode_rejects_invalid_fields() {
        let mut raw = [0u8; 12];
        raw[8..12].copy_from_slice(&64i32.to_ne_bytes());
        assert_eq!(BufferMetadata::decode(&raw), Err(InvalidMetadata::ZeroFourCc));

        raw[0..4].copy_from_slice(&(FourCc::ABGR8888.0 as i32).to_ne_bytes());
        raw[4..8].copy_from_slice(&(-4i32).to_ne_bytes());
        assert_eq!(BufferMetadata::decode(&raw), Err(InvalidMetadata::Offset(-4)));

        raw[4..8].copy_from_slice(&0i32.to_ne_bytes());
        raw[8..12].copy_from_slice(&0i32.to_ne_bytes());
        assert_eq!(BufferMetadata::decode(&raw), Err(InvalidMetadata::Stride(0)));
    }

    #[test]
    fn constructor_rejects_values_outside_wire_range() {
        assert!(BufferMetadata::new(FourCc::ABGR8888, u32::MAX, 8).is_err());
        assert!(BufferMetadata::new(FourCc::ABGR8888, 0, u32::MAX).is_err());
        assert!(BufferMetadata::new(FourCc::ABGR8888, 0, 0).is_err());
    }

    #[test]
    fn required_len_covers_last_row() {
        let md = BufferMetadata::new(FourCc::ABGR8888, 32, 64).unwrap();
        assert_eq!(md.required_len(Extent::new(2, 2), 4), 32 + 64 + 8);
    }
}

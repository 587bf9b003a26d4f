//! The 2x2 color buffer shared between producer and consumer.

use std::fmt;

use crate::bytes::AsBytes;
use crate::metadata::Extent;

/// Four packed RGBA8 pixels, row-major: `[top-left, top-right, bottom-left,
/// bottom-right]`. Each `u32` is little-endian `0xAABBGGRR`, so its memory
/// bytes are `[R, G, B, A]`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelQuad(pub [u32; 4]);

// SAFETY: `#[repr(transparent)]` over `[u32; 4]`.
unsafe impl AsBytes for PixelQuad {}

impl PixelQuad {
    pub const EXTENT: Extent = Extent::new(2, 2);

    /// Red, green, blue, white.
    pub const INITIAL: PixelQuad = PixelQuad([0x0000_00FF, 0x0000_FF00, 0x00FF_0000, 0x00FF_FFFF]);

    /// One step of the corner rotation: `new = [old1, old3, old0, old2]`.
    ///
    /// Applying it four times gives back the starting value.
    #[must_use]
    pub fn rotate(self) -> Self {
        let [a, b, c, d] = self.0;
        PixelQuad([b, d, a, c])
    }

    /// One row of pixel bytes. Panics unless `row` is 0 or 1.
    pub fn row_bytes(&self, row: usize) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.as_bytes()[row * 8..row * 8 + 8]);
        out
    }

    /// Rebuild a quad from two rows of RGBA bytes.
    pub fn from_rows(top: [u8; 8], bottom: [u8; 8]) -> Self {
        let px = |row: &[u8; 8], i: usize| {
            u32::from_ne_bytes([row[i * 4], row[i * 4 + 1], row[i * 4 + 2], row[i * 4 + 3]])
        };
        PixelQuad([px(&top, 0), px(&top, 1), px(&bottom, 0), px(&bottom, 1)])
    }
}

impl Default for PixelQuad {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for PixelQuad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "[{a:08x} {b:08x} / {c:08x} {d:08x}]")
    }
}

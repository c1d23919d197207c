//! Frame types and the pixel-packing rule shared by every capture path.
//!
//! Native surfaces hand us 4-byte pixels in rows that may be padded to a
//! GPU-friendly pitch. Remote servers want tightly packed R,G,B triplets.
//! [`pack_rgb`] is the single place where that conversion happens.

use bytes::Bytes;

use crate::capture::CaptureDimensions;
use crate::error::GrabError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Memory layout of a native 32-bit `0xAARRGGBB` pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Little-endian order: Blue, Green, Red, Alpha (DXGI and GDI).
    Bgra8,
    /// Big-endian order: Alpha, Red, Green, Blue.
    Argb8,
}

impl PixelFormat {
    /// Bytes consumed by a single source pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Layout of a `0xAARRGGBB` word stored in this machine's byte order.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            PixelFormat::Bgra8
        } else {
            PixelFormat::Argb8
        }
    }

    /// Byte offsets of red, green and blue within one source pixel.
    const fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelFormat::Bgra8 => [2, 1, 0],
            PixelFormat::Argb8 => [1, 2, 3],
        }
    }
}

// ── SurfaceLayout ────────────────────────────────────────────────

/// Geometry of a mapped native surface.
///
/// `stride` may exceed `width * 4`: DXGI pads staging rows to the
/// driver's preferred pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub width: u32,
    pub height: u32,
    /// Row pitch in **bytes**.
    pub stride: usize,
    pub format: PixelFormat,
}

impl SurfaceLayout {
    /// Smallest source slice that covers every visible pixel. The last
    /// row does not need its padding.
    pub fn min_source_len(&self) -> usize {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        let row = self.width as usize * self.format.bytes_per_pixel();
        self.stride * (self.height as usize - 1) + row
    }
}

/// Pack a padded 4-byte-per-pixel surface into `width * height * 3`
/// bytes of R,G,B, dropping alpha.
pub fn pack_rgb(src: &[u8], layout: SurfaceLayout) -> Result<Vec<u8>, GrabError> {
    let bpp = layout.format.bytes_per_pixel();
    let row_bytes = layout.width as usize * bpp;
    if layout.stride < row_bytes {
        return Err(GrabError::UnexpectedCapture(format!(
            "row pitch {} smaller than row of {} pixels",
            layout.stride, layout.width
        )));
    }
    let needed = layout.min_source_len();
    if src.len() < needed {
        return Err(GrabError::UnexpectedCapture(format!(
            "surface too short: {} < {needed} bytes",
            src.len()
        )));
    }

    let [r, g, b] = layout.format.rgb_offsets();
    let mut out = Vec::with_capacity(layout.width as usize * layout.height as usize * 3);
    if needed == 0 {
        return Ok(out);
    }
    for row in src.chunks(layout.stride).take(layout.height as usize) {
        for px in row[..row_bytes].chunks_exact(bpp) {
            out.extend_from_slice(&[px[r], px[g], px[b]]);
        }
    }
    Ok(out)
}

// ── Frame ────────────────────────────────────────────────────────

/// A packed R,G,B frame ready to be streamed.
///
/// Cloning is cheap: the pixel buffer is reference counted, so the engine
/// can keep the last frame while every client receives its own handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Bytes,
}

impl Frame {
    /// Wrap an already packed buffer. Fails if its length is not
    /// `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: impl Into<Bytes>) -> Result<Self, GrabError> {
        let data = data.into();
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(GrabError::UnexpectedCapture(format!(
                "frame buffer is {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An all-black frame, used to claim a priority on the server before
    /// the first real capture arrives.
    pub fn black(dims: CaptureDimensions) -> Self {
        Self {
            width: dims.width,
            height: dims.height,
            data: Bytes::from(vec![0u8; dims.byte_len()]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> CaptureDimensions {
        CaptureDimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Packed R,G,B bytes, row-major.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Total byte size of the packed buffer.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Returns the `[r, g, b]` triplet at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    /// Whether every byte is zero.
    pub fn is_black(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

// ── Tests ────────────────────────────────────────────────────────

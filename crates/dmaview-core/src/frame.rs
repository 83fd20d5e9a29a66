//! Frame descriptors for hardware-decoded video frames.
//!
//! A frame never carries pixel data itself: each plane refers to a DMA-BUF
//! handle plus the offset and row stride inside that buffer.

use crate::error::{DmaViewError, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::time::Duration;

/// A DRM fourcc code (little-endian packed ASCII, as in `drm_fourcc.h`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fourcc(pub u32);

impl Fourcc {
    /// `DRM_FORMAT_NV12`: 2-plane YUV 4:2:0, Y then interleaved CbCr.
    pub const NV12: Self = Self::from_bytes(*b"NV12");
    /// `DRM_FORMAT_R8`: single 8-bit channel.
    pub const R8: Self = Self::from_bytes(*b"R8  ");
    /// `DRM_FORMAT_GR88`: two 8-bit channels, R in the low byte.
    pub const GR88: Self = Self::from_bytes(*b"GR88");

    pub const fn from_bytes(code: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(code))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self} / {:#010x})", self.0)
    }
}

/// Pixel layout of a whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// Luma at full resolution, interleaved CbCr at half resolution.
    Nv12,
    /// Full-resolution single luma plane.
    Gray8,
    /// Anything the decoder reported that we cannot convert.
    Unknown(Fourcc),
}

impl PixelLayout {
    pub fn from_fourcc(code: Fourcc) -> Self {
        match code {
            Fourcc::NV12 => Self::Nv12,
            Fourcc::R8 => Self::Gray8,
            other => Self::Unknown(other),
        }
    }

    pub fn fourcc(self) -> Fourcc {
        match self {
            Self::Nv12 => Fourcc::NV12,
            Self::Gray8 => Fourcc::R8,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Number of planes the layout requires.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::Gray8 => 1,
            Self::Unknown(_) => 0,
        }
    }

    /// Per-plane DRM format used when importing plane `index`.
    pub fn plane_format(self, index: usize) -> Option<Fourcc> {
        match (self, index) {
            (Self::Nv12 | Self::Gray8, 0) => Some(Fourcc::R8),
            (Self::Nv12, 1) => Some(Fourcc::GR88),
            _ => None,
        }
    }

    /// Dimensions of plane `index` for a frame of `width` x `height`.
    ///
    /// Chroma is rounded up so odd-sized frames keep their last column/row.
    pub fn plane_size(self, index: usize, width: u32, height: u32) -> Option<(u32, u32)> {
        match (self, index) {
            (Self::Nv12 | Self::Gray8, 0) => Some((width, height)),
            (Self::Nv12, 1) => Some((width.div_ceil(2), height.div_ceil(2))),
            _ => None,
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nv12 => f.write_str("NV12"),
            Self::Gray8 => f.write_str("GRAY8"),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// Bytes per pixel for a supported plane format.
pub fn plane_bytes_per_pixel(format: Fourcc) -> Option<u32> {
    match format {
        Fourcc::R8 => Some(1),
        Fourcc::GR88 => Some(2),
        _ => None,
    }
}

/// A DMA-BUF file descriptor as handed out by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferHandle(pub i32);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// One plane's location inside a hardware buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDescriptor {
    pub handle: BufferHandle,
    /// Byte offset of the plane's first row.
    pub offset: u32,
    /// Bytes per row, including padding.
    pub stride: u32,
}

/// Geometry, layout and plane locations of one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub planes: SmallVec<[PlaneDescriptor; 3]>,
    /// Presentation timestamp reported by the decoder.
    pub pts: Duration,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
}

impl FrameDescriptor {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
            planes: SmallVec::new(),
            pts: Duration::ZERO,
            sequence: 0,
        }
    }

    pub fn with_plane(mut self, handle: BufferHandle, offset: u32, stride: u32) -> Self {
        self.planes.push(PlaneDescriptor {
            handle,
            offset,
            stride,
        });
        self
    }

    pub fn with_timing(mut self, pts: Duration, sequence: u64) -> Self {
        self.pts = pts;
        self.sequence = sequence;
        self
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check that the layout is convertible and every required plane is present.
    pub fn validate(&self) -> Result<()> {
        if !self.layout.is_supported() {
            return Err(DmaViewError::UnsupportedFormat(format!(
                "frame layout {}",
                self.layout
            )));
        }
        let needed = self.layout.plane_count();
        if self.planes.len() < needed {
            return Err(DmaViewError::MissingPlane {
                layout: self.layout,
                needed,
                got: self.planes.len(),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(DmaViewError::Import(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Keeps a frame's hardware buffers alive. Dropping it gives them back to the
/// decoder.
pub struct BufferLease(Option<Box<dyn Send>>);

impl BufferLease {
    pub fn new<T: Send + 'static>(owner: T) -> Self {
        Self(Some(Box::new(owner)))
    }

    /// A lease that owns nothing (buffers managed elsewhere).
    pub fn none() -> Self {
        Self(None)
    }
}

impl fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BufferLease")
            .field(&self.0.as_ref().map(|_| ".."))
            .finish()
    }
}

/// A decoded frame: its descriptor plus ownership of the buffers it names.
#[derive(Debug)]
pub struct DecodedFrame {
    pub descriptor: FrameDescriptor,
    lease: BufferLease,
}

impl DecodedFrame {
    pub fn new(descriptor: FrameDescriptor, lease: BufferLease) -> Self {
        Self { descriptor, lease }
    }

    #[inline]
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    /// Split into descriptor and lease. The buffers stay valid while the lease
    /// is alive.
    pub fn into_parts(self) -> (FrameDescriptor, BufferLease) {
        (self.descriptor, self.lease)
    }
}

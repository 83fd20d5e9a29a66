//! dmaview core - foundation types for zero-copy video presentation
//!
//! This crate provides the types shared by the producer and the renderer:
//! - Frame descriptors, pixel layouts and DRM fourcc tags
//! - The in-process DMA-BUF pool used when no hardware decoder is present
//! - YUV → RGB coefficients
//! - The error type

pub mod color;
pub mod dmabuf;
pub mod error;
pub mod frame;

pub use color::{Color, YuvCoefficients, YuvMatrix};
pub use dmabuf::{DmaBuf, DmaBufPool};
pub use error::{DmaViewError, Result};
pub use frame::{
    plane_bytes_per_pixel, BufferHandle, BufferLease, DecodedFrame, Fourcc, FrameDescriptor,
    PixelLayout, PlaneDescriptor,
};

/// Timing defaults.
pub mod cadence {
    use std::time::Duration;

    /// Render tick rate.
    pub const DEFAULT_TICK_HZ: u32 = 60;

    /// Sleep between producer polls.
    pub const PRODUCER_POLL_INTERVAL: Duration = Duration::from_millis(5);

    /// Bounded wait inside each decoder pull.
    pub const PULL_TIMEOUT: Duration = Duration::from_millis(1);
}

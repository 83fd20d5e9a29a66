//! dmaview GPU - zero-copy YUV presentation
//!
//! Decoded planes are imported as external images, converted to RGBA in a
//! single pass into a cached render target, and blitted to the window.
//! All GPU access goes through [`GpuDriver`]; [`SoftwareDriver`] implements
//! it on the CPU for headless runs and tests.

pub mod converter;
pub mod display;
pub mod driver;
pub mod importer;
pub mod pass;
pub mod presenter;
pub mod renderer;
pub mod resources;
pub mod session;
pub mod shaders;
pub mod software;

pub use converter::{ColorConverter, ConvertedFrameTexture};
pub use display::{ContextId, DisplayBackend, NativeWindow, SurfaceId};
pub use driver::{
    BindingState, DriverCapabilities, ExternalImageDesc, FramebufferId, GpuDriver, ImageId,
    ProgramId, ProgramKind, ProgramSource, TextureFilter, TextureId, UniformLocation,
    UniformValue, VertexAttribPointer, Viewport,
};
pub use importer::{ImportedPlane, ImportedPlanes, PlaneImporter};
pub use pass::ScopedRenderPass;
pub use presenter::{PresentationSurface, Presented};
pub use renderer::{RenderStats, Renderer, RendererConfig, TickOutcome};
pub use session::GpuSession;
pub use software::{DriverCounters, HeadlessControls, HeadlessDisplay, Rgba8Image, SoftwareDriver};

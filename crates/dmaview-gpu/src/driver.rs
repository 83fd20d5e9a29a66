//! The GPU driver collaborator.
//!
//! [`GpuDriver`] is a thin GLES2 + `EGL_EXT_image_dma_buf_import` surface:
//! object creation, binding state, client-side vertex arrays and a draw call.
//! Everything in this crate talks to the GPU through it, which keeps the
//! render path testable against [`crate::SoftwareDriver`].
//!
//! Methods take `&self`: like a GL context, a driver carries global mutable
//! binding state, and it is only ever used from the one thread that owns it.

use dmaview_core::{BufferHandle, Color, Fourcc, Result};
use smallvec::SmallVec;

macro_rules! gl_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

gl_handle!(
    /// An `EGLImage` wrapping external memory.
    ImageId
);
gl_handle!(TextureId);
gl_handle!(FramebufferId);
gl_handle!(ProgramId);
gl_handle!(UniformLocation);

/// Attribute slots every program binds its inputs to.
pub mod attrib {
    pub const POSITION: u32 = 0;
    pub const TEX_COORD: u32 = 1;
}

/// What the driver can do, probed once at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// `EGL_EXT_image_dma_buf_import` + `GL_OES_EGL_image`.
    pub external_image_import: bool,
    pub max_texture_size: u32,
    pub texture_units: u32,
    pub vertex_attribs: u32,
}

/// Attributes for importing one plane of a DMA-BUF as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalImageDesc {
    pub handle: BufferHandle,
    pub width: u32,
    pub height: u32,
    /// Per-plane DRM format (`R8`, `GR88`).
    pub format: Fourcc,
    pub offset: u32,
    pub stride: u32,
}

/// Which built-in program a source implements.
///
/// Hardware drivers compile the GLSL; the software driver runs an equivalent
/// native routine chosen by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Luma (+ optional interleaved chroma) to RGB.
    YuvToRgb,
    /// Textured full-screen quad.
    Blit,
}

/// GLSL ES 1.00 sources for one program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSource {
    pub kind: ProgramKind,
    pub label: &'static str,
    pub vertex: &'static str,
    pub fragment: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Vec3([f32; 3]),
    /// Column-major.
    Mat3([f32; 9]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Client-side vertex array, as passed to `glVertexAttribPointer`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexAttribPointer {
    pub components: u32,
    /// Distance between vertices, in floats.
    pub stride: u32,
    /// First component of vertex 0, in floats.
    pub offset: u32,
    pub data: &'static [f32],
}

/// Global binding state touched by a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingState {
    pub framebuffer: Option<FramebufferId>,
    pub program: Option<ProgramId>,
    pub active_unit: u32,
    /// `TEXTURE_2D` binding of each unit.
    pub unit_textures: SmallVec<[Option<TextureId>; 8]>,
    /// Bit `i` set when vertex attrib array `i` is enabled.
    pub enabled_attribs: u32,
    pub viewport: Viewport,
}

impl BindingState {
    pub fn attrib_enabled(&self, index: u32) -> bool {
        index < 32 && self.enabled_attribs & (1 << index) != 0
    }
}

pub trait GpuDriver {
    fn capabilities(&self) -> DriverCapabilities;

    // ── External memory ─────────────────────────────

    /// `eglCreateImageKHR(EGL_LINUX_DMA_BUF_EXT, ...)`: no pixels move.
    fn create_external_image(&self, desc: &ExternalImageDesc) -> Result<ImageId>;
    fn destroy_image(&self, image: ImageId);

    // ── Textures ────────────────────────────────────

    fn create_texture(&self) -> Result<TextureId>;
    fn delete_texture(&self, texture: TextureId);
    /// `glEGLImageTargetTexture2DOES` on the texture bound to the active unit.
    fn texture_from_image(&self, image: ImageId) -> Result<()>;
    /// `glTexImage2D(RGBA, UNSIGNED_BYTE)` on the texture bound to the active
    /// unit. `None` allocates uninitialized storage.
    fn tex_image_rgba8(&self, width: u32, height: u32, pixels: Option<&[u8]>) -> Result<()>;
    fn tex_filter(&self, filter: TextureFilter);

    // ── Framebuffers ────────────────────────────────

    fn create_framebuffer(&self) -> Result<FramebufferId>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    /// Attach `texture` as color attachment 0 of the bound framebuffer and
    /// check completeness.
    fn framebuffer_texture(&self, texture: TextureId) -> Result<()>;

    // ── Programs ────────────────────────────────────

    /// Compile both stages and link.
    fn create_program(&self, source: &ProgramSource) -> Result<ProgramId>;
    fn delete_program(&self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Set a uniform of the program in use.
    fn set_uniform(&self, location: UniformLocation, value: UniformValue);

    // ── Binding state ───────────────────────────────

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);
    fn use_program(&self, program: Option<ProgramId>);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, texture: Option<TextureId>);
    fn enable_vertex_attrib(&self, index: u32);
    fn disable_vertex_attrib(&self, index: u32);
    fn vertex_attrib_pointer(&self, index: u32, pointer: VertexAttribPointer);
    fn viewport(&self, viewport: Viewport);
    /// `glGetIntegerv` over everything in [`BindingState`].
    fn binding_state(&self) -> BindingState;

    // ── Drawing ─────────────────────────────────────

    fn clear(&self, color: Color);
    /// `glDrawArrays(GL_TRIANGLE_STRIP, first, count)`.
    fn draw_triangle_strip(&self, first: u32, count: u32) -> Result<()>;
}

//! Window-system binding: the EGL display, surface and context.

use dmaview_core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

/// A platform window to render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeWindow {
    /// Platform window pointer (`wl_egl_window*` and friends), opaque here.
    pub handle: usize,
    pub width: u32,
    pub height: u32,
}

impl NativeWindow {
    pub fn headless(width: u32, height: u32) -> Self {
        Self {
            handle: 0,
            width,
            height,
        }
    }
}

/// EGL-style display connection.
pub trait DisplayBackend {
    fn create_surface(&mut self, window: &NativeWindow) -> Result<SurfaceId>;
    /// A GLES2 context sharing nothing.
    fn create_context(&mut self) -> Result<ContextId>;
    fn make_current(&mut self, context: ContextId, surface: SurfaceId) -> Result<()>;
    fn swap_buffers(&mut self, surface: SurfaceId, context: ContextId) -> Result<()>;
    fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)>;
    /// Release the context and surface. Called once, last.
    fn terminate(&mut self);
}

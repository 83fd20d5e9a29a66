//! Display and context setup.

use crate::display::{ContextId, DisplayBackend, NativeWindow, SurfaceId};
use crate::driver::{DriverCapabilities, GpuDriver};
use dmaview_core::{DmaViewError, Result};
use std::fmt;
use std::rc::Rc;
use tracing::info;

/// A current GLES2 context on a window surface. Owns the display connection
/// and tears it down when dropped.
pub struct GpuSession {
    driver: Rc<dyn GpuDriver>,
    display: Box<dyn DisplayBackend>,
    surface: SurfaceId,
    context: ContextId,
    capabilities: DriverCapabilities,
}

impl GpuSession {
    /// Create the surface and context, make them current, and check that
    /// external images can be imported. Any failure here is a
    /// [`DmaViewError::Configuration`]: rendering cannot start.
    pub fn establish(
        driver: Rc<dyn GpuDriver>,
        mut display: Box<dyn DisplayBackend>,
        window: NativeWindow,
    ) -> Result<Self> {
        let (surface, context) = match bring_up(display.as_mut(), &window) {
            Ok(ids) => ids,
            Err(e) => {
                // Whatever was created before the failure goes with the display.
                display.terminate();
                return Err(DmaViewError::Configuration(format!("display setup: {e}")));
            }
        };

        let capabilities = driver.capabilities();
        if !capabilities.external_image_import {
            display.terminate();
            return Err(DmaViewError::Configuration(
                "driver cannot import DMA-BUF images (EGL_EXT_image_dma_buf_import)".into(),
            ));
        }

        info!(
            width = window.width,
            height = window.height,
            max_texture = capabilities.max_texture_size,
            units = capabilities.texture_units,
            "GPU session established"
        );

        Ok(Self {
            driver,
            display,
            surface,
            context,
            capabilities,
        })
    }

    pub fn driver(&self) -> &Rc<dyn GpuDriver> {
        &self.driver
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.display.surface_size(self.surface).unwrap_or((0, 0))
    }

    pub fn swap_buffers(&mut self) -> Result<()> {
        self.display.swap_buffers(self.surface, self.context)
    }
}

fn bring_up(
    display: &mut dyn DisplayBackend,
    window: &NativeWindow,
) -> Result<(SurfaceId, ContextId)> {
    let surface = display.create_surface(window)?;
    let context = display.create_context()?;
    display.make_current(context, surface)?;
    Ok((surface, context))
}

impl Drop for GpuSession {
    fn drop(&mut self) {
        self.display.terminate();
    }
}

impl fmt::Debug for GpuSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuSession")
            .field("surface", &self.surface)
            .field("context", &self.context)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

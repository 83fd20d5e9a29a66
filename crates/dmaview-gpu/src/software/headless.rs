use super::SoftwareDriver;
use crate::display::{ContextId, DisplayBackend, NativeWindow, SurfaceId};
use dmaview_core::{DmaViewError, Result};
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;

/// Display backend for [`SoftwareDriver`]: one offscreen surface whose back
/// buffer is the driver's default framebuffer.
pub struct HeadlessDisplay {
    driver: Rc<SoftwareDriver>,
    surface: Option<(SurfaceId, u32, u32)>,
    context: Option<ContextId>,
    current: bool,
    controls: Rc<HeadlessControls>,
}

/// Shared switches for a [`HeadlessDisplay`] that has been handed off.
#[derive(Debug, Default)]
pub struct HeadlessControls {
    fail_swaps: Cell<bool>,
    terminated: Cell<bool>,
}

impl HeadlessControls {
    /// Make every swap fail, as a lost surface would.
    pub fn set_fail_swaps(&self, fail: bool) {
        self.fail_swaps.set(fail);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.get()
    }
}

impl HeadlessDisplay {
    pub fn new(driver: Rc<SoftwareDriver>) -> Self {
        Self {
            driver,
            surface: None,
            context: None,
            current: false,
            controls: Rc::default(),
        }
    }

    pub fn controls(&self) -> Rc<HeadlessControls> {
        self.controls.clone()
    }
}

impl DisplayBackend for HeadlessDisplay {
    fn create_surface(&mut self, window: &NativeWindow) -> Result<SurfaceId> {
        if self.surface.is_some() {
            return Err(DmaViewError::Display(
                "headless display supports a single surface".into(),
            ));
        }
        if window.width == 0 || window.height == 0 {
            return Err(DmaViewError::Display(format!(
                "cannot create a {}x{} surface",
                window.width, window.height
            )));
        }
        let id = SurfaceId(1);
        self.driver
            .resize_default_framebuffer(window.width, window.height);
        self.surface = Some((id, window.width, window.height));
        debug!(width = window.width, height = window.height, "headless surface created");
        Ok(id)
    }

    fn create_context(&mut self) -> Result<ContextId> {
        let id = ContextId(1);
        self.context = Some(id);
        Ok(id)
    }

    fn make_current(&mut self, context: ContextId, surface: SurfaceId) -> Result<()> {
        let known_surface = self.surface.map(|(id, ..)| id) == Some(surface);
        if self.context != Some(context) || !known_surface {
            return Err(DmaViewError::Display(
                "make_current with an unknown context or surface".into(),
            ));
        }
        self.current = true;
        Ok(())
    }

    fn swap_buffers(&mut self, surface: SurfaceId, context: ContextId) -> Result<()> {
        let on_surface = self.surface.map(|(id, ..)| id) == Some(surface);
        if !self.current || !on_surface || self.context != Some(context) {
            return Err(DmaViewError::Display("no current surface to swap".into()));
        }
        if self.controls.fail_swaps.get() {
            return Err(DmaViewError::Display("surface lost".into()));
        }
        self.driver.swap_default_framebuffer();
        Ok(())
    }

    fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)> {
        self.surface
            .filter(|(id, ..)| *id == surface)
            .map(|(_, w, h)| (w, h))
    }

    fn terminate(&mut self) {
        self.current = false;
        self.context = None;
        self.surface = None;
        self.controls.terminated.set(true);
    }
}

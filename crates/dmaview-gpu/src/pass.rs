//! Scoped binding-state isolation.
//!
//! A conversion pass rebinds the framebuffer, program, texture units, vertex
//! arrays and viewport. [`ScopedRenderPass`] snapshots all of it on entry and
//! puts it back when dropped, so whatever draws next sees exactly the state
//! it left behind, whether the pass succeeded or bailed out early.

use crate::driver::{BindingState, GpuDriver};

pub struct ScopedRenderPass<'a> {
    driver: &'a dyn GpuDriver,
    saved: BindingState,
    attrib_slots: u32,
}

impl<'a> ScopedRenderPass<'a> {
    pub fn begin(driver: &'a dyn GpuDriver) -> Self {
        let saved = driver.binding_state();
        let attrib_slots = driver.capabilities().vertex_attribs.min(32);
        Self {
            driver,
            saved,
            attrib_slots,
        }
    }
}

impl Drop for ScopedRenderPass<'_> {
    fn drop(&mut self) {
        let d = self.driver;
        let saved = &self.saved;

        for (unit, texture) in saved.unit_textures.iter().enumerate() {
            d.active_texture(unit as u32);
            d.bind_texture(*texture);
        }
        d.active_texture(saved.active_unit);

        for index in 0..self.attrib_slots {
            if saved.attrib_enabled(index) {
                d.enable_vertex_attrib(index);
            } else {
                d.disable_vertex_attrib(index);
            }
        }

        d.use_program(saved.program);
        d.bind_framebuffer(saved.framebuffer);
        d.viewport(saved.viewport);
    }
}

//! RAII wrappers for driver objects.
//!
//! Each wrapper holds its driver and deletes the object when dropped, so a
//! resource is released exactly once on every path, including errors.

use crate::driver::{FramebufferId, GpuDriver, ProgramId, ProgramSource, TextureId};
use dmaview_core::Result;
use std::fmt;
use std::rc::Rc;

pub struct OwnedTexture {
    driver: Rc<dyn GpuDriver>,
    id: TextureId,
}

impl OwnedTexture {
    pub fn new(driver: Rc<dyn GpuDriver>) -> Result<Self> {
        let id = driver.create_texture()?;
        Ok(Self { driver, id })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }
}

impl Drop for OwnedTexture {
    fn drop(&mut self) {
        self.driver.delete_texture(self.id);
    }
}

impl fmt::Debug for OwnedTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedTexture").field(&self.id).finish()
    }
}

pub struct OwnedFramebuffer {
    driver: Rc<dyn GpuDriver>,
    id: FramebufferId,
}

impl OwnedFramebuffer {
    pub fn new(driver: Rc<dyn GpuDriver>) -> Result<Self> {
        let id = driver.create_framebuffer()?;
        Ok(Self { driver, id })
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }
}

impl Drop for OwnedFramebuffer {
    fn drop(&mut self) {
        self.driver.delete_framebuffer(self.id);
    }
}

impl fmt::Debug for OwnedFramebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedFramebuffer").field(&self.id).finish()
    }
}

/// A linked program.
pub struct OwnedProgram {
    driver: Rc<dyn GpuDriver>,
    id: ProgramId,
    label: &'static str,
}

impl OwnedProgram {
    /// Compile and link `source`. Failures are setup errors.
    pub fn build(driver: Rc<dyn GpuDriver>, source: &ProgramSource) -> Result<Self> {
        let id = driver.create_program(source)?;
        tracing::debug!(program = source.label, id = id.0, "program linked");
        Ok(Self {
            driver,
            id,
            label: source.label,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for OwnedProgram {
    fn drop(&mut self) {
        self.driver.delete_program(self.id);
    }
}

impl fmt::Debug for OwnedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedProgram")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders;
    use crate::software::SoftwareDriver;

    #[test]
    fn test_wrappers_release_on_drop() {
        let sw = Rc::new(SoftwareDriver::new());
        let driver: Rc<dyn GpuDriver> = sw.clone();

        let texture = OwnedTexture::new(driver.clone()).unwrap();
        let framebuffer = OwnedFramebuffer::new(driver.clone()).unwrap();
        let program = OwnedProgram::build(driver, &shaders::BLIT).unwrap();
        assert_eq!(program.label(), "blit");

        let live = sw.counters();
        assert_eq!(live.live_textures(), 1);
        assert_eq!(live.live_framebuffers(), 1);
        assert_eq!(live.live_programs(), 1);

        drop((texture, framebuffer, program));
        let after = sw.counters();
        assert_eq!(after.live_textures(), 0);
        assert_eq!(after.live_framebuffers(), 0);
        assert_eq!(after.live_programs(), 0);
    }
}

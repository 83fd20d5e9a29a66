//! Draws the newest converted frame, or a placeholder, to the window.

use crate::converter::ConvertedFrameTexture;
use crate::driver::{
    GpuDriver, TextureFilter, TextureId, UniformLocation, UniformValue, Viewport,
};
use crate::resources::{OwnedProgram, OwnedTexture};
use crate::session::GpuSession;
use crate::shaders::{self, uniforms};
use dmaview_core::{Color, DmaViewError, Result};
use std::rc::Rc;
use tracing::{debug, info};

/// 2x2 red, green, blue, yellow. Shown until the first frame converts.
#[rustfmt::skip]
const PLACEHOLDER_TEXELS: [u8; 16] = [
    255, 0, 0, 255,     0, 255, 0, 255,
    0, 0, 255, 255,     255, 255, 0, 255,
];

/// What the last successful present put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Nothing,
    Placeholder,
    Frame {
        texture: TextureId,
        width: u32,
        height: u32,
    },
}

pub struct PresentationSurface {
    // Drop order: GPU objects first, then the session that owns the context.
    placeholder: OwnedTexture,
    program: OwnedProgram,
    texture_uniform: UniformLocation,
    last: Presented,
    presents: u64,
    session: GpuSession,
}

impl PresentationSurface {
    /// Build the blit program and the placeholder texture on `session`.
    pub fn new(session: GpuSession) -> Result<Self> {
        let driver = session.driver().clone();
        let program = OwnedProgram::build(driver.clone(), &shaders::BLIT)?;
        let texture_uniform = driver
            .uniform_location(program.id(), uniforms::TEXTURE)
            .ok_or_else(|| {
                DmaViewError::Configuration(format!(
                    "program {} has no uniform {}",
                    program.label(),
                    uniforms::TEXTURE
                ))
            })?;

        let placeholder = OwnedTexture::new(driver.clone())?;
        driver.active_texture(0);
        driver.bind_texture(Some(placeholder.id()));
        driver.tex_image_rgba8(2, 2, Some(&PLACEHOLDER_TEXELS))?;
        driver.tex_filter(TextureFilter::Nearest);
        driver.bind_texture(None);

        let (width, height) = session.surface_size();
        info!(width, height, "presentation surface ready");

        Ok(Self {
            placeholder,
            program,
            texture_uniform,
            last: Presented::Nothing,
            presents: 0,
            session,
        })
    }

    /// Clear, draw `frame` (or the placeholder) full-screen, and swap.
    pub fn present(&mut self, frame: Option<&ConvertedFrameTexture>) -> Result<Presented> {
        let driver: Rc<dyn GpuDriver> = self.session.driver().clone();
        let d = &*driver;
        let (width, height) = self.session.surface_size();

        let shown = match frame {
            Some(frame) => {
                let (w, h) = frame.size();
                Presented::Frame {
                    texture: frame.texture(),
                    width: w,
                    height: h,
                }
            }
            None => Presented::Placeholder,
        };
        let texture = match shown {
            Presented::Frame { texture, .. } => texture,
            _ => self.placeholder.id(),
        };

        d.bind_framebuffer(None);
        d.viewport(Viewport::sized(width, height));
        d.clear(Color::SURFACE_CLEAR);

        d.use_program(Some(self.program.id()));
        d.set_uniform(self.texture_uniform, UniformValue::Int(0));
        d.active_texture(0);
        d.bind_texture(Some(texture));
        for (index, pointer) in shaders::quad_attrib_pointers() {
            d.enable_vertex_attrib(index);
            d.vertex_attrib_pointer(index, pointer);
        }
        d.draw_triangle_strip(0, shaders::QUAD_VERTEX_COUNT)?;
        self.session.swap_buffers()?;

        if shown != self.last {
            debug!(?shown, "presenting");
        }
        self.last = shown;
        self.presents += 1;
        Ok(shown)
    }

    pub fn last_presented(&self) -> Presented {
        self.last
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NativeWindow;
    use crate::software::{HeadlessDisplay, SoftwareDriver};

    fn surface(width: u32, height: u32) -> (Rc<SoftwareDriver>, PresentationSurface) {
        let sw = Rc::new(SoftwareDriver::new());
        let display = Box::new(HeadlessDisplay::new(sw.clone()));
        let session =
            GpuSession::establish(sw.clone(), display, NativeWindow::headless(width, height))
                .unwrap();
        (sw, PresentationSurface::new(session).unwrap())
    }

    #[test]
    fn test_placeholder_before_first_frame() {
        let (sw, mut surface) = surface(4, 4);
        assert_eq!(surface.last_presented(), Presented::Nothing);
        assert_eq!(surface.present(None).unwrap(), Presented::Placeholder);

        let screen = sw.front_buffer();
        assert_eq!(screen.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(screen.pixel(3, 0), Some([0, 255, 0, 255]));
        assert_eq!(screen.pixel(0, 3), Some([0, 0, 255, 255]));
        assert_eq!(screen.pixel(3, 3), Some([255, 255, 0, 255]));
        assert_eq!(sw.swaps(), 1);
    }

    #[test]
    fn test_each_present_clears_draws_and_swaps() {
        let (sw, mut surface) = surface(4, 4);
        for _ in 0..3 {
            surface.present(None).unwrap();
        }
        let c = sw.counters();
        assert_eq!((c.clears, c.draws), (3, 3));
        assert_eq!(sw.swaps(), 3);
        assert_eq!(surface.presents(), 3);
    }

    #[test]
    fn test_swap_failure_is_reported() {
        let sw = Rc::new(SoftwareDriver::new());
        let display = HeadlessDisplay::new(sw.clone());
        let controls = display.controls();
        let session =
            GpuSession::establish(sw.clone(), Box::new(display), NativeWindow::headless(4, 4))
                .unwrap();
        let mut surface = PresentationSurface::new(session).unwrap();

        controls.set_fail_swaps(true);
        assert!(matches!(surface.present(None), Err(DmaViewError::Display(_))));
        assert_eq!(surface.last_presented(), Presented::Nothing);

        controls.set_fail_swaps(false);
        assert_eq!(surface.present(None).unwrap(), Presented::Placeholder);
        assert_eq!(surface.presents(), 1);
    }

    #[test]
    fn test_objects_released_before_context() {
        let (sw, surface) = surface(4, 4);
        assert_eq!(sw.counters().live_textures(), 1);
        drop(surface);
        let c = sw.counters();
        assert_eq!((c.live_textures(), c.live_programs()), (0, 0));
    }
}

//! YUV to RGB conversion into a cached render target.
//!
//! The target texture and its framebuffer are kept across frames and only
//! rebuilt when the frame size changes. A replacement is built off to the
//! side and swapped in after its first successful draw, so a failed
//! conversion never disturbs the texture the presenter is showing.

use crate::driver::{
    FramebufferId, GpuDriver, TextureFilter, TextureId, UniformLocation, UniformValue, Viewport,
};
use crate::importer::ImportedPlane;
use crate::pass::ScopedRenderPass;
use crate::resources::{OwnedFramebuffer, OwnedProgram, OwnedTexture};
use crate::shaders::{self, uniforms};
use dmaview_core::{DmaViewError, Fourcc, PixelLayout, Result, YuvCoefficients, YuvMatrix};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

const LUMA_UNIT: u32 = 0;
const CHROMA_UNIT: u32 = 1;

/// The RGBA render target conversions write into.
pub struct ConvertedFrameTexture {
    // Framebuffer goes first so it is never left pointing at a deleted texture.
    framebuffer: OwnedFramebuffer,
    texture: OwnedTexture,
    width: u32,
    height: u32,
}

impl ConvertedFrameTexture {
    pub fn texture(&self) -> TextureId {
        self.texture.id()
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer.id()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Debug for ConvertedFrameTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedFrameTexture")
            .field("texture", &self.texture.id())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

struct Locations {
    luma: UniformLocation,
    chroma: UniformLocation,
    has_chroma: UniformLocation,
    matrix: UniformLocation,
    offset: UniformLocation,
}

pub struct ColorConverter {
    driver: Rc<dyn GpuDriver>,
    target: Option<ConvertedFrameTexture>,
    program: OwnedProgram,
    locations: Locations,
    coefficients: YuvCoefficients,
    reallocations: u64,
    conversions: u64,
}

impl ColorConverter {
    /// Build the conversion program. Compile, link or missing-uniform
    /// failures are configuration errors.
    pub fn new(driver: Rc<dyn GpuDriver>, matrix: YuvMatrix) -> Result<Self> {
        let program = OwnedProgram::build(driver.clone(), &shaders::YUV_TO_RGB)?;
        let locate = |name: &str| {
            driver.uniform_location(program.id(), name).ok_or_else(|| {
                DmaViewError::Configuration(format!(
                    "program {} has no uniform {name}",
                    program.label()
                ))
            })
        };
        let locations = Locations {
            luma: locate(uniforms::LUMA)?,
            chroma: locate(uniforms::CHROMA)?,
            has_chroma: locate(uniforms::HAS_CHROMA)?,
            matrix: locate(uniforms::YUV_MATRIX)?,
            offset: locate(uniforms::YUV_OFFSET)?,
        };
        info!(?matrix, "color converter ready");

        Ok(Self {
            driver,
            target: None,
            program,
            locations,
            coefficients: matrix.coefficients(),
            reallocations: 0,
            conversions: 0,
        })
    }

    /// Convert the imported planes of a `width` x `height` frame into the
    /// cached target, reallocating it only when the size changed.
    ///
    /// One R8 plane converts to grayscale; R8 + GR88 converts as NV12.
    /// Binding state is restored before returning, on success and failure.
    pub fn convert(
        &mut self,
        planes: &[ImportedPlane],
        width: u32,
        height: u32,
    ) -> Result<&ConvertedFrameTexture> {
        self.check_planes(planes, width, height)?;

        let reuse = matches!(&self.target, Some(t) if t.size() == (width, height));
        if reuse {
            if let Some(target) = &self.target {
                self.draw(target, planes)?;
            }
        } else {
            let fresh = self.allocate_target(width, height)?;
            self.draw(&fresh, planes)?;
            let previous = self.target.replace(fresh).map(|t| t.size());
            self.reallocations += 1;
            debug!(?previous, width, height, "conversion target reallocated");
        }

        self.conversions += 1;
        self.target
            .as_ref()
            .ok_or_else(|| DmaViewError::Gpu("conversion target missing".into()))
    }

    /// The most recent successful conversion.
    pub fn latest(&self) -> Option<&ConvertedFrameTexture> {
        self.target.as_ref()
    }

    /// Times a target was (re)built.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    fn check_planes(&self, planes: &[ImportedPlane], width: u32, height: u32) -> Result<()> {
        let layout = match planes.len() {
            1 => PixelLayout::Gray8,
            2 => PixelLayout::Nv12,
            0 => {
                return Err(DmaViewError::MissingPlane {
                    layout: PixelLayout::Gray8,
                    needed: 1,
                    got: 0,
                })
            }
            n => {
                return Err(DmaViewError::UnsupportedFormat(format!(
                    "{n} planes; expected luma with optional chroma"
                )))
            }
        };

        for (index, plane) in planes.iter().enumerate() {
            let expected: Option<(Fourcc, (u32, u32))> = layout
                .plane_format(index)
                .zip(layout.plane_size(index, width, height));
            let Some((format, size)) = expected else {
                continue;
            };
            if plane.format() != format {
                return Err(DmaViewError::UnsupportedFormat(format!(
                    "plane {index} is {}, expected {format}",
                    plane.format()
                )));
            }
            if plane.size() != size {
                return Err(DmaViewError::Import(format!(
                    "plane {index} is {:?}, expected {size:?} for a {width}x{height} frame",
                    plane.size()
                )));
            }
        }

        let max = self.driver.capabilities().max_texture_size;
        if width > max || height > max {
            return Err(DmaViewError::Gpu(format!(
                "{width}x{height} exceeds max texture size {max}"
            )));
        }
        Ok(())
    }

    fn allocate_target(&self, width: u32, height: u32) -> Result<ConvertedFrameTexture> {
        let d = &*self.driver;
        let texture = OwnedTexture::new(self.driver.clone())?;
        let framebuffer = OwnedFramebuffer::new(self.driver.clone())?;

        let _pass = ScopedRenderPass::begin(d);
        d.bind_texture(Some(texture.id()));
        d.tex_image_rgba8(width, height, None)?;
        d.tex_filter(TextureFilter::Linear);
        d.bind_framebuffer(Some(framebuffer.id()));
        d.framebuffer_texture(texture.id())?;

        Ok(ConvertedFrameTexture {
            framebuffer,
            texture,
            width,
            height,
        })
    }

    fn draw(&self, target: &ConvertedFrameTexture, planes: &[ImportedPlane]) -> Result<()> {
        let d = &*self.driver;
        let _pass = ScopedRenderPass::begin(d);

        d.bind_framebuffer(Some(target.framebuffer()));
        d.viewport(Viewport::sized(target.width, target.height));
        d.use_program(Some(self.program.id()));

        let loc = &self.locations;
        d.set_uniform(loc.luma, UniformValue::Int(LUMA_UNIT as i32));
        d.set_uniform(loc.chroma, UniformValue::Int(CHROMA_UNIT as i32));
        d.set_uniform(loc.matrix, UniformValue::Mat3(self.coefficients.matrix_cols()));
        d.set_uniform(loc.offset, UniformValue::Vec3(self.coefficients.offset.to_array()));

        d.active_texture(LUMA_UNIT);
        d.bind_texture(planes.first().map(ImportedPlane::texture));
        let chroma = planes.get(1).map(ImportedPlane::texture);
        d.set_uniform(loc.has_chroma, UniformValue::Int(i32::from(chroma.is_some())));
        if chroma.is_some() {
            d.active_texture(CHROMA_UNIT);
            d.bind_texture(chroma);
        }

        for (index, pointer) in shaders::quad_attrib_pointers() {
            d.enable_vertex_attrib(index);
            d.vertex_attrib_pointer(index, pointer);
        }
        d.draw_triangle_strip(0, shaders::QUAD_VERTEX_COUNT)
    }
}

impl fmt::Debug for ColorConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorConverter")
            .field("target", &self.target)
            .field("reallocations", &self.reallocations)
            .field("conversions", &self.conversions)
            .finish()
    }
}

//! Draw-call execution for the software driver.

use super::{uniform_names, PlaneView, Rgba8Image, State, SwProgram, TextureStorage};
use crate::driver::{attrib, ProgramKind, TextureId, UniformLocation, UniformValue, Viewport};
use crate::shaders::uniforms;
use dmaview_core::{Color, DmaViewError, Result, YuvCoefficients};
use glam::{Mat3, Vec2, Vec3, Vec4};
use rayon::prelude::*;
use std::mem;

/// Run one `glDrawArrays(GL_TRIANGLE_STRIP)` against the current state.
pub(super) fn draw(st: &mut State, first: u32, count: u32) -> Result<()> {
    let target = match st.bound_framebuffer {
        None => None,
        Some(fb) => match st.framebuffers.get(&fb).copied().flatten() {
            Some(texture) => Some(texture),
            None => {
                return Err(DmaViewError::Gpu(format!(
                    "framebuffer {} has no color attachment",
                    fb.0
                )))
            }
        },
    };

    // Lift the color buffer out so the draw can read every other texture
    // while writing this one.
    let mut image = match target {
        None => mem::take(&mut st.back_buffer),
        Some(texture) => take_color_buffer(st, texture)?,
    };
    let result = render(st, target, &mut image, first, count);
    match target {
        None => st.back_buffer = image,
        Some(texture) => {
            if let Some(slot) = st.textures.get_mut(&texture) {
                slot.storage = TextureStorage::Rgba8(image);
            }
        }
    }
    result
}

fn take_color_buffer(st: &mut State, texture: TextureId) -> Result<Rgba8Image> {
    let slot = st
        .textures
        .get_mut(&texture)
        .ok_or_else(|| DmaViewError::Gpu(format!("render target {} was deleted", texture.0)))?;
    match mem::replace(&mut slot.storage, TextureStorage::Empty) {
        TextureStorage::Rgba8(image) => Ok(image),
        other => {
            slot.storage = other;
            Err(DmaViewError::Gpu(format!(
                "render target {} has no color storage",
                texture.0
            )))
        }
    }
}

fn render(
    st: &State,
    target: Option<TextureId>,
    image: &mut Rgba8Image,
    first: u32,
    count: u32,
) -> Result<()> {
    let program = st
        .program
        .and_then(|id| st.programs.get(&id))
        .ok_or_else(|| DmaViewError::Gpu("draw with no program in use".into()))?;
    let quad = Quad::assemble(st, first, count)?;
    let shader = Shader::bind(st, program, target)?;

    let viewport = st.viewport;
    if image.width == 0 || image.height == 0 || viewport.width == 0 || viewport.height == 0 {
        return Ok(());
    }
    if quad.max.x <= quad.min.x || quad.max.y <= quad.min.y {
        return Ok(());
    }

    let row_bytes = image.width as usize * 4;
    image
        .pixels
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row, line)| {
            let Some(ty) = quad.param_y(window_to_ndc(row, viewport.y, viewport.height)) else {
                return;
            };
            for (col, px) in line.chunks_exact_mut(4).enumerate() {
                if let Some(tx) = quad.param_x(window_to_ndc(col, viewport.x, viewport.width)) {
                    px.copy_from_slice(&shader.shade(quad.tex_coord(tx, ty)));
                }
            }
        });
    Ok(())
}

/// Pixel center to normalized device coordinate along one axis.
#[inline]
fn window_to_ndc(pixel: usize, origin: i32, extent: u32) -> f32 {
    (pixel as f32 + 0.5 - origin as f32) / extent as f32 * 2.0 - 1.0
}

/// An axis-aligned quad with linearly mapped texture coordinates.
struct Quad {
    min: Vec2,
    max: Vec2,
    uv_min: Vec2,
    uv_max: Vec2,
}

impl Quad {
    fn assemble(st: &State, first: u32, count: u32) -> Result<Self> {
        if count < 3 {
            return Err(DmaViewError::Gpu(format!(
                "triangle strip needs 3 vertices, got {count}"
            )));
        }
        let positions = read_attrib(st, attrib::POSITION, first, count)?;
        let coords = read_attrib(st, attrib::TEX_COORD, first, count)?;

        let min = positions.iter().copied().fold(Vec2::splat(f32::MAX), Vec2::min);
        let max = positions.iter().copied().fold(Vec2::splat(f32::MIN), Vec2::max);
        let corner = |at: Vec2| {
            positions
                .iter()
                .position(|p| p.abs_diff_eq(at, 1e-6))
                .map(|i| coords[i])
                .ok_or_else(|| {
                    DmaViewError::Gpu("only axis-aligned quads can be rasterized".into())
                })
        };

        Ok(Self {
            min,
            max,
            uv_min: corner(min)?,
            uv_max: corner(max)?,
        })
    }

    fn param_x(&self, ndc: f32) -> Option<f32> {
        param(ndc, self.min.x, self.max.x)
    }

    fn param_y(&self, ndc: f32) -> Option<f32> {
        param(ndc, self.min.y, self.max.y)
    }

    fn tex_coord(&self, tx: f32, ty: f32) -> Vec2 {
        self.uv_min + (self.uv_max - self.uv_min) * Vec2::new(tx, ty)
    }
}

/// Position of `ndc` within `[lo, hi]` clipped to the viewport, as 0..1.
fn param(ndc: f32, lo: f32, hi: f32) -> Option<f32> {
    if !(-1.0..=1.0).contains(&ndc) || ndc < lo || ndc > hi {
        return None;
    }
    Some((ndc - lo) / (hi - lo))
}

fn read_attrib(st: &State, index: u32, first: u32, count: u32) -> Result<Vec<Vec2>> {
    if st.enabled_attribs & (1 << index) == 0 {
        return Err(DmaViewError::Gpu(format!(
            "vertex attrib array {index} is not enabled"
        )));
    }
    let pointer = st
        .pointers
        .get(&index)
        .filter(|p| p.components >= 2)
        .ok_or_else(|| DmaViewError::Gpu(format!("vertex attrib {index} has no 2D array")))?;

    (first..first + count)
        .map(|vertex| {
            let base = (vertex * pointer.stride + pointer.offset) as usize;
            pointer
                .data
                .get(base..base + 2)
                .map(|c| Vec2::new(c[0], c[1]))
                .ok_or_else(|| {
                    DmaViewError::Gpu(format!("vertex {vertex} is outside attrib {index}'s array"))
                })
        })
        .collect()
}

/// A bound texture, read with nearest filtering and edge clamping.
enum Sampler<'a> {
    Rgba(&'a Rgba8Image),
    Plane(&'a PlaneView),
}

impl Sampler<'_> {
    fn texel(&self, uv: Vec2) -> Vec4 {
        match self {
            Self::Rgba(image) => {
                let x = texel_index(uv.x, image.width);
                let y = texel_index(uv.y, image.height);
                let i = (y * image.width as usize + x) * 4;
                let p = &image.pixels[i..i + 4];
                Vec4::new(unit(p[0]), unit(p[1]), unit(p[2]), unit(p[3]))
            }
            Self::Plane(plane) => {
                let x = texel_index(uv.x, plane.width);
                let y = texel_index(uv.y, plane.height);
                let i = plane.offset + y * plane.stride + x * plane.bytes_per_pixel;
                let bytes = plane.buffer.bytes();
                // R8 fills red; GR88 is R in the low byte, G in the high.
                let g = if plane.bytes_per_pixel > 1 { unit(bytes[i + 1]) } else { 0.0 };
                Vec4::new(unit(bytes[i]), g, 0.0, 1.0)
            }
        }
    }
}

#[inline]
fn unit(v: u8) -> f32 {
    f32::from(v) / 255.0
}

#[inline]
fn texel_index(coord: f32, size: u32) -> usize {
    let last = size.saturating_sub(1) as usize;
    ((coord * size as f32).floor().max(0.0) as usize).min(last)
}

enum Shader<'a> {
    YuvToRgb {
        luma: Sampler<'a>,
        chroma: Option<Sampler<'a>>,
        coefficients: YuvCoefficients,
    },
    Blit {
        source: Sampler<'a>,
    },
}

impl<'a> Shader<'a> {
    fn bind(st: &'a State, program: &SwProgram, target: Option<TextureId>) -> Result<Self> {
        let uniform = |name: &str| {
            uniform_names(program.kind)
                .iter()
                .position(|n| *n == name)
                .and_then(|i| program.values.get(&UniformLocation(i as u32)))
                .copied()
        };
        let unit_of = |name: &str| match uniform(name) {
            Some(UniformValue::Int(unit)) => unit,
            _ => 0,
        };

        match program.kind {
            ProgramKind::YuvToRgb => {
                let has_chroma = matches!(
                    uniform(uniforms::HAS_CHROMA),
                    Some(UniformValue::Int(v)) if v != 0
                );
                let matrix = match uniform(uniforms::YUV_MATRIX) {
                    Some(UniformValue::Mat3(cols)) => Mat3::from_cols_array(&cols),
                    _ => Mat3::ZERO,
                };
                let offset = match uniform(uniforms::YUV_OFFSET) {
                    Some(UniformValue::Vec3(v)) => Vec3::from_array(v),
                    _ => Vec3::ZERO,
                };
                let luma = sampler(st, unit_of(uniforms::LUMA), target)?;
                let chroma = if has_chroma {
                    Some(sampler(st, unit_of(uniforms::CHROMA), target)?)
                } else {
                    None
                };
                Ok(Self::YuvToRgb {
                    luma,
                    chroma,
                    coefficients: YuvCoefficients { matrix, offset },
                })
            }
            ProgramKind::Blit => Ok(Self::Blit {
                source: sampler(st, unit_of(uniforms::TEXTURE), target)?,
            }),
        }
    }

    fn shade(&self, uv: Vec2) -> [u8; 4] {
        match self {
            Self::YuvToRgb {
                luma,
                chroma,
                coefficients,
            } => {
                let y = luma.texel(uv).x;
                let rgb = match chroma {
                    Some(chroma) => {
                        let cbcr = chroma.texel(uv);
                        coefficients.to_rgb(y, cbcr.x, cbcr.y)
                    }
                    None => Vec3::splat(coefficients.luma_to_gray(y)),
                };
                Color::rgb(rgb.x, rgb.y, rgb.z).to_rgba8()
            }
            Self::Blit { source } => {
                let t = source.texel(uv);
                Color::new(t.x, t.y, t.z, t.w).to_rgba8()
            }
        }
    }
}

fn sampler(st: &State, unit: i32, target: Option<TextureId>) -> Result<Sampler<'_>> {
    let texture = usize::try_from(unit)
        .ok()
        .and_then(|u| st.units.get(u).copied().flatten())
        .ok_or_else(|| DmaViewError::Gpu(format!("texture unit {unit} has nothing bound")))?;
    if Some(texture) == target {
        return Err(DmaViewError::Gpu(format!(
            "texture {} is both sampled and rendered to",
            texture.0
        )));
    }
    match st.textures.get(&texture).map(|t| &t.storage) {
        Some(TextureStorage::Rgba8(image)) => Ok(Sampler::Rgba(image)),
        Some(TextureStorage::External(plane)) => Ok(Sampler::Plane(plane)),
        _ => Err(DmaViewError::Gpu(format!(
            "texture {} is sampled with no storage",
            texture.0
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::GpuDriver;
    use crate::shaders;
    use crate::software::SoftwareDriver;

    fn bind_quad(driver: &SoftwareDriver) {
        for (index, pointer) in shaders::quad_attrib_pointers() {
            driver.enable_vertex_attrib(index);
            driver.vertex_attrib_pointer(index, pointer);
        }
    }

    #[test]
    fn test_blit_copies_texels() {
        let driver = SoftwareDriver::new();
        let source = driver.create_texture().unwrap();
        driver.bind_texture(Some(source));
        #[rustfmt::skip]
        let px = [
            255, 0, 0, 255,   0, 255, 0, 255,
            0, 0, 255, 255,   255, 255, 0, 255,
        ];
        driver.tex_image_rgba8(2, 2, Some(&px)).unwrap();

        driver.resize_default_framebuffer(4, 4);
        driver.viewport(Viewport::sized(4, 4));
        let program = driver.create_program(&shaders::BLIT).unwrap();
        driver.use_program(Some(program));
        bind_quad(&driver);
        driver.draw_triangle_strip(0, shaders::QUAD_VERTEX_COUNT).unwrap();
        driver.swap_default_framebuffer();

        let out = driver.front_buffer();
        assert_eq!(out.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(out.pixel(3, 0), Some([0, 255, 0, 255]));
        assert_eq!(out.pixel(0, 3), Some([0, 0, 255, 255]));
        assert_eq!(out.pixel(2, 2), Some([255, 255, 0, 255]));
    }

    #[test]
    fn test_viewport_limits_coverage() {
        let driver = SoftwareDriver::new();
        let source = driver.create_texture().unwrap();
        driver.bind_texture(Some(source));
        driver.tex_image_rgba8(1, 1, Some(&[9, 9, 9, 255])).unwrap();

        driver.resize_default_framebuffer(4, 4);
        driver.viewport(Viewport {
            x: 2,
            y: 0,
            width: 2,
            height: 2,
        });
        let program = driver.create_program(&shaders::BLIT).unwrap();
        driver.use_program(Some(program));
        bind_quad(&driver);
        driver.draw_triangle_strip(0, 4).unwrap();
        driver.swap_default_framebuffer();

        let out = driver.front_buffer();
        assert_eq!(out.pixel(2, 1), Some([9, 9, 9, 255]));
        assert_eq!(out.pixel(1, 1), Some([0, 0, 0, 0]));
        assert_eq!(out.pixel(2, 2), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_draw_requires_program_and_arrays() {
        let driver = SoftwareDriver::new();
        driver.resize_default_framebuffer(2, 2);
        assert!(driver.draw_triangle_strip(0, 4).is_err());

        let program = driver.create_program(&shaders::BLIT).unwrap();
        driver.use_program(Some(program));
        assert!(driver.draw_triangle_strip(0, 4).is_err());
        assert_eq!(driver.counters().draws, 0);
    }

    #[test]
    fn test_feedback_loop_rejected() {
        let driver = SoftwareDriver::new();
        let texture = driver.create_texture().unwrap();
        driver.bind_texture(Some(texture));
        driver.tex_image_rgba8(2, 2, None).unwrap();
        let fb = driver.create_framebuffer().unwrap();
        driver.bind_framebuffer(Some(fb));
        driver.framebuffer_texture(texture).unwrap();

        let program = driver.create_program(&shaders::BLIT).unwrap();
        driver.use_program(Some(program));
        bind_quad(&driver);
        assert!(driver.draw_triangle_strip(0, 4).is_err());
        // The color buffer survives the failed draw.
        assert!(driver.texture_image(texture).is_some());
    }

    #[test]
    fn test_texel_index_clamps() {
        assert_eq!(texel_index(-0.5, 4), 0);
        assert_eq!(texel_index(0.99, 4), 3);
        assert_eq!(texel_index(1.5, 4), 3);
        assert_eq!(texel_index(0.5, 1920), 960);
    }
}

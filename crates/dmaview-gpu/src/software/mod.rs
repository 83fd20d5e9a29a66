//! CPU reference driver.
//!
//! Implements [`GpuDriver`] with GL semantics over plain memory: imported
//! planes are read straight out of the [`DmaBufPool`] buffer they describe,
//! RGBA8 textures are owned vectors, and draws run the built-in programs
//! natively (rows in parallel on rayon). Used headless and by every test.

mod headless;
mod raster;

pub use headless::{HeadlessControls, HeadlessDisplay};

use crate::driver::{
    BindingState, DriverCapabilities, ExternalImageDesc, FramebufferId, GpuDriver, ImageId,
    ProgramId, ProgramKind, ProgramSource, TextureFilter, TextureId, UniformLocation,
    UniformValue, VertexAttribPointer, Viewport,
};
use crate::shaders::uniforms;
use dmaview_core::{plane_bytes_per_pixel, Color, DmaBuf, DmaBufPool, DmaViewError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, trace};

/// An RGBA8 image, row 0 first.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Rgba8Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Rgba8Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.pixels.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }
}

impl fmt::Debug for Rgba8Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rgba8Image({}x{})", self.width, self.height)
    }
}

/// Object lifetime and work counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCounters {
    pub images_created: u64,
    pub images_destroyed: u64,
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub framebuffers_created: u64,
    pub framebuffers_deleted: u64,
    pub programs_created: u64,
    pub programs_deleted: u64,
    /// `tex_image_rgba8` calls.
    pub texture_allocations: u64,
    pub draws: u64,
    pub clears: u64,
}

impl DriverCounters {
    pub fn live_images(&self) -> u64 {
        self.images_created - self.images_destroyed
    }

    pub fn live_textures(&self) -> u64 {
        self.textures_created - self.textures_deleted
    }

    pub fn live_framebuffers(&self) -> u64 {
        self.framebuffers_created - self.framebuffers_deleted
    }

    pub fn live_programs(&self) -> u64 {
        self.programs_created - self.programs_deleted
    }
}

/// A plane of external memory as seen through an image.
#[derive(Clone)]
struct PlaneView {
    buffer: DmaBuf,
    width: u32,
    height: u32,
    offset: usize,
    stride: usize,
    bytes_per_pixel: usize,
}

enum TextureStorage {
    Empty,
    Rgba8(Rgba8Image),
    External(PlaneView),
}

struct SwTexture {
    storage: TextureStorage,
    filter: TextureFilter,
}

struct SwProgram {
    kind: ProgramKind,
    values: HashMap<UniformLocation, UniformValue>,
}

fn uniform_names(kind: ProgramKind) -> &'static [&'static str] {
    match kind {
        ProgramKind::YuvToRgb => &[
            uniforms::LUMA,
            uniforms::CHROMA,
            uniforms::HAS_CHROMA,
            uniforms::YUV_MATRIX,
            uniforms::YUV_OFFSET,
        ],
        ProgramKind::Blit => &[uniforms::TEXTURE],
    }
}

#[derive(Default)]
struct State {
    next_id: u32,
    images: HashMap<ImageId, PlaneView>,
    textures: HashMap<TextureId, SwTexture>,
    framebuffers: HashMap<FramebufferId, Option<TextureId>>,
    programs: HashMap<ProgramId, SwProgram>,

    bound_framebuffer: Option<FramebufferId>,
    program: Option<ProgramId>,
    active_unit: u32,
    units: Vec<Option<TextureId>>,
    enabled_attribs: u32,
    pointers: HashMap<u32, VertexAttribPointer>,
    viewport: Viewport,

    back_buffer: Rgba8Image,
    front_buffer: Rgba8Image,
    swaps: u64,
    counters: DriverCounters,
}

impl State {
    fn next_id(&mut self) -> u32 {
        // 0 is the "no object" name in GL.
        self.next_id += 1;
        self.next_id
    }

    fn bound_texture(&self) -> Option<TextureId> {
        self.units.get(self.active_unit as usize).copied().flatten()
    }
}

pub struct SoftwareDriver {
    pool: Option<DmaBufPool>,
    capabilities: DriverCapabilities,
    failing_programs: Vec<ProgramKind>,
    state: RefCell<State>,
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDriver {
    pub const DEFAULT_CAPABILITIES: DriverCapabilities = DriverCapabilities {
        external_image_import: true,
        max_texture_size: 8192,
        texture_units: 8,
        vertex_attribs: 8,
    };

    /// A driver with no external memory attached; every import fails.
    pub fn new() -> Self {
        Self::with_capabilities(Self::DEFAULT_CAPABILITIES)
    }

    pub fn with_capabilities(capabilities: DriverCapabilities) -> Self {
        let state = State {
            units: vec![None; capabilities.texture_units as usize],
            ..State::default()
        };
        Self {
            pool: None,
            capabilities,
            failing_programs: Vec::new(),
            state: RefCell::new(state),
        }
    }

    /// Resolve imported buffer handles against `pool`.
    pub fn with_pool(mut self, pool: DmaBufPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Make programs of `kind` fail to compile.
    pub fn with_failing_program(mut self, kind: ProgramKind) -> Self {
        self.failing_programs.push(kind);
        self
    }

    pub fn counters(&self) -> DriverCounters {
        self.state.borrow().counters
    }

    /// Resize the window-system framebuffer (framebuffer 0).
    pub fn resize_default_framebuffer(&self, width: u32, height: u32) {
        let mut st = self.state.borrow_mut();
        st.back_buffer = Rgba8Image::new(width, height);
        st.front_buffer = Rgba8Image::new(width, height);
    }

    /// Publish the back buffer.
    pub fn swap_default_framebuffer(&self) {
        let mut st = self.state.borrow_mut();
        let back = st.back_buffer.clone();
        st.front_buffer = back;
        st.swaps += 1;
    }

    /// Last image published by a swap.
    pub fn front_buffer(&self) -> Rgba8Image {
        self.state.borrow().front_buffer.clone()
    }

    pub fn swaps(&self) -> u64 {
        self.state.borrow().swaps
    }

    /// Contents of an RGBA8 texture.
    pub fn texture_image(&self, texture: TextureId) -> Option<Rgba8Image> {
        match &self.state.borrow().textures.get(&texture)?.storage {
            TextureStorage::Rgba8(image) => Some(image.clone()),
            _ => None,
        }
    }

    /// Size of any texture with storage, including imported planes.
    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        match &self.state.borrow().textures.get(&texture)?.storage {
            TextureStorage::Rgba8(image) => Some((image.width, image.height)),
            TextureStorage::External(plane) => Some((plane.width, plane.height)),
            TextureStorage::Empty => None,
        }
    }

    pub fn texture_filter(&self, texture: TextureId) -> Option<TextureFilter> {
        self.state.borrow().textures.get(&texture).map(|t| t.filter)
    }

    fn resolve_plane(&self, desc: &ExternalImageDesc) -> Result<PlaneView> {
        let bpp = plane_bytes_per_pixel(desc.format).ok_or_else(|| {
            DmaViewError::UnsupportedFormat(format!("cannot import {} planes", desc.format))
        })?;
        if desc.width == 0 || desc.height == 0 {
            return Err(DmaViewError::Import(format!(
                "plane has zero size {}x{}",
                desc.width, desc.height
            )));
        }
        let max = self.capabilities.max_texture_size;
        if desc.width > max || desc.height > max {
            return Err(DmaViewError::Import(format!(
                "plane {}x{} exceeds max texture size {max}",
                desc.width, desc.height
            )));
        }
        let buffer = self
            .pool
            .as_ref()
            .and_then(|pool| pool.resolve(desc.handle))
            .ok_or_else(|| DmaViewError::Import(format!("no buffer behind fd {}", desc.handle)))?;

        let row_bytes = u64::from(desc.width) * u64::from(bpp);
        if u64::from(desc.stride) < row_bytes {
            return Err(DmaViewError::Import(format!(
                "stride {} shorter than row of {row_bytes} bytes",
                desc.stride
            )));
        }
        let needed = u64::from(desc.offset)
            + u64::from(desc.stride) * u64::from(desc.height - 1)
            + row_bytes;
        if needed > buffer.len() as u64 {
            return Err(DmaViewError::Import(format!(
                "plane needs {needed} bytes, fd {} has {}",
                desc.handle,
                buffer.len()
            )));
        }

        Ok(PlaneView {
            buffer,
            width: desc.width,
            height: desc.height,
            offset: desc.offset as usize,
            stride: desc.stride as usize,
            bytes_per_pixel: bpp as usize,
        })
    }
}

impl fmt::Debug for SoftwareDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDriver")
            .field("capabilities", &self.capabilities)
            .field("counters", &self.counters())
            .finish()
    }
}

impl GpuDriver for SoftwareDriver {
    fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    fn create_external_image(&self, desc: &ExternalImageDesc) -> Result<ImageId> {
        if !self.capabilities.external_image_import {
            return Err(DmaViewError::Import(
                "EGL_EXT_image_dma_buf_import is not available".into(),
            ));
        }
        let plane = self.resolve_plane(desc)?;
        let mut st = self.state.borrow_mut();
        let id = ImageId(st.next_id());
        st.images.insert(id, plane);
        st.counters.images_created += 1;
        trace!(image = id.0, fd = desc.handle.0, format = %desc.format, "image created");
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        let mut st = self.state.borrow_mut();
        if st.images.remove(&image).is_some() {
            st.counters.images_destroyed += 1;
        }
    }

    fn create_texture(&self) -> Result<TextureId> {
        let mut st = self.state.borrow_mut();
        let id = TextureId(st.next_id());
        st.textures.insert(
            id,
            SwTexture {
                storage: TextureStorage::Empty,
                filter: TextureFilter::default(),
            },
        );
        st.counters.textures_created += 1;
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut st = self.state.borrow_mut();
        if st.textures.remove(&texture).is_none() {
            return;
        }
        st.counters.textures_deleted += 1;
        for unit in st.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
        for attachment in st.framebuffers.values_mut() {
            if *attachment == Some(texture) {
                *attachment = None;
            }
        }
    }

    fn texture_from_image(&self, image: ImageId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let texture = st
            .bound_texture()
            .ok_or_else(|| DmaViewError::Gpu("no texture bound to the active unit".into()))?;
        let plane = st
            .images
            .get(&image)
            .cloned()
            .ok_or_else(|| DmaViewError::Import(format!("unknown image {}", image.0)))?;
        let slot = st
            .textures
            .get_mut(&texture)
            .ok_or_else(|| DmaViewError::Gpu(format!("texture {} was deleted", texture.0)))?;
        slot.storage = TextureStorage::External(plane);
        Ok(())
    }

    fn tex_image_rgba8(&self, width: u32, height: u32, pixels: Option<&[u8]>) -> Result<()> {
        let max = self.capabilities.max_texture_size;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(DmaViewError::Gpu(format!(
                "invalid texture size {width}x{height} (max {max})"
            )));
        }
        let mut image = Rgba8Image::new(width, height);
        if let Some(data) = pixels {
            if data.len() != image.pixels.len() {
                return Err(DmaViewError::Gpu(format!(
                    "expected {} bytes of pixel data, got {}",
                    image.pixels.len(),
                    data.len()
                )));
            }
            image.pixels.copy_from_slice(data);
        }

        let mut st = self.state.borrow_mut();
        let texture = st
            .bound_texture()
            .ok_or_else(|| DmaViewError::Gpu("no texture bound to the active unit".into()))?;
        let slot = st
            .textures
            .get_mut(&texture)
            .ok_or_else(|| DmaViewError::Gpu(format!("texture {} was deleted", texture.0)))?;
        slot.storage = TextureStorage::Rgba8(image);
        st.counters.texture_allocations += 1;
        Ok(())
    }

    fn tex_filter(&self, filter: TextureFilter) {
        let mut st = self.state.borrow_mut();
        if let Some(texture) = st.bound_texture() {
            if let Some(slot) = st.textures.get_mut(&texture) {
                slot.filter = filter;
            }
        }
    }

    fn create_framebuffer(&self) -> Result<FramebufferId> {
        let mut st = self.state.borrow_mut();
        let id = FramebufferId(st.next_id());
        st.framebuffers.insert(id, None);
        st.counters.framebuffers_created += 1;
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut st = self.state.borrow_mut();
        if st.framebuffers.remove(&framebuffer).is_none() {
            return;
        }
        st.counters.framebuffers_deleted += 1;
        if st.bound_framebuffer == Some(framebuffer) {
            st.bound_framebuffer = None;
        }
    }

    fn framebuffer_texture(&self, texture: TextureId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        let framebuffer = st
            .bound_framebuffer
            .ok_or_else(|| DmaViewError::Gpu("cannot attach to the default framebuffer".into()))?;
        let complete = matches!(
            st.textures.get(&texture).map(|t| &t.storage),
            Some(TextureStorage::Rgba8(_))
        );
        if !complete {
            return Err(DmaViewError::Gpu(format!(
                "framebuffer {} incomplete: texture {} has no color storage",
                framebuffer.0, texture.0
            )));
        }
        st.framebuffers.insert(framebuffer, Some(texture));
        Ok(())
    }

    fn create_program(&self, source: &ProgramSource) -> Result<ProgramId> {
        let compiles = |stage: &str| stage.contains("void main");
        if !compiles(source.vertex) || !compiles(source.fragment) {
            return Err(DmaViewError::Configuration(format!(
                "program {} failed to compile: missing entry point",
                source.label
            )));
        }
        if self.failing_programs.contains(&source.kind) {
            return Err(DmaViewError::Configuration(format!(
                "program {} failed to link",
                source.label
            )));
        }
        let mut st = self.state.borrow_mut();
        let id = ProgramId(st.next_id());
        st.programs.insert(
            id,
            SwProgram {
                kind: source.kind,
                values: HashMap::new(),
            },
        );
        st.counters.programs_created += 1;
        debug!(program = source.label, id = id.0, "software program built");
        Ok(id)
    }

    fn delete_program(&self, program: ProgramId) {
        let mut st = self.state.borrow_mut();
        if st.programs.remove(&program).is_none() {
            return;
        }
        st.counters.programs_deleted += 1;
        if st.program == Some(program) {
            st.program = None;
        }
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let st = self.state.borrow();
        let kind = st.programs.get(&program)?.kind;
        uniform_names(kind)
            .iter()
            .position(|candidate| *candidate == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn set_uniform(&self, location: UniformLocation, value: UniformValue) {
        let mut st = self.state.borrow_mut();
        let Some(current) = st.program else {
            trace!("uniform set with no program in use");
            return;
        };
        if let Some(program) = st.programs.get_mut(&current) {
            program.values.insert(location, value);
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        self.state.borrow_mut().bound_framebuffer = framebuffer;
    }

    fn use_program(&self, program: Option<ProgramId>) {
        self.state.borrow_mut().program = program;
    }

    fn active_texture(&self, unit: u32) {
        let mut st = self.state.borrow_mut();
        if (unit as usize) < st.units.len() {
            st.active_unit = unit;
        }
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        let mut st = self.state.borrow_mut();
        let unit = st.active_unit as usize;
        if let Some(slot) = st.units.get_mut(unit) {
            *slot = texture;
        }
    }

    fn enable_vertex_attrib(&self, index: u32) {
        if index < self.capabilities.vertex_attribs.min(32) {
            self.state.borrow_mut().enabled_attribs |= 1 << index;
        }
    }

    fn disable_vertex_attrib(&self, index: u32) {
        if index < self.capabilities.vertex_attribs.min(32) {
            self.state.borrow_mut().enabled_attribs &= !(1 << index);
        }
    }

    fn vertex_attrib_pointer(&self, index: u32, pointer: VertexAttribPointer) {
        self.state.borrow_mut().pointers.insert(index, pointer);
    }

    fn viewport(&self, viewport: Viewport) {
        self.state.borrow_mut().viewport = viewport;
    }

    fn binding_state(&self) -> BindingState {
        let st = self.state.borrow();
        BindingState {
            framebuffer: st.bound_framebuffer,
            program: st.program,
            active_unit: st.active_unit,
            unit_textures: st.units.iter().copied().collect(),
            enabled_attribs: st.enabled_attribs,
            viewport: st.viewport,
        }
    }

    fn clear(&self, color: Color) {
        let rgba = color.to_rgba8();
        let mut st = self.state.borrow_mut();
        match st.bound_framebuffer {
            None => st.back_buffer.fill(rgba),
            Some(fb) => {
                let attachment = st.framebuffers.get(&fb).copied().flatten();
                if let Some(TextureStorage::Rgba8(image)) = attachment
                    .and_then(|t| st.textures.get_mut(&t))
                    .map(|t| &mut t.storage)
                {
                    image.fill(rgba);
                }
            }
        }
        st.counters.clears += 1;
    }

    fn draw_triangle_strip(&self, first: u32, count: u32) -> Result<()> {
        let mut st = self.state.borrow_mut();
        raster::draw(&mut st, first, count)?;
        st.counters.draws += 1;
        Ok(())
    }
}

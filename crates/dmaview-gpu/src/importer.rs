//! Zero-copy plane import.
//!
//! Each plane of a decoded frame becomes an external image plus a texture
//! bound to it. No pixel data is copied: the texture samples the decoder's
//! buffer directly, so the buffer must outlive the [`ImportedPlane`].

use crate::driver::{ExternalImageDesc, GpuDriver, ImageId, TextureFilter, TextureId};
use crate::pass::ScopedRenderPass;
use dmaview_core::{
    plane_bytes_per_pixel, BufferHandle, DmaViewError, Fourcc, FrameDescriptor, Result,
};
use smallvec::SmallVec;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// A plane visible to the GPU as a texture. Releases its texture and image
/// when dropped.
pub struct ImportedPlane {
    driver: Rc<dyn GpuDriver>,
    image: ImageId,
    texture: TextureId,
    format: Fourcc,
    width: u32,
    height: u32,
}

impl ImportedPlane {
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn format(&self) -> Fourcc {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for ImportedPlane {
    fn drop(&mut self) {
        self.driver.delete_texture(self.texture);
        self.driver.destroy_image(self.image);
    }
}

impl fmt::Debug for ImportedPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportedPlane")
            .field("texture", &self.texture)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

pub type ImportedPlanes = SmallVec<[ImportedPlane; 3]>;

pub struct PlaneImporter {
    driver: Rc<dyn GpuDriver>,
    imported: Cell<u64>,
}

impl PlaneImporter {
    pub fn new(driver: Rc<dyn GpuDriver>) -> Self {
        Self {
            driver,
            imported: Cell::new(0),
        }
    }

    /// Planes imported so far.
    pub fn imported(&self) -> u64 {
        self.imported.get()
    }

    /// Wrap one plane of `handle` as a texture.
    pub fn import_plane(
        &self,
        handle: BufferHandle,
        width: u32,
        height: u32,
        format: Fourcc,
        stride: u32,
        offset: u32,
    ) -> Result<ImportedPlane> {
        if !self.driver.capabilities().external_image_import {
            return Err(DmaViewError::Import(
                "external image import is not supported by this driver".into(),
            ));
        }
        let Some(bpp) = plane_bytes_per_pixel(format) else {
            return Err(DmaViewError::UnsupportedFormat(format!(
                "plane format {format} cannot be imported"
            )));
        };
        if width == 0 || height == 0 {
            return Err(DmaViewError::Import(format!(
                "empty {format} plane {width}x{height}"
            )));
        }
        if u64::from(stride) < u64::from(width) * u64::from(bpp) {
            return Err(DmaViewError::Import(format!(
                "stride {stride} too small for {width} {format} texels"
            )));
        }

        let driver = &*self.driver;
        let image = driver.create_external_image(&ExternalImageDesc {
            handle,
            width,
            height,
            format,
            offset,
            stride,
        })?;
        let texture = match driver.create_texture() {
            Ok(texture) => texture,
            Err(e) => {
                driver.destroy_image(image);
                return Err(e);
            }
        };
        // From here on dropping `plane` releases both objects.
        let plane = ImportedPlane {
            driver: self.driver.clone(),
            image,
            texture,
            format,
            width,
            height,
        };

        {
            let _pass = ScopedRenderPass::begin(driver);
            driver.bind_texture(Some(texture));
            driver.texture_from_image(image)?;
            driver.tex_filter(TextureFilter::Nearest);
        }

        self.imported.set(self.imported.get() + 1);
        trace!(fd = handle.0, %format, width, height, stride, offset, "plane imported");
        Ok(plane)
    }

    /// Import every plane the frame's layout needs, in plane order.
    pub fn import_frame(&self, frame: &FrameDescriptor) -> Result<ImportedPlanes> {
        frame.validate()?;
        let layout = frame.layout;
        let mut planes = ImportedPlanes::new();
        for (index, desc) in frame.planes.iter().take(layout.plane_count()).enumerate() {
            let (format, (width, height)) = layout
                .plane_format(index)
                .zip(layout.plane_size(index, frame.width, frame.height))
                .ok_or_else(|| {
                    DmaViewError::UnsupportedFormat(format!("{layout} has no plane {index}"))
                })?;
            planes.push(self.import_plane(
                desc.handle,
                width,
                height,
                format,
                desc.stride,
                desc.offset,
            )?);
        }
        Ok(planes)
    }
}

impl fmt::Debug for PlaneImporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaneImporter")
            .field("imported", &self.imported.get())
            .finish()
    }
}

//! GPU import boundary
//!
//! The renderer is an external collaborator; the core only needs the four
//! operations of [`GpuImporter`]. [`GbmImporter`] talks to a DRM render node
//! through `gbm`, [`PassthroughImporter`] keeps buffers alive without a GPU.

use super::descriptor::BufferDescriptor;
use super::formats::{fallback_table, fourcc_name, DmabufFormat, DRM_FORMAT_MOD_LINEAR};
use super::ImportError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;
use std::path::Path;

/// Opaque handle for a GPU-side buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuHandle(pub u64);

/// Texture name handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

#[cfg_attr(test, mockall::automock)]
pub trait GpuImporter {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Supported (format, modifier) pairs, `None` when the query is unavailable.
    fn query_dmabuf_formats(&self) -> Option<Vec<DmabufFormat>>;

    /// Imports the planes. The descriptor keeps ownership of the fds.
    fn import_dmabuf(&mut self, descriptor: &BufferDescriptor) -> Result<GpuHandle, ImportError>;

    fn destroy_import(&mut self, handle: GpuHandle);

    fn create_texture(&mut self, handle: GpuHandle) -> Result<TextureId, ImportError>;
}

/// Accepts every validated descriptor without touching a GPU.
#[derive(Debug, Default)]
pub struct PassthroughImporter {
    next: u64,
    live: HashMap<u64, (i32, i32)>,
}

impl PassthroughImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_imports(&self) -> usize {
        self.live.len()
    }
}

impl GpuImporter for PassthroughImporter {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn query_dmabuf_formats(&self) -> Option<Vec<DmabufFormat>> {
        None
    }

    fn import_dmabuf(&mut self, descriptor: &BufferDescriptor) -> Result<GpuHandle, ImportError> {
        self.next += 1;
        self.live
            .insert(self.next, (descriptor.width(), descriptor.height()));
        Ok(GpuHandle(self.next))
    }

    fn destroy_import(&mut self, handle: GpuHandle) {
        self.live.remove(&handle.0);
    }

    fn create_texture(&mut self, handle: GpuHandle) -> Result<TextureId, ImportError> {
        if self.live.contains_key(&handle.0) {
            Ok(TextureId(handle.0))
        } else {
            Err(ImportError::Gpu(format!("no import for handle {}", handle.0)))
        }
    }
}

/// Imports DMA-BUFs as GBM buffer objects on a render node.
pub struct GbmImporter {
    device: gbm::Device<File>,
    next: u64,
    objects: HashMap<u64, gbm::BufferObject<()>>,
}

impl GbmImporter {
    /// Opens `render_node`, usually `/dev/dri/renderD128`.
    pub fn open(render_node: &Path) -> Result<Self, ImportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(render_node)
            .map_err(|e| ImportError::Gpu(format!("{}: {}", render_node.display(), e)))?;
        let device = gbm::Device::new(file)
            .map_err(|e| ImportError::Gpu(format!("gbm device: {}", e)))?;
        info!(
            "🎮 GBM importer on {} ({})",
            render_node.display(),
            device.backend_name()
        );
        Ok(Self {
            device,
            next: 0,
            objects: HashMap::new(),
        })
    }
}

impl GpuImporter for GbmImporter {
    fn name(&self) -> &'static str {
        "gbm"
    }

    fn query_dmabuf_formats(&self) -> Option<Vec<DmabufFormat>> {
        // GBM has no modifier enumeration; probe the fallback set for LINEAR.
        let formats: Vec<DmabufFormat> = fallback_table()
            .into_iter()
            .filter(|f| match gbm::Format::try_from(f.format) {
                Ok(format) => self
                    .device
                    .is_format_supported(format, gbm::BufferObjectFlags::RENDERING),
                Err(_) => false,
            })
            .collect();
        debug!("GBM reports {} usable formats", formats.len());
        (!formats.is_empty()).then_some(formats)
    }

    fn import_dmabuf(&mut self, descriptor: &BufferDescriptor) -> Result<GpuHandle, ImportError> {
        let name = fourcc_name(descriptor.format());
        let format = gbm::Format::try_from(descriptor.format())
            .map_err(|_| ImportError::Gpu(format!("unknown fourcc {}", name)))?;
        let planes = descriptor.planes();
        let mut fds = [None, None, None, None];
        let mut strides = [0i32; 4];
        let mut offsets = [0i32; 4];
        for (i, plane) in planes.iter().enumerate().take(4) {
            fds[i] = Some(plane.fd.as_fd());
            strides[i] = plane.stride as i32;
            offsets[i] = plane.offset as i32;
        }
        let modifier = gbm::Modifier::from(descriptor.modifier().unwrap_or(DRM_FORMAT_MOD_LINEAR));

        let bo = self
            .device
            .import_buffer_object_from_dma_buf_with_modifiers::<()>(
                planes.len() as u32,
                fds,
                descriptor.width() as u32,
                descriptor.height() as u32,
                format,
                gbm::BufferObjectFlags::RENDERING,
                strides,
                offsets,
                modifier,
            )
            .map_err(|e| {
                warn!(
                    "GBM import of {}x{} {} failed: {}",
                    descriptor.width(),
                    descriptor.height(),
                    name,
                    e
                );
                ImportError::Gpu(e.to_string())
            })?;

        self.next += 1;
        self.objects.insert(self.next, bo);
        Ok(GpuHandle(self.next))
    }

    fn destroy_import(&mut self, handle: GpuHandle) {
        self.objects.remove(&handle.0);
    }

    fn create_texture(&mut self, handle: GpuHandle) -> Result<TextureId, ImportError> {
        // The renderer binds the buffer object itself; the texture name is the
        // handle it looks the object up by.
        if self.objects.contains_key(&handle.0) {
            Ok(TextureId(handle.0))
        } else {
            Err(ImportError::Gpu(format!("no buffer object for handle {}", handle.0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::descriptor::ParamsBuilder;
    use crate::buffer::formats::DRM_FORMAT_ARGB8888;

    #[test]
    fn test_passthrough_lifecycle() {
        let mut importer = PassthroughImporter::new();
        assert!(importer.query_dmabuf_formats().is_none());

        let mut builder = ParamsBuilder::new();
        let file = tempfile::tempfile().unwrap();
        file.set_len(4096).unwrap();
        builder.add_plane(0, file.into(), 0, 64, 0).unwrap();
        let desc = builder.freeze(16, 16, DRM_FORMAT_ARGB8888, 0).unwrap();

        let handle = importer.import_dmabuf(&desc).unwrap();
        assert_eq!(importer.live_imports(), 1);
        assert_eq!(importer.create_texture(handle).unwrap(), TextureId(handle.0));

        importer.destroy_import(handle);
        assert_eq!(importer.live_imports(), 0);
        assert!(importer.create_texture(handle).is_err());
    }
}

//! `zwp_linux_dmabuf_v1` params objects and client buffers
//!
//! A params object goes `Building -> Imported | Rejected` and is usable once.
//! `create` imports right away so a failure can be answered with `failed`;
//! `create_immed` has no failure event, so it only validates up front and
//! imports on the first commit that uses the buffer.

use super::{Extension, ExtensionError, ProtocolEvent};
use crate::buffer::{
    BufferDescriptor, BufferImportEngine, DmabufFormat, ImportError, ImportedBuffer,
    ParamsBuilder, ParamsError, TextureId,
};
use crate::buffer::formats::fourcc_name;
use crate::geometry::Size;
use crate::ids::{BufferId, IdAllocator, ParamsId};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use thiserror::Error;

pub const INTERFACE: &str = "zwp_linux_dmabuf_v1";
/// v4 feedback objects are not implemented.
pub const VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsState {
    Building,
    Imported(BufferId),
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    /// Sent to the client as a protocol error on the params object.
    #[error(transparent)]
    Protocol(#[from] ParamsError),
    /// Answered with `zwp_linux_buffer_params_v1.failed`.
    #[error(transparent)]
    Import(#[from] ImportError),
}

struct ParamsEntry {
    builder: ParamsBuilder,
    state: ParamsState,
}

enum BufferSlot {
    /// Validated `create_immed` buffer waiting for its first commit
    Pending(BufferDescriptor),
    Imported(ImportedBuffer),
    Failed { width: i32, height: i32 },
}

pub struct DmabufExtension {
    engine: BufferImportEngine,
    params: HashMap<ParamsId, ParamsEntry>,
    buffers: HashMap<BufferId, BufferSlot>,
    params_ids: IdAllocator,
    buffer_ids: IdAllocator,
}

impl DmabufExtension {
    pub fn new(engine: BufferImportEngine) -> Self {
        Self {
            engine,
            params: HashMap::new(),
            buffers: HashMap::new(),
            params_ids: IdAllocator::new(),
            buffer_ids: IdAllocator::new(),
        }
    }

    /// Negotiated (format, modifier) pairs to advertise on bind.
    pub fn formats(&self) -> &[DmabufFormat] {
        self.engine.formats()
    }

    pub fn engine(&self) -> &BufferImportEngine {
        &self.engine
    }

    pub fn create_params(&mut self) -> ParamsId {
        let id = ParamsId(self.params_ids.next());
        self.params.insert(
            id,
            ParamsEntry {
                builder: ParamsBuilder::new(),
                state: ParamsState::Building,
            },
        );
        id
    }

    pub fn params_state(&self, params: ParamsId) -> Option<ParamsState> {
        self.params.get(&params).map(|p| p.state)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        params: ParamsId,
        plane_idx: u32,
        fd: OwnedFd,
        offset: u32,
        stride: u32,
        modifier_hi: u32,
        modifier_lo: u32,
    ) -> Result<(), ParamsError> {
        let entry = self.params.get_mut(&params).ok_or(ParamsError::AlreadyUsed)?;
        let modifier = ((modifier_hi as u64) << 32) | modifier_lo as u64;
        entry.builder.add_plane(plane_idx, fd, offset, stride, modifier)
    }

    /// Freezes, validates and imports. Resource failures leave the params
    /// object `Rejected` and come back as [`CreateError::Import`].
    pub fn create(
        &mut self,
        params: ParamsId,
        width: i32,
        height: i32,
        format: u32,
        flags: u32,
    ) -> Result<BufferId, CreateError> {
        let entry = self.params.get_mut(&params).ok_or(ParamsError::AlreadyUsed)?;
        let descriptor = entry.builder.freeze(width, height, format, flags)?;
        match self.engine.import(descriptor) {
            Ok(imported) => {
                let id = BufferId(self.buffer_ids.next());
                entry.state = ParamsState::Imported(id);
                self.buffers.insert(id, BufferSlot::Imported(imported));
                info!(
                    "🧱 DMA-BUF {} created: {}x{} {}",
                    id,
                    width,
                    height,
                    fourcc_name(format)
                );
                Ok(id)
            }
            Err(e) => {
                entry.state = ParamsState::Rejected;
                warn!(
                    "DMA-BUF create {}x{} {} failed: {}",
                    width,
                    height,
                    fourcc_name(format),
                    e
                );
                Err(CreateError::Import(e))
            }
        }
    }

    /// Creates a buffer without a failure path. An invalid buffer is still
    /// allocated an id but stays unusable.
    pub fn create_immed(
        &mut self,
        params: ParamsId,
        width: i32,
        height: i32,
        format: u32,
        flags: u32,
    ) -> Result<BufferId, ParamsError> {
        let entry = self.params.get_mut(&params).ok_or(ParamsError::AlreadyUsed)?;
        let descriptor = entry.builder.freeze(width, height, format, flags)?;
        let id = BufferId(self.buffer_ids.next());
        match self.engine.validate(&descriptor) {
            Ok(()) => {
                entry.state = ParamsState::Imported(id);
                self.buffers.insert(id, BufferSlot::Pending(descriptor));
                debug!("DMA-BUF {} queued for import on first commit", id);
            }
            Err(e) => {
                entry.state = ParamsState::Rejected;
                warn!("DMA-BUF create_immed rejected, {} left inert: {}", id, e);
                self.buffers.insert(id, BufferSlot::Failed { width, height });
            }
        }
        Ok(id)
    }

    /// Imports a lazily created buffer. Called when a commit references it.
    pub fn ensure_imported(&mut self, buffer: BufferId) -> Result<(), ImportError> {
        let slot = self.buffers.remove(&buffer).ok_or(ImportError::Inert)?;
        let (slot, result) = match slot {
            BufferSlot::Pending(descriptor) => {
                let (width, height) = (descriptor.width(), descriptor.height());
                match self.engine.import(descriptor) {
                    Ok(imported) => (BufferSlot::Imported(imported), Ok(())),
                    Err(e) => {
                        warn!("Deferred import of {} failed, left inert: {}", buffer, e);
                        (BufferSlot::Failed { width, height }, Err(e))
                    }
                }
            }
            imported @ BufferSlot::Imported(_) => (imported, Ok(())),
            failed @ BufferSlot::Failed { .. } => (failed, Err(ImportError::Inert)),
        };
        self.buffers.insert(buffer, slot);
        result
    }

    pub fn is_imported(&self, buffer: BufferId) -> bool {
        matches!(self.buffers.get(&buffer), Some(BufferSlot::Imported(_)))
    }

    pub fn buffer_size(&self, buffer: BufferId) -> Option<Size> {
        match self.buffers.get(&buffer)? {
            BufferSlot::Pending(d) => Some(Size::new(d.width(), d.height())),
            BufferSlot::Imported(b) => Some(Size::new(b.width(), b.height())),
            BufferSlot::Failed { width, height } => Some(Size::new(*width, *height)),
        }
    }

    pub fn texture(&mut self, buffer: BufferId) -> Result<TextureId, ImportError> {
        match self.buffers.get(&buffer) {
            Some(BufferSlot::Imported(imported)) => self.engine.texture(imported),
            _ => Err(ImportError::Inert),
        }
    }

    /// Drops a params object; fds it still holds are closed.
    pub fn destroy_params(&mut self, params: ParamsId) {
        self.params.remove(&params);
    }

    /// Releases a buffer when its `wl_buffer` is destroyed.
    pub fn destroy_buffer(&mut self, buffer: BufferId) {
        match self.buffers.remove(&buffer) {
            Some(BufferSlot::Imported(imported)) => self.engine.release(imported),
            Some(_) => {}
            None => warn!("Destroy of unknown {}", buffer),
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

impl Extension for DmabufExtension {
    fn interface(&self) -> &'static str {
        INTERFACE
    }

    fn version(&self) -> u32 {
        VERSION
    }

    fn init(&mut self) -> Result<(), ExtensionError> {
        let count = self.engine.negotiate_formats().len();
        if count == 0 {
            return Err(ExtensionError::Init {
                interface: INTERFACE,
                reason: "no usable DMA-BUF formats".into(),
            });
        }
        info!(
            "DMA-BUF import via {} importer, {} formats",
            self.engine.importer_name(),
            count
        );
        Ok(())
    }

    fn take_events(&mut self) -> Vec<ProtocolEvent> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::formats::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR};
    use crate::buffer::PassthroughImporter;

    fn extension() -> DmabufExtension {
        let mut ext = DmabufExtension::new(BufferImportEngine::new(Box::new(
            PassthroughImporter::new(),
        )));
        ext.init().unwrap();
        ext
    }

    fn fd() -> OwnedFd {
        let file = tempfile::tempfile().unwrap();
        file.set_len(100 * 400).unwrap();
        file.into()
    }

    fn add_linear_plane(ext: &mut DmabufExtension, params: ParamsId) {
        let modifier = DRM_FORMAT_MOD_LINEAR;
        ext.add(params, 0, fd(), 0, 400, (modifier >> 32) as u32, modifier as u32)
            .unwrap();
    }

    #[test]
    fn test_create_imports_eagerly() {
        let mut ext = extension();
        let params = ext.create_params();
        add_linear_plane(&mut ext, params);
        let buffer = ext.create(params, 100, 100, DRM_FORMAT_ARGB8888, 0).unwrap();
        assert!(ext.is_imported(buffer));
        assert_eq!(ext.params_state(params), Some(ParamsState::Imported(buffer)));
        assert_eq!(ext.buffer_size(buffer), Some(Size::new(100, 100)));

        ext.destroy_buffer(buffer);
        assert_eq!(ext.engine().live_imports(), 0);
    }

    #[test]
    fn test_create_with_unknown_format_fails() {
        let mut ext = extension();
        let params = ext.create_params();
        add_linear_plane(&mut ext, params);
        let err = ext.create(params, 100, 100, 0x1122_3344, 0).unwrap_err();
        assert!(matches!(err, CreateError::Import(_)));
        assert_eq!(ext.params_state(params), Some(ParamsState::Rejected));
        assert_eq!(ext.buffer_count(), 0);
    }

    #[test]
    fn test_params_used_once() {
        let mut ext = extension();
        let params = ext.create_params();
        add_linear_plane(&mut ext, params);
        ext.create(params, 100, 100, DRM_FORMAT_ARGB8888, 0).unwrap();
        assert_eq!(
            ext.create(params, 100, 100, DRM_FORMAT_ARGB8888, 0),
            Err(CreateError::Protocol(ParamsError::AlreadyUsed))
        );
    }

    #[test]
    fn test_create_immed_imports_lazily() {
        let mut ext = extension();
        let params = ext.create_params();
        add_linear_plane(&mut ext, params);
        let buffer = ext
            .create_immed(params, 100, 100, DRM_FORMAT_ARGB8888, 0)
            .unwrap();
        assert!(!ext.is_imported(buffer));
        assert_eq!(ext.engine().live_imports(), 0);

        ext.ensure_imported(buffer).unwrap();
        assert!(ext.is_imported(buffer));
        assert!(ext.texture(buffer).is_ok());
        ext.ensure_imported(buffer).unwrap();
        assert_eq!(ext.engine().live_imports(), 1);
    }

    #[test]
    fn test_create_immed_invalid_is_inert() {
        let mut ext = extension();
        let params = ext.create_params();
        add_linear_plane(&mut ext, params);
        let buffer = ext.create_immed(params, 100, 100, 0x1122_3344, 0).unwrap();
        assert_eq!(ext.params_state(params), Some(ParamsState::Rejected));
        assert_eq!(ext.ensure_imported(buffer), Err(ImportError::Inert));
        assert!(ext.texture(buffer).is_err());
        ext.destroy_buffer(buffer);
        assert_eq!(ext.buffer_count(), 0);
    }
}

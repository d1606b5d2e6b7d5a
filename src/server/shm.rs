//! `wl_shm`: pools mapped from client file descriptors

use super::error::ProtocolError;
use super::state::ServerState;
use crate::resource::ResourceKind;
use log::{debug, warn};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::File;
use std::sync::Arc;
use wayland_server::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource, WEnum,
};

/// Formats every compositor must take.
const SUPPORTED_FORMATS: [wl_shm::Format; 2] = [wl_shm::Format::Argb8888, wl_shm::Format::Xrgb8888];

pub struct ShmPoolData {
    file: File,
    inner: Mutex<PoolMapping>,
}

struct PoolMapping {
    map: Arc<Mmap>,
    size: i32,
}

impl ShmPoolData {
    fn map(file: &File) -> std::io::Result<Mmap> {
        // SAFETY: the client owns the file; a shrinking file can only make
        // our reads fault, which the size checks below keep us away from.
        unsafe { Mmap::map(file) }
    }

    pub fn size(&self) -> i32 {
        self.inner.lock().size
    }
}

/// Pixels of one `wl_buffer` inside a pool mapping.
pub struct ShmBufferData {
    pub id: u64,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub offset: i32,
    pub format: u32,
    map: Arc<Mmap>,
}

impl ShmBufferData {
    pub fn pixels(&self) -> &[u8] {
        let start = self.offset as usize;
        let end = start + (self.stride as usize) * (self.height as usize);
        self.map.get(start..end).unwrap_or(&[])
    }
}

/// Stride and bounds checks for `wl_shm_pool.create_buffer`.
pub fn validate_buffer(
    pool_size: i32,
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
) -> Result<(), ProtocolError> {
    if width <= 0 || height <= 0 {
        return Err(ProtocolError::invalid_shm_stride(stride));
    }
    if offset < 0 || stride < width.saturating_mul(4) {
        return Err(ProtocolError::invalid_shm_stride(stride));
    }
    let end = (offset as i64) + (stride as i64) * (height as i64);
    if end > pool_size as i64 {
        return Err(ProtocolError::invalid_shm_stride(stride));
    }
    Ok(())
}

impl GlobalDispatch<wl_shm::WlShm, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        if state.track_global(client, &shm, ResourceKind::Shm).is_none() {
            return;
        }
        for format in SUPPORTED_FORMATS {
            shm.format(format);
        }
    }
}

impl Dispatch<wl_shm::WlShm, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            if size <= 0 {
                ProtocolError::invalid_shm_stride(size).post(resource);
                return;
            }
            let file: File = fd.into();
            let map = match ShmPoolData::map(&file) {
                Ok(map) if map.len() >= size as usize => map,
                Ok(map) => {
                    ProtocolError::invalid_shm_fd(format!(
                        "pool of {} bytes backed by {} bytes",
                        size,
                        map.len()
                    ))
                    .post(resource);
                    return;
                }
                Err(e) => {
                    ProtocolError::invalid_shm_fd(format!("mmap failed: {}", e)).post(resource);
                    return;
                }
            };
            let pool = data_init.init(
                id,
                ShmPoolData {
                    file,
                    inner: Mutex::new(PoolMapping {
                        map: Arc::new(map),
                        size,
                    }),
                },
            );
            state.track(client, &pool, ResourceKind::ShmPool);
        }
    }

    fn destroyed(state: &mut Self, _client: WireClientId, resource: &wl_shm::WlShm, _data: &()) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ShmPoolData> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        data: &ShmPoolData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let format = match format {
                    WEnum::Value(f) if SUPPORTED_FORMATS.contains(&f) => f,
                    other => {
                        resource.post_error(
                            wl_shm::Error::InvalidFormat,
                            format!("unsupported format {:?}", other),
                        );
                        return;
                    }
                };
                let inner = data.inner.lock();
                if let Err(e) = validate_buffer(inner.size, offset, width, height, stride) {
                    e.post(resource);
                    return;
                }
                let buffer = data_init.init(
                    id,
                    ShmBufferData {
                        id: state.shm_ids.next(),
                        width,
                        height,
                        stride,
                        offset,
                        format: format as u32,
                        map: inner.map.clone(),
                    },
                );
                drop(inner);
                state.track(client, &buffer, ResourceKind::ShmBuffer);
            }
            wl_shm_pool::Request::Resize { size } => {
                let mut inner = data.inner.lock();
                if size < inner.size {
                    ProtocolError::invalid_shm_stride(size).post(resource);
                    return;
                }
                match ShmPoolData::map(&data.file) {
                    Ok(map) if map.len() >= size as usize => {
                        inner.map = Arc::new(map);
                        inner.size = size;
                        debug!("shm pool {} resized to {}", resource.id(), size);
                    }
                    Ok(_) => warn!("shm pool {} resize beyond its file", resource.id()),
                    Err(e) => warn!("shm pool {} remap failed: {}", resource.id(), e),
                }
            }
            wl_shm_pool::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_shm_pool::WlShmPool,
        _data: &ShmPoolData,
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wl_buffer::WlBuffer, ShmBufferData> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        _request: wl_buffer::Request,
        _data: &ShmBufferData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_buffer::WlBuffer,
        _data: &ShmBufferData,
    ) {
        state.resource_destroyed(resource);
    }
}

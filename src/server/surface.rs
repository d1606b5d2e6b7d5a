//! `wl_compositor`, `wl_surface`, `wl_region` and `wl_callback`

use super::error::ProtocolError;
use super::shm::ShmBufferData;
use super::state::{client_id, ServerState};
use crate::compositor::{BufferRef, Region};
use crate::geometry::Rectangle;
use crate::ids::SurfaceId;
use crate::resource::ResourceKind;
use log::{debug, warn};
use wayland_server::protocol::{wl_buffer, wl_callback, wl_compositor, wl_region, wl_surface};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource,
};

impl GlobalDispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let compositor = data_init.init(resource, ());
        state.track_global(client, &compositor, ResourceKind::Compositor);
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let Some(owner) = client_id(client) else {
                    return;
                };
                let surface = match state.compositor.create_surface(owner) {
                    Ok(surface) => surface,
                    Err(e) => {
                        ProtocolError::implementation(e.to_string()).post(resource);
                        return;
                    }
                };
                let wl = data_init.init(id, ());
                state.surfaces.insert(surface, wl.clone());
                if state.track(client, &wl, ResourceKind::Surface(surface)).is_none() {
                    state.compositor.destroy_surface(surface);
                    state.surfaces.remove(&surface);
                    return;
                }
                // Correlation needs the wire object, so it runs after the insert.
                state.process_compositor_events();
            }
            wl_compositor::Request::CreateRegion { id } => {
                let region = data_init.init(id, ());
                state.regions.insert(region.id(), Region::new());
                state.track(client, &region, ResourceKind::Region);
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_compositor::WlCompositor,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

fn buffer_ref(state: &ServerState, buffer: &wl_buffer::WlBuffer) -> Option<BufferRef> {
    if let Some(shm) = buffer.data::<ShmBufferData>() {
        return Some(BufferRef::Shm {
            id: shm.id,
            width: shm.width,
            height: shm.height,
        });
    }
    match state.kind_of(buffer)? {
        ResourceKind::DmabufBuffer(Some(id)) => Some(BufferRef::Dmabuf(id)),
        _ => None,
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(surface) = state.surface_id(resource) else {
            return;
        };
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                if (x, y) != (0, 0) && resource.version() >= 5 {
                    resource.post_error(
                        wl_surface::Error::InvalidOffset,
                        "attach offset must be zero since v5",
                    );
                    return;
                }
                let content = match &buffer {
                    Some(buffer) => match buffer_ref(state, buffer) {
                        Some(content) => Some(content),
                        None => {
                            warn!("{} attached an unknown buffer {}", surface, buffer.id());
                            return;
                        }
                    },
                    None => None,
                };
                if state.compositor.attach(surface, content).is_ok() {
                    state.pending_buffers.insert(surface, buffer);
                }
            }
            wl_surface::Request::Damage {
                x,
                y,
                width,
                height,
            }
            | wl_surface::Request::DamageBuffer {
                x,
                y,
                width,
                height,
            } => {
                let _ = state
                    .compositor
                    .damage(surface, Rectangle::new(x, y, width, height));
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, surface);
                state
                    .pending_frames
                    .entry(surface)
                    .or_default()
                    .push(callback);
            }
            wl_surface::Request::SetOpaqueRegion { .. } => {}
            wl_surface::Request::SetInputRegion { region } => {
                let region = region.and_then(|r| state.regions.get(&r.id()).cloned());
                let _ = state.compositor.set_input_region(surface, region);
            }
            wl_surface::Request::SetBufferScale { scale } => {
                if state.compositor.set_buffer_scale(surface, scale).is_err() {
                    ProtocolError::invalid_surface_scale(scale).post(resource);
                }
            }
            wl_surface::Request::SetBufferTransform { transform } => {
                debug!("{} buffer transform {:?} ignored", surface, transform);
            }
            wl_surface::Request::Offset { x, y } => {
                debug!("{} offset ({}, {}) ignored", surface, x, y);
            }
            wl_surface::Request::Commit => state.commit_surface(resource, surface),
            wl_surface::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_surface::WlSurface,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
        state.process_compositor_events();
    }
}

impl Dispatch<wl_region::WlRegion, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_region::WlRegion,
        request: wl_region::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(region) = state.regions.get_mut(&resource.id()) else {
            return;
        };
        match request {
            wl_region::Request::Add {
                x,
                y,
                width,
                height,
            } => region.add(Rectangle::new(x, y, width, height)),
            wl_region::Request::Subtract {
                x,
                y,
                width,
                height,
            } => region.subtract(Rectangle::new(x, y, width, height)),
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: WireClientId, resource: &wl_region::WlRegion, _data: &()) {
        state.resource_destroyed(resource);
    }
}

// Callbacks are never tracked: they have no requests and die with `done`.
impl Dispatch<wl_callback::WlCallback, SurfaceId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_callback::WlCallback,
        _request: wl_callback::Request,
        _data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

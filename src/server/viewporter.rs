//! `wp_viewporter` and viewports

use super::error::ProtocolError;
use super::state::ServerState;
use crate::ids::SurfaceId;
use crate::protocols::viewporter::ViewportError;
use crate::resource::ResourceKind;
use wayland_protocols::wp::viewporter::server::{wp_viewport, wp_viewporter};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New,
};

impl GlobalDispatch<wp_viewporter::WpViewporter, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wp_viewporter::WpViewporter>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let viewporter = data_init.init(resource, ());
        state.track_global(client, &viewporter, ResourceKind::Viewporter);
    }
}

impl Dispatch<wp_viewporter::WpViewporter, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &wp_viewporter::WpViewporter,
        request: wp_viewporter::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wp_viewporter::Request::GetViewport { id, surface } = request {
            let Some(sid) = state.surface_id(&surface) else {
                return;
            };
            let Some(viewporter) = state.compositor.protocols_mut().viewporter_mut() else {
                return;
            };
            if let Err(e) = viewporter.get_viewport(sid) {
                ProtocolError::from(&e).post(resource);
                return;
            }
            let viewport = data_init.init(id, sid);
            if state
                .track(client, &viewport, ResourceKind::Viewport(sid))
                .is_some()
            {
                state.viewports.insert(sid, viewport);
            }
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wp_viewporter::WpViewporter,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wp_viewport::WpViewport, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wp_viewport::WpViewport,
        request: wp_viewport::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let sid = *data;
        let surface_gone = state.compositor.surface(sid).is_none();
        let Some(viewporter) = state.compositor.protocols_mut().viewporter_mut() else {
            return;
        };
        let result = match request {
            wp_viewport::Request::SetSource { .. } | wp_viewport::Request::SetDestination { .. }
                if surface_gone =>
            {
                Err(ViewportError::NoSurface)
            }
            wp_viewport::Request::SetSource {
                x,
                y,
                width,
                height,
            } => viewporter.set_source(sid, x, y, width, height),
            wp_viewport::Request::SetDestination { width, height } => {
                viewporter.set_destination(sid, width, height)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            ProtocolError::from(&e).post(resource);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wp_viewport::WpViewport,
        _data: &SurfaceId,
    ) {
        state.resource_destroyed(resource);
    }
}

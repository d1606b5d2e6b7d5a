//! xdg-shell: `xdg_wm_base`, positioners, xdg surfaces, toplevels and popups

use super::error::ProtocolError;
use super::state::{Positioner, ServerState, XdgEntry};
use crate::compositor::Role;
use crate::geometry::Rectangle;
use crate::ids::SurfaceId;
use crate::resource::ResourceKind;
use log::{debug, info, warn};
use wayland_protocols::xdg::shell::server::{
    xdg_popup, xdg_positioner, xdg_surface, xdg_toplevel, xdg_wm_base,
};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource,
};

impl GlobalDispatch<xdg_wm_base::XdgWmBase, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<xdg_wm_base::XdgWmBase>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let wm_base = data_init.init(resource, ());
        state.track_global(client, &wm_base, ResourceKind::XdgWmBase);
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &xdg_wm_base::XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::CreatePositioner { id } => {
                let positioner = data_init.init(id, ());
                state.positioners.insert(positioner.id(), Positioner::default());
                state.track(client, &positioner, ResourceKind::XdgPositioner);
            }
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let Some(sid) = state.surface_id(&surface) else {
                    return;
                };
                let Some(committed) = state.compositor.surface(sid) else {
                    return;
                };
                if matches!(committed.role(), Some(Role::Layer | Role::XWayland)) {
                    resource.post_error(xdg_wm_base::Error::Role, format!("{} has another role", sid));
                    return;
                }
                if committed.current.buffer.is_some() || state.xdg.contains_key(&sid) {
                    resource.post_error(
                        xdg_wm_base::Error::InvalidSurfaceState,
                        format!("{} already has content or an xdg_surface", sid),
                    );
                    return;
                }
                let xdg_surface = data_init.init(id, sid);
                if state
                    .track(client, &xdg_surface, ResourceKind::XdgSurface(sid))
                    .is_none()
                {
                    return;
                }
                state.xdg.insert(
                    sid,
                    XdgEntry {
                        xdg_surface,
                        toplevel: None,
                        popup: None,
                        last_configure: None,
                        acked: false,
                    },
                );
            }
            xdg_wm_base::Request::Pong { serial } => {
                debug!("pong {}", serial);
            }
            xdg_wm_base::Request::Destroy => {
                let live = state
                    .xdg
                    .values()
                    .any(|e| e.xdg_surface.is_alive() && e.xdg_surface.id().same_client_as(&resource.id()));
                if live {
                    ProtocolError::xdg_defunct_surfaces().post(resource);
                }
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &xdg_wm_base::XdgWmBase,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<xdg_positioner::XdgPositioner, ()> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_positioner::XdgPositioner,
        request: xdg_positioner::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(positioner) = state.positioners.get_mut(&resource.id()) else {
            return;
        };
        match request {
            xdg_positioner::Request::SetSize { width, height } => {
                if width <= 0 || height <= 0 {
                    resource.post_error(
                        xdg_positioner::Error::InvalidInput,
                        format!("size {}x{} must be positive", width, height),
                    );
                    return;
                }
                positioner.size = Some((width, height));
            }
            xdg_positioner::Request::SetAnchorRect {
                x,
                y,
                width,
                height,
            } => {
                if width < 0 || height < 0 {
                    resource.post_error(
                        xdg_positioner::Error::InvalidInput,
                        format!("anchor rect {}x{} is negative", width, height),
                    );
                    return;
                }
                positioner.anchor_rect = Some(Rectangle::new(x, y, width, height));
            }
            xdg_positioner::Request::SetOffset { x, y } => positioner.offset = (x, y),
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &xdg_positioner::XdgPositioner,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

fn popup_geometry(
    state: &ServerState,
    wm_resource: &xdg_surface::XdgSurface,
    positioner: &xdg_positioner::XdgPositioner,
) -> Option<Rectangle> {
    let geometry = state
        .positioners
        .get(&positioner.id())
        .and_then(Positioner::geometry);
    if geometry.is_none() {
        wm_resource.post_error(
            xdg_wm_base::Error::InvalidPositioner,
            "positioner needs a size and an anchor rect",
        );
    }
    geometry
}

impl Dispatch<xdg_surface::XdgSurface, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &xdg_surface::XdgSurface,
        request: xdg_surface::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let sid = *data;
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                if let Err(e) = state.compositor.assign_role(sid, Role::Toplevel) {
                    ProtocolError::from(&e).post(resource);
                    return;
                }
                let toplevel = data_init.init(id, sid);
                if state
                    .track(client, &toplevel, ResourceKind::XdgToplevel(sid))
                    .is_none()
                {
                    return;
                }
                if let Some(entry) = state.xdg.get_mut(&sid) {
                    entry.toplevel = Some(toplevel);
                }
                info!("🪟 {} became a toplevel", sid);
            }
            xdg_surface::Request::GetPopup {
                id,
                parent,
                positioner,
            } => {
                let Some(geometry) = popup_geometry(state, resource, &positioner) else {
                    return;
                };
                if let Err(e) = state.compositor.assign_role(sid, Role::Popup) {
                    ProtocolError::from(&e).post(resource);
                    return;
                }
                let parent = parent.and_then(|p| p.data::<SurfaceId>().copied());
                let popup = data_init.init(id, sid);
                if state
                    .track(client, &popup, ResourceKind::XdgPopup(sid))
                    .is_none()
                {
                    return;
                }
                if let Some(entry) = state.xdg.get_mut(&sid) {
                    entry.popup = Some((popup, parent, geometry));
                }
                debug!("{} became a popup of {:?}", sid, parent);
            }
            xdg_surface::Request::AckConfigure { serial } => {
                let Some(entry) = state.xdg.get_mut(&sid) else {
                    return;
                };
                match entry.last_configure {
                    Some(sent) => {
                        if sent != serial {
                            debug!("{} acked serial {}, last sent {}", sid, serial, sent);
                        }
                        entry.acked = true;
                    }
                    None => {
                        resource.post_error(
                            xdg_surface::Error::InvalidSerial,
                            format!("no configure was sent to {}", sid),
                        );
                    }
                }
            }
            xdg_surface::Request::SetWindowGeometry { .. } => {}
            xdg_surface::Request::Destroy => {
                let has_role = state
                    .xdg
                    .get(&sid)
                    .is_some_and(|e| e.toplevel.is_some() || e.popup.is_some());
                if has_role {
                    warn!("{} xdg_surface destroyed before its role object", sid);
                }
            }
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &xdg_surface::XdgSurface,
        _data: &SurfaceId,
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, SurfaceId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &xdg_toplevel::XdgToplevel,
        request: xdg_toplevel::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_toplevel::Request::SetTitle { title } => debug!("{} title {:?}", data, title),
            xdg_toplevel::Request::SetAppId { app_id } => debug!("{} app id {:?}", data, app_id),
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &xdg_toplevel::XdgToplevel,
        _data: &SurfaceId,
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<xdg_popup::XdgPopup, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &xdg_popup::XdgPopup,
        request: xdg_popup::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let sid = *data;
        if let xdg_popup::Request::Reposition { positioner, token } = request {
            let Some(geometry) = state
                .positioners
                .get(&positioner.id())
                .and_then(Positioner::geometry)
            else {
                return;
            };
            let serial = state.next_serial();
            let Some(entry) = state.xdg.get_mut(&sid) else {
                return;
            };
            if let Some(popup) = entry.popup.as_mut() {
                popup.2 = geometry;
            }
            resource.repositioned(token);
            resource.configure(geometry.x, geometry.y, geometry.width, geometry.height);
            entry.xdg_surface.configure(serial);
            entry.last_configure = Some(serial);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &xdg_popup::XdgPopup,
        _data: &SurfaceId,
    ) {
        state.resource_destroyed(resource);
    }
}

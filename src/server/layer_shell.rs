//! `zwlr_layer_shell_v1` and layer surfaces

use super::error::ProtocolError;
use super::state::ServerState;
use crate::ids::{OutputId, SurfaceId};
use crate::protocols::layer_shell::{LayerShellError, Margins};
use crate::resource::ResourceKind;
use log::{debug, info};
use wayland_protocols_wlr::layer_shell::v1::server::{zwlr_layer_shell_v1, zwlr_layer_surface_v1};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource, WEnum,
};

fn layer_value(layer: WEnum<zwlr_layer_shell_v1::Layer>) -> u32 {
    match layer {
        WEnum::Value(layer) => layer as u32,
        WEnum::Unknown(value) => value,
    }
}

impl GlobalDispatch<zwlr_layer_shell_v1::ZwlrLayerShellV1, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<zwlr_layer_shell_v1::ZwlrLayerShellV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let shell = data_init.init(resource, ());
        state.track_global(client, &shell, ResourceKind::LayerShell);
    }
}

impl Dispatch<zwlr_layer_shell_v1::ZwlrLayerShellV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &zwlr_layer_shell_v1::ZwlrLayerShellV1,
        request: zwlr_layer_shell_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let zwlr_layer_shell_v1::Request::GetLayerSurface {
            id,
            surface,
            output,
            layer,
            namespace,
        } = request
        {
            let Some(sid) = state.surface_id(&surface) else {
                return;
            };
            let output = output.and_then(|o| o.data::<OutputId>().copied());
            if let Err(e) = state
                .compositor
                .create_layer_surface(sid, output, layer_value(layer), namespace.clone())
            {
                ProtocolError::from(&e).post(resource);
                return;
            }
            let layer_surface = data_init.init(id, sid);
            if state
                .track(client, &layer_surface, ResourceKind::LayerSurface(sid))
                .is_none()
            {
                return;
            }
            state.layer_objects.insert(sid, layer_surface);
            info!("🧩 {} is a layer surface ({})", sid, namespace);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &zwlr_layer_shell_v1::ZwlrLayerShellV1,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<zwlr_layer_surface_v1::ZwlrLayerSurfaceV1, SurfaceId> for ServerState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
        request: zwlr_layer_surface_v1::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let sid = *data;
        let Some(shell) = state.compositor.protocols_mut().layer_shell_mut() else {
            return;
        };
        let result: Result<(), LayerShellError> = match request {
            zwlr_layer_surface_v1::Request::SetSize { width, height } => {
                shell.set_size(sid, width, height)
            }
            zwlr_layer_surface_v1::Request::SetAnchor { anchor } => {
                let bits = match anchor {
                    WEnum::Value(anchor) => anchor.bits(),
                    WEnum::Unknown(bits) => bits,
                };
                shell.set_anchor(sid, bits)
            }
            zwlr_layer_surface_v1::Request::SetExclusiveZone { zone } => {
                shell.set_exclusive_zone(sid, zone)
            }
            zwlr_layer_surface_v1::Request::SetMargin {
                top,
                right,
                bottom,
                left,
            } => shell.set_margin(
                sid,
                Margins {
                    top,
                    right,
                    bottom,
                    left,
                },
            ),
            zwlr_layer_surface_v1::Request::SetKeyboardInteractivity {
                keyboard_interactivity,
            } => {
                let value = match keyboard_interactivity {
                    WEnum::Value(value) => value as u32,
                    WEnum::Unknown(value) => value,
                };
                shell.set_keyboard_interactivity(sid, value)
            }
            zwlr_layer_surface_v1::Request::SetLayer { layer } => {
                shell.set_layer(sid, layer_value(layer))
            }
            zwlr_layer_surface_v1::Request::AckConfigure { serial } => {
                shell.ack_configure(sid, serial)
            }
            zwlr_layer_surface_v1::Request::GetPopup { popup } => {
                debug!("{} parents popup {}", sid, popup.id());
                Ok(())
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
        resource: &zwlr_layer_surface_v1::ZwlrLayerSurfaceV1,
        _data: &SurfaceId,
    ) {
        state.resource_destroyed(resource);
    }
}

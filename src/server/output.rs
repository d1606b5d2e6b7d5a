//! `wl_output` globals, one per enabled output

use super::state::ServerState;
use crate::ids::{OutputId, SurfaceId};
use crate::output::Output;
use crate::resource::ResourceKind;
use wayland_server::protocol::wl_output;
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource,
};

/// Sends the full description of `output` to one bound object.
pub fn send_output_state(object: &wl_output::WlOutput, output: &Output) {
    object.geometry(
        output.geometry.x,
        output.geometry.y,
        output.physical_size.width,
        output.physical_size.height,
        wl_output::Subpixel::Unknown,
        output.make.clone(),
        output.model.clone(),
        wl_output::Transform::Normal,
    );
    object.mode(
        wl_output::Mode::Current | wl_output::Mode::Preferred,
        output.geometry.width,
        output.geometry.height,
        output.refresh_mhz,
    );
    if object.version() >= 2 {
        object.scale(output.scale);
    }
    if object.version() >= 4 {
        object.name(output.name.clone());
        object.description(format!("{} {} ({})", output.make, output.model, output.name));
    }
    if object.version() >= 2 {
        object.done();
    }
}

impl GlobalDispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wl_output::WlOutput>,
        global_data: &OutputId,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let object = data_init.init(resource, *global_data);
        if state
            .track_global(client, &object, ResourceKind::Output(*global_data))
            .is_none()
        {
            return;
        }
        if let Some(output) = state.compositor.outputs().get(*global_data) {
            send_output_state(&object, output);
        }
        state
            .output_objects
            .entry(*global_data)
            .or_default()
            .push(object);
    }
}

impl Dispatch<wl_output::WlOutput, OutputId> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_output::WlOutput,
        _request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_output::WlOutput,
        _data: &OutputId,
    ) {
        state.resource_destroyed(resource);
    }
}

impl ServerState {
    /// `wl_surface.enter` for the output a surface landed on.
    pub(crate) fn send_surface_enter(&self, surface: SurfaceId) {
        let Some(wl) = self.surfaces.get(&surface) else {
            return;
        };
        let Some(objects) = self
            .compositor
            .output_for_surface(surface)
            .and_then(|output| self.output_objects.get(&output))
        else {
            return;
        };
        for object in objects.iter().filter(|o| o.id().same_client_as(&wl.id())) {
            wl.enter(object);
        }
    }
}

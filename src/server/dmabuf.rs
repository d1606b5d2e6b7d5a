//! `zwp_linux_dmabuf_v1` and its params objects

use super::error::ProtocolError;
use super::state::ServerState;
use crate::buffer::formats::fourcc_name;
use crate::ids::{BufferId, ParamsId};
use crate::protocols::dmabuf::CreateError;
use crate::resource::ResourceKind;
use log::{debug, warn};
use std::collections::BTreeSet;
use wayland_protocols::wp::linux_dmabuf::zv1::server::{
    zwp_linux_buffer_params_v1, zwp_linux_dmabuf_v1,
};
use wayland_server::protocol::wl_buffer;
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource, WEnum,
};

impl GlobalDispatch<zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let dmabuf = data_init.init(resource, ());
        if state.track_global(client, &dmabuf, ResourceKind::Dmabuf).is_none() {
            return;
        }
        let Some(ext) = state.compositor.protocols().dmabuf() else {
            return;
        };
        let mut announced = BTreeSet::new();
        for format in ext.formats() {
            if announced.insert(format.format) {
                dmabuf.format(format.format);
            }
            if dmabuf.version() >= 3 {
                dmabuf.modifier(
                    format.format,
                    (format.modifier >> 32) as u32,
                    (format.modifier & 0xffff_ffff) as u32,
                );
            }
        }
        debug!("Advertised {} DMA-BUF formats", announced.len());
    }
}

impl Dispatch<zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1,
        request: zwp_linux_dmabuf_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let zwp_linux_dmabuf_v1::Request::CreateParams { params_id } = request {
            let Some(ext) = state.compositor.protocols_mut().dmabuf_mut() else {
                return;
            };
            let params = ext.create_params();
            let object = data_init.init(params_id, params);
            state.track(client, &object, ResourceKind::DmabufParams(params));
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

fn flag_bits(flags: WEnum<zwp_linux_buffer_params_v1::Flags>) -> u32 {
    match flags {
        WEnum::Value(flags) => flags.bits(),
        WEnum::Unknown(bits) => bits,
    }
}

impl Dispatch<zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1, ParamsId> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1,
        request: zwp_linux_buffer_params_v1::Request,
        data: &ParamsId,
        dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let params = *data;
        let Some(ext) = state.compositor.protocols_mut().dmabuf_mut() else {
            return;
        };
        match request {
            zwp_linux_buffer_params_v1::Request::Add {
                fd,
                plane_idx,
                offset,
                stride,
                modifier_hi,
                modifier_lo,
            } => {
                if let Err(e) = ext.add(params, plane_idx, fd, offset, stride, modifier_hi, modifier_lo) {
                    ProtocolError::from(&e).post(resource);
                }
            }
            zwp_linux_buffer_params_v1::Request::Create {
                width,
                height,
                format,
                flags,
            } => match ext.create(params, width, height, format, flag_bits(flags)) {
                Ok(buffer) => {
                    match client.create_resource::<wl_buffer::WlBuffer, (), Self>(
                        dhandle,
                        1,
                        (),
                    ) {
                        Ok(object) => {
                            state.track(client, &object, ResourceKind::DmabufBuffer(Some(buffer)));
                            resource.created(&object);
                        }
                        Err(e) => {
                            warn!("Could not create wl_buffer for {}: {}", buffer, e);
                            ext_destroy_buffer(state, buffer);
                            resource.failed();
                        }
                    }
                }
                Err(CreateError::Protocol(e)) => ProtocolError::from(&e).post(resource),
                Err(CreateError::Import(e)) => {
                    debug!("{} {}x{} rejected: {}", fourcc_name(format), width, height, e);
                    resource.failed();
                }
            },
            zwp_linux_buffer_params_v1::Request::CreateImmed {
                buffer_id,
                width,
                height,
                format,
                flags,
            } => match ext.create_immed(params, width, height, format, flag_bits(flags)) {
                Ok(buffer) => {
                    let object = data_init.init(buffer_id, ());
                    state.track(client, &object, ResourceKind::DmabufBuffer(Some(buffer)));
                }
                Err(e) => ProtocolError::from(&e).post(resource),
            },
            zwp_linux_buffer_params_v1::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1,
        _data: &ParamsId,
    ) {
        state.resource_destroyed(resource);
    }
}

fn ext_destroy_buffer(state: &mut ServerState, buffer: BufferId) {
    if let Some(ext) = state.compositor.protocols_mut().dmabuf_mut() {
        ext.destroy_buffer(buffer);
    }
}

impl Dispatch<wl_buffer::WlBuffer, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        _request: wl_buffer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: WireClientId, resource: &wl_buffer::WlBuffer, _data: &()) {
        state.resource_destroyed(resource);
    }
}

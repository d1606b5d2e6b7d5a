//! `wl_seat` with keyboard, pointer and touch objects

use super::state::ServerState;
use crate::ids::SurfaceId;
use crate::resource::ResourceKind;
use log::{debug, warn};
use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, FromRawFd, OwnedFd};
use wayland_server::protocol::{wl_keyboard, wl_pointer, wl_seat, wl_touch};
use wayland_server::{
    backend::ClientId as WireClientId, Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch,
    New, Resource,
};
use xkbcommon::xkb;

/// Compiles the default `us` keymap to its text form.
pub fn default_keymap() -> Option<String> {
    let ctx = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
    let keymap = xkb::Keymap::new_from_names(
        &ctx,
        "",
        "",
        "us",
        "",
        None,
        xkb::KEYMAP_COMPILE_NO_FLAGS,
    )?;
    Some(keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1))
}

/// Sealed-size memfd holding `data` plus the trailing NUL clients expect.
fn keymap_fd(data: &str) -> std::io::Result<OwnedFd> {
    let name = CString::new("keystone-keymap").map_err(std::io::Error::other)?;
    // SAFETY: name is a valid C string; the returned fd is checked below.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: fd was just created and is owned by nobody else.
    let mut file = unsafe { File::from_raw_fd(fd) };
    file.write_all(data.as_bytes())?;
    file.write_all(&[0])?;
    Ok(file.into())
}

impl GlobalDispatch<wl_seat::WlSeat, ()> for ServerState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &Client,
        resource: New<wl_seat::WlSeat>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let seat = data_init.init(resource, ());
        if state.track_global(client, &seat, ResourceKind::Seat).is_none() {
            return;
        }
        seat.capabilities(
            wl_seat::Capability::Keyboard | wl_seat::Capability::Pointer | wl_seat::Capability::Touch,
        );
        if seat.version() >= 2 {
            seat.name(state.compositor.seat().name.clone());
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for ServerState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wl_seat::WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetKeyboard { id } => {
                let keyboard = data_init.init(id, ());
                if state.track(client, &keyboard, ResourceKind::Keyboard).is_none() {
                    return;
                }
                if let Some(keymap) = &state.keymap {
                    match keymap_fd(keymap) {
                        Ok(fd) => keyboard.keymap(
                            wl_keyboard::KeymapFormat::XkbV1,
                            fd.as_fd(),
                            keymap.len() as u32 + 1,
                        ),
                        Err(e) => warn!("⌨️ Keymap upload failed: {}", e),
                    }
                }
                if keyboard.version() >= 4 {
                    keyboard.repeat_info(state.repeat.0, state.repeat.1);
                }
                state.keyboards.push(keyboard);
            }
            wl_seat::Request::GetPointer { id } => {
                let pointer = data_init.init(id, ());
                if state.track(client, &pointer, ResourceKind::Pointer).is_some() {
                    state.pointers.push(pointer);
                }
            }
            wl_seat::Request::GetTouch { id } => {
                let touch = data_init.init(id, ());
                state.track(client, &touch, ResourceKind::Touch);
            }
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: WireClientId, resource: &wl_seat::WlSeat, _data: &()) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_keyboard::WlKeyboard,
        _request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_keyboard::WlKeyboard,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wl_pointer::WlPointer, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_pointer::WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_pointer::Request::SetCursor { surface, .. } = request {
            debug!("Cursor surface {:?}", surface.map(|s| s.id()));
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: WireClientId,
        resource: &wl_pointer::WlPointer,
        _data: &(),
    ) {
        state.resource_destroyed(resource);
    }
}

impl Dispatch<wl_touch::WlTouch, ()> for ServerState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_touch::WlTouch,
        _request: wl_touch::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: WireClientId, resource: &wl_touch::WlTouch, _data: &()) {
        state.resource_destroyed(resource);
    }
}

impl ServerState {
    /// `leave` on the old focus and `enter` on the new one, per client.
    pub(crate) fn send_keyboard_focus(&mut self, old: Option<SurfaceId>, new: Option<SurfaceId>) {
        if let Some(surface) = old.and_then(|id| self.surfaces.get(&id)).cloned() {
            let serial = self.next_serial();
            for keyboard in self.keyboards.iter().filter(|k| k.id().same_client_as(&surface.id())) {
                keyboard.leave(serial, &surface);
            }
        }
        if let Some(surface) = new.and_then(|id| self.surfaces.get(&id)).cloned() {
            let serial = self.next_serial();
            for keyboard in self.keyboards.iter().filter(|k| k.id().same_client_as(&surface.id())) {
                keyboard.enter(serial, &surface, Vec::new());
                keyboard.modifiers(serial, 0, 0, 0, 0);
            }
        }
    }

    pub(crate) fn send_pointer_focus(&mut self, old: Option<SurfaceId>, new: Option<SurfaceId>) {
        if let Some(surface) = old.and_then(|id| self.surfaces.get(&id)).cloned() {
            let serial = self.next_serial();
            for pointer in self.pointers.iter().filter(|p| p.id().same_client_as(&surface.id())) {
                pointer.leave(serial, &surface);
                if pointer.version() >= 5 {
                    pointer.frame();
                }
            }
        }
        if let Some(surface) = new.and_then(|id| self.surfaces.get(&id)).cloned() {
            let serial = self.next_serial();
            let (x, y) = self.compositor.seat().pointer_location();
            for pointer in self.pointers.iter().filter(|p| p.id().same_client_as(&surface.id())) {
                pointer.enter(serial, &surface, x, y);
                if pointer.version() >= 5 {
                    pointer.frame();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom};

    #[test]
    fn test_keymap_fd_is_nul_terminated() {
        let fd = keymap_fd("xkb_keymap {};").unwrap();
        let mut file = File::from(fd);
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len(), "xkb_keymap {};".len() + 1);
        assert_eq!(contents.last(), Some(&0));
    }
}

//! X11 window manager on the Xwayland `-wm` socket
//!
//! Selects substructure redirect on the root window, mirrors window state into
//! the [`XWindowTable`] and answers configure and map requests.

use super::window::{ConfigureRequest, XWindowTable};
use super::XWaylandError;
use crate::geometry::Rectangle;
use crate::ids::SurfaceId;
use log::{debug, info, trace};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ConfigWindow, ConfigureWindowAux, ConnectionExt as _,
    EventMask, Window,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::{DefaultStream, RustConnection};

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        WL_SURFACE_ID,
        WM_NAME,
        WM_CLASS,
        UTF8_STRING,
        _NET_WM_NAME,
        _NET_WM_PID,
    }
}

/// Changes the compositor has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmEvent {
    /// A `WL_SURFACE_ID` arrived; the window waits for that wire object
    SurfaceIdReceived { window: u32, wire_id: u32 },
    WindowDestroyed { window: u32, surface: Option<SurfaceId> },
    /// Position or size changed
    WindowConfigured { window: u32 },
    WindowMapped { window: u32 },
    WindowUnmapped { window: u32 },
}

fn wm_error(e: impl std::fmt::Display) -> XWaylandError {
    XWaylandError::Wm(e.to_string())
}

pub struct WindowManager {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
}

impl WindowManager {
    /// Connects over our end of the `-wm` socket pair and takes over the root window.
    pub fn connect(stream: UnixStream) -> Result<Self, XWaylandError> {
        let (stream, _peer) = DefaultStream::from_unix_stream(stream)?;
        let conn = RustConnection::connect_to_stream(stream, 0).map_err(wm_error)?;
        let root = conn.setup().roots[0].root;
        let atoms = Atoms::new(&conn)
            .map_err(wm_error)?
            .reply()
            .map_err(wm_error)?;

        let events = ChangeWindowAttributesAux::new()
            .event_mask(EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY);
        conn.change_window_attributes(root, &events)
            .map_err(wm_error)?
            .check()
            .map_err(wm_error)?;
        conn.flush().map_err(wm_error)?;

        info!("🪟 X11 window manager attached to root {:#x}", root);
        Ok(Self { conn, root, atoms })
    }

    /// Drains pending X11 events into `table`.
    pub fn dispatch(&mut self, table: &mut XWindowTable) -> Result<Vec<WmEvent>, XWaylandError> {
        let mut out = Vec::new();
        while let Some(event) = self.conn.poll_for_event().map_err(wm_error)? {
            trace!("X11 event {:?}", event);
            match event {
                Event::CreateNotify(e) if e.parent == self.root => {
                    table.create_window(
                        e.window,
                        Rectangle::new(
                            e.x.into(),
                            e.y.into(),
                            e.width.into(),
                            e.height.into(),
                        ),
                        e.override_redirect,
                    );
                    // Titles and _NET_WM_PID usually arrive after creation.
                    let watch = ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE);
                    self.conn
                        .change_window_attributes(e.window, &watch)
                        .map_err(wm_error)?;
                    self.refresh_properties(e.window, table)?;
                }
                Event::DestroyNotify(e) => {
                    if let Some(window) = table.destroy_window(e.window) {
                        out.push(WmEvent::WindowDestroyed {
                            window: e.window,
                            surface: window.surface,
                        });
                    }
                }
                Event::ConfigureRequest(e) => {
                    let mask = u16::from(e.value_mask);
                    let has = |bit: ConfigWindow| mask & u16::from(bit) != 0;
                    let request = ConfigureRequest {
                        x: has(ConfigWindow::X).then_some(e.x.into()),
                        y: has(ConfigWindow::Y).then_some(e.y.into()),
                        width: has(ConfigWindow::WIDTH).then_some(e.width.into()),
                        height: has(ConfigWindow::HEIGHT).then_some(e.height.into()),
                    };
                    if let Some(geometry) = table.handle_configure_request(e.window, request) {
                        let aux = ConfigureWindowAux::new()
                            .x(geometry.x)
                            .y(geometry.y)
                            .width(geometry.width as u32)
                            .height(geometry.height as u32);
                        self.conn
                            .configure_window(e.window, &aux)
                            .map_err(wm_error)?;
                    }
                }
                Event::ConfigureNotify(e) => {
                    table.set_geometry(
                        e.window,
                        Rectangle::new(
                            e.x.into(),
                            e.y.into(),
                            e.width.into(),
                            e.height.into(),
                        ),
                    );
                    out.push(WmEvent::WindowConfigured { window: e.window });
                }
                Event::MapRequest(e) => {
                    self.refresh_properties(e.window, table)?;
                    if table.handle_map_request(e.window) {
                        self.conn.map_window(e.window).map_err(wm_error)?;
                    } else {
                        debug!("Ignoring map request for {:#x}", e.window);
                    }
                }
                Event::MapNotify(e) => {
                    table.set_mapped(e.window, true);
                    out.push(WmEvent::WindowMapped { window: e.window });
                }
                Event::UnmapNotify(e) => {
                    table.set_mapped(e.window, false);
                    out.push(WmEvent::WindowUnmapped { window: e.window });
                }
                Event::PropertyNotify(e) => {
                    if e.atom == self.atoms._NET_WM_NAME
                        || e.atom == self.atoms.WM_NAME
                        || e.atom == self.atoms._NET_WM_PID
                        || e.atom == self.atoms.WM_CLASS
                    {
                        self.refresh_properties(e.window, table)?;
                    }
                }
                Event::ClientMessage(e) if e.type_ == self.atoms.WL_SURFACE_ID => {
                    let wire_id = e.data.as_data32()[0];
                    debug!("WL_SURFACE_ID {} for window {:#x}", wire_id, e.window);
                    if table.set_wl_surface_id(e.window, wire_id) {
                        out.push(WmEvent::SurfaceIdReceived {
                            window: e.window,
                            wire_id,
                        });
                    }
                }
                Event::Error(e) => {
                    debug!("X11 error {:?} on {:#x}", e.error_kind, e.bad_value);
                }
                _ => {}
            }
        }
        self.conn.flush().map_err(wm_error)?;
        Ok(out)
    }

    /// Re-reads title, class and pid. The window may already be gone.
    fn refresh_properties(&self, window: Window, table: &mut XWindowTable) -> Result<(), XWaylandError> {
        skip_vanished_window(window, self.read_properties(window, table))
    }

    fn read_properties(&self, window: Window, table: &mut XWindowTable) -> Result<(), ReplyError> {
        let net_name = self
            .conn
            .get_property(false, window, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING, 0, 1024)?
            .reply()?;
        let title = if net_name.value.is_empty() {
            self.conn
                .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::STRING, 0, 1024)?
                .reply()?
                .value
        } else {
            net_name.value
        };
        if !title.is_empty() {
            table.set_title(window, String::from_utf8_lossy(&title).into_owned());
        }

        let class = self
            .conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)?
            .reply()?;
        if let Some(name) = class.value.split(|b| *b == 0).nth(1) {
            table.set_class(window, String::from_utf8_lossy(name).into_owned());
        }

        let pid = self
            .conn
            .get_property(false, window, self.atoms._NET_WM_PID, AtomEnum::CARDINAL, 0, 1)?
            .reply()?;
        if let Some(pid) = pid.value32().and_then(|mut values| values.next()) {
            table.set_pid(window, pid);
        }
        Ok(())
    }
}

/// An X11 error on a property read means the window was destroyed while the
/// request was in flight; only a broken connection is fatal.
fn skip_vanished_window(window: Window, result: Result<(), ReplyError>) -> Result<(), XWaylandError> {
    match result {
        Ok(()) => Ok(()),
        Err(ReplyError::X11Error(e)) => {
            debug!("Window {:#x} vanished before its properties were read: {:?}", window, e.error_kind);
            Ok(())
        }
        Err(ReplyError::ConnectionError(e)) => Err(wm_error(e)),
    }
}

impl AsFd for WindowManager {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.conn.stream().as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::errors::ConnectionError;
    use x11rb::protocol::ErrorKind;
    use x11rb::x11_utils::X11Error;

    fn bad_window(window: Window) -> X11Error {
        X11Error {
            error_kind: ErrorKind::Window,
            error_code: 3,
            sequence: 42,
            bad_value: window,
            minor_opcode: 0,
            major_opcode: 20,
            extension_name: None,
            request_name: Some("GetProperty"),
        }
    }

    #[test]
    fn test_bad_window_on_property_read_is_not_fatal() {
        let result = Err(ReplyError::X11Error(bad_window(0x200001)));
        assert!(skip_vanished_window(0x200001, result).is_ok());
    }

    #[test]
    fn test_broken_connection_is_fatal() {
        let result = Err(ReplyError::ConnectionError(ConnectionError::UnknownError));
        assert!(matches!(
            skip_vanished_window(0x200001, result),
            Err(XWaylandError::Wm(_))
        ));
        assert!(skip_vanished_window(0x200001, Ok(())).is_ok());
    }
}

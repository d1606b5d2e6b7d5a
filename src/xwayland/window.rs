//! X11 window bookkeeping and surface correlation
//!
//! Pure state: the x11rb side feeds events in, the compositor side asks which
//! window a new `wl_surface` belongs to. Correlation tries, in order, the
//! exact `WL_SURFACE_ID` client message, the client PID, the geometry and
//! the title. A surface that matches nothing stays a native Wayland surface.

use crate::geometry::Rectangle;
use crate::ids::SurfaceId;
use log::{debug, info};
use std::collections::BTreeMap;

/// Information about an X11 window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XWindow {
    pub id: u32,
    pub title: String,
    pub class: String,
    /// `_NET_WM_PID`
    pub pid: Option<u32>,
    pub geometry: Rectangle,
    pub mapped: bool,
    pub override_redirect: bool,
    /// Protocol id from the `WL_SURFACE_ID` client message
    pub wl_surface_id: Option<u32>,
    pub surface: Option<SurfaceId>,
}

/// Fields present in an X11 ConfigureRequest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// What is known about a freshly created Wayland surface.
#[derive(Debug, Clone)]
pub struct SurfaceCandidate {
    pub surface: SurfaceId,
    /// Wire id of the `wl_surface`, when it came from the Xwayland client
    pub wire_id: Option<u32>,
    pub pid: Option<u32>,
    pub geometry: Option<Rectangle>,
    pub title: Option<String>,
}

impl SurfaceCandidate {
    pub fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            wire_id: None,
            pid: None,
            geometry: None,
            title: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct XWindowTable {
    windows: BTreeMap<u32, XWindow>,
}

impl XWindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, window: u32) -> Option<&XWindow> {
        self.windows.get(&window)
    }

    pub fn iter(&self) -> impl Iterator<Item = &XWindow> {
        self.windows.values()
    }

    pub fn mapped(&self) -> impl Iterator<Item = &XWindow> {
        self.windows.values().filter(|w| w.mapped)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }

    pub fn window_for_surface(&self, surface: SurfaceId) -> Option<&XWindow> {
        self.windows.values().find(|w| w.surface == Some(surface))
    }

    /// CreateNotify
    pub fn create_window(&mut self, id: u32, geometry: Rectangle, override_redirect: bool) {
        self.windows.insert(
            id,
            XWindow {
                id,
                title: String::new(),
                class: String::new(),
                pid: None,
                geometry,
                mapped: false,
                override_redirect,
                wl_surface_id: None,
                surface: None,
            },
        );
        debug!("🪟 New X11 window {:#x} at {:?}", id, geometry);
    }

    /// DestroyNotify. Returns the window, with its surface association if any.
    pub fn destroy_window(&mut self, id: u32) -> Option<XWindow> {
        let window = self.windows.remove(&id)?;
        debug!("🗑️ X11 window {:#x} destroyed", id);
        Some(window)
    }

    pub fn set_mapped(&mut self, id: u32, mapped: bool) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.mapped = mapped;
        }
    }

    /// ConfigureNotify
    pub fn set_geometry(&mut self, id: u32, geometry: Rectangle) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.geometry = geometry;
        }
    }

    pub fn set_title(&mut self, id: u32, title: String) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.title = title;
        }
    }

    pub fn set_class(&mut self, id: u32, class: String) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.class = class;
        }
    }

    pub fn set_pid(&mut self, id: u32, pid: u32) {
        if let Some(window) = self.windows.get_mut(&id) {
            window.pid = Some(pid);
        }
    }

    /// Records a `WL_SURFACE_ID` client message.
    pub fn set_wl_surface_id(&mut self, id: u32, wire_id: u32) -> bool {
        match self.windows.get_mut(&id) {
            Some(window) => {
                window.wl_surface_id = Some(wire_id);
                true
            }
            None => false,
        }
    }

    /// Geometry to apply for a ConfigureRequest; absent fields keep the
    /// current value.
    pub fn handle_configure_request(&mut self, id: u32, request: ConfigureRequest) -> Option<Rectangle> {
        let window = self.windows.get_mut(&id)?;
        let current = window.geometry;
        let geometry = Rectangle::new(
            request.x.unwrap_or(current.x),
            request.y.unwrap_or(current.y),
            request.width.unwrap_or(current.width).max(1),
            request.height.unwrap_or(current.height).max(1),
        );
        window.geometry = geometry;
        Some(geometry)
    }

    /// Whether a MapRequest should be honored. Override-redirect windows
    /// never go through the window manager.
    pub fn handle_map_request(&mut self, id: u32) -> bool {
        match self.windows.get(&id) {
            Some(window) => !window.override_redirect,
            None => false,
        }
    }

    /// Associates a new surface with a window. Returns the window id on a match.
    pub fn correlate(&mut self, candidate: &SurfaceCandidate) -> Option<u32> {
        let free = |w: &&XWindow| w.surface.is_none();

        let by_wire = candidate.wire_id.and_then(|wire| {
            self.windows
                .values()
                .filter(free)
                .find(|w| w.wl_surface_id == Some(wire))
                .map(|w| (w.id, "WL_SURFACE_ID"))
        });
        let by_pid = || {
            candidate.pid.and_then(|pid| {
                self.windows
                    .values()
                    .filter(free)
                    .find(|w| w.pid == Some(pid))
                    .map(|w| (w.id, "pid"))
            })
        };
        let by_geometry = || {
            candidate.geometry.and_then(|geometry| {
                self.windows
                    .values()
                    .filter(free)
                    .find(|w| w.geometry == geometry)
                    .map(|w| (w.id, "geometry"))
            })
        };
        let by_title = || {
            candidate.title.as_deref().filter(|t| !t.is_empty()).and_then(|title| {
                self.windows
                    .values()
                    .filter(free)
                    .find(|w| w.title == title)
                    .map(|w| (w.id, "title"))
            })
        };

        let (id, how) = by_wire
            .or_else(by_pid)
            .or_else(by_geometry)
            .or_else(by_title)?;
        if let Some(window) = self.windows.get_mut(&id) {
            window.surface = Some(candidate.surface);
        }
        info!(
            "🔗 X11 window {:#x} bound to {} by {}",
            id, candidate.surface, how
        );
        Some(id)
    }

    /// Binds a window to a surface directly, for a late `WL_SURFACE_ID`.
    pub fn associate(&mut self, id: u32, surface: SurfaceId) -> bool {
        match self.windows.get_mut(&id) {
            Some(window) => {
                window.surface = Some(surface);
                true
            }
            None => false,
        }
    }

    /// Drops the association of a destroyed surface.
    pub fn surface_destroyed(&mut self, surface: SurfaceId) -> Option<u32> {
        let window = self
            .windows
            .values_mut()
            .find(|w| w.surface == Some(surface))?;
        window.surface = None;
        Some(window.id)
    }
}

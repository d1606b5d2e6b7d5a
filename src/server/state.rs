//! State shared by every dispatch implementation
//!
//! Wire objects are recorded twice: in the [`ResourceRegistry`] with their
//! [`ResourceKind`] tag, and in `handles` so a request can find its tag from
//! the `ObjectId`. Everything the core needs is keyed by stable ids; the
//! wayland-server objects kept here are only used to send events.

use super::error::ProtocolError;
use crate::compositor::{CommitError, Compositor, CompositorEvent, Region, Role};
use crate::geometry::Rectangle;
use crate::ids::{ClientId, FeedbackId, IdAllocator, OutputId, SurfaceId};
use crate::protocols::presentation::monotonic_now;
use crate::protocols::{ProtocolEvent, SyncPoint};
use crate::resource::{ResourceHandle, ResourceKind, ResourceRegistry};
#[cfg(feature = "xwayland")]
use crate::xwayland::wm::WmEvent;
use crate::xwayland::{SurfaceCandidate, XWaylandSupervisor};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use wayland_protocols::wp::presentation_time::server::wp_presentation_feedback;
use wayland_protocols::wp::viewporter::server::wp_viewport;
use wayland_protocols::xdg::shell::server::{xdg_popup, xdg_surface, xdg_toplevel};
use wayland_protocols_wlr::layer_shell::v1::server::zwlr_layer_surface_v1;
use wayland_server::backend::{ClientData, ClientId as WireClientId, DisconnectReason, ObjectId};
use wayland_server::protocol::{
    wl_buffer, wl_callback, wl_keyboard, wl_output, wl_pointer, wl_surface,
};
use wayland_server::{Client, DisplayHandle, Resource};

/// Per-connection data handed to wayland-server.
pub struct ServerClientData {
    pub id: ClientId,
    disconnected: Arc<Mutex<Vec<ClientId>>>,
}

impl ClientData for ServerClientData {
    fn initialized(&self, _client_id: WireClientId) {
        debug!("{} initialized", self.id);
    }

    fn disconnected(&self, _client_id: WireClientId, reason: DisconnectReason) {
        debug!("{} disconnected: {:?}", self.id, reason);
        self.disconnected.lock().push(self.id);
    }
}

/// Our id for a wayland-server client.
pub fn client_id(client: &Client) -> Option<ClientId> {
    client.get_data::<ServerClientData>().map(|data| data.id)
}

/// Peer PID from the socket credentials.
fn peer_pid(stream: &UnixStream) -> Option<i32> {
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    // SAFETY: cred and len describe a valid ucred buffer for SO_PEERCRED.
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    (rc == 0 && cred.pid > 0).then_some(cred.pid)
}

/// `xdg_positioner` contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Positioner {
    pub size: Option<(i32, i32)>,
    pub anchor_rect: Option<Rectangle>,
    pub offset: (i32, i32),
}

impl Positioner {
    /// Popup geometry relative to the parent. Anchor and gravity refinements
    /// are left to the shell; the popup opens at the anchor rect's corner.
    pub fn geometry(&self) -> Option<Rectangle> {
        let (width, height) = self.size?;
        let anchor = self.anchor_rect?;
        Some(Rectangle::new(
            anchor.x + self.offset.0,
            anchor.y + anchor.height + self.offset.1,
            width,
            height,
        ))
    }
}

/// xdg-shell wire objects of one surface.
pub struct XdgEntry {
    pub xdg_surface: xdg_surface::XdgSurface,
    pub toplevel: Option<xdg_toplevel::XdgToplevel>,
    pub popup: Option<(xdg_popup::XdgPopup, Option<SurfaceId>, Rectangle)>,
    pub last_configure: Option<u32>,
    pub acked: bool,
}

pub struct ServerState {
    pub compositor: Compositor,
    pub resources: ResourceRegistry,
    pub xwayland: Option<XWaylandSupervisor>,
    pub(crate) socket_name: String,
    pub(crate) keymap: Option<String>,
    /// (rate, delay) for `wl_keyboard.repeat_info`
    pub(crate) repeat: (i32, i32),
    handles: HashMap<ObjectId, ResourceHandle>,
    pub(crate) surfaces: HashMap<SurfaceId, wl_surface::WlSurface>,
    pub(crate) pending_buffers: HashMap<SurfaceId, Option<wl_buffer::WlBuffer>>,
    current_buffers: HashMap<SurfaceId, wl_buffer::WlBuffer>,
    pub(crate) pending_frames: HashMap<SurfaceId, Vec<wl_callback::WlCallback>>,
    frame_queue: Vec<wl_callback::WlCallback>,
    committed: BTreeSet<SurfaceId>,
    pub(crate) regions: HashMap<ObjectId, Region>,
    pub(crate) positioners: HashMap<ObjectId, Positioner>,
    pub(crate) xdg: HashMap<SurfaceId, XdgEntry>,
    pub(crate) layer_objects: HashMap<SurfaceId, zwlr_layer_surface_v1::ZwlrLayerSurfaceV1>,
    pub(crate) viewports: HashMap<SurfaceId, wp_viewport::WpViewport>,
    pub(crate) feedbacks: HashMap<FeedbackId, wp_presentation_feedback::WpPresentationFeedback>,
    pub(crate) output_objects: HashMap<OutputId, Vec<wl_output::WlOutput>>,
    pub(crate) keyboards: Vec<wl_keyboard::WlKeyboard>,
    pub(crate) pointers: Vec<wl_pointer::WlPointer>,
    pub(crate) shm_ids: IdAllocator,
    /// Event source of the X11 window manager connection
    #[cfg(feature = "xwayland")]
    pub(crate) wm_token: Option<calloop::RegistrationToken>,
    serial: u32,
    frame_sequence: u64,
    disconnected: Arc<Mutex<Vec<ClientId>>>,
}

impl ServerState {
    pub fn new(compositor: Compositor, keymap: Option<String>) -> Self {
        Self {
            compositor,
            resources: ResourceRegistry::new(),
            xwayland: None,
            socket_name: String::new(),
            keymap,
            repeat: (25, 600),
            handles: HashMap::new(),
            surfaces: HashMap::new(),
            pending_buffers: HashMap::new(),
            current_buffers: HashMap::new(),
            pending_frames: HashMap::new(),
            frame_queue: Vec::new(),
            committed: BTreeSet::new(),
            regions: HashMap::new(),
            positioners: HashMap::new(),
            xdg: HashMap::new(),
            layer_objects: HashMap::new(),
            viewports: HashMap::new(),
            feedbacks: HashMap::new(),
            output_objects: HashMap::new(),
            keyboards: Vec::new(),
            pointers: Vec::new(),
            shm_ids: IdAllocator::new(),
            #[cfg(feature = "xwayland")]
            wm_token: None,
            serial: 0,
            frame_sequence: 0,
            disconnected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    // Clients

    /// Registers a freshly accepted connection with the core and the display.
    pub fn accept_client(&mut self, dh: &mut DisplayHandle, stream: UnixStream) {
        let pid = peer_pid(&stream);
        let id = self.compositor.create_client(pid);
        let data = Arc::new(ServerClientData {
            id,
            disconnected: self.disconnected.clone(),
        });
        if let Err(e) = dh.insert_client(stream, data) {
            error!("❌ Failed to insert {}: {}", id, e);
            self.compositor.destroy_client(id);
        }
    }

    /// Tears down clients whose connection went away since the last call.
    pub fn reap_clients(&mut self) {
        let gone: Vec<ClientId> = std::mem::take(&mut *self.disconnected.lock());
        for client in gone {
            for (_, kind) in self.resources.destroy_client(client) {
                if let Some(kind) = kind {
                    self.on_destroyed(kind, None);
                }
            }
            self.handles.retain(|_, handle| handle.client != client);
            self.compositor.destroy_client(client);
        }
        self.keyboards.retain(|k| k.is_alive());
        self.pointers.retain(|p| p.is_alive());
        for objects in self.output_objects.values_mut() {
            objects.retain(|o| o.is_alive());
        }
    }

    // Resource table

    /// Records a global bound by `client`. Version errors are posted.
    pub fn track_global<I: Resource>(
        &mut self,
        client: &Client,
        resource: &I,
        kind: ResourceKind,
    ) -> Option<ResourceHandle> {
        let owner = client_id(client)?;
        let bound = self
            .resources
            .bind(
                owner,
                I::interface().name,
                resource.version(),
                resource.id().protocol_id(),
            )
            .and_then(|handle| self.resources.attach(handle, kind, None).map(|_| handle));
        self.finish_track(resource, bound)
    }

    /// Records an object created by a request on another object.
    pub fn track<I: Resource>(
        &mut self,
        client: &Client,
        resource: &I,
        kind: ResourceKind,
    ) -> Option<ResourceHandle> {
        let owner = client_id(client)?;
        let inserted = self
            .resources
            .insert(
                owner,
                I::interface().name,
                resource.version(),
                resource.id().protocol_id(),
            )
            .and_then(|handle| self.resources.attach(handle, kind, None).map(|_| handle));
        self.finish_track(resource, inserted)
    }

    fn finish_track<I: Resource>(
        &mut self,
        resource: &I,
        result: Result<ResourceHandle, crate::resource::ResourceError>,
    ) -> Option<ResourceHandle> {
        match result {
            Ok(handle) => {
                self.handles.insert(resource.id(), handle);
                Some(handle)
            }
            Err(e) => {
                ProtocolError::from(&e).post(resource);
                None
            }
        }
    }

    /// Routing tag of a live object.
    pub fn kind_of<I: Resource>(&self, resource: &I) -> Option<ResourceKind> {
        let handle = self.handles.get(&resource.id())?;
        match self.resources.dispatch(*handle) {
            Ok(kind) => Some(kind),
            Err(e) => {
                debug!("Request on {} ignored: {}", resource.id(), e);
                None
            }
        }
    }

    pub fn surface_id(&self, surface: &wl_surface::WlSurface) -> Option<SurfaceId> {
        match self.kind_of(surface)? {
            ResourceKind::Surface(id) => Some(id),
            _ => None,
        }
    }

    /// Called from every `Dispatch::destroyed`.
    pub fn resource_destroyed<I: Resource>(&mut self, resource: &I) {
        let id = resource.id();
        let Some(handle) = self.handles.remove(&id) else {
            return;
        };
        match self.resources.destroy(handle) {
            Ok(Some(kind)) => self.on_destroyed(kind, Some(&id)),
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }
    }

    fn on_destroyed(&mut self, kind: ResourceKind, object: Option<&ObjectId>) {
        match kind {
            ResourceKind::Surface(surface) => {
                self.surfaces.remove(&surface);
                self.pending_buffers.remove(&surface);
                self.current_buffers.remove(&surface);
                self.pending_frames.remove(&surface);
                self.committed.remove(&surface);
                self.xdg.remove(&surface);
                self.layer_objects.remove(&surface);
                self.viewports.remove(&surface);
                self.compositor.destroy_surface(surface);
            }
            ResourceKind::XdgToplevel(surface) => {
                if let Some(entry) = self.xdg.get_mut(&surface) {
                    entry.toplevel = None;
                    entry.last_configure = None;
                    entry.acked = false;
                }
                self.compositor.release_role(surface);
            }
            ResourceKind::XdgPopup(surface) => {
                if let Some(entry) = self.xdg.get_mut(&surface) {
                    entry.popup = None;
                    entry.last_configure = None;
                    entry.acked = false;
                }
                self.compositor.release_role(surface);
            }
            ResourceKind::XdgSurface(surface) => {
                self.xdg.remove(&surface);
            }
            ResourceKind::LayerSurface(surface) => {
                self.layer_objects.remove(&surface);
                self.compositor.release_role(surface);
            }
            ResourceKind::Viewport(surface) => {
                self.viewports.remove(&surface);
                if let Some(viewporter) = self.compositor.protocols_mut().viewporter_mut() {
                    viewporter.destroy_viewport(surface);
                }
            }
            ResourceKind::PresentationFeedback(feedback) => {
                self.feedbacks.remove(&feedback);
            }
            ResourceKind::DmabufParams(params) => {
                if let Some(dmabuf) = self.compositor.protocols_mut().dmabuf_mut() {
                    dmabuf.destroy_params(params);
                }
            }
            ResourceKind::DmabufBuffer(Some(buffer)) => {
                if let Some(dmabuf) = self.compositor.protocols_mut().dmabuf_mut() {
                    dmabuf.destroy_buffer(buffer);
                }
            }
            ResourceKind::Output(output) => {
                if let (Some(objects), Some(object)) = (self.output_objects.get_mut(&output), object) {
                    objects.retain(|o| o.id() != *object);
                }
            }
            ResourceKind::Keyboard => {
                if let Some(object) = object {
                    self.keyboards.retain(|k| k.id() != *object);
                }
            }
            ResourceKind::Pointer => {
                if let Some(object) = object {
                    self.pointers.retain(|p| p.id() != *object);
                }
            }
            ResourceKind::Region => {
                if let Some(object) = object {
                    self.regions.remove(object);
                }
            }
            ResourceKind::XdgPositioner => {
                if let Some(object) = object {
                    self.positioners.remove(object);
                }
            }
            _ => {}
        }
    }

    // Surfaces

    /// `wl_surface.commit`: xdg checks, the core commit, then buffer release
    /// and frame bookkeeping.
    pub fn commit_surface(&mut self, wl: &wl_surface::WlSurface, surface: SurfaceId) {
        let attaches_buffer = matches!(self.pending_buffers.get(&surface), Some(Some(_)));
        if let Some(entry) = self.xdg.get(&surface) {
            if entry.toplevel.is_none() && entry.popup.is_none() {
                ProtocolError::xdg_not_constructed().post(&entry.xdg_surface);
                return;
            }
            if attaches_buffer && !entry.acked {
                ProtocolError::xdg_unconfigured_buffer().post(&entry.xdg_surface);
                return;
            }
        }

        match self.compositor.commit(surface) {
            Ok(()) => {}
            Err(CommitError::BufferImport(e)) => {
                warn!("Commit of {} rejected: {}", surface, e);
                self.pending_buffers.remove(&surface);
                // Nothing will be drawn for this commit; release its callbacks now.
                if let Some(callbacks) = self.pending_frames.remove(&surface) {
                    let millis = monotonic_now().as_millis() as u32;
                    for callback in callbacks {
                        callback.done(millis);
                    }
                }
                return;
            }
            Err(CommitError::Viewport(e)) => {
                let error = ProtocolError::from(&e);
                match self.viewports.get(&surface) {
                    Some(viewport) => error.post(viewport),
                    None => error.post(wl),
                }
                return;
            }
            Err(CommitError::LayerShell(e)) => {
                let error = ProtocolError::from(&e);
                match self.layer_objects.get(&surface) {
                    Some(layer) => error.post(layer),
                    None => error.post(wl),
                }
                return;
            }
            Err(CommitError::InvalidScale(scale)) => {
                ProtocolError::invalid_surface_scale(scale).post(wl);
                return;
            }
            Err(e @ CommitError::UnknownSurface(_)) => {
                ProtocolError::implementation(e.to_string()).post(wl);
                return;
            }
        }

        if let Some(attached) = self.pending_buffers.remove(&surface) {
            let previous = match attached {
                Some(buffer) => self.current_buffers.insert(surface, buffer),
                None => self.current_buffers.remove(&surface),
            };
            if let Some(previous) = previous {
                if self.current_buffers.get(&surface) != Some(&previous) && previous.is_alive() {
                    previous.release();
                }
            }
        }
        if let Some(callbacks) = self.pending_frames.remove(&surface) {
            self.frame_queue.extend(callbacks);
        }
        self.committed.insert(surface);
        self.configure_xdg(surface);
        self.place_new_window(surface);
    }

    /// Sends the initial xdg configure once the surface has a role object.
    pub fn configure_xdg(&mut self, surface: SurfaceId) {
        let serial = self.serial.wrapping_add(1);
        let Some(entry) = self.xdg.get_mut(&surface) else {
            return;
        };
        if entry.last_configure.is_some() {
            return;
        }
        if let Some(toplevel) = &entry.toplevel {
            toplevel.configure(0, 0, Vec::new());
        } else if let Some((popup, _, geometry)) = &entry.popup {
            popup.configure(geometry.x, geometry.y, geometry.width, geometry.height);
        } else {
            return;
        }
        entry.xdg_surface.configure(serial);
        entry.last_configure = Some(serial);
        self.serial = serial;
        debug!("xdg configure for {} serial={}", surface, serial);
    }

    /// Gives a freshly mapped toplevel or popup a place in global space.
    fn place_new_window(&mut self, surface: SurfaceId) {
        let Some(committed) = self.compositor.surface(surface) else {
            return;
        };
        if committed.placement.is_some() || !committed.is_mapped() {
            return;
        }
        let size = committed.size;
        let origin = match committed.role() {
            Some(Role::Toplevel) => self
                .compositor
                .outputs()
                .primary()
                .map(|o| (o.geometry.x, o.geometry.y)),
            Some(Role::Popup) => self.xdg.get(&surface).and_then(|entry| {
                let (_, parent, geometry) = entry.popup.as_ref()?;
                let parent = self.compositor.surface((*parent)?)?.placement?;
                Some((parent.x + geometry.x, parent.y + geometry.y))
            }),
            _ => None,
        };
        if let Some((x, y)) = origin {
            let rect = Rectangle::new(x, y, size.width, size.height);
            if self.compositor.set_placement(surface, rect).is_ok() {
                debug!("{} placed at {:?}", surface, rect);
                self.send_surface_enter(surface);
            }
            if self.compositor.surface(surface).and_then(|s| s.role()) == Some(Role::Toplevel) {
                self.compositor.set_keyboard_focus(Some(surface));
            }
        }
    }

    // Outgoing events

    /// Sends what the extensions queued.
    pub fn flush_protocol_events(&mut self) {
        for event in self.compositor.drain_protocol_events() {
            match event {
                ProtocolEvent::LayerConfigure {
                    surface,
                    serial,
                    width,
                    height,
                } => {
                    if let Some(layer) = self.layer_objects.get(&surface) {
                        layer.configure(serial, width, height);
                    }
                }
                ProtocolEvent::LayerClosed { surface } => {
                    if let Some(layer) = self.layer_objects.get(&surface) {
                        layer.closed();
                    }
                }
                ProtocolEvent::FeedbackPresented { feedback, time, .. } => {
                    let Some(object) = self.feedbacks.remove(&feedback) else {
                        continue;
                    };
                    if let Some(outputs) = time.output.and_then(|o| self.output_objects.get(&o)) {
                        for output in outputs.iter().filter(|o| o.id().same_client_as(&object.id())) {
                            object.sync_output(output);
                        }
                    }
                    object.presented(
                        time.tv_sec_hi(),
                        time.tv_sec_lo(),
                        time.tv_nsec,
                        time.refresh_nsec,
                        time.seq_hi(),
                        time.seq_lo(),
                        wp_presentation_feedback::Kind::from_bits_truncate(time.flags),
                    );
                }
                ProtocolEvent::FeedbackDiscarded { feedback, .. } => {
                    if let Some(object) = self.feedbacks.remove(&feedback) {
                        object.discarded();
                    }
                }
            }
        }
    }

    /// Headless stand-in for the render pipeline: everything committed since
    /// the last frame counts as shown now.
    pub fn present_frame(&mut self) {
        let now = monotonic_now();
        let millis = now.as_millis() as u32;
        for callback in self.frame_queue.drain(..) {
            callback.done(millis);
        }
        self.frame_sequence += 1;
        for surface in std::mem::take(&mut self.committed) {
            let mapped = self
                .compositor
                .surface(surface)
                .is_some_and(|s| s.is_mapped());
            if !mapped {
                self.compositor.frame_discarded(surface);
                continue;
            }
            let refresh_nsec = self
                .compositor
                .output_for_surface(surface)
                .and_then(|id| self.compositor.outputs().get(id))
                .map_or(0, |o| o.refresh_nsec());
            let sync = SyncPoint {
                output: None,
                refresh_nsec,
                sequence: self.frame_sequence,
                flags: 0,
            };
            self.compositor.frame_presented(surface, sync, now);
        }
    }

    /// Reacts to core notifications the wire layer cares about.
    pub fn process_compositor_events(&mut self) {
        for event in self.compositor.drain_events() {
            match event {
                CompositorEvent::SurfaceCreated { surface, client } => {
                    self.correlate_x11_surface(surface, client);
                }
                CompositorEvent::SurfaceDestroyed { surface, .. } => {
                    if let Some(xwayland) = self.xwayland.as_mut() {
                        xwayland.windows_mut().surface_destroyed(surface);
                    }
                }
                CompositorEvent::KeyboardFocusChanged { old, new } => {
                    self.send_keyboard_focus(old, new);
                }
                CompositorEvent::PointerFocusChanged { old, new } => {
                    self.send_pointer_focus(old, new);
                }
                CompositorEvent::PrimaryOutputChanged(output) => {
                    info!("🖥️ Primary output is now {:?}", output);
                }
                other => debug!("{:?}", other),
            }
        }
    }

    fn is_xwayland_client(&self, client: ClientId) -> bool {
        let Some(pid) = self.xwayland.as_ref().and_then(|x| x.pid()) else {
            return false;
        };
        self.compositor
            .client(client)
            .and_then(|c| c.pid)
            .is_some_and(|p| p as u32 == pid)
    }

    fn correlate_x11_surface(&mut self, surface: SurfaceId, client: ClientId) {
        let from_xwayland = self.is_xwayland_client(client);
        let wire_id = self
            .surfaces
            .get(&surface)
            .filter(|_| from_xwayland)
            .map(|wl| wl.id().protocol_id());
        let pid = self
            .compositor
            .client(client)
            .and_then(|c| c.pid)
            .map(|p| p as u32);
        let Some(xwayland) = self.xwayland.as_mut() else {
            return;
        };
        if xwayland.windows().is_empty() {
            return;
        }
        let candidate = SurfaceCandidate {
            wire_id,
            pid,
            ..SurfaceCandidate::new(surface)
        };
        if let Some(window) = xwayland.windows_mut().correlate(&candidate) {
            self.bind_x11_window(window, surface);
        }
    }

    /// A `WL_SURFACE_ID` message arrived after the surface was created.
    pub fn x11_surface_id(&mut self, window: u32, wire_id: u32) {
        let surface = self
            .surfaces
            .iter()
            .filter(|(id, _)| {
                self.compositor
                    .surface(**id)
                    .is_some_and(|s| self.is_xwayland_client(s.client))
            })
            .find(|(_, wl)| wl.id().protocol_id() == wire_id)
            .map(|(id, _)| *id);
        let Some(surface) = surface else {
            debug!("WL_SURFACE_ID {} for {:#x} waits for its surface", wire_id, window);
            return;
        };
        if let Some(xwayland) = self.xwayland.as_mut() {
            if xwayland.windows_mut().associate(window, surface) {
                self.bind_x11_window(window, surface);
            }
        }
    }

    fn bind_x11_window(&mut self, window: u32, surface: SurfaceId) {
        if let Err(e) = self.compositor.assign_role(surface, Role::XWayland) {
            warn!("X11 window {:#x} cannot take {}: {}", window, surface, e);
            return;
        }
        self.x11_window_moved(window);
    }

    /// Mirrors an X11 window's geometry into its surface placement.
    pub fn x11_window_moved(&mut self, window: u32) {
        let Some(xwindow) = self.xwayland.as_ref().and_then(|x| x.windows().get(window)) else {
            return;
        };
        if let Some(surface) = xwindow.surface {
            let geometry = xwindow.geometry;
            if let Err(e) = self.compositor.set_placement(surface, geometry) {
                debug!("No placement for X11 window {:#x}: {}", window, e);
            }
        }
    }

    /// The X11 window went away; its surface loses the role object.
    pub fn x11_window_destroyed(&mut self, surface: Option<SurfaceId>) {
        if let Some(surface) = surface {
            self.compositor.release_role(surface);
        }
    }

    #[cfg(feature = "xwayland")]
    pub fn handle_wm_event(&mut self, event: WmEvent) {
        match event {
            WmEvent::SurfaceIdReceived { window, wire_id } => self.x11_surface_id(window, wire_id),
            WmEvent::WindowDestroyed { surface, .. } => self.x11_window_destroyed(surface),
            WmEvent::WindowConfigured { window } | WmEvent::WindowMapped { window } => {
                self.x11_window_moved(window)
            }
            WmEvent::WindowUnmapped { window } => debug!("X11 window {:#x} unmapped", window),
        }
    }
}

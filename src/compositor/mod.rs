//! Compositor core
//!
//! Owns the client / surface / output graph, the seat and the protocol
//! extensions. Surfaces live in an arena keyed by [`SurfaceId`]; extension
//! state hangs off the same id inside the extensions and is torn down by the
//! [`Extension`](crate::protocols::Extension) hooks before observers hear about
//! the change.
//!
//! Every notification is delivered twice: synchronously to registered
//! [`CompositorObserver`]s and as a [`CompositorEvent`] queued for the event
//! loop.

pub mod seat;
pub mod surface;

pub use seat::Seat;
pub use surface::{BufferRef, Region, Role, Surface, SurfaceState};

use crate::buffer::ImportError;
use crate::geometry::{Rectangle, Size};
use crate::ids::{BufferId, ClientId, FeedbackId, IdAllocator, OutputId, SurfaceId};
use crate::output::{Output, OutputError, OutputInfo, OutputManager};
use crate::protocols::layer_shell::{Layer, LayerShellError};
use crate::protocols::viewporter::ViewportError;
use crate::protocols::{ProtocolEvent, ProtocolRegistry, SyncPoint};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    SurfaceCreated { surface: SurfaceId, client: ClientId },
    SurfaceDestroyed { surface: SurfaceId, client: ClientId },
    SurfaceCommitted(SurfaceId),
    RoleAssigned { surface: SurfaceId, role: Role },
    KeyboardFocusChanged {
        old: Option<SurfaceId>,
        new: Option<SurfaceId>,
    },
    PointerFocusChanged {
        old: Option<SurfaceId>,
        new: Option<SurfaceId>,
    },
    OutputAdded(OutputId),
    OutputRemoved(OutputId),
    PrimaryOutputChanged(Option<OutputId>),
}

/// Receives compositor notifications synchronously.
#[cfg_attr(test, mockall::automock)]
pub trait CompositorObserver {
    fn notify(&mut self, event: &CompositorEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleError {
    #[error("{0} does not exist")]
    UnknownSurface(SurfaceId),
    #[error("surface already has an active {0:?} role")]
    AlreadyHasRole(Role),
    #[error("surface had role {existing:?}, cannot become {requested:?}")]
    RoleMismatch { existing: Role, requested: Role },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommitError {
    #[error("{0} does not exist")]
    UnknownSurface(SurfaceId),
    #[error("buffer scale {0} is not positive")]
    InvalidScale(i32),
    #[error("attached buffer could not be imported: {0}")]
    BufferImport(#[from] ImportError),
    #[error(transparent)]
    Viewport(#[from] ViewportError),
    #[error(transparent)]
    LayerShell(#[from] LayerShellError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositorError {
    #[error("{0} is not connected")]
    UnknownClient(ClientId),
    #[error("{0} does not exist")]
    UnknownSurface(SurfaceId),
}

#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    /// From the socket credentials, when available
    pub pid: Option<i32>,
    surfaces: Vec<SurfaceId>,
}

pub struct Compositor {
    clients: HashMap<ClientId, ClientInfo>,
    surfaces: BTreeMap<SurfaceId, Surface>,
    outputs: OutputManager,
    seat: Seat,
    protocols: ProtocolRegistry,
    observers: Vec<Box<dyn CompositorObserver>>,
    events: VecDeque<CompositorEvent>,
    client_ids: IdAllocator,
    surface_ids: IdAllocator,
}

impl Compositor {
    pub fn new(seat_name: &str, mut protocols: ProtocolRegistry) -> Self {
        let disabled = protocols.init();
        if !disabled.is_empty() {
            warn!("Running without: {}", disabled.join(", "));
        }
        Self {
            clients: HashMap::new(),
            surfaces: BTreeMap::new(),
            outputs: OutputManager::new(),
            seat: Seat::new(seat_name),
            protocols,
            observers: Vec::new(),
            events: VecDeque::new(),
            client_ids: IdAllocator::new(),
            surface_ids: IdAllocator::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn CompositorObserver>) {
        self.observers.push(observer);
    }

    /// Queued notifications, oldest first.
    pub fn drain_events(&mut self) -> Vec<CompositorEvent> {
        self.events.drain(..).collect()
    }

    /// Outgoing protocol events from the extensions.
    pub fn drain_protocol_events(&mut self) -> Vec<ProtocolEvent> {
        self.protocols.drain_events()
    }

    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.protocols
    }

    pub fn protocols_mut(&mut self) -> &mut ProtocolRegistry {
        &mut self.protocols
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    pub fn seat(&self) -> &Seat {
        &self.seat
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.values()
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientInfo> {
        self.clients.get(&id)
    }

    pub fn surfaces_of(&self, client: ClientId) -> &[SurfaceId] {
        self.clients
            .get(&client)
            .map(|c| c.surfaces.as_slice())
            .unwrap_or(&[])
    }

    // Clients

    pub fn create_client(&mut self, pid: Option<i32>) -> ClientId {
        let id = ClientId(self.client_ids.next());
        self.clients.insert(
            id,
            ClientInfo {
                pid,
                surfaces: Vec::new(),
            },
        );
        info!("🔌 {} connected (pid {:?})", id, pid);
        self.emit(CompositorEvent::ClientConnected(id));
        id
    }

    /// Tears down everything the client owned, newest surface first.
    pub fn destroy_client(&mut self, client: ClientId) {
        let Some(info) = self.clients.get(&client) else {
            return;
        };
        let surfaces: Vec<SurfaceId> = info.surfaces.iter().rev().copied().collect();
        for surface in surfaces {
            self.destroy_surface(surface);
        }
        self.protocols.client_disconnected(client);
        self.clients.remove(&client);
        info!("🔌 {} disconnected", client);
        self.emit(CompositorEvent::ClientDisconnected(client));
    }

    // Surfaces

    pub fn create_surface(&mut self, client: ClientId) -> Result<SurfaceId, CompositorError> {
        let info = self
            .clients
            .get_mut(&client)
            .ok_or(CompositorError::UnknownClient(client))?;
        let id = SurfaceId(self.surface_ids.next());
        info.surfaces.push(id);
        self.surfaces.insert(id, Surface::new(id, client));
        self.protocols.surface_created(id);
        debug!("{} created for {}", id, client);
        self.emit(CompositorEvent::SurfaceCreated {
            surface: id,
            client,
        });
        Ok(id)
    }

    /// Destroys a surface. Extension state goes first, then seat focus, then
    /// observers are told.
    pub fn destroy_surface(&mut self, surface: SurfaceId) -> bool {
        let Some(entry) = self.surfaces.remove(&surface) else {
            return false;
        };
        self.protocols.surface_destroyed(surface);
        if entry.role() == Some(Role::Layer) {
            if let Some(layer_shell) = self.protocols.layer_shell_mut() {
                layer_shell.arrange_all(&self.outputs);
            }
        }

        let (keyboard, pointer) = self.seat.surface_destroyed(surface);
        if keyboard {
            self.emit(CompositorEvent::KeyboardFocusChanged {
                old: Some(surface),
                new: None,
            });
        }
        if pointer {
            self.emit(CompositorEvent::PointerFocusChanged {
                old: Some(surface),
                new: None,
            });
        }

        if let Some(info) = self.clients.get_mut(&entry.client) {
            info.surfaces.retain(|s| *s != surface);
        }
        debug!("{} destroyed", surface);
        self.emit(CompositorEvent::SurfaceDestroyed {
            surface,
            client: entry.client,
        });
        true
    }

    pub fn attach(
        &mut self,
        surface: SurfaceId,
        buffer: Option<BufferRef>,
    ) -> Result<(), CompositorError> {
        self.surface_mut(surface)?.pending.buffer = Some(buffer);
        Ok(())
    }

    pub fn damage(&mut self, surface: SurfaceId, rect: Rectangle) -> Result<(), CompositorError> {
        self.surface_mut(surface)?.pending.damage.push(rect);
        Ok(())
    }

    /// `None` resets the input region to the whole surface.
    pub fn set_input_region(
        &mut self,
        surface: SurfaceId,
        region: Option<Region>,
    ) -> Result<(), CompositorError> {
        self.surface_mut(surface)?.pending.input_region = Some(region);
        Ok(())
    }

    pub fn set_buffer_scale(&mut self, surface: SurfaceId, scale: i32) -> Result<(), CommitError> {
        if scale < 1 {
            return Err(CommitError::InvalidScale(scale));
        }
        self.surfaces
            .get_mut(&surface)
            .ok_or(CommitError::UnknownSurface(surface))?
            .pending
            .buffer_scale = Some(scale);
        Ok(())
    }

    /// Applies pending state. A DMA-BUF buffer is imported here; if that or a
    /// viewport / layer-shell check fails the commit is rejected and the
    /// current state stays as it was.
    pub fn commit(&mut self, surface: SurfaceId) -> Result<(), CommitError> {
        let entry = self
            .surfaces
            .get(&surface)
            .ok_or(CommitError::UnknownSurface(surface))?;
        let buffer = match entry.pending.buffer {
            Some(attached) => attached,
            None => entry.current.buffer,
        };
        let scale = entry.pending.buffer_scale.unwrap_or(entry.current.buffer_scale);
        // A released role object leaves a plain surface behind.
        let layer_role = entry.role() == Some(Role::Layer) && entry.has_active_role();

        let buffer_size = match buffer {
            Some(BufferRef::Dmabuf(id)) => match self.import_dmabuf(id) {
                Ok(size) => size,
                Err(e) => {
                    // The inert buffer is dropped so the next commit starts clean.
                    let entry = self.surface_mut_for_commit(surface)?;
                    if entry.pending.buffer == Some(Some(BufferRef::Dmabuf(id))) {
                        entry.pending.buffer = None;
                    }
                    return Err(e.into());
                }
            },
            Some(BufferRef::Shm { width, height, .. }) => Some(Size::new(width, height)),
            None => None,
        };
        let logical = buffer_size.map(|s| Size::new(s.width / scale, s.height / scale));

        if let Some(viewporter) = self.protocols.viewporter() {
            viewporter.validate_commit(surface, logical)?;
        }
        if layer_role {
            if let Some(layer_shell) = self.protocols.layer_shell_mut() {
                layer_shell.commit(surface, buffer.is_some(), &self.outputs)?;
            }
        }

        let size = match (logical, self.protocols.viewporter()) {
            (Some(native), Some(viewporter)) => viewporter.effective_size(surface, native),
            (Some(native), None) => native,
            (None, _) => Size::default(),
        };
        let layer_geometry = self
            .protocols
            .layer_shell()
            .and_then(|ls| ls.get(surface))
            .map(|ls| ls.geometry);

        let entry = self.surface_mut_for_commit(surface)?;
        let pending = std::mem::take(&mut entry.pending);
        entry.current.buffer = buffer;
        entry.current.damage = pending.damage;
        if let Some(region) = pending.input_region {
            entry.current.input_region = region;
        }
        entry.current.buffer_scale = scale;
        entry.size = size;
        entry.commit_count += 1;
        match layer_geometry {
            Some(geometry) => entry.placement = Some(geometry),
            None => {
                if let Some(placement) = entry.placement.as_mut() {
                    placement.width = size.width;
                    placement.height = size.height;
                }
            }
        }

        self.emit(CompositorEvent::SurfaceCommitted(surface));
        Ok(())
    }

    // Roles

    pub fn assign_role(&mut self, surface: SurfaceId, role: Role) -> Result<(), RoleError> {
        let entry = self
            .surfaces
            .get_mut(&surface)
            .ok_or(RoleError::UnknownSurface(surface))?;
        match entry.role() {
            Some(existing) if entry.has_active_role() => {
                return Err(RoleError::AlreadyHasRole(existing));
            }
            Some(existing) if existing != role => {
                return Err(RoleError::RoleMismatch {
                    existing,
                    requested: role,
                });
            }
            _ => {}
        }
        entry.set_role(role);
        debug!("{} is now {:?}", surface, role);
        self.emit(CompositorEvent::RoleAssigned { surface, role });
        Ok(())
    }

    /// Called when the role object is destroyed; the surface keeps its role type.
    pub fn release_role(&mut self, surface: SurfaceId) {
        let Some(entry) = self.surfaces.get_mut(&surface) else {
            return;
        };
        entry.deactivate_role();
        entry.current.buffer = None;
        if entry.role() == Some(Role::Layer) {
            if let Some(layer_shell) = self.protocols.layer_shell_mut() {
                if layer_shell.destroy_layer_surface(surface) {
                    layer_shell.arrange_all(&self.outputs);
                }
            }
        }
    }

    /// `zwlr_layer_shell_v1.get_layer_surface`: layer check, then role, then state.
    pub fn create_layer_surface(
        &mut self,
        surface: SurfaceId,
        output: Option<OutputId>,
        layer: u32,
        namespace: String,
    ) -> Result<(), LayerShellError> {
        Layer::try_from(layer)?;
        if self.protocols.layer_shell().is_none() {
            return Err(LayerShellError::InvalidSurfaceState("layer shell disabled"));
        }
        self.assign_role(surface, Role::Layer)
            .map_err(|_| LayerShellError::Role)?;
        match self.protocols.layer_shell_mut() {
            Some(ls) => ls.get_layer_surface(surface, output, layer, namespace),
            None => Err(LayerShellError::InvalidSurfaceState("layer shell disabled")),
        }
    }

    /// `wp_presentation.feedback`
    pub fn request_feedback(&mut self, surface: SurfaceId) -> Option<FeedbackId> {
        if !self.surfaces.contains_key(&surface) {
            return None;
        }
        self.protocols
            .presentation_mut()
            .map(|presentation| presentation.feedback(surface))
    }

    // Outputs

    pub fn add_output(&mut self, info: OutputInfo) -> Result<OutputId, OutputError> {
        let before = self.outputs.primary_id();
        let id = self.outputs.add(info)?;
        self.emit(CompositorEvent::OutputAdded(id));
        self.primary_changed(before);
        Ok(id)
    }

    /// Removes an output; layer surfaces on it are closed and the rest are
    /// re-arranged.
    pub fn remove_output(&mut self, id: OutputId) -> Result<Output, OutputError> {
        let before = self.outputs.primary_id();
        let removed = self.outputs.remove(id)?;
        self.protocols.output_removed(id);
        if let Some(layer_shell) = self.protocols.layer_shell_mut() {
            layer_shell.arrange_all(&self.outputs);
        }
        self.emit(CompositorEvent::OutputRemoved(id));
        self.primary_changed(before);
        Ok(removed)
    }

    pub fn set_primary_output(&mut self, id: OutputId) -> Result<(), OutputError> {
        let before = self.outputs.primary_id();
        self.outputs.set_primary(id)?;
        self.primary_changed(before);
        Ok(())
    }

    /// Output with the largest overlap with the surface's placement, else the primary.
    pub fn output_for_surface(&self, surface: SurfaceId) -> Option<OutputId> {
        let entry = self.surfaces.get(&surface)?;
        match entry.placement {
            Some(rect) => self.outputs.output_for_rect(&rect),
            None => self.outputs.primary_id(),
        }
    }

    pub fn set_placement(&mut self, surface: SurfaceId, rect: Rectangle) -> Result<(), CompositorError> {
        self.surface_mut(surface)?.placement = Some(rect);
        Ok(())
    }

    // Seat

    /// Moves keyboard focus. Returns false when it was already there.
    pub fn set_keyboard_focus(&mut self, surface: Option<SurfaceId>) -> bool {
        if let Some(id) = surface {
            if !self.surfaces.contains_key(&id) {
                return false;
            }
        }
        match self.seat.set_keyboard_focus(surface) {
            Some(old) => {
                debug!("Keyboard focus {:?} -> {:?}", old, surface);
                self.emit(CompositorEvent::KeyboardFocusChanged { old, new: surface });
                true
            }
            None => false,
        }
    }

    pub fn set_pointer_focus(&mut self, surface: Option<SurfaceId>, location: (f64, f64)) -> bool {
        if let Some(id) = surface {
            if !self.surfaces.contains_key(&id) {
                return false;
            }
        }
        match self.seat.set_pointer_focus(surface, location) {
            Some(old) => {
                self.emit(CompositorEvent::PointerFocusChanged { old, new: surface });
                true
            }
            None => false,
        }
    }

    // Render boundary

    /// The renderer showed the surface's latest content.
    pub fn frame_presented(&mut self, surface: SurfaceId, sync: SyncPoint, frame_time: Duration) -> usize {
        let sync = SyncPoint {
            output: sync.output.or_else(|| self.output_for_surface(surface)),
            ..sync
        };
        self.protocols
            .presentation_mut()
            .map_or(0, |p| p.present(surface, sync, frame_time))
    }

    /// The renderer dropped the surface's content without showing it.
    pub fn frame_discarded(&mut self, surface: SurfaceId) -> usize {
        self.protocols
            .presentation_mut()
            .map_or(0, |p| p.discard(surface))
    }

    fn primary_changed(&mut self, before: Option<OutputId>) {
        let after = self.outputs.primary_id();
        if after != before {
            self.emit(CompositorEvent::PrimaryOutputChanged(after));
        }
    }

    fn surface_mut(&mut self, surface: SurfaceId) -> Result<&mut Surface, CompositorError> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(CompositorError::UnknownSurface(surface))
    }

    fn import_dmabuf(&mut self, buffer: BufferId) -> Result<Option<Size>, ImportError> {
        let dmabuf = self.protocols.dmabuf_mut().ok_or(ImportError::Inert)?;
        dmabuf.ensure_imported(buffer)?;
        Ok(dmabuf.buffer_size(buffer))
    }

    fn surface_mut_for_commit(&mut self, surface: SurfaceId) -> Result<&mut Surface, CommitError> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(CommitError::UnknownSurface(surface))
    }

    fn emit(&mut self, event: CompositorEvent) {
        for observer in &mut self.observers {
            observer.notify(&event);
        }
        self.events.push_back(event);
    }
}

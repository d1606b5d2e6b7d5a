//! Protocol object bookkeeping
//!
//! Every protocol object a client creates is recorded here with a closed
//! [`ResourceKind`] tag, so request routing is a `match` on the tag rather than
//! a cast of untyped user data. The registry guarantees:
//!
//! - binding an interface above its advertised version is a protocol error
//!   value, never a panic,
//! - the destroy hook of a resource runs exactly once,
//! - a handle stops dispatching once its resource is destroyed, even if the
//!   client later reuses the same protocol id.

use crate::ids::{BufferId, ClientId, FeedbackId, OutputId, ParamsId, SurfaceId};
use log::{debug, error};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// What a protocol object is, with the core id it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Compositor,
    Surface(SurfaceId),
    Region,
    FrameCallback(SurfaceId),
    Shm,
    ShmPool,
    ShmBuffer,
    Seat,
    Keyboard,
    Pointer,
    Touch,
    Output(OutputId),
    XdgWmBase,
    XdgPositioner,
    XdgSurface(SurfaceId),
    XdgToplevel(SurfaceId),
    XdgPopup(SurfaceId),
    LayerShell,
    LayerSurface(SurfaceId),
    Presentation,
    PresentationFeedback(FeedbackId),
    Viewporter,
    Viewport(SurfaceId),
    Dmabuf,
    DmabufParams(ParamsId),
    /// `None` for an inert buffer left behind by a failed `create_immed`.
    DmabufBuffer(Option<BufferId>),
}

/// Identifies one live protocol object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pub client: ClientId,
    pub object: u32,
    generation: u64,
}

impl ResourceHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/g{}", self.client, self.object, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("interface {interface} is not advertised")]
    UnknownInterface { interface: String },

    #[error("{interface} v{requested} requested but only v{supported} is supported")]
    UnsupportedVersion {
        interface: String,
        requested: u32,
        supported: u32,
    },

    #[error("object id {object} is already in use by {client}")]
    IdInUse { client: ClientId, object: u32 },

    #[error("{0} was already destroyed")]
    AlreadyDestroyed(ResourceHandle),

    #[error("{0} has no implementation attached")]
    NotAttached(ResourceHandle),
}

impl ResourceError {
    /// Errors caused by the client rather than by compositor bookkeeping.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ResourceError::UnknownInterface { .. }
                | ResourceError::UnsupportedVersion { .. }
                | ResourceError::IdInUse { .. }
        )
    }
}

/// Callback run once when a resource is destroyed.
pub type DestroyHook = Box<dyn FnOnce(ResourceHandle, Option<ResourceKind>)>;

struct ResourceEntry {
    handle: ResourceHandle,
    interface: String,
    version: u32,
    kind: Option<ResourceKind>,
    on_destroy: Option<DestroyHook>,
}

/// Client ↔ resource ↔ implementation table.
#[derive(Default)]
pub struct ResourceRegistry {
    interfaces: HashMap<String, u32>,
    entries: HashMap<(ClientId, u32), ResourceEntry>,
    generation: u64,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertises `name` up to `max_version`.
    pub fn register_interface(&mut self, name: &str, max_version: u32) {
        debug!("Registered interface {} v{}", name, max_version);
        self.interfaces.insert(name.to_string(), max_version);
    }

    pub fn unregister_interface(&mut self, name: &str) {
        self.interfaces.remove(name);
    }

    pub fn supported_version(&self, name: &str) -> Option<u32> {
        self.interfaces.get(name).copied()
    }

    /// Binds a global interface for `client` under protocol id `id`.
    pub fn bind(
        &mut self,
        client: ClientId,
        interface: &str,
        version: u32,
        id: u32,
    ) -> Result<ResourceHandle, ResourceError> {
        let supported =
            self.interfaces
                .get(interface)
                .copied()
                .ok_or_else(|| ResourceError::UnknownInterface {
                    interface: interface.to_string(),
                })?;
        if version == 0 || version > supported {
            return Err(ResourceError::UnsupportedVersion {
                interface: interface.to_string(),
                requested: version,
                supported,
            });
        }
        self.insert(client, interface, version, id)
    }

    /// Records an object created by a request on another object. Its version is
    /// inherited from the parent, so no global check applies.
    pub fn insert(
        &mut self,
        client: ClientId,
        interface: &str,
        version: u32,
        id: u32,
    ) -> Result<ResourceHandle, ResourceError> {
        if self.entries.contains_key(&(client, id)) {
            return Err(ResourceError::IdInUse { client, object: id });
        }
        self.generation += 1;
        let handle = ResourceHandle {
            client,
            object: id,
            generation: self.generation,
        };
        self.entries.insert(
            (client, id),
            ResourceEntry {
                handle,
                interface: interface.to_string(),
                version,
                kind: None,
                on_destroy: None,
            },
        );
        Ok(handle)
    }

    /// Attaches the implementation tag and an optional destroy hook.
    pub fn attach(
        &mut self,
        handle: ResourceHandle,
        kind: ResourceKind,
        on_destroy: Option<DestroyHook>,
    ) -> Result<(), ResourceError> {
        let entry = self.live_entry_mut(handle)?;
        entry.kind = Some(kind);
        entry.on_destroy = on_destroy;
        Ok(())
    }

    /// Routes a request: returns the tag of a live, attached resource.
    pub fn dispatch(&self, handle: ResourceHandle) -> Result<ResourceKind, ResourceError> {
        let entry = self
            .entries
            .get(&(handle.client, handle.object))
            .filter(|e| e.handle.generation == handle.generation)
            .ok_or(ResourceError::AlreadyDestroyed(handle))?;
        entry.kind.ok_or(ResourceError::NotAttached(handle))
    }

    pub fn version(&self, handle: ResourceHandle) -> Option<u32> {
        self.entries
            .get(&(handle.client, handle.object))
            .filter(|e| e.handle.generation == handle.generation)
            .map(|e| e.version)
    }

    pub fn interface(&self, handle: ResourceHandle) -> Option<&str> {
        self.entries
            .get(&(handle.client, handle.object))
            .filter(|e| e.handle.generation == handle.generation)
            .map(|e| e.interface.as_str())
    }

    /// Current handle for a live protocol id of `client`.
    pub fn lookup(&self, client: ClientId, object: u32) -> Option<ResourceHandle> {
        self.entries.get(&(client, object)).map(|e| e.handle)
    }

    /// Destroys the resource and runs its hook. Destroying twice is an error.
    pub fn destroy(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<Option<ResourceKind>, ResourceError> {
        let key = (handle.client, handle.object);
        match self.entries.get(&key) {
            Some(entry) if entry.handle.generation == handle.generation => {}
            _ => {
                error!("Double destroy of {}", handle);
                return Err(ResourceError::AlreadyDestroyed(handle));
            }
        }
        let entry = match self.entries.remove(&key) {
            Some(entry) => entry,
            None => return Err(ResourceError::AlreadyDestroyed(handle)),
        };
        Ok(Self::finalize(entry))
    }

    /// Destroys everything `client` owns, newest first.
    pub fn destroy_client(
        &mut self,
        client: ClientId,
    ) -> Vec<(ResourceHandle, Option<ResourceKind>)> {
        let mut keys: Vec<(u64, (ClientId, u32))> = self
            .entries
            .iter()
            .filter(|(key, _)| key.0 == client)
            .map(|(key, entry)| (entry.handle.generation, *key))
            .collect();
        keys.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let mut destroyed = Vec::with_capacity(keys.len());
        for (_, key) in keys {
            if let Some(entry) = self.entries.remove(&key) {
                let handle = entry.handle;
                destroyed.push((handle, Self::finalize(entry)));
            }
        }
        if !destroyed.is_empty() {
            debug!("Destroyed {} resources of {}", destroyed.len(), client);
        }
        destroyed
    }

    pub fn resources_of(&self, client: ClientId) -> usize {
        self.entries.keys().filter(|key| key.0 == client).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_entry_mut(
        &mut self,
        handle: ResourceHandle,
    ) -> Result<&mut ResourceEntry, ResourceError> {
        self.entries
            .get_mut(&(handle.client, handle.object))
            .filter(|e| e.handle.generation == handle.generation)
            .ok_or(ResourceError::AlreadyDestroyed(handle))
    }

    fn finalize(mut entry: ResourceEntry) -> Option<ResourceKind> {
        if let Some(hook) = entry.on_destroy.take() {
            hook(entry.handle, entry.kind);
        }
        entry.kind
    }
}

//! Protocol extension registry
//!
//! The four wire extensions live here as plain state machines. Each one
//! implements [`Extension`] so the compositor can fan out surface, client and
//! output lifecycle notifications without knowing which extensions are
//! enabled. An extension whose initialization fails is switched off; the
//! remaining ones keep working.

pub mod dmabuf;
pub mod layer_shell;
pub mod presentation;
pub mod viewporter;

pub use dmabuf::DmabufExtension;
pub use layer_shell::LayerShellExtension;
pub use presentation::{PresentationTime, PresentationTimeExtension, SyncPoint};
pub use viewporter::ViewporterExtension;

use crate::ids::{ClientId, FeedbackId, OutputId, SurfaceId};
use log::{error, info};
use thiserror::Error;

/// Outgoing events produced by extensions, sent by the wire layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    LayerConfigure {
        surface: SurfaceId,
        serial: u32,
        width: u32,
        height: u32,
    },
    LayerClosed {
        surface: SurfaceId,
    },
    FeedbackPresented {
        feedback: FeedbackId,
        surface: SurfaceId,
        time: PresentationTime,
    },
    FeedbackDiscarded {
        feedback: FeedbackId,
        surface: SurfaceId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("{interface} failed to initialize: {reason}")]
    Init {
        interface: &'static str,
        reason: String,
    },
}

/// Lifecycle hooks shared by every extension. Surface hooks run before any
/// compositor observer sees the surface.
pub trait Extension {
    fn interface(&self) -> &'static str;

    fn version(&self) -> u32;

    fn init(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }

    fn surface_created(&mut self, _surface: SurfaceId) {}

    /// Releases every piece of state attached to `surface`.
    fn surface_destroyed(&mut self, _surface: SurfaceId) {}

    fn client_disconnected(&mut self, _client: ClientId) {}

    fn output_removed(&mut self, _output: OutputId) {}

    fn take_events(&mut self) -> Vec<ProtocolEvent>;
}

#[derive(Default)]
pub struct ProtocolRegistry {
    layer_shell: Option<LayerShellExtension>,
    presentation: Option<PresentationTimeExtension>,
    viewporter: Option<ViewporterExtension>,
    dmabuf: Option<DmabufExtension>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer_shell(mut self, ext: LayerShellExtension) -> Self {
        self.layer_shell = Some(ext);
        self
    }

    pub fn with_presentation(mut self, ext: PresentationTimeExtension) -> Self {
        self.presentation = Some(ext);
        self
    }

    pub fn with_viewporter(mut self, ext: ViewporterExtension) -> Self {
        self.viewporter = Some(ext);
        self
    }

    pub fn with_dmabuf(mut self, ext: DmabufExtension) -> Self {
        self.dmabuf = Some(ext);
        self
    }

    /// Initializes every extension and disables the ones that fail. Returns
    /// the interfaces that were disabled.
    pub fn init(&mut self) -> Vec<&'static str> {
        let mut disabled = Vec::new();
        Self::init_one(&mut self.layer_shell, &mut disabled);
        Self::init_one(&mut self.presentation, &mut disabled);
        Self::init_one(&mut self.viewporter, &mut disabled);
        Self::init_one(&mut self.dmabuf, &mut disabled);
        disabled
    }

    fn init_one<E: Extension>(slot: &mut Option<E>, disabled: &mut Vec<&'static str>) {
        if let Some(ext) = slot.as_mut() {
            let interface = ext.interface();
            match ext.init() {
                Ok(()) => info!("✅ {} v{} enabled", interface, ext.version()),
                Err(e) => {
                    error!("❌ {}; extension disabled", e);
                    disabled.push(interface);
                    *slot = None;
                }
            }
        }
    }

    /// `(interface, version)` of every enabled extension.
    pub fn globals(&self) -> Vec<(&'static str, u32)> {
        let mut globals = Vec::new();
        self.for_each_ref(|ext| globals.push((ext.interface(), ext.version())));
        globals
    }

    pub fn is_enabled(&self, interface: &str) -> bool {
        self.globals().iter().any(|(name, _)| *name == interface)
    }

    pub fn layer_shell(&self) -> Option<&LayerShellExtension> {
        self.layer_shell.as_ref()
    }

    pub fn layer_shell_mut(&mut self) -> Option<&mut LayerShellExtension> {
        self.layer_shell.as_mut()
    }

    pub fn presentation(&self) -> Option<&PresentationTimeExtension> {
        self.presentation.as_ref()
    }

    pub fn presentation_mut(&mut self) -> Option<&mut PresentationTimeExtension> {
        self.presentation.as_mut()
    }

    pub fn viewporter(&self) -> Option<&ViewporterExtension> {
        self.viewporter.as_ref()
    }

    pub fn viewporter_mut(&mut self) -> Option<&mut ViewporterExtension> {
        self.viewporter.as_mut()
    }

    pub fn dmabuf(&self) -> Option<&DmabufExtension> {
        self.dmabuf.as_ref()
    }

    pub fn dmabuf_mut(&mut self) -> Option<&mut DmabufExtension> {
        self.dmabuf.as_mut()
    }

    pub fn surface_created(&mut self, surface: SurfaceId) {
        self.for_each(|ext| ext.surface_created(surface));
    }

    pub fn surface_destroyed(&mut self, surface: SurfaceId) {
        self.for_each(|ext| ext.surface_destroyed(surface));
    }

    pub fn client_disconnected(&mut self, client: ClientId) {
        self.for_each(|ext| ext.client_disconnected(client));
    }

    pub fn output_removed(&mut self, output: OutputId) {
        self.for_each(|ext| ext.output_removed(output));
    }

    /// Collects pending outgoing events from every extension.
    pub fn drain_events(&mut self) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        self.for_each(|ext| events.extend(ext.take_events()));
        events
    }

    fn for_each(&mut self, mut f: impl FnMut(&mut dyn Extension)) {
        if let Some(ext) = self.layer_shell.as_mut() {
            f(ext);
        }
        if let Some(ext) = self.presentation.as_mut() {
            f(ext);
        }
        if let Some(ext) = self.viewporter.as_mut() {
            f(ext);
        }
        if let Some(ext) = self.dmabuf.as_mut() {
            f(ext);
        }
    }

    fn for_each_ref(&self, mut f: impl FnMut(&dyn Extension)) {
        if let Some(ext) = self.layer_shell.as_ref() {
            f(ext);
        }
        if let Some(ext) = self.presentation.as_ref() {
            f(ext);
        }
        if let Some(ext) = self.viewporter.as_ref() {
            f(ext);
        }
        if let Some(ext) = self.dmabuf.as_ref() {
            f(ext);
        }
    }
}

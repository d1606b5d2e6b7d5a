//! Wayland wire layer
//!
//! Binds the listening socket, advertises globals and runs everything on one
//! calloop loop: a short dispatch timer accepts and serves clients, a frame
//! timer stands in for the render pipeline, and XWayland is polled and
//! restarted from timers of its own.

pub mod dmabuf;
pub mod error;
pub mod layer_shell;
pub mod output;
pub mod presentation;
pub mod seat;
pub mod shm;
pub mod state;
pub mod surface;
pub mod viewporter;
pub mod xdg;

pub use error::ProtocolError;
pub use state::{ServerClientData, ServerState};

use crate::buffer::{BufferImportEngine, GpuImporter};
use crate::compositor::Compositor;
use crate::config::KeystoneConfig;
use crate::ids::OutputId;
use crate::output::OutputInfo;
use crate::protocols::{
    dmabuf as dmabuf_ext, layer_shell as layer_shell_ext, presentation as presentation_ext,
    viewporter as viewporter_ext, DmabufExtension, LayerShellExtension, PresentationTimeExtension,
    ProtocolRegistry, ViewporterExtension,
};
use crate::xwayland::{
    ProcessLauncher, RestartPolicy, SupervisorAction, XServerLauncher, XWaylandEvent,
    XWaylandSupervisor,
};
use anyhow::{anyhow, Context, Result};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, LoopSignal};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_v1;
use wayland_protocols::wp::presentation_time::server::wp_presentation;
use wayland_protocols::wp::viewporter::server::wp_viewporter;
use wayland_protocols::xdg::shell::server::xdg_wm_base;
use wayland_protocols_wlr::layer_shell::v1::server::zwlr_layer_shell_v1;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::{wl_compositor, wl_output, wl_seat, wl_shm};
use wayland_server::{Display, ListeningSocket};

/// Core globals and their versions.
const CORE_GLOBALS: [(&str, u32); 5] = [
    ("wl_compositor", 4),
    ("wl_shm", 1),
    ("wl_seat", 7),
    ("wl_output", 4),
    ("xdg_wm_base", 3),
];

const XWAYLAND_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Extensions enabled by the configuration. A DMA-BUF extension owns the
/// importer; a failing importer disables it at init time.
pub fn build_protocols(config: &KeystoneConfig, importer: Box<dyn GpuImporter>) -> ProtocolRegistry {
    let mut protocols = ProtocolRegistry::new();
    if config.layer_shell.enabled {
        protocols = protocols.with_layer_shell(LayerShellExtension::new());
    }
    if config.presentation.enabled {
        protocols = protocols.with_presentation(PresentationTimeExtension::new());
    }
    if config.viewporter.enabled {
        protocols = protocols.with_viewporter(ViewporterExtension::new());
    }
    if config.dmabuf.enabled {
        protocols = protocols.with_dmabuf(DmabufExtension::new(BufferImportEngine::new(importer)));
    }
    protocols
}

pub struct KeystoneServer {
    event_loop: EventLoop<'static, ServerState>,
    display: Display<ServerState>,
    listening: ListeningSocket,
    state: ServerState,
    output_globals: HashMap<OutputId, GlobalId>,
    dispatch_interval: Duration,
    xwayland_stop_timeout: Duration,
}

impl KeystoneServer {
    /// Builds the core, advertises globals and binds the socket. XWayland
    /// uses `launcher` when given, the real binary otherwise.
    pub fn new(
        config: &KeystoneConfig,
        importer: Box<dyn GpuImporter>,
        launcher: Option<Box<dyn XServerLauncher>>,
    ) -> Result<Self> {
        let protocols = build_protocols(config, importer);
        let compositor = Compositor::new(&config.general.seat_name, protocols);
        let keymap = seat::default_keymap();
        if keymap.is_none() {
            warn!("⌨️ No xkb keymap could be compiled; keyboards get none");
        }
        let mut state = ServerState::new(compositor, keymap);

        if config.xwayland.enabled {
            let launcher = launcher
                .unwrap_or_else(|| Box::new(ProcessLauncher::new(config.xwayland.clone())));
            state.xwayland = Some(XWaylandSupervisor::new(
                RestartPolicy::from(&config.xwayland),
                launcher,
            ));
        }

        let display: Display<ServerState> = Display::new().context("create display")?;
        let dh = display.handle();

        for (name, version) in CORE_GLOBALS {
            state.resources.register_interface(name, version);
        }
        dh.create_global::<ServerState, wl_compositor::WlCompositor, _>(4, ());
        dh.create_global::<ServerState, wl_shm::WlShm, _>(1, ());
        dh.create_global::<ServerState, wl_seat::WlSeat, _>(7, ());
        dh.create_global::<ServerState, xdg_wm_base::XdgWmBase, _>(3, ());

        for (interface, version) in state.compositor.protocols().globals() {
            state.resources.register_interface(interface, version);
            match interface {
                dmabuf_ext::INTERFACE => {
                    dh.create_global::<ServerState, zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1, _>(
                        version,
                        (),
                    );
                }
                layer_shell_ext::INTERFACE => {
                    dh.create_global::<ServerState, zwlr_layer_shell_v1::ZwlrLayerShellV1, _>(
                        version,
                        (),
                    );
                }
                presentation_ext::INTERFACE => {
                    dh.create_global::<ServerState, wp_presentation::WpPresentation, _>(version, ());
                }
                viewporter_ext::INTERFACE => {
                    dh.create_global::<ServerState, wp_viewporter::WpViewporter, _>(version, ());
                }
                other => warn!("No wire implementation for {}", other),
            }
            debug!("Advertised {} v{}", interface, version);
        }

        let listening = match &config.general.socket_name {
            Some(name) => ListeningSocket::bind(name).with_context(|| format!("bind socket {}", name))?,
            None => ListeningSocket::bind_auto("wayland", 1..32).context("bind socket")?,
        };
        state.socket_name = listening
            .socket_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("missing socket name"))?;
        info!("🔌 Listening on {}", state.socket_name);

        let event_loop = EventLoop::try_new().context("create calloop")?;
        let mut server = Self {
            event_loop,
            display,
            listening,
            state,
            output_globals: HashMap::new(),
            dispatch_interval: config.general.dispatch_interval(),
            xwayland_stop_timeout: config.xwayland.stop_timeout(),
        };

        let mut infos: Vec<OutputInfo> = config
            .outputs
            .iter()
            .filter(|o| o.enabled)
            .map(|o| o.to_info())
            .collect();
        if infos.is_empty() {
            infos.push(OutputInfo {
                primary: true,
                ..OutputInfo::default()
            });
        }
        for info in infos {
            server.add_output(info)?;
        }
        Ok(server)
    }

    pub fn socket_name(&self) -> &str {
        self.state.socket_name()
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Stops [`run`](Self::run) from another thread or a signal handler.
    pub fn shutdown_handle(&self) -> LoopSignal {
        self.event_loop.get_signal()
    }

    /// Adds an output to the core and advertises its `wl_output` global.
    pub fn add_output(&mut self, info: OutputInfo) -> Result<OutputId> {
        let name = info.name.clone();
        let id = self
            .state
            .compositor
            .add_output(info)
            .with_context(|| format!("add output {}", name))?;
        let global = self
            .display
            .handle()
            .create_global::<ServerState, wl_output::WlOutput, _>(4, id);
        self.output_globals.insert(id, global);
        info!("🖥️ Output {} advertised as {}", name, id);
        Ok(id)
    }

    /// Withdraws the global first so no new client can bind a dead output.
    pub fn remove_output(&mut self, id: OutputId) -> Result<()> {
        if let Some(global) = self.output_globals.remove(&id) {
            self.display.handle().remove_global::<ServerState>(global);
        }
        self.state
            .compositor
            .remove_output(id)
            .with_context(|| format!("remove output {}", id))?;
        self.state.output_objects.remove(&id);
        Ok(())
    }

    /// Runs until the loop signal fires, then stops XWayland.
    pub fn run(self) -> Result<()> {
        let KeystoneServer {
            mut event_loop,
            mut display,
            listening,
            mut state,
            output_globals: _,
            dispatch_interval,
            xwayland_stop_timeout,
        } = self;

        std::env::set_var("WAYLAND_DISPLAY", state.socket_name());
        info!("WAYLAND_DISPLAY={}", state.socket_name());

        let handle = event_loop.handle();
        let mut dh = display.handle();
        handle
            .insert_source(
                Timer::from_duration(dispatch_interval),
                move |_deadline: Instant, _meta: &mut (), data: &mut ServerState| {
                    loop {
                        match listening.accept() {
                            Ok(Some(stream)) => data.accept_client(&mut dh, stream),
                            Ok(None) => break,
                            Err(e) => {
                                warn!("accept failed: {}", e);
                                break;
                            }
                        }
                    }
                    if let Err(e) = display.dispatch_clients(data) {
                        error!("❌ Client dispatch failed: {}", e);
                    }
                    data.reap_clients();
                    data.process_compositor_events();
                    data.flush_protocol_events();
                    if let Err(e) = display.flush_clients() {
                        debug!("flush: {}", e);
                    }
                    TimeoutAction::ToDuration(dispatch_interval)
                },
            )
            .map_err(|e| anyhow!("register dispatch timer: {}", e.error))?;

        let frame_interval = state
            .compositor
            .outputs()
            .primary()
            .map(|o| o.refresh_nsec())
            .filter(|nsec| *nsec > 0)
            .map_or(DEFAULT_FRAME_INTERVAL, |nsec| Duration::from_nanos(nsec as u64));
        handle
            .insert_source(
                Timer::from_duration(frame_interval),
                move |_deadline: Instant, _meta: &mut (), data: &mut ServerState| {
                    data.present_frame();
                    data.flush_protocol_events();
                    TimeoutAction::ToDuration(frame_interval)
                },
            )
            .map_err(|e| anyhow!("register frame timer: {}", e.error))?;

        if state.xwayland.is_some() {
            start_xwayland(&handle, &mut state)?;
        }

        info!("✅ Keystone is running");
        event_loop
            .run(None, &mut state, |_| {})
            .context("event loop")?;

        info!("🛑 Shutting down");
        if let Some(xwayland) = state.xwayland.as_mut() {
            xwayland.stop(xwayland_stop_timeout);
        }
        Ok(())
    }
}

fn start_xwayland(handle: &LoopHandle<'static, ServerState>, state: &mut ServerState) -> Result<()> {
    let socket = state.socket_name().to_string();
    if let Some(xwayland) = state.xwayland.as_mut() {
        if let Err(e) = xwayland.start(&socket, Instant::now()) {
            warn!("⚠️ XWayland unavailable: {}", e);
        }
    }
    handle_xwayland_events(handle, state);

    let poll_handle = handle.clone();
    handle
        .insert_source(
            Timer::from_duration(XWAYLAND_POLL_INTERVAL),
            move |_deadline: Instant, _meta: &mut (), data: &mut ServerState| {
                let Some(xwayland) = data.xwayland.as_mut() else {
                    return TimeoutAction::Drop;
                };
                if let SupervisorAction::ScheduleRestart(delay) = xwayland.poll(Instant::now()) {
                    schedule_restart(&poll_handle, delay);
                }
                handle_xwayland_events(&poll_handle, data);
                TimeoutAction::ToDuration(XWAYLAND_POLL_INTERVAL)
            },
        )
        .map_err(|e| anyhow!("register xwayland poll timer: {}", e.error))?;
    Ok(())
}

fn schedule_restart(handle: &LoopHandle<'static, ServerState>, delay: Duration) {
    let restart_handle = handle.clone();
    let inserted = handle.insert_source(
        Timer::from_duration(delay),
        move |_deadline: Instant, _meta: &mut (), data: &mut ServerState| {
            let socket = data.socket_name().to_string();
            if let Some(xwayland) = data.xwayland.as_mut() {
                if let Err(e) = xwayland.restart(&socket, Instant::now()) {
                    error!("❌ XWayland restart failed: {}", e);
                }
            }
            handle_xwayland_events(&restart_handle, data);
            TimeoutAction::Drop
        },
    );
    if let Err(e) = inserted {
        error!("❌ Could not schedule XWayland restart: {}", e.error);
    }
}

fn handle_xwayland_events(handle: &LoopHandle<'static, ServerState>, state: &mut ServerState) {
    let Some(xwayland) = state.xwayland.as_mut() else {
        return;
    };
    for event in xwayland.drain_events() {
        match event {
            XWaylandEvent::Started { display } => {
                std::env::set_var("DISPLAY", format!(":{}", display));
                attach_window_manager(handle, state);
            }
            XWaylandEvent::Crashed { .. }
            | XWaylandEvent::Stopped
            | XWaylandEvent::StartFailed(_)
            | XWaylandEvent::Disabled => {
                detach_window_manager(handle, state);
                if matches!(event, XWaylandEvent::Disabled) {
                    std::env::remove_var("DISPLAY");
                }
            }
            XWaylandEvent::RestartScheduled { delay, attempt } => {
                debug!("XWayland restart {} in {:?}", attempt, delay);
            }
        }
    }
}

#[cfg(feature = "xwayland")]
fn attach_window_manager(handle: &LoopHandle<'static, ServerState>, state: &mut ServerState) {
    use crate::xwayland::wm::WindowManager;
    use calloop::generic::Generic;
    use calloop::{Interest, Mode, PostAction};

    let Some(stream) = state.xwayland.as_mut().and_then(|x| x.take_wm_socket()) else {
        return;
    };
    let wm = match WindowManager::connect(stream) {
        Ok(wm) => wm,
        Err(e) => {
            warn!("⚠️ X11 window manager unavailable: {}", e);
            return;
        }
    };
    let inserted = handle.insert_source(
        Generic::new(wm, Interest::READ, Mode::Level),
        |_event, source, data: &mut ServerState| {
            // SAFETY: the connection stays registered; only its buffers are touched.
            let wm = unsafe { source.get_mut() };
            let Some(xwayland) = data.xwayland.as_mut() else {
                return Ok(PostAction::Remove);
            };
            match wm.dispatch(xwayland.windows_mut()) {
                Ok(events) => {
                    for event in events {
                        data.handle_wm_event(event);
                    }
                    Ok(PostAction::Continue)
                }
                Err(e) => {
                    warn!("⚠️ X11 connection lost: {}", e);
                    data.wm_token = None;
                    Ok(PostAction::Remove)
                }
            }
        },
    );
    match inserted {
        Ok(token) => state.wm_token = Some(token),
        Err(e) => error!("❌ Could not register the X11 connection: {}", e.error),
    }
}

#[cfg(feature = "xwayland")]
fn detach_window_manager(handle: &LoopHandle<'static, ServerState>, state: &mut ServerState) {
    if let Some(token) = state.wm_token.take() {
        handle.remove(token);
    }
}

#[cfg(not(feature = "xwayland"))]
fn attach_window_manager(_handle: &LoopHandle<'static, ServerState>, _state: &mut ServerState) {}

#[cfg(not(feature = "xwayland"))]
fn detach_window_manager(_handle: &LoopHandle<'static, ServerState>, _state: &mut ServerState) {}

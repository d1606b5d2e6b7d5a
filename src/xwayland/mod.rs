//! XWayland integration for X11 app compatibility
//!
//! The supervisor owns the Xwayland child process through an explicit state
//! machine:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!                           |
//!                           +-> Crashed -> Restarting -> Starting
//! ```
//!
//! `Starting` lasts until the server writes its display number to the
//! `-displayfd` pipe; exiting or missing `ready_timeout` first is a failed
//! start, which is reported but never retried. A crash of a running server
//! schedules a restart after `restart_delay` until `restart_limit`
//! consecutive crashes have happened; after that XWayland stays disabled for
//! the lifetime of the server.

pub mod launcher;
pub mod window;
#[cfg(feature = "xwayland")]
pub mod wm;

pub use launcher::{
    DisplayReady, LaunchedServer, ProcessLauncher, ServerExit, XServerLauncher, XServerProcess,
};
pub use window::{ConfigureRequest, SurfaceCandidate, XWindow, XWindowTable};

use crate::config::XWaylandConfig;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XWaylandError {
    #[error("Xwayland binary not found")]
    BinaryNotFound,
    #[error("no free X11 display number")]
    NoFreeDisplay,
    #[error("failed to spawn Xwayland: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Xwayland did not report a display within {0:?}")]
    Timeout(Duration),
    #[error("Xwayland exited during startup: {0}")]
    ExitedDuringStartup(ServerExit),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("window manager: {0}")]
    Wm(String),
    #[error("XWayland is disabled after repeated crashes")]
    Disabled,
}

/// XWayland server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XWaylandState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Restarting,
}

/// Notifications for the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XWaylandEvent {
    Started { display: u32 },
    StartFailed(String),
    Stopped,
    Crashed { exit: ServerExit, crashes: u32 },
    RestartScheduled { delay: Duration, attempt: u32 },
    Disabled,
}

/// What the caller has to do after an exit was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    None,
    ScheduleRestart(Duration),
    Disable,
}

/// Restart budget and startup bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart_delay: Duration,
    pub restart_limit: u32,
    pub stable_period: Duration,
    pub ready_timeout: Duration,
}

impl From<&XWaylandConfig> for RestartPolicy {
    fn from(config: &XWaylandConfig) -> Self {
        Self {
            restart_delay: config.restart_delay(),
            restart_limit: config.restart_limit,
            stable_period: config.stable_period(),
            ready_timeout: config.ready_timeout(),
        }
    }
}

/// Statistics
#[derive(Debug, Clone, Default)]
pub struct XWaylandStats {
    pub starts: u32,
    pub restarts: u32,
    pub crashes: u64,
}

pub struct XWaylandSupervisor {
    policy: RestartPolicy,
    launcher: Box<dyn XServerLauncher>,
    state: XWaylandState,
    process: Option<Box<dyn XServerProcess>>,
    ready: Option<DisplayReady>,
    ready_deadline: Option<Instant>,
    wm_socket: Option<UnixStream>,
    display: Option<u32>,
    started_at: Option<Instant>,
    consecutive_crashes: u32,
    disabled: bool,
    windows: XWindowTable,
    events: VecDeque<XWaylandEvent>,
    stats: XWaylandStats,
}

impl XWaylandSupervisor {
    pub fn new(policy: RestartPolicy, launcher: Box<dyn XServerLauncher>) -> Self {
        info!("🔗 Initializing XWayland supervisor");
        Self {
            policy,
            launcher,
            state: XWaylandState::Stopped,
            process: None,
            ready: None,
            ready_deadline: None,
            wm_socket: None,
            display: None,
            started_at: None,
            consecutive_crashes: 0,
            disabled: false,
            windows: XWindowTable::new(),
            events: VecDeque::new(),
            stats: XWaylandStats::default(),
        }
    }

    pub fn state(&self) -> XWaylandState {
        self.state
    }

    pub fn display(&self) -> Option<u32> {
        self.display
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn consecutive_crashes(&self) -> u32 {
        self.consecutive_crashes
    }

    pub fn stats(&self) -> &XWaylandStats {
        &self.stats
    }

    /// PID of the running server, used to recognize its Wayland connection.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// The window-manager end of the WM socket, handed out once per start.
    pub fn take_wm_socket(&mut self) -> Option<UnixStream> {
        self.wm_socket.take()
    }

    pub fn windows(&self) -> &XWindowTable {
        &self.windows
    }

    pub fn windows_mut(&mut self) -> &mut XWindowTable {
        &mut self.windows
    }

    pub fn drain_events(&mut self) -> Vec<XWaylandEvent> {
        self.events.drain(..).collect()
    }

    /// Start the XWayland server. Returns the display number it was asked
    /// to use; [`XWaylandEvent::Started`] follows once it is ready.
    pub fn start(&mut self, wayland_display: &str, now: Instant) -> Result<u32, XWaylandError> {
        if self.disabled {
            return Err(XWaylandError::Disabled);
        }
        match (self.state, self.display) {
            (XWaylandState::Running | XWaylandState::Starting, Some(display)) => {
                return Ok(display)
            }
            _ => {}
        }

        info!("🚀 Starting XWayland server");
        self.state = XWaylandState::Starting;
        match self.launcher.launch(wayland_display) {
            Ok(server) => {
                self.display = Some(server.display);
                self.process = Some(server.process);
                self.wm_socket = server.wm_socket;
                match server.ready {
                    Some(ready) => {
                        debug!("Waiting for Xwayland on :{} to report ready", server.display);
                        self.ready = Some(ready);
                        self.ready_deadline = Some(now + self.policy.ready_timeout);
                    }
                    None => self.mark_running(server.display, now),
                }
                Ok(server.display)
            }
            Err(e) => {
                self.start_failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Checks the child without blocking. Returns the action for an exit.
    pub fn poll(&mut self, now: Instant) -> SupervisorAction {
        if self.state == XWaylandState::Starting {
            self.poll_startup(now);
            return SupervisorAction::None;
        }
        let Some(process) = self.process.as_mut() else {
            return SupervisorAction::None;
        };
        match process.try_wait() {
            Ok(Some(exit)) => self.handle_exit(exit, now),
            Ok(None) => SupervisorAction::None,
            Err(e) => {
                error!("❌ Error checking XWayland process status: {}", e);
                SupervisorAction::None
            }
        }
    }

    fn poll_startup(&mut self, now: Instant) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        let failure = match process.try_wait() {
            Ok(Some(exit)) => Some(XWaylandError::ExitedDuringStartup(exit)),
            Ok(None) => match self.ready.as_mut().map(|r| r.poll()) {
                Some(Ok(Some(reported))) => {
                    if Some(reported) != self.display {
                        warn!("Xwayland reported display :{} instead of :{:?}", reported, self.display);
                    }
                    self.mark_running(reported, now);
                    return;
                }
                Some(Err(e)) => Some(XWaylandError::Io(e)),
                _ if self.ready_deadline.is_some_and(|d| now >= d) => {
                    Some(XWaylandError::Timeout(self.policy.ready_timeout))
                }
                _ => None,
            },
            Err(e) => Some(XWaylandError::Io(e)),
        };
        let Some(failure) = failure else {
            return;
        };
        if !matches!(failure, XWaylandError::ExitedDuringStartup(_)) {
            if let Some(mut process) = self.process.take() {
                if let Err(e) = process.kill() {
                    debug!("Cleanup of failed Xwayland: {}", e);
                }
            }
        }
        self.start_failed(failure.to_string());
    }

    fn mark_running(&mut self, display: u32, now: Instant) {
        self.state = XWaylandState::Running;
        self.display = Some(display);
        self.ready = None;
        self.ready_deadline = None;
        self.started_at = Some(now);
        self.stats.starts += 1;
        info!("✅ XWayland server started on display :{}", display);
        info!("🔧 X11 applications can now connect via DISPLAY=:{}", display);
        self.events.push_back(XWaylandEvent::Started { display });
    }

    fn start_failed(&mut self, reason: String) {
        error!("❌ XWayland failed to start: {}", reason);
        self.state = XWaylandState::Stopped;
        self.process = None;
        self.ready = None;
        self.ready_deadline = None;
        self.wm_socket = None;
        self.display = None;
        self.events.push_back(XWaylandEvent::StartFailed(reason));
    }

    /// Applies the exit policy to a server that went away.
    pub fn handle_exit(&mut self, exit: ServerExit, now: Instant) -> SupervisorAction {
        let uptime = self
            .started_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        self.process = None;
        self.ready = None;
        self.ready_deadline = None;
        self.wm_socket = None;
        self.display = None;
        self.started_at = None;
        self.windows.clear();

        if self.state == XWaylandState::Stopping || exit.is_clean() {
            info!("XWayland server exited ({}) after {:.1}s", exit, uptime.as_secs_f32());
            self.state = XWaylandState::Stopped;
            self.events.push_back(XWaylandEvent::Stopped);
            return SupervisorAction::None;
        }

        self.state = XWaylandState::Crashed;
        self.stats.crashes += 1;
        if uptime >= self.policy.stable_period {
            debug!("XWayland was stable for {:?}, crash count reset", uptime);
            self.consecutive_crashes = 0;
        }
        self.consecutive_crashes += 1;
        warn!(
            "⚠️ XWayland crashed ({}), {} consecutive",
            exit, self.consecutive_crashes
        );
        self.events.push_back(XWaylandEvent::Crashed {
            exit,
            crashes: self.consecutive_crashes,
        });

        if self.consecutive_crashes >= self.policy.restart_limit {
            error!(
                "❌ XWayland crashed {} times in a row, disabling it",
                self.consecutive_crashes
            );
            self.disabled = true;
            self.state = XWaylandState::Stopped;
            self.events.push_back(XWaylandEvent::Disabled);
            return SupervisorAction::Disable;
        }

        self.state = XWaylandState::Restarting;
        info!(
            "🔄 Restarting XWayland in {:?} (attempt {})",
            self.policy.restart_delay, self.consecutive_crashes
        );
        self.events.push_back(XWaylandEvent::RestartScheduled {
            delay: self.policy.restart_delay,
            attempt: self.consecutive_crashes,
        });
        SupervisorAction::ScheduleRestart(self.policy.restart_delay)
    }

    /// Runs a scheduled restart. Ignored unless a restart is pending.
    pub fn restart(&mut self, wayland_display: &str, now: Instant) -> Result<Option<u32>, XWaylandError> {
        if self.state != XWaylandState::Restarting {
            debug!("Ignoring XWayland restart in state {:?}", self.state);
            return Ok(None);
        }
        self.stats.restarts += 1;
        self.start(wayland_display, now).map(Some)
    }

    /// Stop the XWayland server, killing it after `grace` if it does not exit.
    pub fn stop(&mut self, grace: Duration) {
        let Some(mut process) = self.process.take() else {
            if self.state == XWaylandState::Restarting {
                self.state = XWaylandState::Stopped;
            }
            return;
        };
        info!("🛑 Stopping XWayland server");
        self.state = XWaylandState::Stopping;
        if let Err(e) = process.terminate() {
            warn!("⚠️ Error signalling XWayland: {}", e);
        }

        let deadline = Instant::now() + grace;
        let exit = loop {
            match process.try_wait() {
                Ok(Some(exit)) => break Some(exit),
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(None) => break None,
                Err(e) => {
                    warn!("⚠️ Error waiting for XWayland: {}", e);
                    break None;
                }
            }
        };
        if exit.is_none() {
            warn!("XWayland ignored the stop request, killing it");
            if let Err(e) = process.kill() {
                warn!("⚠️ Error killing XWayland process: {}", e);
            }
        }

        self.ready = None;
        self.ready_deadline = None;
        self.wm_socket = None;
        self.display = None;
        self.started_at = None;
        self.windows.clear();
        self.state = XWaylandState::Stopped;
        self.events.push_back(XWaylandEvent::Stopped);
        info!("✅ XWayland server stopped");
    }
}

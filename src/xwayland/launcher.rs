//! Spawning the Xwayland process
//!
//! [`ProcessLauncher`] does the real work: binary lookup, display probing, the
//! WM socket pair and `-displayfd` pipe, and an Xauthority cookie. Xwayland
//! needs the compositor's event loop to come up, so the launch returns at
//! once and the supervisor watches the [`DisplayReady`] pipe from its poll.

use super::XWaylandError;
use crate::config::XWaylandConfig;
use log::{debug, info, warn};
use rand::Rng;
use std::fmt;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::{SocketAddr, UnixStream};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

const FALLBACK_PATHS: [&str; 3] = [
    "/usr/bin/Xwayland",
    "/usr/local/bin/Xwayland",
    "/usr/libexec/Xwayland",
];

/// Highest display number probed
const MAX_DISPLAY: u32 = 32;

/// How the server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    Code(i32),
    Signal(i32),
}

impl ServerExit {
    pub fn is_clean(&self) -> bool {
        *self == ServerExit::Code(0)
    }
}

impl From<ExitStatus> for ServerExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ServerExit::Code(code),
            (None, Some(signal)) => ServerExit::Signal(signal),
            (None, None) => ServerExit::Code(-1),
        }
    }
}

impl fmt::Display for ServerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerExit::Code(code) => write!(f, "exit code {}", code),
            ServerExit::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// A running X server as seen by the supervisor.
pub trait XServerProcess {
    fn pid(&self) -> Option<u32>;

    fn try_wait(&mut self) -> std::io::Result<Option<ServerExit>>;

    /// Asks the server to exit (SIGTERM).
    fn terminate(&mut self) -> std::io::Result<()>;

    fn kill(&mut self) -> std::io::Result<()>;
}

impl XServerProcess for Child {
    fn pid(&self) -> Option<u32> {
        Some(self.id())
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ServerExit>> {
        Ok(Child::try_wait(self)?.map(ServerExit::from))
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        // SAFETY: plain kill(2) on our own child's pid.
        let rc = unsafe { libc::kill(self.id() as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self)?;
        Child::wait(self).map(|_| ())
    }
}

/// Xauthority cookie of one server instance, removed when dropped.
pub struct XauthorityFile(PathBuf);

impl XauthorityFile {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for XauthorityFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed {}", self.0.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️ Could not remove {}: {}", self.0.display(), e),
        }
    }
}

/// The spawned Xwayland and the cookie written for it. Stop, crash and
/// restart all drop the process, which takes the cookie with it.
struct XwaylandChild {
    child: Child,
    _xauthority: XauthorityFile,
}

impl XServerProcess for XwaylandChild {
    fn pid(&self) -> Option<u32> {
        XServerProcess::pid(&self.child)
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ServerExit>> {
        XServerProcess::try_wait(&mut self.child)
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        self.child.terminate()
    }

    fn kill(&mut self) -> std::io::Result<()> {
        XServerProcess::kill(&mut self.child)
    }
}

/// Result of a successful launch.
pub struct LaunchedServer {
    pub display: u32,
    pub process: Box<dyn XServerProcess>,
    /// Our end of the `-wm` socket pair
    pub wm_socket: Option<UnixStream>,
    /// `None` when the server is usable right away
    pub ready: Option<DisplayReady>,
}

/// Non-blocking reader for the `-displayfd` pipe.
pub struct DisplayReady {
    pipe: File,
    buf: Vec<u8>,
}

impl DisplayReady {
    pub fn new(read_end: OwnedFd) -> std::io::Result<Self> {
        // SAFETY: F_GETFL/F_SETFL on a descriptor we own.
        unsafe {
            let flags = libc::fcntl(read_end.as_raw_fd(), libc::F_GETFL);
            if flags < 0
                || libc::fcntl(read_end.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) < 0
            {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(Self {
            pipe: File::from(read_end),
            buf: Vec::new(),
        })
    }

    /// The reported display once the full line arrived.
    pub fn poll(&mut self) -> std::io::Result<Option<u32>> {
        let mut chunk = [0u8; 16];
        loop {
            match self.pipe.read(&mut chunk) {
                // Writer closed; a dead child is noticed by the exit check.
                Ok(0) => break,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(parse_display_number(&self.buf))
    }
}

pub trait XServerLauncher {
    fn launch(&mut self, wayland_display: &str) -> Result<LaunchedServer, XWaylandError>;
}

/// Finds the Xwayland binary: configured path, then `PATH`, then the usual
/// install locations.
pub fn find_binary(configured: Option<&Path>, path_var: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
        warn!("Configured Xwayland binary {} is not executable", path.display());
    }
    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(path_var) {
            let candidate = dir.join("Xwayland");
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    FALLBACK_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Where display numbers are probed. Tests point `tmp_dir` somewhere private
/// and switch off the abstract socket check.
#[derive(Debug, Clone)]
pub struct DisplayProbe {
    pub tmp_dir: PathBuf,
    pub check_abstract: bool,
}

impl Default for DisplayProbe {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from("/tmp"),
            check_abstract: true,
        }
    }
}

impl DisplayProbe {
    pub fn in_use(&self, display: u32) -> bool {
        if self.tmp_dir.join(format!(".X{}-lock", display)).exists() {
            return true;
        }
        if self
            .tmp_dir
            .join(".X11-unix")
            .join(format!("X{}", display))
            .exists()
        {
            return true;
        }
        self.check_abstract && abstract_socket_in_use(display)
    }

    /// Lowest display number nothing claims.
    pub fn find_free(&self) -> Option<u32> {
        (0..=MAX_DISPLAY).find(|n| !self.in_use(*n))
    }
}

fn abstract_socket_in_use(display: u32) -> bool {
    let name = format!("/tmp/.X11-unix/X{}", display);
    match SocketAddr::from_abstract_name(name.as_bytes()) {
        Ok(addr) => UnixStream::connect_addr(&addr).is_ok(),
        Err(_) => false,
    }
}

/// One Xauthority record (FamilyLocal, MIT-MAGIC-COOKIE-1).
pub fn xauth_entry(hostname: &str, display: u32, cookie: &[u8; 16]) -> Vec<u8> {
    const FAMILY_LOCAL: u16 = 256;
    let number = display.to_string();
    let mut out = Vec::new();
    out.extend_from_slice(&FAMILY_LOCAL.to_be_bytes());
    for field in [
        hostname.as_bytes(),
        number.as_bytes(),
        b"MIT-MAGIC-COOKIE-1".as_slice(),
        cookie.as_slice(),
    ] {
        out.extend_from_slice(&(field.len() as u16).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Parses what Xwayland writes to `-displayfd`: the number and a newline.
pub fn parse_display_number(bytes: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(bytes).ok()?;
    let line = text.split('\n').next()?;
    if !text.contains('\n') {
        return None;
    }
    line.trim().parse().ok()
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its full length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: fds has room for the two descriptors pipe2 writes.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, both fds are fresh and owned by nobody else.
    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}

/// Spawns the real Xwayland binary.
pub struct ProcessLauncher {
    config: XWaylandConfig,
    probe: DisplayProbe,
    runtime_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(config: XWaylandConfig) -> Self {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            config,
            probe: DisplayProbe::default(),
            runtime_dir,
        }
    }

    pub fn with_probe(mut self, probe: DisplayProbe) -> Self {
        self.probe = probe;
        self
    }

    fn write_xauthority(&self, display: u32) -> Result<XauthorityFile, XWaylandError> {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill(&mut cookie);
        let path = self
            .runtime_dir
            .join(format!("keystone-xauth-{}", display));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;
        let guard = XauthorityFile(path);
        file.write_all(&xauth_entry(&hostname(), display, &cookie))?;
        debug!("Wrote Xauthority cookie to {}", guard.path().display());
        Ok(guard)
    }
}

impl XServerLauncher for ProcessLauncher {
    fn launch(&mut self, wayland_display: &str) -> Result<LaunchedServer, XWaylandError> {
        let path_var = std::env::var("PATH").ok();
        let binary = find_binary(self.config.binary.as_deref(), path_var.as_deref())
            .ok_or(XWaylandError::BinaryNotFound)?;
        let display = self.probe.find_free().ok_or(XWaylandError::NoFreeDisplay)?;
        debug!("🔍 Found available display :{}", display);

        let (wm_ours, wm_theirs) = UnixStream::pair()?;
        let (ready_read, ready_write) = pipe()?;
        let xauthority = self.write_xauthority(display)?;

        let wm_fd = wm_theirs.as_raw_fd();
        let ready_fd = ready_write.as_raw_fd();

        let mut cmd = Command::new(&binary);
        cmd.arg(format!(":{}", display))
            .arg("-rootless")
            .arg("-terminate")
            .arg("-auth")
            .arg(xauthority.path())
            .arg("-displayfd")
            .arg(ready_fd.to_string())
            .arg("-wm")
            .arg(wm_fd.to_string())
            .args(&self.config.extra_args)
            .env("DISPLAY", format!(":{}", display))
            .env("WAYLAND_DISPLAY", wayland_display)
            .env("XAUTHORITY", xauthority.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // SAFETY: only async-signal-safe fcntl calls run between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                for fd in [wm_fd, ready_fd] {
                    if libc::fcntl(fd, libc::F_SETFD, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        info!(
            "Spawning {} for display :{}",
            binary.display(),
            display
        );
        let child = cmd.spawn().map_err(XWaylandError::Spawn)?;
        drop(wm_theirs);
        drop(ready_write);
        let mut process = XwaylandChild {
            child,
            _xauthority: xauthority,
        };

        let ready = match DisplayReady::new(ready_read) {
            Ok(ready) => ready,
            Err(e) => {
                if let Err(kill_err) = process.kill() {
                    debug!("Cleanup of failed Xwayland: {}", kill_err);
                }
                return Err(e.into());
            }
        };
        Ok(LaunchedServer {
            display,
            process: Box::new(process),
            wm_socket: Some(wm_ours),
            ready: Some(ready),
        })
    }
}

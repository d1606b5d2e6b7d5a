// XWayland supervision integration tests
//
// A scripted launcher stands in for the Xwayland binary so the restart
// budget, the clean-exit path and window bookkeeping can be driven with a
// synthetic clock.

use keystone::geometry::Rectangle;
use keystone::ids::SurfaceId;
use keystone::xwayland::{
    LaunchedServer, RestartPolicy, ServerExit, SupervisorAction, SurfaceCandidate,
    XServerLauncher, XServerProcess, XWaylandError, XWaylandEvent, XWaylandState,
    XWaylandSupervisor,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Script {
    launches: u32,
    terminated: u32,
    exits: VecDeque<ServerExit>,
}

struct ScriptedProcess(Rc<RefCell<Script>>);

impl XServerProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(9000 + self.0.borrow().launches)
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ServerExit>> {
        Ok(self.0.borrow_mut().exits.pop_front())
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        let mut script = self.0.borrow_mut();
        script.terminated += 1;
        script.exits.push_back(ServerExit::Code(0));
        Ok(())
    }

    fn kill(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct ScriptedLauncher(Rc<RefCell<Script>>);

impl XServerLauncher for ScriptedLauncher {
    fn launch(&mut self, wayland_display: &str) -> Result<LaunchedServer, XWaylandError> {
        assert_eq!(wayland_display, "wayland-test");
        let display = {
            let mut script = self.0.borrow_mut();
            script.launches += 1;
            script.launches
        };
        Ok(LaunchedServer {
            display,
            process: Box::new(ScriptedProcess(self.0.clone())),
            wm_socket: None,
            ready: None,
        })
    }
}

fn supervisor(restart_limit: u32) -> (XWaylandSupervisor, Rc<RefCell<Script>>) {
    let script = Rc::new(RefCell::new(Script::default()));
    let policy = RestartPolicy {
        restart_delay: Duration::from_millis(250),
        restart_limit,
        stable_period: Duration::from_secs(10),
        ready_timeout: Duration::from_secs(5),
    };
    (
        XWaylandSupervisor::new(policy, Box::new(ScriptedLauncher(script.clone()))),
        script,
    )
}

fn crash(sup: &mut XWaylandSupervisor, script: &Rc<RefCell<Script>>, now: Instant) -> SupervisorAction {
    script.borrow_mut().exits.push_back(ServerExit::Signal(6));
    sup.poll(now)
}

#[test]
fn test_restarts_are_bounded() {
    let (mut sup, script) = supervisor(3);
    let now = Instant::now();
    sup.start("wayland-test", now).unwrap();

    for attempt in 1..3 {
        assert_eq!(
            crash(&mut sup, &script, now),
            SupervisorAction::ScheduleRestart(Duration::from_millis(250))
        );
        assert_eq!(sup.state(), XWaylandState::Restarting);
        assert_eq!(sup.restart("wayland-test", now).unwrap(), Some(attempt + 1));
    }
    assert_eq!(crash(&mut sup, &script, now), SupervisorAction::Disable);

    assert!(sup.is_disabled());
    assert_eq!(sup.state(), XWaylandState::Stopped);
    assert_eq!(script.borrow().launches, 3);
    assert_eq!(sup.stats().restarts, 2);
    assert_eq!(sup.stats().crashes, 3);

    // nothing brings it back
    assert!(matches!(
        sup.start("wayland-test", now),
        Err(XWaylandError::Disabled)
    ));
    assert_eq!(script.borrow().launches, 3);
}

#[test]
fn test_event_sequence_for_crash_and_restart() {
    let (mut sup, script) = supervisor(3);
    let now = Instant::now();
    sup.start("wayland-test", now).unwrap();
    crash(&mut sup, &script, now);
    sup.restart("wayland-test", now).unwrap();

    assert_eq!(
        sup.drain_events(),
        vec![
            XWaylandEvent::Started { display: 1 },
            XWaylandEvent::Crashed {
                exit: ServerExit::Signal(6),
                crashes: 1
            },
            XWaylandEvent::RestartScheduled {
                delay: Duration::from_millis(250),
                attempt: 1
            },
            XWaylandEvent::Started { display: 2 },
        ]
    );
}

#[test]
fn test_long_uptime_refills_budget() {
    let (mut sup, script) = supervisor(2);
    let start = Instant::now();
    sup.start("wayland-test", start).unwrap();

    crash(&mut sup, &script, start);
    let later = start + Duration::from_secs(1);
    sup.restart("wayland-test", later).unwrap();

    // ran past the stable period, so this is a first crash again
    let much_later = later + Duration::from_secs(60);
    assert_eq!(
        crash(&mut sup, &script, much_later),
        SupervisorAction::ScheduleRestart(Duration::from_millis(250))
    );
    assert_eq!(sup.consecutive_crashes(), 1);
    assert!(!sup.is_disabled());
}

#[test]
fn test_stop_is_not_a_crash() {
    let (mut sup, script) = supervisor(1);
    let now = Instant::now();
    sup.start("wayland-test", now).unwrap();
    assert_eq!(sup.pid(), Some(9001));
    sup.drain_events();

    sup.stop(Duration::from_millis(50));
    assert_eq!(sup.state(), XWaylandState::Stopped);
    assert_eq!(script.borrow().terminated, 1);
    assert_eq!(sup.consecutive_crashes(), 0);
    assert!(!sup.is_disabled());
    assert_eq!(sup.drain_events(), vec![XWaylandEvent::Stopped]);
    assert_eq!(sup.display(), None);
}

#[test]
fn test_restart_without_crash_is_ignored() {
    let (mut sup, script) = supervisor(3);
    let now = Instant::now();
    sup.start("wayland-test", now).unwrap();
    assert_eq!(sup.restart("wayland-test", now).unwrap(), None);
    assert_eq!(script.borrow().launches, 1);
}

#[test]
fn test_crash_forgets_x11_windows() {
    let (mut sup, script) = supervisor(3);
    let now = Instant::now();
    sup.start("wayland-test", now).unwrap();

    let table = sup.windows_mut();
    table.create_window(0x400001, Rectangle::new(0, 0, 300, 200), false);
    table.set_wl_surface_id(0x400001, 12);
    let mut candidate = SurfaceCandidate::new(SurfaceId(3));
    candidate.wire_id = Some(12);
    assert_eq!(table.correlate(&candidate), Some(0x400001));
    assert_eq!(
        sup.windows().window_for_surface(SurfaceId(3)).map(|w| w.id),
        Some(0x400001)
    );

    crash(&mut sup, &script, now);
    assert!(sup.windows().is_empty());
}

// Resource lifecycle integration tests for Keystone
//
// Drives the resource registry and the compositor core together the way the
// wire layer does: objects are bound, tagged, destroyed once, and a client
// disconnect tears down everything it owned.

use keystone::compositor::{BufferRef, Role};
use keystone::geometry::Rectangle;
use keystone::ids::ClientId;
use keystone::resource::{ResourceError, ResourceKind, ResourceRegistry};
use keystone::{Compositor, CompositorEvent, ProtocolRegistry};
use std::cell::RefCell;
use std::rc::Rc;

fn registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();
    registry.register_interface("wl_compositor", 4);
    registry.register_interface("wl_seat", 7);
    registry
}

#[test]
fn test_bind_above_advertised_version_is_an_error() {
    let mut registry = registry();
    let client = ClientId(1);

    let err = registry.bind(client, "wl_compositor", 5, 3).unwrap_err();
    assert_eq!(
        err,
        ResourceError::UnsupportedVersion {
            interface: "wl_compositor".into(),
            requested: 5,
            supported: 4
        }
    );
    assert!(err.is_protocol_error());
    assert!(registry.is_empty());

    let handle = registry.bind(client, "wl_compositor", 4, 3).unwrap();
    assert_eq!(registry.version(handle), Some(4));
}

#[test]
fn test_destroy_hook_runs_exactly_once() {
    let mut registry = registry();
    let client = ClientId(1);
    let runs = Rc::new(RefCell::new(Vec::new()));

    let handle = registry.bind(client, "wl_seat", 7, 2).unwrap();
    let seen = runs.clone();
    registry
        .attach(
            handle,
            ResourceKind::Seat,
            Some(Box::new(move |h, kind| seen.borrow_mut().push((h, kind)))),
        )
        .unwrap();

    assert_eq!(registry.destroy(handle), Ok(Some(ResourceKind::Seat)));
    assert_eq!(
        registry.destroy(handle),
        Err(ResourceError::AlreadyDestroyed(handle))
    );
    assert_eq!(*runs.borrow(), vec![(handle, Some(ResourceKind::Seat))]);
}

#[test]
fn test_reused_protocol_id_does_not_revive_old_handle() {
    let mut registry = registry();
    let client = ClientId(7);

    let old = registry.bind(client, "wl_seat", 1, 9).unwrap();
    registry.attach(old, ResourceKind::Seat, None).unwrap();
    registry.destroy(old).unwrap();

    let new = registry.bind(client, "wl_seat", 1, 9).unwrap();
    registry.attach(new, ResourceKind::Seat, None).unwrap();

    assert_ne!(old, new);
    assert_eq!(registry.dispatch(new), Ok(ResourceKind::Seat));
    assert_eq!(registry.dispatch(old), Err(ResourceError::AlreadyDestroyed(old)));
}

#[test]
fn test_client_disconnect_tears_down_everything() {
    let mut registry = registry();
    let mut compositor = Compositor::new("seat0", ProtocolRegistry::new());

    let client = compositor.create_client(Some(1234));
    let other = compositor.create_client(None);
    let first = compositor.create_surface(client).unwrap();
    let second = compositor.create_surface(client).unwrap();
    let survivor = compositor.create_surface(other).unwrap();

    let root = registry.bind(client, "wl_compositor", 4, 3).unwrap();
    registry.attach(root, ResourceKind::Compositor, None).unwrap();
    for (object, surface) in [(4, first), (5, second)] {
        let handle = registry.insert(client, "wl_surface", 4, object).unwrap();
        registry
            .attach(handle, ResourceKind::Surface(surface), None)
            .unwrap();
    }
    assert_eq!(registry.resources_of(client), 3);

    compositor.set_keyboard_focus(Some(second));
    compositor.drain_events();

    // newest object first
    let destroyed: Vec<_> = registry
        .destroy_client(client)
        .into_iter()
        .map(|(handle, _)| handle.object)
        .collect();
    assert_eq!(destroyed, vec![5, 4, 3]);

    compositor.destroy_client(client);
    assert_eq!(
        compositor.drain_events(),
        vec![
            CompositorEvent::KeyboardFocusChanged {
                old: Some(second),
                new: None
            },
            CompositorEvent::SurfaceDestroyed {
                surface: second,
                client
            },
            CompositorEvent::SurfaceDestroyed {
                surface: first,
                client
            },
            CompositorEvent::ClientDisconnected(client),
        ]
    );

    assert_eq!(registry.resources_of(client), 0);
    assert!(compositor.client(client).is_none());
    assert!(compositor.surface(first).is_none());
    assert!(compositor.surface(survivor).is_some());
    assert_eq!(compositor.surfaces_of(other), &[survivor]);
}

#[test]
fn test_role_survives_role_object_destruction() {
    let mut compositor = Compositor::new("seat0", ProtocolRegistry::new());
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();

    compositor.assign_role(surface, Role::Toplevel).unwrap();
    compositor.release_role(surface);

    assert_eq!(compositor.surface(surface).unwrap().role(), Some(Role::Toplevel));
    assert!(!compositor.surface(surface).unwrap().has_active_role());
    assert!(compositor.assign_role(surface, Role::Toplevel).is_ok());
}

#[test]
fn test_commit_applies_pending_state_atomically() {
    let mut compositor = Compositor::new("seat0", ProtocolRegistry::new());
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();

    compositor
        .attach(
            surface,
            Some(BufferRef::Shm {
                id: 1,
                width: 200,
                height: 100,
            }),
        )
        .unwrap();
    compositor
        .damage(surface, Rectangle::new(0, 0, 200, 100))
        .unwrap();
    compositor.set_buffer_scale(surface, 2).unwrap();

    // nothing visible before the commit
    let before = compositor.surface(surface).unwrap();
    assert!(before.current.buffer.is_none());
    assert_eq!(before.commit_count, 0);

    compositor.commit(surface).unwrap();
    let after = compositor.surface(surface).unwrap();
    assert!(after.current.buffer.is_some());
    assert_eq!(after.current.buffer_scale, 2);
    assert_eq!(after.size.width, 100);
    assert_eq!(after.size.height, 50);
    assert_eq!(after.commit_count, 1);
}

// Protocol extension integration tests
//
// Every extension enabled on one compositor, exercised through the core the
// same way the wire layer drives it.

use keystone::buffer::formats::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR};
use keystone::buffer::{BufferImportEngine, ImportError, PassthroughImporter, ValidationError};
use keystone::compositor::{BufferRef, CommitError};
use keystone::geometry::{Rectangle, Size};
use keystone::ids::{ParamsId, SurfaceId};
use keystone::output::OutputInfo;
use keystone::protocols::dmabuf::{CreateError, ParamsState};
use keystone::protocols::layer_shell::{ANCHOR_BOTTOM, ANCHOR_LEFT, ANCHOR_RIGHT};
use keystone::protocols::viewporter::ViewportError;
use keystone::protocols::{
    DmabufExtension, LayerShellExtension, PresentationTimeExtension, ProtocolEvent, SyncPoint,
    ViewporterExtension,
};
use keystone::{Compositor, ProtocolRegistry};
use std::os::fd::OwnedFd;
use std::time::Duration;

fn compositor() -> Compositor {
    let protocols = ProtocolRegistry::new()
        .with_layer_shell(LayerShellExtension::new())
        .with_presentation(PresentationTimeExtension::new())
        .with_viewporter(ViewporterExtension::new())
        .with_dmabuf(DmabufExtension::new(BufferImportEngine::new(Box::new(
            PassthroughImporter::new(),
        ))));
    let mut compositor = Compositor::new("seat0", protocols);
    compositor
        .add_output(OutputInfo {
            primary: true,
            ..OutputInfo::default()
        })
        .unwrap();
    compositor
}

fn plane_fd(size: u64) -> OwnedFd {
    let file = tempfile::tempfile().unwrap();
    file.set_len(size).unwrap();
    file.into()
}

fn linear_params(compositor: &mut Compositor, stride: u32, height: u32) -> ParamsId {
    let dmabuf = compositor.protocols_mut().dmabuf_mut().unwrap();
    let params = dmabuf.create_params();
    let modifier = DRM_FORMAT_MOD_LINEAR;
    dmabuf
        .add(
            params,
            0,
            plane_fd((stride * height) as u64),
            0,
            stride,
            (modifier >> 32) as u32,
            modifier as u32,
        )
        .unwrap();
    params
}

#[test]
fn test_all_extensions_advertised() {
    let compositor = compositor();
    let mut globals = compositor.protocols().globals();
    globals.sort();
    assert_eq!(
        globals,
        vec![
            ("wp_presentation", 1),
            ("wp_viewporter", 1),
            ("zwlr_layer_shell_v1", 1),
            ("zwp_linux_dmabuf_v1", 3),
        ]
    );
}

#[test]
fn test_argb_linear_buffer_maps_surface() {
    let mut compositor = compositor();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();

    let params = linear_params(&mut compositor, 256 * 4, 128);
    let buffer = compositor
        .protocols_mut()
        .dmabuf_mut()
        .unwrap()
        .create(params, 256, 128, DRM_FORMAT_ARGB8888, 0)
        .unwrap();
    assert_eq!(
        compositor.protocols().dmabuf().unwrap().params_state(params),
        Some(ParamsState::Imported(buffer))
    );

    compositor
        .attach(surface, Some(BufferRef::Dmabuf(buffer)))
        .unwrap();
    compositor.commit(surface).unwrap();

    let surface = compositor.surface(surface).unwrap();
    assert!(surface.is_mapped());
    assert_eq!(surface.size, Size::new(256, 128));
}

#[test]
fn test_unknown_fourcc_fails_and_rejects_params() {
    let mut compositor = compositor();
    let params = linear_params(&mut compositor, 64 * 4, 64);
    let dmabuf = compositor.protocols_mut().dmabuf_mut().unwrap();

    let err = dmabuf.create(params, 64, 64, 0x1122_3344, 0).unwrap_err();
    assert_eq!(
        err,
        CreateError::Import(ImportError::Validation(
            ValidationError::UnsupportedFormat(0x1122_3344)
        ))
    );
    assert_eq!(dmabuf.params_state(params), Some(ParamsState::Rejected));
    assert_eq!(dmabuf.buffer_count(), 0);
}

#[test]
fn test_create_immed_failure_surfaces_on_commit() {
    let mut compositor = compositor();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();

    let params = linear_params(&mut compositor, 64 * 4, 64);
    let buffer = compositor
        .protocols_mut()
        .dmabuf_mut()
        .unwrap()
        .create_immed(params, 64, 64, 0x1122_3344, 0)
        .unwrap();

    compositor
        .attach(surface, Some(BufferRef::Dmabuf(buffer)))
        .unwrap();
    assert_eq!(
        compositor.commit(surface),
        Err(CommitError::BufferImport(ImportError::Inert))
    );
    assert!(!compositor.surface(surface).unwrap().is_mapped());

    // A damage-only commit afterwards goes through.
    compositor
        .damage(surface, Rectangle::new(0, 0, 64, 64))
        .unwrap();
    assert_eq!(compositor.commit(surface), Ok(()));
    assert!(!compositor.surface(surface).unwrap().is_mapped());

    let params = linear_params(&mut compositor, 64 * 4, 64);
    let good = compositor
        .protocols_mut()
        .dmabuf_mut()
        .unwrap()
        .create_immed(params, 64, 64, DRM_FORMAT_ARGB8888, 0)
        .unwrap();
    compositor
        .attach(surface, Some(BufferRef::Dmabuf(good)))
        .unwrap();
    assert_eq!(compositor.commit(surface), Ok(()));
    assert_eq!(compositor.surface(surface).unwrap().size, Size::new(64, 64));
}

#[test]
fn test_panel_reserves_exclusive_zone() {
    let mut compositor = compositor();
    let output = compositor.outputs().primary_id().unwrap();
    let client = compositor.create_client(None);
    let panel = compositor.create_surface(client).unwrap();

    compositor
        .create_layer_surface(panel, Some(output), 2, "panel".into())
        .unwrap();
    {
        let layer_shell = compositor.protocols_mut().layer_shell_mut().unwrap();
        layer_shell
            .set_anchor(panel, ANCHOR_BOTTOM | ANCHOR_LEFT | ANCHOR_RIGHT)
            .unwrap();
        layer_shell.set_size(panel, 0, 40).unwrap();
        layer_shell.set_exclusive_zone(panel, 40).unwrap();
    }
    compositor.commit(panel).unwrap();

    assert_eq!(
        compositor.drain_protocol_events(),
        vec![ProtocolEvent::LayerConfigure {
            surface: panel,
            serial: 0,
            width: 1920,
            height: 40
        }]
    );
    assert_eq!(
        compositor.surface(panel).unwrap().placement,
        Some(Rectangle::new(0, 1040, 1920, 40))
    );
    assert_eq!(
        compositor
            .protocols()
            .layer_shell()
            .unwrap()
            .usable_area(output),
        Some(Rectangle::new(0, 0, 1920, 1040))
    );
}

#[test]
fn test_layer_surface_closed_with_its_output() {
    let mut compositor = compositor();
    let secondary = compositor
        .add_output(OutputInfo {
            name: "HDMI-A-1".into(),
            geometry: Rectangle::new(1920, 0, 1280, 1024),
            ..OutputInfo::default()
        })
        .unwrap();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();
    compositor
        .create_layer_surface(surface, Some(secondary), 3, "osd".into())
        .unwrap();
    compositor.drain_protocol_events();

    compositor.remove_output(secondary).unwrap();
    assert!(compositor
        .drain_protocol_events()
        .contains(&ProtocolEvent::LayerClosed { surface }));
}

#[test]
fn test_viewport_sets_logical_size() {
    let mut compositor = compositor();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();
    {
        let viewporter = compositor.protocols_mut().viewporter_mut().unwrap();
        viewporter.get_viewport(surface).unwrap();
        assert_eq!(
            viewporter.get_viewport(surface),
            Err(ViewportError::ViewportExists)
        );
        viewporter.set_destination(surface, 640, 360).unwrap();
    }
    compositor
        .attach(
            surface,
            Some(BufferRef::Shm {
                id: 1,
                width: 1280,
                height: 720,
            }),
        )
        .unwrap();
    compositor.commit(surface).unwrap();
    assert_eq!(compositor.surface(surface).unwrap().size, Size::new(640, 360));
}

#[test]
fn test_viewport_source_outside_buffer_rejects_commit() {
    let mut compositor = compositor();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();
    {
        let viewporter = compositor.protocols_mut().viewporter_mut().unwrap();
        viewporter.get_viewport(surface).unwrap();
        viewporter.set_source(surface, 0.0, 0.0, 200.0, 200.0).unwrap();
    }
    compositor
        .attach(
            surface,
            Some(BufferRef::Shm {
                id: 1,
                width: 100,
                height: 100,
            }),
        )
        .unwrap();
    assert_eq!(
        compositor.commit(surface),
        Err(CommitError::Viewport(ViewportError::OutOfBuffer))
    );
}

#[test]
fn test_presentation_feedback_resolves_once() {
    let mut compositor = compositor();
    let output = compositor.outputs().primary_id();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();

    let feedback = compositor.request_feedback(surface).unwrap();
    assert!(compositor.request_feedback(SurfaceId(999)).is_none());

    let sync = SyncPoint {
        output: None,
        refresh_nsec: 16_666_666,
        sequence: 7,
        flags: 0,
    };
    assert_eq!(
        compositor.frame_presented(surface, sync, Duration::from_millis(1500)),
        1
    );
    assert_eq!(compositor.frame_presented(surface, sync, Duration::ZERO), 0);

    match compositor.drain_protocol_events().as_slice() {
        [ProtocolEvent::FeedbackPresented {
            feedback: id,
            surface: presented,
            time,
        }] => {
            assert_eq!(*id, feedback);
            assert_eq!(*presented, surface);
            assert_eq!(time.tv_sec, 1);
            assert_eq!(time.tv_nsec, 500_000_000);
            assert_eq!(time.sequence, 7);
            assert_eq!(time.output, output);
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_destroyed_surface_discards_feedback() {
    let mut compositor = compositor();
    let client = compositor.create_client(None);
    let surface = compositor.create_surface(client).unwrap();
    let feedback = compositor.request_feedback(surface).unwrap();

    compositor.destroy_surface(surface);
    assert_eq!(
        compositor.drain_protocol_events(),
        vec![ProtocolEvent::FeedbackDiscarded { feedback, surface }]
    );
}

//! Performance benchmarks for Keystone
//!
//! Covers the lookups that run on every commit or request: output selection,
//! DMA-BUF descriptor validation, layer arrangement, resource dispatch and
//! X11 surface correlation.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use keystone::buffer::formats::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR};
use keystone::buffer::{BufferDescriptor, BufferImportEngine, DmabufPlane, PassthroughImporter};
use keystone::geometry::Rectangle;
use keystone::ids::{ClientId, SurfaceId};
use keystone::output::{OutputInfo, OutputManager};
use keystone::protocols::layer_shell::{ANCHOR_LEFT, ANCHOR_RIGHT, ANCHOR_TOP};
use keystone::protocols::LayerShellExtension;
use keystone::resource::{ResourceKind, ResourceRegistry};
use keystone::xwayland::{SurfaceCandidate, XWindowTable};
use keystone::KeystoneConfig;
use std::os::fd::OwnedFd;

fn outputs(count: i32) -> OutputManager {
    let mut outputs = OutputManager::new();
    for i in 0..count {
        outputs
            .add(OutputInfo {
                name: format!("DP-{}", i),
                geometry: Rectangle::new(i * 1920, 0, 1920, 1080),
                ..OutputInfo::default()
            })
            .unwrap();
    }
    outputs
}

/// Benchmark output selection for a window straddling two outputs
fn bench_output_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_lookup");

    for count in [1, 4, 16] {
        let outputs = outputs(count);
        let rect = Rectangle::new(1800, 100, 800, 600);
        group.bench_function(format!("output_for_rect_{}_outputs", count), |b| {
            b.iter(|| black_box(outputs.output_for_rect(black_box(&rect))))
        });
        group.bench_function(format!("output_at_{}_outputs", count), |b| {
            b.iter(|| black_box(outputs.output_at(black_box(count * 1920 - 1), 500)))
        });
    }

    group.finish();
}

/// Benchmark descriptor validation against the negotiated table
fn bench_descriptor_validation(c: &mut Criterion) {
    let mut engine = BufferImportEngine::new(Box::new(PassthroughImporter::new()));
    engine.negotiate_formats();
    let fd: OwnedFd = tempfile::tempfile().unwrap().into();

    let descriptor = BufferDescriptor::from_parts(
        1920,
        1080,
        DRM_FORMAT_ARGB8888,
        0,
        vec![DmabufPlane {
            fd,
            offset: 0,
            stride: 1920 * 4,
            modifier: Some(DRM_FORMAT_MOD_LINEAR),
        }],
    );

    c.bench_function("validate_argb8888_linear", |b| {
        b.iter(|| black_box(engine.validate(black_box(&descriptor))))
    });
}

/// Benchmark layer arrangement with many panels
fn bench_layer_arrange(c: &mut Criterion) {
    let outputs = outputs(1);
    let output = outputs.primary_id().unwrap();

    c.bench_function("arrange_32_panels", |b| {
        b.iter_batched(
            || {
                let mut layer_shell = LayerShellExtension::new();
                for i in 0..32 {
                    let surface = SurfaceId(i);
                    layer_shell
                        .get_layer_surface(surface, Some(output), 2, "panel".into())
                        .unwrap();
                    layer_shell
                        .set_anchor(surface, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT)
                        .unwrap();
                    layer_shell.set_size(surface, 0, 24).unwrap();
                    layer_shell.set_exclusive_zone(surface, 24).unwrap();
                    layer_shell.commit(surface, false, &outputs).unwrap();
                }
                layer_shell
            },
            |mut layer_shell| black_box(layer_shell.arrange(output, &outputs)),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark request routing through the resource table
fn bench_resource_dispatch(c: &mut Criterion) {
    let mut registry = ResourceRegistry::new();
    registry.register_interface("wl_compositor", 4);
    let mut handles = Vec::new();
    for client in 0..64 {
        for object in 2..34 {
            let handle = registry
                .insert(ClientId(client), "wl_surface", 4, object)
                .unwrap();
            registry
                .attach(handle, ResourceKind::Surface(SurfaceId(object as u64)), None)
                .unwrap();
            handles.push(handle);
        }
    }

    c.bench_function("dispatch_2048_resources", |b| {
        b.iter(|| {
            for handle in &handles {
                black_box(registry.dispatch(*handle)).ok();
            }
        })
    });
}

/// Benchmark X11 surface correlation with a fallback to geometry
fn bench_x11_correlation(c: &mut Criterion) {
    c.bench_function("correlate_by_geometry_256_windows", |b| {
        b.iter_batched(
            || {
                let mut table = XWindowTable::new();
                for id in 0..256 {
                    table.create_window(
                        0x200000 + id,
                        Rectangle::new(id as i32, 0, 640, 480),
                        false,
                    );
                }
                let mut candidate = SurfaceCandidate::new(SurfaceId(1));
                candidate.geometry = Some(Rectangle::new(255, 0, 640, 480));
                (table, candidate)
            },
            |(mut table, candidate)| black_box(table.correlate(&candidate)),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark configuration parsing and validation
fn bench_configuration(c: &mut Criterion) {
    let toml = r#"
        [general]
        seat_name = "seat0"

        [[outputs]]
        name = "eDP-1"
        width = 2560
        height = 1600
        scale = 2
        primary = true

        [[outputs]]
        name = "HDMI-A-1"
        x = 1280
        width = 1920
        height = 1080

        [xwayland]
        restart_limit = 5
    "#;

    c.bench_function("config_parse_and_validate", |b| {
        b.iter(|| {
            let config: KeystoneConfig = toml::from_str(black_box(toml)).unwrap();
            black_box(config.validate().is_ok())
        })
    });
}

criterion_group!(
    benches,
    bench_output_lookup,
    bench_descriptor_validation,
    bench_layer_arrange,
    bench_resource_dispatch,
    bench_x11_correlation,
    bench_configuration
);

criterion_main!(benches);

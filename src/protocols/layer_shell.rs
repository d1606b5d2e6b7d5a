//! `zwlr_layer_shell_v1` state
//!
//! Layer surfaces are desktop chrome (panels, docks, wallpapers, lock screens)
//! anchored to output edges. The compositor decides their size, announces it
//! with `configure`, and shrinks the output's usable area by their exclusive
//! zones.

use super::{Extension, ProtocolEvent};
use crate::geometry::{Rectangle, Size};
use crate::ids::{OutputId, SurfaceId};
use crate::output::OutputManager;
use log::{debug, info};
use std::collections::HashMap;
use thiserror::Error;

pub const INTERFACE: &str = "zwlr_layer_shell_v1";
pub const VERSION: u32 = 1;

pub const ANCHOR_TOP: u32 = 1;
pub const ANCHOR_BOTTOM: u32 = 2;
pub const ANCHOR_LEFT: u32 = 4;
pub const ANCHOR_RIGHT: u32 = 8;
const ANCHOR_ALL: u32 = ANCHOR_TOP | ANCHOR_BOTTOM | ANCHOR_LEFT | ANCHOR_RIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Background = 0,
    Bottom = 1,
    Top = 2,
    Overlay = 3,
}

impl TryFrom<u32> for Layer {
    type Error = LayerShellError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Layer::Background),
            1 => Ok(Layer::Bottom),
            2 => Ok(Layer::Top),
            3 => Ok(Layer::Overlay),
            other => Err(LayerShellError::InvalidLayer(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyboardInteractivity {
    #[default]
    None,
    Exclusive,
    OnDemand,
}

impl TryFrom<u32> for KeyboardInteractivity {
    type Error = LayerShellError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyboardInteractivity::None),
            1 => Ok(KeyboardInteractivity::Exclusive),
            2 => Ok(KeyboardInteractivity::OnDemand),
            other => Err(LayerShellError::InvalidKeyboardInteractivity(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margins {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayerShellError {
    #[error("surface already has a role")]
    Role,
    #[error("layer {0} does not exist")]
    InvalidLayer(u32),
    #[error("surface already has a layer surface")]
    AlreadyConstructed,
    #[error("invalid surface state: {0}")]
    InvalidSurfaceState(&'static str),
    #[error("size {0}x{1} needs anchors on both opposite edges for the zero axis")]
    InvalidSize(i32, i32),
    #[error("anchor {0:#x} has unknown bits")]
    InvalidAnchor(u32),
    #[error("keyboard interactivity {0} is not known")]
    InvalidKeyboardInteractivity(u32),
    #[error("{0} has no layer surface")]
    UnknownSurface(SurfaceId),
}

#[derive(Debug, Clone)]
pub struct LayerSurface {
    pub surface: SurfaceId,
    /// Output requested by the client; `None` lets the compositor choose.
    pub requested_output: Option<OutputId>,
    pub output: Option<OutputId>,
    pub layer: Layer,
    pub namespace: String,
    pub anchor: u32,
    /// -1 ignores other surfaces' zones without reserving space
    pub exclusive_zone: i32,
    pub margins: Margins,
    pub desired_size: Size,
    pub keyboard_interactivity: KeyboardInteractivity,
    pub geometry: Rectangle,
    pub mapped: bool,
    pub closed: bool,
    configured: bool,
    dirty: bool,
    last_sent: Option<u32>,
    last_acked: Option<u32>,
}

impl LayerSurface {
    fn new(surface: SurfaceId, output: Option<OutputId>, layer: Layer, namespace: String) -> Self {
        Self {
            surface,
            requested_output: output,
            output: None,
            layer,
            namespace,
            anchor: 0,
            exclusive_zone: 0,
            margins: Margins::default(),
            desired_size: Size::default(),
            keyboard_interactivity: KeyboardInteractivity::None,
            geometry: Rectangle::default(),
            mapped: false,
            closed: false,
            configured: false,
            dirty: true,
            last_sent: None,
            last_acked: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    /// Edge whose usable area this surface reserves, if any.
    fn exclusive_edge(&self) -> Option<u32> {
        if self.exclusive_zone <= 0 {
            return None;
        }
        match self.anchor {
            ANCHOR_TOP => Some(ANCHOR_TOP),
            ANCHOR_BOTTOM => Some(ANCHOR_BOTTOM),
            ANCHOR_LEFT => Some(ANCHOR_LEFT),
            ANCHOR_RIGHT => Some(ANCHOR_RIGHT),
            a if a == ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT => Some(ANCHOR_TOP),
            a if a == ANCHOR_BOTTOM | ANCHOR_LEFT | ANCHOR_RIGHT => Some(ANCHOR_BOTTOM),
            a if a == ANCHOR_LEFT | ANCHOR_TOP | ANCHOR_BOTTOM => Some(ANCHOR_LEFT),
            a if a == ANCHOR_RIGHT | ANCHOR_TOP | ANCHOR_BOTTOM => Some(ANCHOR_RIGHT),
            _ => None,
        }
    }
}

/// Places a layer surface inside `bounds`. Zero sizes stretch between
/// opposite anchors; a size larger than the bounds is clamped.
pub fn compute_layer_geometry(
    bounds: Rectangle,
    anchor: u32,
    desired: Size,
    margins: Margins,
) -> Rectangle {
    let left = anchor & ANCHOR_LEFT != 0;
    let right = anchor & ANCHOR_RIGHT != 0;
    let top = anchor & ANCHOR_TOP != 0;
    let bottom = anchor & ANCHOR_BOTTOM != 0;

    // Margins come straight from the client.
    let avail_w = bounds
        .width
        .saturating_sub(margins.left)
        .saturating_sub(margins.right)
        .max(1);
    let avail_h = bounds
        .height
        .saturating_sub(margins.top)
        .saturating_sub(margins.bottom)
        .max(1);

    let w = if desired.width > 0 {
        desired.width.min(avail_w)
    } else {
        avail_w
    };
    let h = if desired.height > 0 {
        desired.height.min(avail_h)
    } else {
        avail_h
    };

    let x = match (left, right) {
        (true, true) => bounds
            .x
            .saturating_add(margins.left)
            .saturating_add((avail_w - w) / 2),
        (true, false) => bounds.x.saturating_add(margins.left),
        (false, true) => bounds.right().saturating_sub(margins.right).saturating_sub(w),
        (false, false) => bounds.x.saturating_add(bounds.width.saturating_sub(w) / 2),
    };
    let y = match (top, bottom) {
        (true, true) => bounds
            .y
            .saturating_add(margins.top)
            .saturating_add((avail_h - h) / 2),
        (true, false) => bounds.y.saturating_add(margins.top),
        (false, true) => bounds.bottom().saturating_sub(margins.bottom).saturating_sub(h),
        (false, false) => bounds.y.saturating_add(bounds.height.saturating_sub(h) / 2),
    };

    Rectangle::new(x, y, w, h)
}

#[derive(Debug, Default)]
pub struct LayerShellExtension {
    surfaces: HashMap<SurfaceId, LayerSurface>,
    usable: HashMap<OutputId, Rectangle>,
    next_serial: u32,
    events: Vec<ProtocolEvent>,
}

impl LayerShellExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, surface: SurfaceId) -> Option<&LayerSurface> {
        self.surfaces.get(&surface)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &LayerSurface> {
        self.surfaces.values()
    }

    /// Usable area of an output after exclusive zones.
    pub fn usable_area(&self, output: OutputId) -> Option<Rectangle> {
        self.usable.get(&output).copied()
    }

    /// Creates the layer surface. Role conflicts are checked by the compositor.
    pub fn get_layer_surface(
        &mut self,
        surface: SurfaceId,
        output: Option<OutputId>,
        layer: u32,
        namespace: String,
    ) -> Result<(), LayerShellError> {
        let layer = Layer::try_from(layer)?;
        if self.surfaces.contains_key(&surface) {
            return Err(LayerShellError::AlreadyConstructed);
        }
        info!(
            "📐 Layer surface {} created: namespace '{}', layer {:?}",
            surface, namespace, layer
        );
        self.surfaces
            .insert(surface, LayerSurface::new(surface, output, layer, namespace));
        Ok(())
    }

    pub fn set_size(&mut self, surface: SurfaceId, width: u32, height: u32) -> Result<(), LayerShellError> {
        let entry = self.entry_mut(surface)?;
        entry.desired_size = Size::new(
            width.min(i32::MAX as u32) as i32,
            height.min(i32::MAX as u32) as i32,
        );
        entry.dirty = true;
        Ok(())
    }

    pub fn set_anchor(&mut self, surface: SurfaceId, anchor: u32) -> Result<(), LayerShellError> {
        if anchor & !ANCHOR_ALL != 0 {
            return Err(LayerShellError::InvalidAnchor(anchor));
        }
        let entry = self.entry_mut(surface)?;
        entry.anchor = anchor;
        entry.dirty = true;
        Ok(())
    }

    pub fn set_exclusive_zone(&mut self, surface: SurfaceId, zone: i32) -> Result<(), LayerShellError> {
        let entry = self.entry_mut(surface)?;
        entry.exclusive_zone = zone;
        entry.dirty = true;
        Ok(())
    }

    pub fn set_margin(&mut self, surface: SurfaceId, margins: Margins) -> Result<(), LayerShellError> {
        let entry = self.entry_mut(surface)?;
        entry.margins = margins;
        entry.dirty = true;
        Ok(())
    }

    pub fn set_keyboard_interactivity(
        &mut self,
        surface: SurfaceId,
        value: u32,
    ) -> Result<(), LayerShellError> {
        let interactivity = KeyboardInteractivity::try_from(value)?;
        self.entry_mut(surface)?.keyboard_interactivity = interactivity;
        Ok(())
    }

    pub fn set_layer(&mut self, surface: SurfaceId, layer: u32) -> Result<(), LayerShellError> {
        let layer = Layer::try_from(layer)?;
        let entry = self.entry_mut(surface)?;
        entry.layer = layer;
        entry.dirty = true;
        Ok(())
    }

    /// Records the acked serial. Serials never sent are logged and ignored.
    pub fn ack_configure(&mut self, surface: SurfaceId, serial: u32) -> Result<(), LayerShellError> {
        let entry = self.entry_mut(surface)?;
        match entry.last_sent {
            Some(sent) if serial <= sent => entry.last_acked = Some(serial),
            _ => debug!("{} acked unknown configure serial {}", surface, serial),
        }
        Ok(())
    }

    /// Applies a `wl_surface.commit`. The first commit triggers the initial
    /// configure; later commits reconfigure when the requested state changed.
    pub fn commit(
        &mut self,
        surface: SurfaceId,
        has_buffer: bool,
        outputs: &OutputManager,
    ) -> Result<(), LayerShellError> {
        let entry = self.entry_mut(surface)?;
        if entry.closed {
            return Ok(());
        }

        let Size { width, height } = entry.desired_size;
        let horizontal = entry.anchor & (ANCHOR_LEFT | ANCHOR_RIGHT) == ANCHOR_LEFT | ANCHOR_RIGHT;
        let vertical = entry.anchor & (ANCHOR_TOP | ANCHOR_BOTTOM) == ANCHOR_TOP | ANCHOR_BOTTOM;
        if (width == 0 && !horizontal) || (height == 0 && !vertical) {
            return Err(LayerShellError::InvalidSize(width, height));
        }
        if has_buffer && !entry.configured {
            return Err(LayerShellError::InvalidSurfaceState(
                "buffer attached before the first configure",
            ));
        }

        let needs_configure = !entry.configured || entry.dirty;
        entry.mapped = has_buffer;
        let output = entry.requested_output.or_else(|| outputs.primary_id());
        entry.output = output;

        if needs_configure {
            if let Some(output) = output {
                self.arrange(output, outputs);
            }
            self.send_configure(surface);
        }
        Ok(())
    }

    /// `zwlr_layer_surface_v1.destroy`: drops the state; the caller re-arranges.
    pub fn destroy_layer_surface(&mut self, surface: SurfaceId) -> bool {
        let existed = self.surfaces.contains_key(&surface);
        Extension::surface_destroyed(self, surface);
        existed
    }

    /// Lays out every layer surface on `output` and recomputes its usable area.
    pub fn arrange(&mut self, output: OutputId, outputs: &OutputManager) -> Rectangle {
        let full = match outputs.get(output) {
            Some(o) => o.geometry,
            None => return Rectangle::default(),
        };
        let mut usable = full;

        let mut ids: Vec<(Layer, SurfaceId)> = self
            .surfaces
            .values()
            .filter(|s| s.output == Some(output) && !s.closed)
            .map(|s| (s.layer, s.surface))
            .collect();
        // Overlay reserves first, then top, bottom, background.
        ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, id) in &ids {
            let Some(entry) = self.surfaces.get_mut(id) else {
                continue;
            };
            let bounds = if entry.exclusive_zone == -1 { full } else { usable };
            entry.geometry =
                compute_layer_geometry(bounds, entry.anchor, entry.desired_size, entry.margins);

            if let Some(edge) = entry.exclusive_edge() {
                let m = entry.margins;
                let zone = entry.exclusive_zone;
                // A negative margin never grows the usable area.
                match edge {
                    ANCHOR_TOP => {
                        let cut = zone.saturating_add(m.top).clamp(0, usable.height.max(0));
                        usable.y = usable.y.saturating_add(cut);
                        usable.height -= cut;
                    }
                    ANCHOR_BOTTOM => {
                        usable.height -= zone.saturating_add(m.bottom).clamp(0, usable.height.max(0));
                    }
                    ANCHOR_LEFT => {
                        let cut = zone.saturating_add(m.left).clamp(0, usable.width.max(0));
                        usable.x = usable.x.saturating_add(cut);
                        usable.width -= cut;
                    }
                    _ => {
                        usable.width -= zone.saturating_add(m.right).clamp(0, usable.width.max(0));
                    }
                }
            }
        }

        debug!("Usable area of {} is {:?}", output, usable);
        self.usable.insert(output, usable);
        usable
    }

    /// Re-arranges every output and reconfigures surfaces whose size changed.
    pub fn arrange_all(&mut self, outputs: &OutputManager) {
        let before: HashMap<SurfaceId, Size> = self
            .surfaces
            .values()
            .map(|s| (s.surface, s.geometry.size()))
            .collect();
        for output in outputs.iter() {
            self.arrange(output.id, outputs);
        }
        let changed: Vec<SurfaceId> = self
            .surfaces
            .values()
            .filter(|s| s.configured && !s.closed)
            .filter(|s| before.get(&s.surface) != Some(&s.geometry.size()))
            .map(|s| s.surface)
            .collect();
        for surface in changed {
            self.send_configure(surface);
        }
    }

    fn send_configure(&mut self, surface: SurfaceId) {
        let serial = self.next_serial;
        let Some(entry) = self.surfaces.get_mut(&surface) else {
            return;
        };
        self.next_serial = self.next_serial.wrapping_add(1);
        entry.configured = true;
        entry.dirty = false;
        entry.last_sent = Some(serial);
        let size = entry.geometry.size();
        debug!(
            "Configure {} serial {} size {}x{}",
            surface, serial, size.width, size.height
        );
        self.events.push(ProtocolEvent::LayerConfigure {
            surface,
            serial,
            width: size.width.max(0) as u32,
            height: size.height.max(0) as u32,
        });
    }

    fn entry_mut(&mut self, surface: SurfaceId) -> Result<&mut LayerSurface, LayerShellError> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(LayerShellError::UnknownSurface(surface))
    }
}

impl Extension for LayerShellExtension {
    fn interface(&self) -> &'static str {
        INTERFACE
    }

    fn version(&self) -> u32 {
        VERSION
    }

    fn surface_destroyed(&mut self, surface: SurfaceId) {
        if let Some(entry) = self.surfaces.remove(&surface) {
            if let Some(output) = entry.output {
                if entry.exclusive_edge().is_some() {
                    // Stale until the next arrange of this output.
                    self.usable.remove(&output);
                }
            }
            debug!("Layer surface {} ('{}') destroyed", surface, entry.namespace);
        }
    }

    fn output_removed(&mut self, output: OutputId) {
        self.usable.remove(&output);
        for entry in self.surfaces.values_mut() {
            let on_output =
                entry.output == Some(output) || entry.requested_output == Some(output);
            if on_output && !entry.closed {
                entry.closed = true;
                entry.mapped = false;
                info!("Closing layer surface {} on removed {}", entry.surface, output);
                self.events
                    .push(ProtocolEvent::LayerClosed { surface: entry.surface });
            }
        }
    }

    fn take_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputInfo;

    fn outputs() -> (OutputManager, OutputId) {
        let mut outputs = OutputManager::new();
        let id = outputs
            .add(OutputInfo {
                geometry: Rectangle::new(0, 0, 1920, 1080),
                ..Default::default()
            })
            .unwrap();
        (outputs, id)
    }

    #[test]
    fn test_top_bar_full_width() {
        let bounds = Rectangle::new(0, 0, 1920, 1080);
        let geo = compute_layer_geometry(
            bounds,
            ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT,
            Size::new(0, 30),
            Margins::default(),
        );
        assert_eq!(geo, Rectangle::new(0, 0, 1920, 30));
    }

    #[test]
    fn test_left_panel_with_margins() {
        let bounds = Rectangle::new(0, 0, 1200, 800);
        let geo = compute_layer_geometry(
            bounds,
            ANCHOR_LEFT | ANCHOR_TOP | ANCHOR_BOTTOM,
            Size::new(100, 0),
            Margins {
                top: 10,
                right: 0,
                bottom: 10,
                left: 5,
            },
        );
        assert_eq!(geo, Rectangle::new(5, 10, 100, 780));
    }

    #[test]
    fn test_extreme_margins_saturate() {
        let bounds = Rectangle::new(0, 0, 1920, 1080);
        let geo = compute_layer_geometry(
            bounds,
            ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT,
            Size::new(0, 30),
            Margins {
                top: i32::MAX,
                right: i32::MAX,
                bottom: 0,
                left: i32::MIN,
            },
        );
        assert_eq!(geo.x, i32::MIN);
        assert_eq!(geo.y, i32::MAX);
        assert!(geo.width >= 1);
        assert_eq!(geo.height, 1);

        let geo = compute_layer_geometry(
            bounds,
            ANCHOR_BOTTOM | ANCHOR_RIGHT,
            Size::new(100, 100),
            Margins {
                top: 0,
                right: i32::MIN,
                bottom: i32::MIN,
                left: 0,
            },
        );
        assert_eq!(geo.size(), Size::new(100, 100));
        assert_eq!((geo.x, geo.y), (i32::MAX - 100, i32::MAX - 100));
    }

    #[test]
    fn test_huge_exclusive_zone_is_clamped() {
        let (outputs, output) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        ext.get_layer_surface(s, None, 2, "bar".into()).unwrap();
        ext.set_anchor(s, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
        ext.set_size(s, 0, 30).unwrap();
        ext.set_exclusive_zone(s, i32::MAX).unwrap();
        ext.set_margin(
            s,
            Margins {
                top: 1,
                ..Margins::default()
            },
        )
        .unwrap();
        ext.commit(s, false, &outputs).unwrap();

        assert_eq!(ext.get(s).unwrap().geometry, Rectangle::new(0, 1, 1920, 30));
        assert_eq!(
            ext.usable_area(output),
            Some(Rectangle::new(0, 1080, 1920, 0))
        );
    }

    #[test]
    fn test_negative_margin_never_grows_usable_area() {
        let (outputs, output) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        ext.get_layer_surface(s, None, 2, "bar".into()).unwrap();
        ext.set_anchor(s, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
        ext.set_size(s, 0, 30).unwrap();
        ext.set_exclusive_zone(s, 10).unwrap();
        ext.set_margin(
            s,
            Margins {
                top: -500,
                ..Margins::default()
            },
        )
        .unwrap();
        ext.commit(s, false, &outputs).unwrap();

        assert_eq!(ext.get(s).unwrap().geometry.y, -500);
        assert_eq!(
            ext.usable_area(output),
            Some(Rectangle::new(0, 0, 1920, 1080))
        );
    }

    #[test]
    fn test_zones_larger_than_output_leave_empty_usable_area() {
        let (outputs, output) = outputs();
        let mut ext = LayerShellExtension::new();
        let top = SurfaceId(1);
        let bottom = SurfaceId(2);
        for (s, edge) in [(top, ANCHOR_TOP), (bottom, ANCHOR_BOTTOM)] {
            ext.get_layer_surface(s, None, 2, "bar".into()).unwrap();
            ext.set_anchor(s, edge | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
            ext.set_size(s, 0, 700).unwrap();
            ext.set_exclusive_zone(s, 700).unwrap();
            ext.commit(s, false, &outputs).unwrap();
        }

        assert_eq!(
            ext.usable_area(output),
            Some(Rectangle::new(0, 700, 1920, 0))
        );
        // The second bar only gets what the first one left.
        assert_eq!(
            ext.get(bottom).unwrap().geometry,
            Rectangle::new(0, 700, 1920, 380)
        );
    }

    #[test]
    fn test_destroyed_layer_surface_can_be_recreated() {
        let (outputs, output) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        ext.get_layer_surface(s, None, 2, "bar".into()).unwrap();
        ext.set_anchor(s, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
        ext.set_size(s, 0, 30).unwrap();
        ext.set_exclusive_zone(s, 30).unwrap();
        ext.commit(s, false, &outputs).unwrap();
        ext.take_events();

        assert!(ext.destroy_layer_surface(s));
        assert!(!ext.destroy_layer_surface(s));
        assert_eq!(ext.commit(s, false, &outputs), Err(LayerShellError::UnknownSurface(s)));
        ext.arrange_all(&outputs);
        assert_eq!(
            ext.usable_area(output),
            Some(Rectangle::new(0, 0, 1920, 1080))
        );

        ext.get_layer_surface(s, None, 3, "bar".into()).unwrap();
        ext.set_anchor(s, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
        ext.set_size(s, 0, 30).unwrap();
        ext.commit(s, false, &outputs).unwrap();
        assert_eq!(
            ext.take_events(),
            vec![ProtocolEvent::LayerConfigure {
                surface: s,
                serial: 1,
                width: 1920,
                height: 30,
            }]
        );
        assert_eq!(ext.get(s).unwrap().layer, Layer::Overlay);
    }

    #[test]
    fn test_unanchored_is_centered_and_clamped() {
        let bounds = Rectangle::new(100, 0, 1000, 500);
        let geo = compute_layer_geometry(bounds, 0, Size::new(4000, 100), Margins::default());
        assert_eq!(geo, Rectangle::new(100, 200, 1000, 100));
    }

    #[test]
    fn test_first_configure_on_initial_commit() {
        let (outputs, _) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        ext.get_layer_surface(s, None, 2, "panel".into()).unwrap();
        ext.set_anchor(s, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
        ext.set_size(s, 0, 32).unwrap();
        assert!(ext.take_events().is_empty());

        ext.commit(s, false, &outputs).unwrap();
        assert_eq!(
            ext.take_events(),
            vec![ProtocolEvent::LayerConfigure {
                surface: s,
                serial: 0,
                width: 1920,
                height: 32,
            }]
        );

        // Unchanged state: no new configure.
        ext.ack_configure(s, 0).unwrap();
        ext.commit(s, true, &outputs).unwrap();
        assert!(ext.take_events().is_empty());
        assert!(ext.get(s).unwrap().mapped);
        assert_eq!(ext.get(s).unwrap().last_acked(), Some(0));
    }

    #[test]
    fn test_configure_uses_compositor_size() {
        let (outputs, _) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(3);
        ext.get_layer_surface(s, None, 3, "osd".into()).unwrap();
        ext.set_size(s, 5000, 40).unwrap();
        ext.commit(s, false, &outputs).unwrap();
        match ext.take_events().as_slice() {
            [ProtocolEvent::LayerConfigure { serial, width, height, .. }] => {
                assert_eq!(*serial, 0);
                assert_eq!((*width, *height), (1920, 40));
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_serials_are_global() {
        let (outputs, _) = outputs();
        let mut ext = LayerShellExtension::new();
        for id in 1..=2 {
            let s = SurfaceId(id);
            ext.get_layer_surface(s, None, 0, "bg".into()).unwrap();
            ext.set_anchor(s, ANCHOR_ALL).unwrap();
            ext.commit(s, false, &outputs).unwrap();
        }
        let serials: Vec<u32> = ext
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                ProtocolEvent::LayerConfigure { serial, .. } => Some(serial),
                _ => None,
            })
            .collect();
        assert_eq!(serials, vec![0, 1]);
    }

    #[test]
    fn test_validation_errors() {
        let (outputs, _) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        assert_eq!(
            ext.get_layer_surface(s, None, 4, "x".into()),
            Err(LayerShellError::InvalidLayer(4))
        );
        ext.get_layer_surface(s, None, 1, "x".into()).unwrap();
        assert_eq!(
            ext.get_layer_surface(s, None, 1, "x".into()),
            Err(LayerShellError::AlreadyConstructed)
        );
        assert_eq!(ext.set_anchor(s, 16), Err(LayerShellError::InvalidAnchor(16)));
        assert_eq!(ext.set_layer(s, 9), Err(LayerShellError::InvalidLayer(9)));

        ext.set_anchor(s, ANCHOR_TOP).unwrap();
        assert_eq!(
            ext.commit(s, false, &outputs),
            Err(LayerShellError::InvalidSize(0, 0))
        );
    }

    #[test]
    fn test_buffer_before_configure_is_rejected() {
        let (outputs, _) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        ext.get_layer_surface(s, None, 2, "x".into()).unwrap();
        ext.set_size(s, 100, 100).unwrap();
        assert!(matches!(
            ext.commit(s, true, &outputs),
            Err(LayerShellError::InvalidSurfaceState(_))
        ));
    }

    #[test]
    fn test_exclusive_zone_reduces_usable_area() {
        let (outputs, output) = outputs();
        let mut ext = LayerShellExtension::new();
        let bar = SurfaceId(1);
        ext.get_layer_surface(bar, None, 2, "bar".into()).unwrap();
        ext.set_anchor(bar, ANCHOR_TOP | ANCHOR_LEFT | ANCHOR_RIGHT).unwrap();
        ext.set_size(bar, 0, 30).unwrap();
        ext.set_exclusive_zone(bar, 30).unwrap();
        ext.commit(bar, false, &outputs).unwrap();
        assert_eq!(
            ext.usable_area(output),
            Some(Rectangle::new(0, 30, 1920, 1050))
        );

        let dock = SurfaceId(2);
        ext.get_layer_surface(dock, None, 2, "dock".into()).unwrap();
        ext.set_anchor(dock, ANCHOR_LEFT | ANCHOR_TOP | ANCHOR_BOTTOM).unwrap();
        ext.set_size(dock, 64, 0).unwrap();
        ext.commit(dock, false, &outputs).unwrap();
        // Zone 0 places inside the usable area without reserving.
        assert_eq!(
            ext.get(dock).unwrap().geometry,
            Rectangle::new(0, 30, 64, 1050)
        );

        let wallpaper = SurfaceId(3);
        ext.get_layer_surface(wallpaper, None, 0, "wallpaper".into()).unwrap();
        ext.set_anchor(wallpaper, ANCHOR_ALL).unwrap();
        ext.set_exclusive_zone(wallpaper, -1).unwrap();
        ext.commit(wallpaper, false, &outputs).unwrap();
        assert_eq!(
            ext.get(wallpaper).unwrap().geometry,
            Rectangle::new(0, 0, 1920, 1080)
        );
    }

    #[test]
    fn test_output_removal_closes_surfaces() {
        let (outputs, output) = outputs();
        let mut ext = LayerShellExtension::new();
        let s = SurfaceId(1);
        ext.get_layer_surface(s, None, 2, "bar".into()).unwrap();
        ext.set_size(s, 10, 10).unwrap();
        ext.commit(s, false, &outputs).unwrap();
        ext.take_events();

        ext.output_removed(output);
        assert_eq!(
            ext.take_events(),
            vec![ProtocolEvent::LayerClosed { surface: s }]
        );
        assert!(ext.get(s).unwrap().closed);

        ext.output_removed(output);
        assert!(ext.take_events().is_empty());
    }
}

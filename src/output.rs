//! Output (monitor) model
//!
//! Keeps the list of logical outputs in global compositor space and maintains
//! the primary-output invariant: while any output exists, exactly one of them
//! is primary. When the primary goes away the first enabled output takes over,
//! falling back to the first output at all.

use crate::geometry::{Rectangle, Size};
use crate::ids::{IdAllocator, OutputId};
use log::{debug, info};
use thiserror::Error;

/// Properties used to create an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Connector name, e.g. "eDP-1" or "HDMI-A-1"
    pub name: String,
    pub make: String,
    pub model: String,
    /// Position and mode size in global compositor space
    pub geometry: Rectangle,
    /// Physical dimensions in millimeters
    pub physical_size: Size,
    pub scale: i32,
    /// Refresh rate in millihertz
    pub refresh_mhz: i32,
    pub enabled: bool,
    /// Request to become primary on insertion
    pub primary: bool,
}

impl Default for OutputInfo {
    fn default() -> Self {
        Self {
            name: "HEADLESS-1".to_string(),
            make: "Keystone".to_string(),
            model: "Virtual".to_string(),
            geometry: Rectangle::new(0, 0, 1920, 1080),
            physical_size: Size::new(0, 0),
            scale: 1,
            refresh_mhz: 60_000,
            enabled: true,
            primary: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub make: String,
    pub model: String,
    pub geometry: Rectangle,
    pub physical_size: Size,
    pub scale: i32,
    pub refresh_mhz: i32,
    pub enabled: bool,
    pub primary: bool,
}

impl Output {
    /// Nanoseconds per frame, 0 when the refresh rate is unknown.
    pub fn refresh_nsec(&self) -> u32 {
        if self.refresh_mhz <= 0 {
            return 0;
        }
        // Below ~233 mHz a frame lasts longer than u32 nanoseconds can hold.
        u32::try_from(1_000_000_000_000u64 / self.refresh_mhz as u64).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("unknown output {0}")]
    Unknown(OutputId),
    #[error("output {0} has an empty mode")]
    EmptyMode(String),
    #[error("scale must be at least 1, got {0}")]
    InvalidScale(i32),
}

#[derive(Debug, Default)]
pub struct OutputManager {
    outputs: Vec<Output>,
    ids: IdAllocator,
}

impl OutputManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output. The first output, or one that asks for it, becomes primary.
    pub fn add(&mut self, info: OutputInfo) -> Result<OutputId, OutputError> {
        if info.geometry.is_empty() {
            return Err(OutputError::EmptyMode(info.name));
        }
        if info.scale < 1 {
            return Err(OutputError::InvalidScale(info.scale));
        }

        let id = OutputId(self.ids.next());
        let make_primary = info.primary || self.outputs.is_empty();
        self.outputs.push(Output {
            id,
            name: info.name,
            make: info.make,
            model: info.model,
            geometry: info.geometry,
            physical_size: info.physical_size,
            scale: info.scale,
            refresh_mhz: info.refresh_mhz,
            enabled: info.enabled,
            primary: false,
        });
        if make_primary {
            self.mark_primary(id);
        }

        if let Some(output) = self.get(id) {
            info!(
                "🖥️ Output {} added: {} {}x{}+{}+{} @ {} mHz, scale {}",
                id,
                output.name,
                output.geometry.width,
                output.geometry.height,
                output.geometry.x,
                output.geometry.y,
                output.refresh_mhz,
                output.scale
            );
        }
        Ok(id)
    }

    /// Removes an output and promotes a successor if it was primary.
    pub fn remove(&mut self, id: OutputId) -> Result<Output, OutputError> {
        let index = self
            .outputs
            .iter()
            .position(|o| o.id == id)
            .ok_or(OutputError::Unknown(id))?;
        let removed = self.outputs.remove(index);
        if removed.primary {
            self.promote_successor();
        }
        info!("🖥️ Output {} ({}) removed", id, removed.name);
        Ok(removed)
    }

    pub fn set_primary(&mut self, id: OutputId) -> Result<(), OutputError> {
        if self.get(id).is_none() {
            return Err(OutputError::Unknown(id));
        }
        self.mark_primary(id);
        Ok(())
    }

    /// Enables or disables an output. Disabling the primary hands the role to
    /// another enabled output when one exists.
    pub fn set_enabled(&mut self, id: OutputId, enabled: bool) -> Result<(), OutputError> {
        let output = self
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(OutputError::Unknown(id))?;
        output.enabled = enabled;
        let was_primary = output.primary;
        if !enabled && was_primary && self.outputs.iter().any(|o| o.enabled) {
            self.promote_successor();
        }
        Ok(())
    }

    /// Changes the mode and position of an output.
    pub fn reconfigure(
        &mut self,
        id: OutputId,
        geometry: Rectangle,
        refresh_mhz: i32,
    ) -> Result<(), OutputError> {
        let output = self
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(OutputError::Unknown(id))?;
        if geometry.is_empty() {
            return Err(OutputError::EmptyMode(output.name.clone()));
        }
        output.geometry = geometry;
        output.refresh_mhz = refresh_mhz;
        debug!("Output {} reconfigured to {:?}", id, geometry);
        Ok(())
    }

    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn primary(&self) -> Option<&Output> {
        self.outputs.iter().find(|o| o.primary)
    }

    pub fn primary_id(&self) -> Option<OutputId> {
        self.primary().map(|o| o.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Enabled output containing the point.
    pub fn output_at(&self, x: i32, y: i32) -> Option<OutputId> {
        self.outputs
            .iter()
            .filter(|o| o.enabled)
            .find(|o| o.geometry.contains(x, y))
            .map(|o| o.id)
    }

    /// Enabled output with the largest overlap, else the primary.
    pub fn output_for_rect(&self, rect: &Rectangle) -> Option<OutputId> {
        let mut best: Option<(i64, OutputId)> = None;
        for output in self.outputs.iter().filter(|o| o.enabled) {
            if let Some(overlap) = output.geometry.intersection(rect) {
                let area = overlap.area();
                if best.map_or(true, |(a, _)| area > a) {
                    best = Some((area, output.id));
                }
            }
        }
        best.map(|(_, id)| id).or_else(|| self.primary_id())
    }

    /// Bounding box of all enabled outputs.
    pub fn layout_bounds(&self) -> Rectangle {
        self.outputs
            .iter()
            .filter(|o| o.enabled)
            .fold(Rectangle::default(), |acc, o| acc.union(&o.geometry))
    }

    fn mark_primary(&mut self, id: OutputId) {
        for output in &mut self.outputs {
            output.primary = output.id == id;
        }
        debug!("Primary output is now {}", id);
    }

    fn promote_successor(&mut self) {
        let successor = self
            .outputs
            .iter()
            .find(|o| o.enabled)
            .or_else(|| self.outputs.first())
            .map(|o| o.id);
        match successor {
            Some(id) => self.mark_primary(id),
            None => {
                for output in &mut self.outputs {
                    output.primary = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(name: &str, x: i32, width: i32) -> OutputInfo {
        OutputInfo {
            name: name.to_string(),
            geometry: Rectangle::new(x, 0, width, 1080),
            ..Default::default()
        }
    }

    fn primaries(manager: &OutputManager) -> usize {
        manager.iter().filter(|o| o.primary).count()
    }

    #[test]
    fn test_first_output_is_primary() {
        let mut manager = OutputManager::new();
        let first = manager.add(info("DP-1", 0, 1920)).unwrap();
        let second = manager.add(info("DP-2", 1920, 1920)).unwrap();
        assert_eq!(manager.primary_id(), Some(first));
        assert!(!manager.get(second).unwrap().primary);
    }

    #[test]
    fn test_removing_primary_promotes_first_enabled() {
        let mut manager = OutputManager::new();
        let a = manager.add(info("DP-1", 0, 1920)).unwrap();
        let b = manager.add(info("DP-2", 1920, 1920)).unwrap();
        let c = manager.add(info("DP-3", 3840, 1920)).unwrap();
        manager.set_enabled(b, false).unwrap();

        manager.remove(a).unwrap();
        assert_eq!(manager.primary_id(), Some(c));
        assert_eq!(primaries(&manager), 1);
    }

    #[test]
    fn test_primary_request_on_add() {
        let mut manager = OutputManager::new();
        manager.add(info("DP-1", 0, 1920)).unwrap();
        let b = manager
            .add(OutputInfo {
                primary: true,
                ..info("DP-2", 1920, 1920)
            })
            .unwrap();
        assert_eq!(manager.primary_id(), Some(b));
        assert_eq!(primaries(&manager), 1);
    }

    #[test]
    fn test_output_for_rect_prefers_largest_overlap() {
        let mut manager = OutputManager::new();
        let a = manager.add(info("DP-1", 0, 1920)).unwrap();
        let b = manager.add(info("DP-2", 1920, 1920)).unwrap();

        let rect = Rectangle::new(1800, 100, 400, 300);
        assert_eq!(manager.output_for_rect(&rect), Some(b));

        let offscreen = Rectangle::new(-5000, -5000, 10, 10);
        assert_eq!(manager.output_for_rect(&offscreen), Some(a));
    }

    #[test]
    fn test_rejects_empty_mode_and_bad_scale() {
        let mut manager = OutputManager::new();
        assert!(matches!(
            manager.add(info("DP-1", 0, 0)),
            Err(OutputError::EmptyMode(_))
        ));
        assert_eq!(
            manager.add(OutputInfo {
                scale: 0,
                ..info("DP-1", 0, 100)
            }),
            Err(OutputError::InvalidScale(0))
        );
        assert!(manager.is_empty());
    }

    #[test]
    fn test_refresh_nsec() {
        let mut manager = OutputManager::new();
        let id = manager.add(info("DP-1", 0, 1920)).unwrap();
        assert_eq!(manager.get(id).unwrap().refresh_nsec(), 16_666_666);

        let slow = manager
            .add(OutputInfo {
                refresh_mhz: 200,
                ..info("DP-2", 1920, 1920)
            })
            .unwrap();
        assert_eq!(manager.get(slow).unwrap().refresh_nsec(), u32::MAX);

        let unknown = manager
            .add(OutputInfo {
                refresh_mhz: 0,
                ..info("DP-3", 3840, 1920)
            })
            .unwrap();
        assert_eq!(manager.get(unknown).unwrap().refresh_nsec(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(bool, bool),
        Remove(usize),
        SetPrimary(usize),
        SetEnabled(usize, bool),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<bool>(), any::<bool>()).prop_map(|(e, p)| Op::Add(e, p)),
            (0usize..8).prop_map(Op::Remove),
            (0usize..8).prop_map(Op::SetPrimary),
            (0usize..8, any::<bool>()).prop_map(|(i, e)| Op::SetEnabled(i, e)),
        ]
    }

    proptest! {
        #[test]
        fn prop_exactly_one_primary(ops in proptest::collection::vec(op(), 1..40)) {
            let mut manager = OutputManager::new();
            for op in ops {
                let ids: Vec<OutputId> = manager.iter().map(|o| o.id).collect();
                match op {
                    Op::Add(enabled, primary) => {
                        let mut info = info("OUT", 0, 800);
                        info.enabled = enabled;
                        info.primary = primary;
                        manager.add(info).unwrap();
                    }
                    Op::Remove(i) => {
                        if let Some(id) = ids.get(i) {
                            manager.remove(*id).unwrap();
                        }
                    }
                    Op::SetPrimary(i) => {
                        if let Some(id) = ids.get(i) {
                            manager.set_primary(*id).unwrap();
                        }
                    }
                    Op::SetEnabled(i, enabled) => {
                        if let Some(id) = ids.get(i) {
                            manager.set_enabled(*id, enabled).unwrap();
                        }
                    }
                }
                let expected = if manager.is_empty() { 0 } else { 1 };
                prop_assert_eq!(primaries(&manager), expected);
            }
        }
    }
}

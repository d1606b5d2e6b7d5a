//! `wp_viewporter` cropping and scaling state

use super::{Extension, ProtocolEvent};
use crate::geometry::Size;
use crate::ids::SurfaceId;
use log::debug;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub const INTERFACE: &str = "wp_viewporter";
pub const VERSION: u32 = 1;

/// Source rectangle in surface-local buffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub source: Option<SourceRect>,
    pub destination: Option<Size>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewportError {
    #[error("surface already has a viewport")]
    ViewportExists,
    #[error("bad value: {0}")]
    BadValue(String),
    #[error("bad size: {0}")]
    BadSize(String),
    #[error("source rectangle extends outside the buffer")]
    OutOfBuffer,
    #[error("the wl_surface was destroyed")]
    NoSurface,
}

#[derive(Debug, Default)]
pub struct ViewporterExtension {
    viewports: HashMap<SurfaceId, Viewport>,
    orphaned: HashSet<SurfaceId>,
}

impl ViewporterExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_viewport(&mut self, surface: SurfaceId) -> Result<(), ViewportError> {
        if self.viewports.contains_key(&surface) {
            return Err(ViewportError::ViewportExists);
        }
        self.viewports.insert(surface, Viewport::default());
        Ok(())
    }

    /// Removes the viewport; the surface goes back to its native size.
    pub fn destroy_viewport(&mut self, surface: SurfaceId) {
        self.viewports.remove(&surface);
        self.orphaned.remove(&surface);
    }

    /// `(-1, -1, -1, -1)` unsets the source rectangle.
    pub fn set_source(
        &mut self,
        surface: SurfaceId,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Result<(), ViewportError> {
        let viewport = self.viewport_mut(surface)?;
        if x == -1.0 && y == -1.0 && width == -1.0 && height == -1.0 {
            viewport.source = None;
            return Ok(());
        }
        if x < 0.0 || y < 0.0 || width <= 0.0 || height <= 0.0 {
            return Err(ViewportError::BadValue(format!(
                "source {}x{}+{}+{}",
                width, height, x, y
            )));
        }
        viewport.source = Some(SourceRect {
            x,
            y,
            width,
            height,
        });
        Ok(())
    }

    /// `(-1, -1)` unsets the destination size.
    pub fn set_destination(
        &mut self,
        surface: SurfaceId,
        width: i32,
        height: i32,
    ) -> Result<(), ViewportError> {
        let viewport = self.viewport_mut(surface)?;
        if width == -1 && height == -1 {
            viewport.destination = None;
            return Ok(());
        }
        if width <= 0 || height <= 0 {
            return Err(ViewportError::BadValue(format!(
                "destination {}x{}",
                width, height
            )));
        }
        viewport.destination = Some(Size::new(width, height));
        Ok(())
    }

    pub fn get(&self, surface: SurfaceId) -> Option<&Viewport> {
        self.viewports.get(&surface)
    }

    pub fn source_rect(&self, surface: SurfaceId) -> Option<SourceRect> {
        self.viewports.get(&surface).and_then(|v| v.source)
    }

    /// Logical size after cropping and scaling. `native` is the buffer size in
    /// surface coordinates.
    pub fn effective_size(&self, surface: SurfaceId, native: Size) -> Size {
        match self.viewports.get(&surface) {
            Some(Viewport {
                destination: Some(dst),
                ..
            }) => *dst,
            Some(Viewport {
                source: Some(src), ..
            }) => Size::new(src.width as i32, src.height as i32),
            _ => native,
        }
    }

    /// Checks the viewport against the buffer being committed.
    pub fn validate_commit(
        &self,
        surface: SurfaceId,
        buffer: Option<Size>,
    ) -> Result<(), ViewportError> {
        let Some(viewport) = self.viewports.get(&surface) else {
            return Ok(());
        };
        let Some(src) = viewport.source else {
            return Ok(());
        };
        if viewport.destination.is_none() && (src.width.fract() != 0.0 || src.height.fract() != 0.0) {
            return Err(ViewportError::BadSize(format!(
                "source size {}x{} is not integer and no destination is set",
                src.width, src.height
            )));
        }
        if let Some(buffer) = buffer {
            if src.x + src.width > buffer.width as f64 || src.y + src.height > buffer.height as f64 {
                return Err(ViewportError::OutOfBuffer);
            }
        }
        Ok(())
    }

    fn viewport_mut(&mut self, surface: SurfaceId) -> Result<&mut Viewport, ViewportError> {
        if self.orphaned.contains(&surface) {
            return Err(ViewportError::NoSurface);
        }
        self.viewports
            .get_mut(&surface)
            .ok_or(ViewportError::NoSurface)
    }
}

impl Extension for ViewporterExtension {
    fn interface(&self) -> &'static str {
        INTERFACE
    }

    fn version(&self) -> u32 {
        VERSION
    }

    fn surface_destroyed(&mut self, surface: SurfaceId) {
        if self.viewports.remove(&surface).is_some() {
            debug!("Viewport of {} orphaned", surface);
            self.orphaned.insert(surface);
        }
    }

    fn take_events(&mut self) -> Vec<ProtocolEvent> {
        Vec::new()
    }
}

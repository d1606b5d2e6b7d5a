//! Seat focus bookkeeping

use crate::ids::SurfaceId;

/// `wl_seat.capability` bits
pub const CAPABILITY_POINTER: u32 = 1;
pub const CAPABILITY_KEYBOARD: u32 = 2;
pub const CAPABILITY_TOUCH: u32 = 4;

#[derive(Debug, Clone)]
pub struct Seat {
    pub name: String,
    pub capabilities: u32,
    keyboard_focus: Option<SurfaceId>,
    pointer_focus: Option<SurfaceId>,
    /// Surface-local pointer position
    pointer_location: (f64, f64),
}

impl Seat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: CAPABILITY_POINTER | CAPABILITY_KEYBOARD,
            keyboard_focus: None,
            pointer_focus: None,
            pointer_location: (0.0, 0.0),
        }
    }

    pub fn keyboard_focus(&self) -> Option<SurfaceId> {
        self.keyboard_focus
    }

    pub fn pointer_focus(&self) -> Option<SurfaceId> {
        self.pointer_focus
    }

    pub fn pointer_location(&self) -> (f64, f64) {
        self.pointer_location
    }

    /// Returns the previous focus when it changed, `None` for a no-op.
    pub fn set_keyboard_focus(&mut self, surface: Option<SurfaceId>) -> Option<Option<SurfaceId>> {
        if self.keyboard_focus == surface {
            return None;
        }
        Some(std::mem::replace(&mut self.keyboard_focus, surface))
    }

    pub fn set_pointer_focus(
        &mut self,
        surface: Option<SurfaceId>,
        location: (f64, f64),
    ) -> Option<Option<SurfaceId>> {
        self.pointer_location = location;
        if self.pointer_focus == surface {
            return None;
        }
        Some(std::mem::replace(&mut self.pointer_focus, surface))
    }

    /// Drops focus held by a destroyed surface. Returns `(keyboard, pointer)`
    /// flags telling which focus was cleared.
    pub fn surface_destroyed(&mut self, surface: SurfaceId) -> (bool, bool) {
        let keyboard = self.keyboard_focus == Some(surface);
        let pointer = self.pointer_focus == Some(surface);
        if keyboard {
            self.keyboard_focus = None;
        }
        if pointer {
            self.pointer_focus = None;
        }
        (keyboard, pointer)
    }
}

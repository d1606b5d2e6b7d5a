//! Surface arena entries and their double-buffered state

use crate::geometry::{Rectangle, Size};
use crate::ids::{BufferId, ClientId, SurfaceId};

/// Role-defining protocol object bound to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Toplevel,
    Popup,
    Layer,
    XWayland,
}

/// Content attached with `wl_surface.attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRef {
    Dmabuf(BufferId),
    /// `wl_shm` buffer; the pixels stay with the wire layer
    Shm { id: u64, width: i32, height: i32 },
}

/// `wl_region` contents: rectangles added or subtracted in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    ops: Vec<(bool, Rectangle)>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rect: Rectangle) {
        self.ops.push((true, rect));
    }

    pub fn subtract(&mut self, rect: Rectangle) {
        self.ops.push((false, rect));
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.ops
            .iter()
            .fold(false, |inside, (add, rect)| {
                if rect.contains(x, y) {
                    *add
                } else {
                    inside
                }
            })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.iter().all(|(add, rect)| !add || rect.is_empty())
    }
}

/// Double-buffered state; `pending` becomes `current` on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceState {
    pub buffer: Option<BufferRef>,
    pub damage: Vec<Rectangle>,
    /// `None` accepts input everywhere
    pub input_region: Option<Region>,
    pub buffer_scale: i32,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            buffer: None,
            damage: Vec::new(),
            input_region: None,
            buffer_scale: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PendingState {
    /// `Some(None)` is an explicit null attach
    pub buffer: Option<Option<BufferRef>>,
    pub damage: Vec<Rectangle>,
    pub input_region: Option<Option<Region>>,
    pub buffer_scale: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Surface {
    pub id: SurfaceId,
    pub client: ClientId,
    role: Option<Role>,
    role_active: bool,
    pub(crate) pending: PendingState,
    pub current: SurfaceState,
    /// Logical size after buffer scale and viewport
    pub size: Size,
    /// Position and size in global space, once a shell decided it
    pub placement: Option<Rectangle>,
    pub commit_count: u64,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId, client: ClientId) -> Self {
        Self {
            id,
            client,
            role: None,
            role_active: false,
            pending: PendingState::default(),
            current: SurfaceState::default(),
            size: Size::default(),
            placement: None,
            commit_count: 0,
        }
    }

    /// The role this surface was ever given. A role sticks after its role
    /// object is destroyed; only the same role may be assigned again.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn has_active_role(&self) -> bool {
        self.role_active
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = Some(role);
        self.role_active = true;
    }

    pub(crate) fn deactivate_role(&mut self) {
        self.role_active = false;
    }

    pub fn is_mapped(&self) -> bool {
        self.current.buffer.is_some()
    }

    /// Whether a point in surface-local coordinates accepts input.
    pub fn accepts_input_at(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x >= self.size.width || y >= self.size.height {
            return false;
        }
        self.current
            .input_region
            .as_ref()
            .map_or(true, |region| region.contains(x, y))
    }
}

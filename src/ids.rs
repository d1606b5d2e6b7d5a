//! Stable identifiers for the object graph.
//!
//! Wayland protocol ids are reused by clients once an object is destroyed, so
//! everything inside the core is keyed by these monotonically allocated ids
//! instead.

use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// A connected client.
    ClientId,
    "client"
);
define_id!(
    /// A `wl_surface` in the compositor's surface arena.
    SurfaceId,
    "surface"
);
define_id!(
    /// A monitor known to the output manager.
    OutputId,
    "output"
);
define_id!(
    /// A one-shot `wp_presentation_feedback`.
    FeedbackId,
    "feedback"
);
define_id!(
    /// A `zwp_linux_buffer_params_v1` builder.
    ParamsId,
    "params"
);
define_id!(
    /// A client buffer created through linux-dmabuf.
    BufferId,
    "buffer"
);

/// Hands out ids of one kind, never reusing a value.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// True when `id` was handed out by this allocator at some point.
    pub fn was_issued(&self, id: u64) -> bool {
        id != 0 && id < self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

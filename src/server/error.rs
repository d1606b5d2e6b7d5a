//! Domain errors translated into `post_error` calls

use crate::buffer::ParamsError;
use crate::compositor::RoleError;
use crate::protocols::layer_shell::{self, LayerShellError};
use crate::protocols::viewporter::{self, ViewportError};
use crate::resource::ResourceError;
use log::warn;
use thiserror::Error;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_buffer_params_v1;
use wayland_protocols::wp::viewporter::server::{wp_viewport, wp_viewporter};
use wayland_protocols::xdg::shell::server::{xdg_surface, xdg_wm_base};
use wayland_protocols_wlr::layer_shell::v1::server::{zwlr_layer_shell_v1, zwlr_layer_surface_v1};
use wayland_server::protocol::{wl_display, wl_shm, wl_surface};
use wayland_server::Resource;

/// A fatal error for the client, addressed to one interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{interface} error {code}: {message}")]
pub struct ProtocolError {
    /// Interface whose error enum `code` belongs to
    pub interface: &'static str,
    pub code: u32,
    pub message: String,
}

impl ProtocolError {
    pub fn new(interface: &'static str, code: u32, message: impl Into<String>) -> Self {
        Self {
            interface,
            code,
            message: message.into(),
        }
    }

    pub fn invalid_surface_scale(scale: i32) -> Self {
        Self::new(
            "wl_surface",
            wl_surface::Error::InvalidScale as u32,
            format!("buffer scale {} is not positive", scale),
        )
    }

    pub fn invalid_shm_stride(stride: i32) -> Self {
        Self::new(
            "wl_shm",
            wl_shm::Error::InvalidStride as u32,
            format!("invalid stride {}", stride),
        )
    }

    pub fn invalid_shm_fd(reason: impl Into<String>) -> Self {
        Self::new("wl_shm", wl_shm::Error::InvalidFd as u32, reason)
    }

    pub fn xdg_not_constructed() -> Self {
        Self::new(
            "xdg_surface",
            xdg_surface::Error::NotConstructed as u32,
            "xdg_surface has no role object",
        )
    }

    pub fn xdg_unconfigured_buffer() -> Self {
        Self::new(
            "xdg_surface",
            xdg_surface::Error::UnconfiguredBuffer as u32,
            "buffer attached before the first configure was acked",
        )
    }

    pub fn xdg_invalid_positioner(reason: impl Into<String>) -> Self {
        Self::new(
            "xdg_wm_base",
            xdg_wm_base::Error::InvalidPositioner as u32,
            reason,
        )
    }

    pub fn xdg_defunct_surfaces() -> Self {
        Self::new(
            "xdg_wm_base",
            xdg_wm_base::Error::DefunctSurfaces as u32,
            "xdg_wm_base destroyed while surfaces still exist",
        )
    }

    pub fn implementation(message: impl Into<String>) -> Self {
        Self::new(
            "wl_display",
            wl_display::Error::Implementation as u32,
            message,
        )
    }

    /// Sends the error; the client is disconnected afterwards.
    pub fn post<I: Resource>(&self, resource: &I) {
        warn!("Protocol error on {}: {}", resource.id(), self);
        resource.post_error(self.code, self.message.clone());
    }
}

impl From<&ParamsError> for ProtocolError {
    fn from(e: &ParamsError) -> Self {
        use zwp_linux_buffer_params_v1::Error;
        let code = match e {
            ParamsError::AlreadyUsed => Error::AlreadyUsed,
            ParamsError::PlaneIdx(_) => Error::PlaneIdx,
            ParamsError::PlaneSet(_) => Error::PlaneSet,
            ParamsError::Incomplete => Error::Incomplete,
            ParamsError::InvalidFormat(_) => Error::InvalidFormat,
            ParamsError::InvalidDimensions(..) => Error::InvalidDimensions,
            ParamsError::OutOfBounds(_) => Error::OutOfBounds,
        };
        Self::new("zwp_linux_buffer_params_v1", code as u32, e.to_string())
    }
}

impl From<&LayerShellError> for ProtocolError {
    fn from(e: &LayerShellError) -> Self {
        use zwlr_layer_shell_v1::Error as ShellError;
        use zwlr_layer_surface_v1::Error as SurfaceError;
        let (interface, code) = match e {
            LayerShellError::Role => (layer_shell::INTERFACE, ShellError::Role as u32),
            LayerShellError::InvalidLayer(_) => {
                (layer_shell::INTERFACE, ShellError::InvalidLayer as u32)
            }
            LayerShellError::AlreadyConstructed => {
                (layer_shell::INTERFACE, ShellError::AlreadyConstructed as u32)
            }
            LayerShellError::InvalidSurfaceState(_) | LayerShellError::UnknownSurface(_) => (
                "zwlr_layer_surface_v1",
                SurfaceError::InvalidSurfaceState as u32,
            ),
            LayerShellError::InvalidSize(..) => {
                ("zwlr_layer_surface_v1", SurfaceError::InvalidSize as u32)
            }
            LayerShellError::InvalidAnchor(_) => {
                ("zwlr_layer_surface_v1", SurfaceError::InvalidAnchor as u32)
            }
            LayerShellError::InvalidKeyboardInteractivity(_) => (
                "zwlr_layer_surface_v1",
                SurfaceError::InvalidKeyboardInteractivity as u32,
            ),
        };
        Self::new(interface, code, e.to_string())
    }
}

impl From<&ViewportError> for ProtocolError {
    fn from(e: &ViewportError) -> Self {
        let (interface, code) = match e {
            ViewportError::ViewportExists => (
                viewporter::INTERFACE,
                wp_viewporter::Error::ViewportExists as u32,
            ),
            ViewportError::BadValue(_) => ("wp_viewport", wp_viewport::Error::BadValue as u32),
            ViewportError::BadSize(_) => ("wp_viewport", wp_viewport::Error::BadSize as u32),
            ViewportError::OutOfBuffer => ("wp_viewport", wp_viewport::Error::OutOfBuffer as u32),
            ViewportError::NoSurface => ("wp_viewport", wp_viewport::Error::NoSurface as u32),
        };
        Self::new(interface, code, e.to_string())
    }
}

impl From<&RoleError> for ProtocolError {
    fn from(e: &RoleError) -> Self {
        match e {
            RoleError::UnknownSurface(_) => Self::new(
                "xdg_wm_base",
                xdg_wm_base::Error::InvalidSurfaceState as u32,
                e.to_string(),
            ),
            RoleError::AlreadyHasRole(_) => Self::new(
                "xdg_surface",
                xdg_surface::Error::AlreadyConstructed as u32,
                e.to_string(),
            ),
            RoleError::RoleMismatch { .. } => {
                Self::new("xdg_wm_base", xdg_wm_base::Error::Role as u32, e.to_string())
            }
        }
    }
}

impl From<&ResourceError> for ProtocolError {
    fn from(e: &ResourceError) -> Self {
        let code = match e {
            ResourceError::UnknownInterface { .. }
            | ResourceError::UnsupportedVersion { .. }
            | ResourceError::IdInUse { .. } => wl_display::Error::InvalidObject,
            ResourceError::AlreadyDestroyed(_) | ResourceError::NotAttached(_) => {
                wl_display::Error::Implementation
            }
        };
        Self::new("wl_display", code as u32, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_codes_follow_upstream_order() {
        assert_eq!(ProtocolError::from(&ParamsError::AlreadyUsed).code, 0);
        assert_eq!(ProtocolError::from(&ParamsError::PlaneIdx(4)).code, 1);
        assert_eq!(ProtocolError::from(&ParamsError::PlaneSet(0)).code, 2);
        assert_eq!(ProtocolError::from(&ParamsError::Incomplete).code, 3);
        assert_eq!(
            ProtocolError::from(&ParamsError::InvalidFormat("0x11223344".into())).code,
            4
        );
        assert_eq!(
            ProtocolError::from(&ParamsError::InvalidDimensions(0, 10)).code,
            5
        );
        assert_eq!(ProtocolError::from(&ParamsError::OutOfBounds(1)).code, 6);
    }

    #[test]
    fn test_layer_errors_pick_the_right_interface() {
        let role = ProtocolError::from(&LayerShellError::Role);
        assert_eq!((role.interface, role.code), ("zwlr_layer_shell_v1", 0));
        let layer = ProtocolError::from(&LayerShellError::InvalidLayer(9));
        assert_eq!((layer.interface, layer.code), ("zwlr_layer_shell_v1", 1));
        let size = ProtocolError::from(&LayerShellError::InvalidSize(0, 20));
        assert_eq!((size.interface, size.code), ("zwlr_layer_surface_v1", 1));
        let anchor = ProtocolError::from(&LayerShellError::InvalidAnchor(0x10));
        assert_eq!((anchor.interface, anchor.code), ("zwlr_layer_surface_v1", 2));
    }

    #[test]
    fn test_viewport_errors() {
        let exists = ProtocolError::from(&ViewportError::ViewportExists);
        assert_eq!((exists.interface, exists.code), ("wp_viewporter", 0));
        let bad = ProtocolError::from(&ViewportError::BadValue("x".into()));
        assert_eq!((bad.interface, bad.code), ("wp_viewport", 0));
        assert_eq!(ProtocolError::from(&ViewportError::OutOfBuffer).code, 2);
        assert_eq!(ProtocolError::from(&ViewportError::NoSurface).code, 3);
    }

    #[test]
    fn test_bind_errors_are_invalid_object() {
        let err = ResourceError::UnsupportedVersion {
            interface: "wp_viewporter".into(),
            requested: 2,
            supported: 1,
        };
        let mapped = ProtocolError::from(&err);
        assert_eq!(mapped.interface, "wl_display");
        assert_eq!(mapped.code, 0);
        assert!(mapped.message.contains("v2"));
    }
}

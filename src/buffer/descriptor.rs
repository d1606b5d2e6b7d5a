//! DMA-BUF buffer descriptors and the params builder
//!
//! Each plane owns its file descriptor through [`OwnedFd`], so an fd is closed
//! exactly once: when the builder is dropped before freezing, when a frozen
//! descriptor is dropped, or when the imported buffer holding it is released.

use super::formats::{fourcc_name, DRM_FORMAT_MOD_INVALID};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use thiserror::Error;

/// Planes per buffer allowed by `zwp_linux_buffer_params_v1`.
pub const MAX_PLANES: usize = 4;

#[derive(Debug)]
pub struct DmabufPlane {
    pub fd: OwnedFd,
    pub offset: u32,
    pub stride: u32,
    /// `None` when the client let the driver choose the layout
    pub modifier: Option<u64>,
}

/// Errors raised while filling or freezing a params object. Each one maps to
/// a `zwp_linux_buffer_params_v1` protocol error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("params object was already used to create a buffer")]
    AlreadyUsed,
    #[error("plane index {0} is out of bounds")]
    PlaneIdx(u32),
    #[error("plane {0} was already set")]
    PlaneSet(u32),
    #[error("missing or too many planes")]
    Incomplete,
    #[error("format {0} is not valid for these planes")]
    InvalidFormat(String),
    #[error("invalid width or height: {0}x{1}")]
    InvalidDimensions(i32, i32),
    #[error("plane {0} offset + stride * height goes out of bounds")]
    OutOfBounds(u32),
}

/// Frozen description of a client buffer.
#[derive(Debug)]
pub struct BufferDescriptor {
    width: i32,
    height: i32,
    format: u32,
    flags: u32,
    planes: Vec<DmabufPlane>,
}

impl BufferDescriptor {
    /// Assembles a descriptor without validation. [`BufferDescriptor::is_valid`]
    /// reports whether the result is usable.
    pub fn from_parts(
        width: i32,
        height: i32,
        format: u32,
        flags: u32,
        planes: Vec<DmabufPlane>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            flags,
            planes,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn planes(&self) -> &[DmabufPlane] {
        &self.planes
    }

    /// The modifier shared by every plane, `None` when the planes carry none.
    pub fn modifier(&self) -> Option<u64> {
        self.planes.first().and_then(|p| p.modifier)
    }

    /// Positive geometry, a non-zero format, at least one plane, and modifiers
    /// either absent on every plane or present and identical on every plane.
    pub fn is_valid(&self) -> bool {
        if self.width <= 0 || self.height <= 0 || self.format == 0 || self.planes.is_empty() {
            return false;
        }
        let first = self.planes[0].modifier;
        self.planes.iter().all(|p| p.modifier == first)
    }

    pub fn into_planes(self) -> Vec<DmabufPlane> {
        self.planes
    }
}

/// Accumulates planes for one `zwp_linux_buffer_params_v1` object.
#[derive(Debug, Default)]
pub struct ParamsBuilder {
    planes: [Option<DmabufPlane>; MAX_PLANES],
    used: bool,
}

impl ParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plane, taking ownership of `fd`. The fd is closed if the plane is
    /// rejected.
    pub fn add_plane(
        &mut self,
        plane_idx: u32,
        fd: OwnedFd,
        offset: u32,
        stride: u32,
        modifier: u64,
    ) -> Result<(), ParamsError> {
        if self.used {
            return Err(ParamsError::AlreadyUsed);
        }
        let slot = self
            .planes
            .get_mut(plane_idx as usize)
            .ok_or(ParamsError::PlaneIdx(plane_idx))?;
        if slot.is_some() {
            return Err(ParamsError::PlaneSet(plane_idx));
        }
        *slot = Some(DmabufPlane {
            fd,
            offset,
            stride,
            modifier: (modifier != DRM_FORMAT_MOD_INVALID).then_some(modifier),
        });
        Ok(())
    }

    /// Adds a plane backed by a duplicate of `fd`; the caller keeps the original.
    pub fn add_plane_dup(
        &mut self,
        plane_idx: u32,
        fd: BorrowedFd<'_>,
        offset: u32,
        stride: u32,
        modifier: u64,
    ) -> Result<(), ParamsError> {
        let owned = fd
            .try_clone_to_owned()
            .map_err(|_| ParamsError::Incomplete)?;
        self.add_plane(plane_idx, owned, offset, stride, modifier)
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn plane_count(&self) -> usize {
        self.planes.iter().filter(|p| p.is_some()).count()
    }

    /// Freezes the accumulated planes into a descriptor. The builder can be
    /// frozen once; later calls fail with [`ParamsError::AlreadyUsed`].
    pub fn freeze(
        &mut self,
        width: i32,
        height: i32,
        format: u32,
        flags: u32,
    ) -> Result<BufferDescriptor, ParamsError> {
        if self.used {
            return Err(ParamsError::AlreadyUsed);
        }
        self.used = true;

        let count = self.plane_count();
        if count == 0 || self.planes[..count].iter().any(Option::is_none) {
            return Err(ParamsError::Incomplete);
        }
        if width <= 0 || height <= 0 {
            return Err(ParamsError::InvalidDimensions(width, height));
        }

        let planes: Vec<DmabufPlane> = self.planes.iter_mut().filter_map(Option::take).collect();

        let modifier = planes[0].modifier;
        if planes.iter().any(|p| p.modifier != modifier) {
            return Err(ParamsError::InvalidFormat(fourcc_name(format)));
        }

        for (idx, plane) in planes.iter().enumerate() {
            let end = (plane.stride as u64)
                .checked_mul(height as u64)
                .and_then(|size| size.checked_add(plane.offset as u64));
            let end = match end {
                Some(end) if end <= u32::MAX as u64 => end,
                _ => return Err(ParamsError::OutOfBounds(idx as u32)),
            };
            if let Some(size) = fd_size(plane.fd.as_fd()) {
                if plane.offset as u64 >= size || (idx == 0 && end > size) {
                    return Err(ParamsError::OutOfBounds(idx as u32));
                }
            }
        }

        Ok(BufferDescriptor {
            width,
            height,
            format,
            flags,
            planes,
        })
    }
}

/// Size of the object behind `fd`, when the kernel reports one.
fn fd_size(fd: BorrowedFd<'_>) -> Option<u64> {
    let raw = fd.as_raw_fd();
    // SAFETY: lseek on a borrowed, open fd; the offset is restored below.
    let size = unsafe { libc::lseek(raw, 0, libc::SEEK_END) };
    if size <= 0 {
        return None;
    }
    // SAFETY: as above.
    unsafe { libc::lseek(raw, 0, libc::SEEK_SET) };
    Some(size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::formats::*;
    use proptest::prelude::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    fn backing_file(len: usize) -> std::fs::File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file
    }

    fn owned(len: usize) -> OwnedFd {
        OwnedFd::from(backing_file(len))
    }

    #[test]
    fn test_freeze_single_plane() {
        let mut builder = ParamsBuilder::new();
        builder
            .add_plane(0, owned(100 * 400), 0, 400, DRM_FORMAT_MOD_LINEAR)
            .unwrap();
        let desc = builder.freeze(100, 100, DRM_FORMAT_ARGB8888, 0).unwrap();
        assert!(desc.is_valid());
        assert_eq!(desc.modifier(), Some(DRM_FORMAT_MOD_LINEAR));
        assert_eq!(desc.planes().len(), 1);
    }

    #[test]
    fn test_second_freeze_is_already_used() {
        let mut builder = ParamsBuilder::new();
        builder.add_plane(0, owned(4096), 0, 16, 0).unwrap();
        builder.freeze(4, 4, DRM_FORMAT_XRGB8888, 0).unwrap();
        assert_eq!(
            builder.freeze(4, 4, DRM_FORMAT_XRGB8888, 0).unwrap_err(),
            ParamsError::AlreadyUsed
        );
        assert_eq!(
            builder.add_plane(1, owned(16), 0, 16, 0).unwrap_err(),
            ParamsError::AlreadyUsed
        );
    }

    #[test]
    fn test_plane_errors() {
        let mut builder = ParamsBuilder::new();
        assert_eq!(
            builder.add_plane(4, owned(16), 0, 4, 0).unwrap_err(),
            ParamsError::PlaneIdx(4)
        );
        builder.add_plane(0, owned(16), 0, 4, 0).unwrap();
        assert_eq!(
            builder.add_plane(0, owned(16), 0, 4, 0).unwrap_err(),
            ParamsError::PlaneSet(0)
        );
    }

    #[test]
    fn test_gap_in_planes_is_incomplete() {
        let mut builder = ParamsBuilder::new();
        builder.add_plane(1, owned(4096), 0, 16, 0).unwrap();
        assert_eq!(
            builder.freeze(4, 4, DRM_FORMAT_NV12, 0).unwrap_err(),
            ParamsError::Incomplete
        );
    }

    #[test]
    fn test_mixed_modifiers_rejected() {
        let mut builder = ParamsBuilder::new();
        builder.add_plane(0, owned(4096), 0, 16, 0).unwrap();
        builder.add_plane(1, owned(4096), 0, 16, 0x0100_0000_0000_0001).unwrap();
        assert!(matches!(
            builder.freeze(4, 4, DRM_FORMAT_NV12, 0),
            Err(ParamsError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_plane_outside_file_is_out_of_bounds() {
        let mut builder = ParamsBuilder::new();
        builder.add_plane(0, owned(64), 0, 400, 0).unwrap();
        assert_eq!(
            builder.freeze(100, 100, DRM_FORMAT_ARGB8888, 0).unwrap_err(),
            ParamsError::OutOfBounds(0)
        );
    }

    #[test]
    fn test_dimensions_checked() {
        let mut builder = ParamsBuilder::new();
        builder.add_plane(0, owned(64), 0, 4, 0).unwrap();
        assert_eq!(
            builder.freeze(0, 4, DRM_FORMAT_ARGB8888, 0).unwrap_err(),
            ParamsError::InvalidDimensions(0, 4)
        );
    }

    #[test]
    fn test_dup_preserves_file_and_fields() {
        let file = backing_file(64 * 64 * 4);
        let mut builder = ParamsBuilder::new();
        builder
            .add_plane_dup(0, file.as_fd(), 0, 256, DRM_FORMAT_MOD_LINEAR)
            .unwrap();
        let desc = builder.freeze(64, 64, DRM_FORMAT_XRGB8888, 1).unwrap();

        assert_eq!(desc.width(), 64);
        assert_eq!(desc.height(), 64);
        assert_eq!(desc.format(), DRM_FORMAT_XRGB8888);
        assert_eq!(desc.flags(), 1);
        let plane = &desc.planes()[0];
        assert_eq!((plane.offset, plane.stride), (0, 256));
        assert_ne!(plane.fd.as_raw_fd(), file.as_raw_fd());

        let original = file.metadata().unwrap();
        let copy = std::fs::File::from(plane.fd.try_clone().unwrap())
            .metadata()
            .unwrap();
        use std::os::unix::fs::MetadataExt;
        assert_eq!(original.ino(), copy.ino());
        assert_eq!(original.dev(), copy.dev());
    }

    #[test]
    fn test_implicit_modifier_is_absent() {
        let mut builder = ParamsBuilder::new();
        builder
            .add_plane(0, owned(64), 0, 16, DRM_FORMAT_MOD_INVALID)
            .unwrap();
        let desc = builder.freeze(4, 4, DRM_FORMAT_ARGB8888, 0).unwrap();
        assert_eq!(desc.modifier(), None);
        assert!(desc.is_valid());
    }

    proptest! {
        #[test]
        fn prop_descriptor_validity(
            width in -4i32..64,
            height in -4i32..64,
            format in prop_oneof![Just(0u32), Just(DRM_FORMAT_ARGB8888), any::<u32>()],
            modifiers in proptest::collection::vec(
                prop_oneof![Just(None), Just(Some(0u64)), Just(Some(7u64))],
                0..4,
            ),
        ) {
            let planes: Vec<DmabufPlane> = modifiers
                .iter()
                .map(|&modifier| DmabufPlane { fd: owned(16), offset: 0, stride: 4, modifier })
                .collect();
            let expected = width > 0
                && height > 0
                && format != 0
                && !modifiers.is_empty()
                && (modifiers.iter().all(Option::is_none)
                    || modifiers.iter().all(|m| *m == modifiers[0] && m.is_some()));
            let desc = BufferDescriptor::from_parts(width, height, format, 0, planes);
            prop_assert_eq!(desc.is_valid(), expected);
        }
    }
}

//! DRM fourcc codes and the negotiated format table.

/// Packs four ASCII characters into a DRM fourcc code.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b'A', b'R', b'2', b'4');
pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b'A', b'B', b'2', b'4');
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b'X', b'B', b'2', b'4');
pub const DRM_FORMAT_NV12: u32 = fourcc(b'N', b'V', b'1', b'2');
pub const DRM_FORMAT_YUV420: u32 = fourcc(b'Y', b'U', b'1', b'2');
pub const DRM_FORMAT_YUYV: u32 = fourcc(b'Y', b'U', b'Y', b'V');

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
/// Sent by clients that let the driver pick the layout.
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// Formats advertised when the GPU cannot be asked.
pub const FALLBACK_FORMATS: [u32; 7] = [
    DRM_FORMAT_ARGB8888,
    DRM_FORMAT_XRGB8888,
    DRM_FORMAT_XBGR8888,
    DRM_FORMAT_ABGR8888,
    DRM_FORMAT_NV12,
    DRM_FORMAT_YUV420,
    DRM_FORMAT_YUYV,
];

/// One negotiated (format, modifier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmabufFormat {
    pub format: u32,
    pub modifier: u64,
    /// Only usable as an external (sampled, non-renderable) image
    pub external_only: bool,
}

impl DmabufFormat {
    pub const fn linear(format: u32) -> Self {
        Self {
            format,
            modifier: DRM_FORMAT_MOD_LINEAR,
            external_only: false,
        }
    }
}

pub fn fallback_table() -> Vec<DmabufFormat> {
    FALLBACK_FORMATS
        .iter()
        .map(|&format| DmabufFormat::linear(format))
        .collect()
}

/// Number of planes a format needs, when known.
pub fn plane_count(format: u32) -> Option<usize> {
    match format {
        DRM_FORMAT_ARGB8888 | DRM_FORMAT_XRGB8888 | DRM_FORMAT_ABGR8888
        | DRM_FORMAT_XBGR8888 | DRM_FORMAT_YUYV => Some(1),
        DRM_FORMAT_NV12 => Some(2),
        DRM_FORMAT_YUV420 => Some(3),
        _ => None,
    }
}

/// Human readable fourcc, e.g. `AR24`, or hex for non-printable codes.
pub fn fourcc_name(format: u32) -> String {
    let bytes = format.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|&b| b as char).collect()
    } else {
        format!("{:#010x}", format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_values() {
        assert_eq!(DRM_FORMAT_ARGB8888, 0x3432_5241);
        assert_eq!(DRM_FORMAT_XRGB8888, 0x3432_5258);
        assert_eq!(DRM_FORMAT_NV12, 0x3231_564e);
    }

    #[test]
    fn test_fourcc_name() {
        assert_eq!(fourcc_name(DRM_FORMAT_ARGB8888), "AR24");
        assert_eq!(fourcc_name(0x0000_0001), "0x00000001");
    }

    #[test]
    fn test_fallback_table_is_linear() {
        let table = fallback_table();
        assert_eq!(table.len(), 7);
        assert!(table.iter().all(|f| f.modifier == DRM_FORMAT_MOD_LINEAR));
        assert!(table.iter().any(|f| f.format == DRM_FORMAT_YUYV));
    }
}

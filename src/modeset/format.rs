//! Pixel formats as four-character codes.

pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

pub const C8: u32 = fourcc(b"C8  ");
pub const RGB332: u32 = fourcc(b"RGB8");
pub const BGR233: u32 = fourcc(b"BGR8");

pub const XRGB1555: u32 = fourcc(b"XR15");
pub const XBGR1555: u32 = fourcc(b"XB15");
pub const RGBX5551: u32 = fourcc(b"RX15");
pub const BGRX5551: u32 = fourcc(b"BX15");
pub const ARGB1555: u32 = fourcc(b"AR15");
pub const ABGR1555: u32 = fourcc(b"AB15");
pub const RGBA5551: u32 = fourcc(b"RA15");
pub const BGRA5551: u32 = fourcc(b"BA15");

pub const RGB565: u32 = fourcc(b"RG16");
pub const BGR565: u32 = fourcc(b"BG16");

pub const RGB888: u32 = fourcc(b"RG24");
pub const BGR888: u32 = fourcc(b"BG24");

pub const XRGB8888: u32 = fourcc(b"XR24");
pub const XBGR8888: u32 = fourcc(b"XB24");
pub const RGBX8888: u32 = fourcc(b"RX24");
pub const BGRX8888: u32 = fourcc(b"BX24");

pub const ARGB8888: u32 = fourcc(b"AR24");
pub const ABGR8888: u32 = fourcc(b"AB24");
pub const RGBA8888: u32 = fourcc(b"RA24");
pub const BGRA8888: u32 = fourcc(b"BA24");

pub const XRGB2101010: u32 = fourcc(b"XR30");
pub const XBGR2101010: u32 = fourcc(b"XB30");
pub const RGBX1010102: u32 = fourcc(b"RX30");
pub const BGRX1010102: u32 = fourcc(b"BX30");
pub const ARGB2101010: u32 = fourcc(b"AR30");
pub const ABGR2101010: u32 = fourcc(b"AB30");
pub const RGBA1010102: u32 = fourcc(b"RA30");
pub const BGRA1010102: u32 = fourcc(b"BA30");

pub const YUV422: u32 = fourcc(b"YU16");
pub const YUV420: u32 = fourcc(b"YU12");

pub const DEFAULT_PLANE_FORMATS: [u32; 6] = [RGB565, RGB888, XRGB8888, ARGB8888, YUV422, YUV420];

/// Picks the format a legacy add-framebuffer request means by its bits per
/// pixel and color depth. Unknown combinations fall back to XRGB8888.
pub fn legacy_fb_format(bpp: u32, depth: u32) -> u32 {
    match (bpp, depth) {
        (8, _) => C8,
        (16, 15) => XRGB1555,
        (16, _) => RGB565,
        (24, _) => RGB888,
        (32, 24) => XRGB8888,
        (32, 30) => XRGB2101010,
        (32, _) => ARGB8888,
        _ => {
            log::debug!("bad bpp {bpp}, assuming XRGB8888");
            XRGB8888
        }
    }
}

/// Returns `(bpp, depth)` of an RGB format, or `None` for formats (such as
/// the YUV ones) that have no single depth.
pub fn bpp_depth(format: u32) -> Option<(u32, u32)> {
    let ret = match format {
        C8 | RGB332 | BGR233 => (8, 8),
        XRGB1555 | XBGR1555 | RGBX5551 | BGRX5551 | ARGB1555 | ABGR1555 | RGBA5551
        | BGRA5551 => (16, 15),
        RGB565 | BGR565 => (16, 16),
        RGB888 | BGR888 => (24, 24),
        XRGB8888 | XBGR8888 | RGBX8888 | BGRX8888 => (32, 24),
        XRGB2101010 | XBGR2101010 | RGBX1010102 | BGRX1010102 | ARGB2101010 | ABGR2101010
        | RGBA1010102 | BGRA1010102 => (32, 30),
        ARGB8888 | ABGR8888 | RGBA8888 | BGRA8888 => (32, 32),
        _ => return None,
    };
    Some(ret)
}

//! X11 screen enumeration for the x11grab demuxer

use std::collections::{BTreeSet, HashMap};

use ffmpeg_next::codec;
use ffmpeg_next::format::Pixel;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::ImageOrder;

use crate::types::{Dim, FrameSpec, VideoFormatExt, VideoSourceKind, VideoSourceProps};

const SCREEN_FRAMERATE: u32 = 30;

/// Map an advertised pixmap format to the pixel format x11grab delivers
fn pixmap_pixfmt(depth: u8, bpp: u8, order: ImageOrder) -> Pixel {
    let le = order == ImageOrder::LSB_FIRST;
    match (depth, bpp) {
        (32, 32) => {
            if le {
                Pixel::BGRA
            } else {
                Pixel::ARGB
            }
        }
        (24, 32) => {
            if le {
                Pixel::BGRZ
            } else {
                Pixel::ZRGB
            }
        }
        (24, 24) => {
            if le {
                Pixel::BGR24
            } else {
                Pixel::RGB24
            }
        }
        (16, 16) => {
            if le {
                Pixel::RGB565LE
            } else {
                Pixel::RGB565BE
            }
        }
        (15, 16) => {
            if le {
                Pixel::RGB555LE
            } else {
                Pixel::RGB555BE
            }
        }
        (8, 8) => Pixel::PAL8,
        _ => Pixel::None,
    }
}

/// One source per screen; each advertised pixmap format that maps to an
/// FFmpeg pixel format contributes a capability entry.
pub(crate) fn detect_x11_sources() -> HashMap<String, VideoSourceProps> {
    debug!("x11 source detection started");

    let mut map = HashMap::new();

    let Ok(display) = std::env::var("DISPLAY") else {
        debug!("no DISPLAY, skipping x11 sources");
        return map;
    };

    let (conn, _) = match x11rb::connect(None) {
        Ok(c) => c,
        Err(e) => {
            warn!("x11 connect failed: {e}");
            return map;
        }
    };

    let setup = conn.setup();
    let order = setup.image_byte_order;

    let pixfmts: Vec<Pixel> = setup
        .pixmap_formats
        .iter()
        .map(|f| pixmap_pixfmt(f.depth, f.bits_per_pixel, order))
        .filter(|p| *p != Pixel::None)
        .collect();

    debug!("x11 screen count: {}", setup.roots.len());

    for (i, screen) in setup.roots.iter().enumerate() {
        let spec = FrameSpec {
            dim: Dim::new(
                u32::from(screen.width_in_pixels),
                u32::from(screen.height_in_pixels),
            ),
            framerates: BTreeSet::from([SCREEN_FRAMERATE]),
        };

        let formats: Vec<_> = pixfmts
            .iter()
            .map(|&pixfmt| VideoFormatExt {
                codec: codec::Id::RAWVIDEO,
                pixfmt,
                frame_specs: vec![spec.clone()],
            })
            .collect();

        if formats.is_empty() {
            continue;
        }

        let props = VideoSourceProps {
            kind: VideoSourceKind::ScreenX11,
            name: format!("screen-{}", i + 1),
            friendly_name: format!("Screen {} capture", i + 1),
            dev: format!("{}.{}", display, i),
            orientation: spec.dim.orientation(),
            formats,
            ..Default::default()
        };

        debug!("x11 source found: {} ({})", props.name, props.dev);
        map.insert(props.name.clone(), props);
    }

    debug!("x11 source detection completed");
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixmap_mapping() {
        assert_eq!(pixmap_pixfmt(24, 32, ImageOrder::LSB_FIRST), Pixel::BGRZ);
        assert_eq!(pixmap_pixfmt(24, 32, ImageOrder::MSB_FIRST), Pixel::ZRGB);
        assert_eq!(pixmap_pixfmt(32, 32, ImageOrder::LSB_FIRST), Pixel::BGRA);
        assert_eq!(pixmap_pixfmt(12, 16, ImageOrder::LSB_FIRST), Pixel::None);
    }
}

//! V4L2 camera and M2M encoder enumeration

use std::collections::{BTreeSet, HashMap};

use ffmpeg_next::codec;
use ffmpeg_next::format::Pixel;
use tracing::{debug, trace};
use v4l::capability::Flags;
use v4l::video::{Capture, Output};
use v4l::Device;
use v4l::FourCC;

use crate::pipeline::encoder::nice_pixfmt;
use crate::types::{
    short_hash, Dim, FrameSpec, SensorDirection, V4l2EncoderProps, VideoFormat, VideoFormatExt,
    VideoSourceKind, VideoSourceProps,
};

/// Map a V4L2 fourcc to the codec FFmpeg would assign it
fn fourcc_codec(fourcc: FourCC) -> codec::Id {
    match &fourcc.repr {
        b"H264" => codec::Id::H264,
        b"YUYV" | b"UYVY" | b"NV12" | b"NV21" | b"YU12" | b"422P" | b"GREY" | b"RGB3"
        | b"BGR3" | b"BGR4" | b"RGB4" => codec::Id::RAWVIDEO,
        _ => codec::Id::None,
    }
}

/// Map a raw V4L2 fourcc to an FFmpeg pixel format
fn fourcc_pixfmt(fourcc: FourCC) -> Pixel {
    match &fourcc.repr {
        b"YUYV" => Pixel::YUYV422,
        b"UYVY" => Pixel::UYVY422,
        b"NV12" => Pixel::NV12,
        b"NV21" => Pixel::NV21,
        b"YU12" => Pixel::YUV420P,
        b"422P" => Pixel::YUV422P,
        b"GREY" => Pixel::GRAY8,
        b"RGB3" => Pixel::RGB24,
        b"BGR3" => Pixel::BGR24,
        b"BGR4" => Pixel::BGRA,
        b"RGB4" => Pixel::ARGB,
        b"H264" => Pixel::YUV420P,
        _ => Pixel::None,
    }
}

fn might_be_camera(flags: Flags) -> bool {
    flags.contains(Flags::VIDEO_CAPTURE) || flags.contains(Flags::VIDEO_CAPTURE_MPLANE)
}

fn might_be_m2m_encoder(flags: Flags) -> bool {
    !might_be_camera(flags)
        && (flags.contains(Flags::VIDEO_M2M) || flags.contains(Flags::VIDEO_M2M_MPLANE))
}

/// Sensor direction derived from the card string; most UVC devices do
/// not expose one.
fn direction_from_card(card: &str) -> SensorDirection {
    let lower = card.to_lowercase();
    if lower.contains("front") {
        SensorDirection::Front
    } else if lower.contains("back") || lower.contains("rear") {
        SensorDirection::Back
    } else {
        SensorDirection::Unknown
    }
}

fn frame_specs(dev: &Device, fourcc: FourCC) -> Vec<FrameSpec> {
    let mut specs = Vec::new();

    let Ok(sizes) = Capture::enum_framesizes(dev, fourcc) else {
        return specs;
    };

    for size in sizes {
        // stepwise ranges are not enumerable as capability tuples
        let v4l::framesize::FrameSizeEnum::Discrete(discrete) = size.size else {
            continue;
        };

        let mut framerates = BTreeSet::new();
        if let Ok(intervals) =
            Capture::enum_frameintervals(dev, fourcc, discrete.width, discrete.height)
        {
            for fi in intervals {
                if let v4l::frameinterval::FrameIntervalEnum::Discrete(f) = fi.interval {
                    if f.numerator == 1 {
                        framerates.insert(f.denominator);
                    }
                }
            }
        }
        if !framerates.is_empty() {
            specs.push(FrameSpec {
                dim: Dim::new(discrete.width, discrete.height),
                framerates,
            });
        }
    }

    // Largest frame size first; the head of the list is what gets chosen.
    specs.sort_by(|a, b| b.dim.cmp(&a.dim));
    specs
}

fn capture_formats(dev: &Device, only_nice: bool) -> (Vec<VideoFormatExt>, Vec<VideoFormatExt>) {
    let mut raw = Vec::new();
    let mut compressed = Vec::new();

    let Ok(descriptions) = Capture::enum_formats(dev) else {
        return (raw, compressed);
    };

    for desc in descriptions {
        let codec_id = fourcc_codec(desc.fourcc);
        if codec_id == codec::Id::None {
            trace!("skipping v4l2 format: {}", desc.fourcc);
            continue;
        }

        let pixfmt = fourcc_pixfmt(desc.fourcc);
        if pixfmt == Pixel::None {
            continue;
        }

        let specs = frame_specs(dev, desc.fourcc);
        if specs.is_empty() {
            continue;
        }

        let format = VideoFormatExt {
            codec: codec_id,
            pixfmt,
            frame_specs: specs,
        };

        if codec_id == codec::Id::H264 {
            compressed.push(format);
        } else if !only_nice || nice_pixfmt(pixfmt) {
            raw.push(format);
        }
    }

    (raw, compressed)
}

/// Enumerate cameras; one source per physical device (deduplicated by
/// bus info), plus a separate compressed source for devices that can
/// deliver H.264 directly.
pub(crate) fn detect_v4l2_sources(only_nice: bool) -> HashMap<String, VideoSourceProps> {
    debug!("v4l2 source detection started");

    // bus info => props, so multi-node devices collapse into one entry
    let mut cards: HashMap<String, VideoSourceProps> = HashMap::new();
    let mut compressed_cards: HashMap<String, VideoSourceProps> = HashMap::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_path_buf();
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !might_be_camera(caps.capabilities) {
            continue;
        }

        debug!(
            "found v4l2 dev: file={}, card={}, caps={:?}",
            path.display(),
            caps.card,
            caps.capabilities
        );

        let (raw, compressed) = capture_formats(&dev, only_nice);
        let direction = direction_from_card(&caps.card);

        if !raw.is_empty() && !cards.contains_key(&caps.bus) {
            let props = VideoSourceProps {
                kind: VideoSourceKind::CamRaw,
                name: format!("cam-{:03}", short_hash(&caps.card)),
                friendly_name: caps.card.clone(),
                dev: path.display().to_string(),
                orientation: raw[0].frame_specs[0].dim.orientation(),
                sensor_direction: direction,
                formats: raw,
                ..Default::default()
            };
            debug!("v4l2 source found: {} ({})", props.name, props.friendly_name);
            cards.insert(caps.bus.clone(), props);
        }

        if !compressed.is_empty() && !compressed_cards.contains_key(&caps.bus) {
            let name = match direction {
                SensorDirection::Front => "front".to_string(),
                SensorDirection::Back => "back".to_string(),
                SensorDirection::Unknown => format!("camh-{:03}", short_hash(&caps.card)),
            };
            let props = VideoSourceProps {
                kind: VideoSourceKind::CamH264,
                name,
                friendly_name: format!("{} (H.264)", caps.card),
                dev: path.display().to_string(),
                orientation: compressed[0].frame_specs[0].dim.orientation(),
                sensor_direction: direction,
                formats: compressed,
                ..Default::default()
            };
            debug!("v4l2 h264 source found: {}", props.name);
            compressed_cards.insert(caps.bus, props);
        }
    }

    let mut sources: HashMap<String, VideoSourceProps> = HashMap::new();
    for props in cards.into_values().chain(compressed_cards.into_values()) {
        sources.entry(props.name.clone()).or_insert(props);
    }

    debug!("v4l2 source detection completed: {} sources", sources.len());
    sources
}

/// Enumerate V4L2 memory-to-memory devices that encode to H.264
pub(crate) fn detect_v4l2_encoders() -> Vec<V4l2EncoderProps> {
    debug!("v4l2 encoder detection started");

    let mut encoders = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_path_buf();
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !might_be_m2m_encoder(caps.capabilities) {
            continue;
        }

        // The CAPTURE queue must produce H.264, otherwise this M2M device
        // is a scaler or a decoder.
        let produces_h264 = Capture::enum_formats(&dev)
            .map(|fmts| fmts.iter().any(|f| fourcc_codec(f.fourcc) == codec::Id::H264))
            .unwrap_or(false);
        if !produces_h264 {
            debug!("v4l2 m2m device does not produce h264: {}", path.display());
            continue;
        }

        let mut formats = Vec::new();
        if let Ok(fmts) = Output::enum_formats(&dev) {
            for f in fmts {
                let codec_id = fourcc_codec(f.fourcc);
                let pixfmt = fourcc_pixfmt(f.fourcc);
                if codec_id == codec::Id::RAWVIDEO && pixfmt != Pixel::None {
                    formats.push(VideoFormat {
                        codec: codec_id,
                        pixfmt,
                    });
                }
            }
        }

        if !formats.is_empty() {
            debug!("found v4l2 encoder: {}", path.display());
            encoders.push(V4l2EncoderProps {
                dev: path.display().to_string(),
                formats,
            });
        }
    }

    debug!("v4l2 encoder detection completed: {} encoders", encoders.len());
    encoders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(fourcc_codec(FourCC::new(b"YUYV")), codec::Id::RAWVIDEO);
        assert_eq!(fourcc_codec(FourCC::new(b"H264")), codec::Id::H264);
        assert_eq!(fourcc_codec(FourCC::new(b"JPEG")), codec::Id::None);
        assert_eq!(fourcc_pixfmt(FourCC::new(b"NV12")), Pixel::NV12);
    }

    #[test]
    fn test_direction_from_card() {
        assert_eq!(
            direction_from_card("Front Camera: Integrated"),
            SensorDirection::Front
        );
        assert_eq!(direction_from_card("Rear module"), SensorDirection::Back);
        assert_eq!(
            direction_from_card("HD Webcam C920"),
            SensorDirection::Unknown
        );
    }
}

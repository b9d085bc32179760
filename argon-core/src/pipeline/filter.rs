//! Video filter graphs
//!
//! Three filtering families: plain scale, scale plus vertical flip, and
//! a 16:9 letterbox with eight rotation/flip variants. A graph per
//! variant is built up front; the muxing thread picks one per frame.

use std::collections::HashMap;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::{filter, frame};
use tracing::debug;

use crate::error::{ArgonError, Result};
use crate::types::{Dim, VideoScale, VideoTrans};

/// Output dimension from the input dimension, transform and scale
/// factor. Both axes are rounded down to even; a zero result is a
/// configuration error surfaced by the caller.
pub(crate) fn compute_trans_dim(dim: Dim, trans: VideoTrans, scale: VideoScale) -> Dim {
    let factor = scale.factor();

    let mut out = if trans.is_frame169() {
        let height = (f64::from(dim.width.max(dim.height)) * factor).ceil() as u32;
        let width = ((16.0 / 9.0) * f64::from(height)).ceil() as u32;
        Dim::new(width, height)
    } else {
        Dim::new(
            (f64::from(dim.width) * factor).ceil() as u32,
            (f64::from(dim.height) * factor).ceil() as u32,
        )
    };

    out.width -= out.width % 2;
    out.height -= out.height % 2;

    // rounding must never collapse an axis to zero
    out.width = out.width.max(2);
    out.height = out.height.max(2);

    debug!("dim change: {dim} => {out} (thin={})", dim.thin());

    out
}

/// Letterbox filter specs; `{0}` is the output width, `{1}` the height.
/// Thin (portrait) inputs scale by height, wide inputs differ on the
/// transposed variants.
fn frame169_spec(trans: VideoTrans, thin: bool) -> Option<&'static str> {
    let spec = if thin {
        match trans {
            VideoTrans::Frame169 => {
                "scale=h={1}:w=-1,pad=width={0}:height={1}:x=-1:y=-2:color=black"
            }
            VideoTrans::Frame169Rot90 => {
                "transpose=dir=cclock,scale=h=-1:w={0},pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169Rot180 => {
                "scale=h={1}:w=-1,vflip,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169Rot270 => {
                "transpose=dir=clock,scale=h=-1:w={0},pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169Vflip => {
                "scale=h={1}:w=-1,vflip,pad=width={0}:height={1}:x=-1:y=-2:color=black"
            }
            VideoTrans::Frame169VflipRot90 => {
                "transpose=dir=cclock_flip,scale=h=-1:w={0},pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169VflipRot180 => {
                "scale=h={1}:w=-1,hflip,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169VflipRot270 => {
                "transpose=dir=clock_flip,scale=h=-1:w={0},pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            _ => return None,
        }
    } else {
        match trans {
            VideoTrans::Frame169 => {
                "scale=h={1}:w=-1,pad=width={0}:height={1}:x=-1:y=-2:color=black"
            }
            VideoTrans::Frame169Rot90 => {
                "transpose=dir=cclock,scale=h={1}:w=-1,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169Rot180 => {
                "scale=h={1}:w=-1,vflip,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169Rot270 => {
                "transpose=dir=clock,scale=h={1}:w=-1,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169Vflip => {
                "scale=h={1}:w=-1,vflip,pad=width={0}:height={1}:x=-1:y=-2:color=black"
            }
            VideoTrans::Frame169VflipRot90 => {
                "transpose=dir=cclock_flip,scale=h={1}:w=-1,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169VflipRot180 => {
                "scale=h={1}:w=-1,hflip,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            VideoTrans::Frame169VflipRot270 => {
                "transpose=dir=clock_flip,scale=h={1}:w=-1,pad=width={0}:height={1}:x=-1:y=-1:color=black"
            }
            _ => return None,
        }
    };

    Some(spec)
}

fn fill_spec(spec: &str, out: Dim) -> String {
    spec.replace("{0}", &out.width.to_string())
        .replace("{1}", &out.height.to_string())
}

pub(crate) struct FilterParams {
    pub in_dim: Dim,
    pub in_pixfmt: Pixel,
    pub out_dim: Dim,
    pub out_pixfmt: Pixel,
    pub framerate: i32,
}

fn build_graph(params: &FilterParams, spec: &str) -> Result<filter::Graph> {
    debug!("initing av filter: {spec}");

    let in_name = params
        .in_pixfmt
        .descriptor()
        .map(|d| d.name())
        .ok_or_else(|| ArgonError::av("input pixfmt has no descriptor"))?;

    let mut graph = filter::Graph::new();

    let args = format!(
        "video_size={}x{}:pix_fmt={}:time_base=1/{}:pixel_aspect=1/1",
        params.in_dim.width, params.in_dim.height, in_name, params.framerate
    );

    let buffer =
        filter::find("buffer").ok_or_else(|| ArgonError::av("no buffer filter"))?;
    graph.add(&buffer, "in", &args)?;

    let buffersink =
        filter::find("buffersink").ok_or_else(|| ArgonError::av("no buffersink filter"))?;
    graph.add(&buffersink, "out", "")?;

    {
        let mut sink = graph
            .get("out")
            .ok_or_else(|| ArgonError::av("no sink in graph"))?;
        sink.set_pixel_format(params.out_pixfmt);
    }

    graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
    graph.validate()?;

    debug!("av filter successfully inited");

    Ok(graph)
}

/// Build all graphs a transform family needs
pub(crate) fn build_filters(
    trans: VideoTrans,
    params: &FilterParams,
) -> Result<HashMap<VideoTrans, filter::Graph>> {
    let mut map = HashMap::new();

    match trans {
        VideoTrans::Off => {}
        VideoTrans::Scale | VideoTrans::Vflip => {
            let scale = fill_spec("scale=h={1}:w={0}", params.out_dim);
            let vflip = fill_spec("scale=h={1}:w={0},vflip", params.out_dim);
            map.insert(VideoTrans::Scale, build_graph(params, &scale)?);
            map.insert(VideoTrans::Vflip, build_graph(params, &vflip)?);
        }
        _ => {
            let thin = params.in_dim.thin();
            for variant in [
                VideoTrans::Frame169,
                VideoTrans::Frame169Rot90,
                VideoTrans::Frame169Rot180,
                VideoTrans::Frame169Rot270,
                VideoTrans::Frame169Vflip,
                VideoTrans::Frame169VflipRot90,
                VideoTrans::Frame169VflipRot180,
                VideoTrans::Frame169VflipRot270,
            ] {
                let spec = frame169_spec(variant, thin).expect("letterbox variant");
                map.insert(
                    variant,
                    build_graph(params, &fill_spec(spec, params.out_dim))?,
                );
            }
        }
    }

    Ok(map)
}

/// Run one frame through a graph; `Ok(false)` when the sink has no
/// output yet
pub(crate) fn run_graph(
    graph: &mut filter::Graph,
    frame_in: &frame::Video,
    frame_out: &mut frame::Video,
) -> Result<bool> {
    graph
        .get("in")
        .ok_or_else(|| ArgonError::av("no source in graph"))?
        .source()
        .add(frame_in)?;

    let mut sink = graph
        .get("out")
        .ok_or_else(|| ArgonError::av("no sink in graph"))?;
    match sink.sink().frame(frame_out) {
        Ok(()) => Ok(true),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
            Ok(false)
        }
        Err(ffmpeg_next::Error::Eof) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_dim_rounds_down_to_even() {
        let out = compute_trans_dim(Dim::new(1281, 721), VideoTrans::Scale, VideoScale::Off);
        assert_eq!(out, Dim::new(1280, 720));
    }

    #[test]
    fn test_down75_yields_2x2_for_4_wide() {
        let out = compute_trans_dim(Dim::new(4, 4), VideoTrans::Scale, VideoScale::Down75);
        assert_eq!(out, Dim::new(2, 2));
    }

    #[test]
    fn test_frame169_dim() {
        let out = compute_trans_dim(Dim::new(720, 1280), VideoTrans::Frame169, VideoScale::Off);
        assert_eq!(out.height, 1280);
        // ceil(16/9 * 1280) = 2276 -> even
        assert_eq!(out.width, 2276);
    }

    #[test]
    fn test_frame169_down50() {
        let out = compute_trans_dim(
            Dim::new(720, 1280),
            VideoTrans::Frame169,
            VideoScale::Down50,
        );
        assert_eq!(out.height, 640);
        assert_eq!(out.width, 1138);
    }

    #[test]
    fn test_all_letterbox_variants_have_specs() {
        for thin in [true, false] {
            for variant in [
                VideoTrans::Frame169,
                VideoTrans::Frame169Rot90,
                VideoTrans::Frame169Rot180,
                VideoTrans::Frame169Rot270,
                VideoTrans::Frame169Vflip,
                VideoTrans::Frame169VflipRot90,
                VideoTrans::Frame169VflipRot180,
                VideoTrans::Frame169VflipRot270,
            ] {
                let spec = frame169_spec(variant, thin).unwrap();
                assert!(spec.contains("pad="), "{variant:?}");
            }
        }
        assert!(frame169_spec(VideoTrans::Scale, true).is_none());
    }

    #[test]
    fn test_fill_spec() {
        assert_eq!(
            fill_spec("scale=h={1}:w={0}", Dim::new(1280, 720)),
            "scale=h=720:w=1280"
        );
    }
}

//! Encoder selection and opening
//!
//! Video: H.264 through one of three encoders, auto-resolved in the
//! order hardware M2M, NVENC, CPU. The source capability whose pixel
//! format best matches the encoder is chosen, preferring the curated
//! "nice" formats that survive every consumer.
//!
//! Audio: AAC for the video containers, LAME for MP3 streams.

use ffmpeg_next::format::{Pixel, Sample};
use ffmpeg_next::{codec, encoder, ffi, ChannelLayout, Dictionary, Rational};
use tracing::{debug, warn};

use super::filter::compute_trans_dim;
use crate::error::{ArgonError, Result};
use crate::types::{
    AudioSourceProps, Dim, StreamFormat, V4l2EncoderProps, VideoEncoderKind, VideoSourceProps,
};

/// Commonly-supported 8-bit YUV formats preferred for broad
/// compatibility
const NICE_PIXFMTS: [Pixel; 7] = [
    Pixel::YUV420P,
    Pixel::YUVJ420P,
    Pixel::NV12,
    Pixel::NV21,
    Pixel::YUV422P,
    Pixel::YUVJ422P,
    Pixel::YUV444P,
];

pub(crate) fn nice_pixfmt(fmt: Pixel) -> bool {
    NICE_PIXFMTS.contains(&fmt)
}

/// An opened video encoder with the source capability it was matched to
pub(crate) struct OpenVideoEncoder {
    pub encoder: encoder::Video,
    pub kind: VideoEncoderKind,
    /// Index into `props.formats` of the chosen capability
    pub format_index: usize,
    pub in_dim: Dim,
    pub in_pixfmt: Pixel,
    pub out_dim: Dim,
    pub framerate: i32,
}

fn encoder_pixfmts(video_codec: &codec::Video) -> Result<Vec<Pixel>> {
    let formats: Vec<Pixel> = video_codec
        .formats()
        .map(|it| it.collect())
        .unwrap_or_default();
    if formats.is_empty() {
        return Err(ArgonError::av("encoder does not support any pixfmts"));
    }
    Ok(formats)
}

/// Prefer a nice pixfmt the encoder supports that the source also
/// delivers; fall back to FFmpeg's conversion-cost choice fixed up to a
/// nice format where possible.
fn best_video_format(
    encoder_fmts: &[Pixel],
    props: &VideoSourceProps,
) -> (usize, Pixel) {
    if let Some(idx) = props
        .formats
        .iter()
        .position(|sf| nice_pixfmt(sf.pixfmt) && encoder_fmts.contains(&sf.pixfmt))
    {
        debug!("pixfmt exact match: {:?}", props.formats[idx].pixfmt);
        return (idx, props.formats[idx].pixfmt);
    }

    let source_fmt = props.formats[0].pixfmt;
    let candidate = find_best_pixfmt(encoder_fmts, source_fmt);
    (0, fix_pixfmt(candidate, encoder_fmts))
}

/// `avcodec_find_best_pix_fmt_of_list` over the encoder's formats
fn find_best_pixfmt(encoder_fmts: &[Pixel], source_fmt: Pixel) -> Pixel {
    let mut list: Vec<ffi::AVPixelFormat> = encoder_fmts
        .iter()
        .map(|&p| ffi::AVPixelFormat::from(p))
        .collect();
    list.push(ffi::AVPixelFormat::AV_PIX_FMT_NONE);

    unsafe {
        ffi::avcodec_find_best_pix_fmt_of_list(
            list.as_ptr(),
            ffi::AVPixelFormat::from(source_fmt),
            0,
            std::ptr::null_mut(),
        )
        .into()
    }
}

fn fix_pixfmt(fmt: Pixel, encoder_fmts: &[Pixel]) -> Pixel {
    if nice_pixfmt(fmt) {
        return fmt;
    }

    match encoder_fmts.iter().find(|&&f| nice_pixfmt(f)) {
        Some(&nice) => {
            debug!("changing encoder pixfmt to nice one: {fmt:?} => {nice:?}");
            nice
        }
        None => {
            warn!("encoder does not support any nice pixfmt");
            fmt
        }
    }
}

/// Match source capabilities against the hardware encoder's accepted
/// input formats
fn best_video_format_for_v4l2(
    props: &VideoSourceProps,
    encoders: &[V4l2EncoderProps],
) -> Result<(usize, Pixel)> {
    if encoders.is_empty() {
        return Err(ArgonError::av("no v4l2 encoder"));
    }

    if let Some(idx) = props.formats.iter().position(|sf| {
        encoders.iter().any(|e| {
            e.formats
                .iter()
                .any(|ef| ef.codec == sf.codec && ef.pixfmt == sf.pixfmt)
        })
    }) {
        debug!("v4l2 pixfmt exact match");
        return Ok((idx, props.formats[idx].pixfmt));
    }

    Ok((0, encoders[0].formats[0].pixfmt))
}

/// Low-latency open options per encoder
fn video_encoder_opts(kind: VideoEncoderKind) -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    match kind {
        VideoEncoderKind::Nvenc => {
            opts.set("preset", "p1");
            opts.set("tune", "ull");
            opts.set("zerolatency", "1");
            opts.set("rc", "constqp");
        }
        VideoEncoderKind::X264 => {
            opts.set("preset", "ultrafast");
            opts.set("tune", "zerolatency");
        }
        VideoEncoderKind::V4l2 | VideoEncoderKind::Auto => {}
    }
    opts
}

fn open_video_encoder_kind(
    kind: VideoEncoderKind,
    props: &VideoSourceProps,
    v4l2_encoders: &[V4l2EncoderProps],
) -> Result<OpenVideoEncoder> {
    let name = kind
        .av_name()
        .ok_or_else(|| ArgonError::av("invalid video encoder"))?;

    debug!("initing video encoder: {name}");

    let ffcodec =
        encoder::find_by_name(name).ok_or_else(|| ArgonError::av(format!("no {name} encoder")))?;

    let (format_index, out_pixfmt) = if kind == VideoEncoderKind::V4l2 {
        best_video_format_for_v4l2(props, v4l2_encoders)?
    } else {
        let video_codec = ffcodec
            .video()
            .map_err(|_| ArgonError::av("encoder is not a video codec"))?;
        best_video_format(&encoder_pixfmts(&video_codec)?, props)
    };

    if out_pixfmt == Pixel::None {
        return Err(ArgonError::av("failed to find pixfmt for video encoder"));
    }

    let chosen = &props.formats[format_index];
    let spec = &chosen.frame_specs[0];
    let framerate = *spec
        .framerates
        .iter()
        .next()
        .ok_or_else(|| ArgonError::av("no framerate for video source"))? as i32;

    let in_dim = spec.dim;
    let out_dim = compute_trans_dim(in_dim, props.trans, props.scale);

    let mut enc = codec::context::Context::new_with_codec(ffcodec)
        .encoder()
        .video()?;

    enc.set_width(out_dim.width);
    enc.set_height(out_dim.height);
    enc.set_format(out_pixfmt);
    enc.set_time_base(Rational(1, framerate));
    enc.set_frame_rate(Some(Rational(framerate, 1)));

    let encoder = enc.open_with(video_encoder_opts(kind))?;

    debug!(
        "video encoder: pixfmt={out_pixfmt:?}, out={out_dim}, in={in_dim}, framerate={framerate}"
    );

    Ok(OpenVideoEncoder {
        encoder,
        kind,
        format_index,
        in_dim,
        in_pixfmt: chosen.pixfmt,
        out_dim,
        framerate,
    })
}

/// Open the requested encoder, or resolve `Auto` by trying hardware
/// M2M, NVENC and the CPU encoder in that order
pub(crate) fn open_video_encoder(
    requested: VideoEncoderKind,
    props: &VideoSourceProps,
    v4l2_encoders: &[V4l2EncoderProps],
) -> Result<OpenVideoEncoder> {
    if requested != VideoEncoderKind::Auto {
        return open_video_encoder_kind(requested, props, v4l2_encoders);
    }

    for kind in [
        VideoEncoderKind::V4l2,
        VideoEncoderKind::Nvenc,
        VideoEncoderKind::X264,
    ] {
        match open_video_encoder_kind(kind, props, v4l2_encoders) {
            Ok(open) => return Ok(open),
            Err(e) => warn!("failed to init {kind} encoder: {e}"),
        }
    }

    Err(ArgonError::av("no usable video encoder"))
}

/// Pick the encoder sample format, preferring an exact match with what
/// the PCM decoder produces
fn best_audio_sample_format(
    encoder_codec: &codec::Audio,
    decoder_codec: &codec::Audio,
) -> Result<Sample> {
    let encoder_fmts: Vec<Sample> = encoder_codec
        .formats()
        .map(|it| it.collect())
        .unwrap_or_default();
    if encoder_fmts.is_empty() {
        return Err(ArgonError::av(
            "audio encoder does not support any sample fmts",
        ));
    }

    let decoder_first = decoder_codec
        .formats()
        .and_then(|mut it| it.next())
        .ok_or_else(|| ArgonError::av("audio decoder does not support any sample fmts"))?;

    let mut best = encoder_fmts[0];
    for fmt in encoder_fmts {
        best = fmt;
        if best == decoder_first {
            debug!("sample fmt exact match");
            break;
        }
    }

    Ok(best)
}

/// FFmpeg encoder name for the stream format's audio codec
pub(crate) fn audio_encoder_name(format: StreamFormat) -> &'static str {
    match format {
        StreamFormat::Mp3 => "libmp3lame",
        StreamFormat::Mp4 | StreamFormat::MpegTs => "aac",
    }
}

/// Open the audio encoder matched to the source's sample spec
pub(crate) fn open_audio_encoder(
    format: StreamFormat,
    props: &AudioSourceProps,
) -> Result<encoder::Audio> {
    let name = audio_encoder_name(format);
    debug!("initing audio encoder: {name}");

    let ffcodec =
        encoder::find_by_name(name).ok_or_else(|| ArgonError::av(format!("no {name} encoder")))?;
    let decoder_codec = ffmpeg_next::decoder::find(props.codec)
        .ok_or_else(|| ArgonError::av(format!("no audio decoder for {:?}", props.codec)))?;

    let sample_fmt = best_audio_sample_format(
        &ffcodec
            .audio()
            .map_err(|_| ArgonError::av("encoder is not an audio codec"))?,
        &decoder_codec
            .audio()
            .map_err(|_| ArgonError::av("decoder is not an audio codec"))?,
    )?;

    debug!("audio encoder sample fmt: {sample_fmt:?}");

    let mut enc = codec::context::Context::new_with_codec(ffcodec)
        .encoder()
        .audio()?;

    enc.set_rate(props.rate as i32);
    enc.set_format(sample_fmt);
    enc.set_channel_layout(ChannelLayout::default(i32::from(props.channels)));
    enc.set_time_base(Rational(1, props.rate as i32));

    let mut opts = Dictionary::new();
    match format {
        StreamFormat::Mp3 => {
            opts.set("b", "128k");
            opts.set("compression_level", "9");
        }
        StreamFormat::Mp4 | StreamFormat::MpegTs => {
            opts.set("aac_coder", "fast");
        }
    }

    Ok(enc.open_with(opts)?)
}

/// Open the PCM decoder for the source's sample spec
pub(crate) fn open_audio_decoder(props: &AudioSourceProps) -> Result<ffmpeg_next::decoder::Audio> {
    debug!("initing audio decoder");

    let ffcodec = ffmpeg_next::decoder::find(props.codec)
        .ok_or_else(|| ArgonError::av(format!("no audio decoder for {:?}", props.codec)))?;

    let first_fmt = ffcodec
        .audio()
        .map_err(|_| ArgonError::av("decoder is not an audio codec"))?
        .formats()
        .and_then(|mut it| it.next())
        .ok_or_else(|| ArgonError::av("audio decoder does not support any sample fmts"))?;

    let ctx = codec::context::Context::new_with_codec(ffcodec);
    // SAFETY: rust-ffmpeg exposes no setters for decoder input parameters;
    // the context was just allocated and is exclusively ours.
    unsafe {
        let ptr = ctx.as_ptr() as *mut ffi::AVCodecContext;
        ffi::av_channel_layout_default(&mut (*ptr).ch_layout, i32::from(props.channels));
        (*ptr).sample_rate = props.rate as i32;
        (*ptr).sample_fmt = ffi::AVSampleFormat::from(first_fmt);
        (*ptr).time_base = ffi::AVRational {
            num: 1,
            den: props.rate as i32,
        };
    }

    Ok(ctx.decoder().audio()?)
}

/// Open the raw-video decoder for buffer-fed sources
pub(crate) fn open_raw_video_decoder(
    pixfmt: Pixel,
    dim: Dim,
    framerate: i32,
) -> Result<ffmpeg_next::decoder::Video> {
    let ffcodec = ffmpeg_next::decoder::find(codec::Id::RAWVIDEO)
        .ok_or_else(|| ArgonError::av("no rawvideo decoder"))?;

    let ctx = codec::context::Context::new_with_codec(ffcodec);
    // SAFETY: as in `open_audio_decoder` - raw input parameters have no
    // safe setters on a decoder context.
    unsafe {
        let ptr = ctx.as_ptr() as *mut ffi::AVCodecContext;
        (*ptr).pix_fmt = ffi::AVPixelFormat::from(pixfmt);
        (*ptr).width = dim.width as i32;
        (*ptr).height = dim.height as i32;
        (*ptr).time_base = ffi::AVRational {
            num: 1,
            den: framerate,
        };
    }

    Ok(ctx.decoder().video()?)
}

/// Bytes of one raw frame as the decoder consumes it
pub(crate) fn raw_frame_size(pixfmt: Pixel, dim: Dim) -> usize {
    unsafe {
        let size = ffi::av_image_get_buffer_size(
            ffi::AVPixelFormat::from(pixfmt),
            dim.width as i32,
            dim.height as i32,
            32,
        );
        size.max(0) as usize
    }
}

/// Bytes of raw input samples backing one encoder frame
pub(crate) fn audio_frame_bytes(channels: u8, nb_samples: i32, sample_fmt: Sample) -> usize {
    unsafe {
        let size = ffi::av_samples_get_buffer_size(
            std::ptr::null_mut(),
            i32::from(channels),
            nb_samples,
            ffi::AVSampleFormat::from(sample_fmt),
            0,
        );
        size.max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nice_pixfmts() {
        assert!(nice_pixfmt(Pixel::YUV420P));
        assert!(nice_pixfmt(Pixel::NV12));
        assert!(!nice_pixfmt(Pixel::RGB24));
        assert!(!nice_pixfmt(Pixel::YUV420P10LE));
    }

    #[test]
    fn test_audio_encoder_names() {
        assert_eq!(audio_encoder_name(StreamFormat::Mp4), "aac");
        assert_eq!(audio_encoder_name(StreamFormat::MpegTs), "aac");
        assert_eq!(audio_encoder_name(StreamFormat::Mp3), "libmp3lame");
    }

    #[test]
    fn test_fix_pixfmt_prefers_nice() {
        let fmts = [Pixel::RGB24, Pixel::NV12, Pixel::YUV420P];
        assert_eq!(fix_pixfmt(Pixel::RGB24, &fmts), Pixel::NV12);
        assert_eq!(fix_pixfmt(Pixel::YUV420P, &fmts), Pixel::YUV420P);
    }

    #[test]
    fn test_fix_pixfmt_without_nice_option() {
        let fmts = [Pixel::RGB24, Pixel::BGRA];
        assert_eq!(fix_pixfmt(Pixel::RGB24, &fmts), Pixel::RGB24);
    }
}

//! The capture-to-container dataflow
//!
//! ```text
//! raw-video-in -> decoder -> [filter graph] -> encoder -> muxer
//! raw-audio-in -> decoder -> [resampler]   -> encoder -> muxer
//! ```
//!
//! Built once per caster session. The muxing thread drives
//! [`AvPipeline::mux_video`] and [`AvPipeline::mux_audio`] in a loop;
//! muxed bytes leave through the write callback handed to the muxer.

pub(crate) mod avio;
pub(crate) mod clock;
pub(crate) mod encoder;
pub(crate) mod filter;
pub(crate) mod input;
pub(crate) mod muxer;
pub(crate) mod volume;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ffmpeg_next::packet::Mut;
use ffmpeg_next::software::resampling;
use ffmpeg_next::{decoder, ffi, filter as avfilter, frame, Packet, Rational};
use tracing::{debug, trace, warn};

use crate::error::{ArgonError, Result};
use crate::session::SessionShared;
use crate::types::{
    AudioSourceProps, Dim, StreamFormat, V4l2EncoderProps, VideoEncoderKind, VideoOrientation,
    VideoSourceKind, VideoSourceProps, VideoTrans,
};
use avio::WriteFn;
use clock::{rescale_from_usec, rescale_to_usec, AudioClock, UsecClock, VideoClock};
use encoder::{audio_frame_bytes, raw_frame_size, OpenVideoEncoder};
use filter::FilterParams;
use input::InputContext;
use muxer::Muxer;

/// Immutable description of the session the pipeline serves
pub(crate) struct PipelineConfig {
    pub stream_format: StreamFormat,
    pub video_props: Option<VideoSourceProps>,
    pub audio_props: Option<AudioSourceProps>,
    pub video_encoder: VideoEncoderKind,
    pub video_orientation: VideoOrientation,
    pub audio_volume: f32,
    pub stream_author: String,
    pub stream_title: String,
    pub v4l2_encoders: Vec<V4l2EncoderProps>,
}

struct VideoPipe {
    props: VideoSourceProps,
    input: Option<InputContext>,
    decoder: Option<decoder::Video>,
    encoder: Option<ffmpeg_next::encoder::Video>,
    filters: HashMap<VideoTrans, avfilter::Graph>,
    trans: VideoTrans,
    frame_in: frame::Video,
    frame_filtered: frame::Video,
    raw_frame_size: usize,
    framerate: i32,
    in_dim: Dim,
    in_pixfmt: ffmpeg_next::format::Pixel,
    out_dim: Dim,
    clock: VideoClock,
    key_pkt: Option<Packet>,
    stream_index: usize,
    flushed: bool,
}

struct AudioPipe {
    props: AudioSourceProps,
    decoder: decoder::Audio,
    encoder: ffmpeg_next::encoder::Audio,
    resampler: Option<resampling::Context>,
    frame_in: frame::Audio,
    frame_out: frame::Audio,
    /// Raw input bytes backing one encoder frame
    frame_size: usize,
    clock: AudioClock,
    volume: f32,
    stream_index: usize,
    flushed: bool,
}

pub(crate) struct AvPipeline {
    config: PipelineConfig,
    shared: Arc<SessionShared>,
    wall: UsecClock,
    muxer: Muxer,
    video: Option<VideoPipe>,
    audio: Option<AudioPipe>,
}

impl AvPipeline {
    /// Open every context the session needs: decoders, encoders, the
    /// resampler, device demuxers and the muxer. Capture inputs that
    /// push bytes (compressed camera) are attached later in
    /// [`AvPipeline::start`].
    pub fn new(config: PipelineConfig, shared: Arc<SessionShared>, write: WriteFn) -> Result<Self> {
        debug!("av init started");

        ffmpeg_next::init()?;

        let audio = match &config.audio_props {
            Some(props) => Some(Self::init_audio(props, config.stream_format, config.audio_volume)?),
            None => None,
        };

        let video = match &config.video_props {
            Some(props) => Some(Self::init_video(
                props,
                config.video_encoder,
                &config.v4l2_encoders,
            )?),
            None => None,
        };

        let muxer = Muxer::new(config.stream_format, write)?;

        debug!("av init completed");

        Ok(Self {
            config,
            shared,
            wall: UsecClock::new(),
            muxer,
            video,
            audio,
        })
    }

    fn init_audio(
        props: &AudioSourceProps,
        format: StreamFormat,
        volume: f32,
    ) -> Result<AudioPipe> {
        let dec = encoder::open_audio_decoder(props)?;
        let enc = encoder::open_audio_encoder(format, props)?;

        let resampler = if dec.format() != enc.format() {
            debug!("audio resampling required");
            Some(resampling::Context::get(
                dec.format(),
                dec.channel_layout(),
                props.rate,
                enc.format(),
                enc.channel_layout(),
                props.rate,
            )?)
        } else {
            None
        };

        let nb_samples = enc.frame_size() as i32;
        let frame_size = audio_frame_bytes(props.channels, nb_samples, dec.format());

        let frame_out = frame::Audio::new(enc.format(), nb_samples as usize, enc.channel_layout());

        Ok(AudioPipe {
            props: props.clone(),
            decoder: dec,
            encoder: enc,
            resampler,
            frame_in: frame::Audio::empty(),
            frame_out,
            frame_size,
            clock: AudioClock::new(0, 0),
            volume,
            stream_index: 0,
            flushed: false,
        })
    }

    fn init_video(
        props: &VideoSourceProps,
        requested: VideoEncoderKind,
        v4l2_encoders: &[V4l2EncoderProps],
    ) -> Result<VideoPipe> {
        let mut pipe = VideoPipe {
            props: props.clone(),
            input: None,
            decoder: None,
            encoder: None,
            filters: HashMap::new(),
            trans: VideoTrans::Off,
            frame_in: frame::Video::empty(),
            frame_filtered: frame::Video::empty(),
            raw_frame_size: 0,
            framerate: 0,
            in_dim: Dim::default(),
            in_pixfmt: ffmpeg_next::format::Pixel::None,
            out_dim: Dim::default(),
            clock: VideoClock::new(30),
            key_pkt: None,
            stream_index: 0,
            flushed: false,
        };

        match props.kind {
            VideoSourceKind::CamH264 => {
                // passthrough: no transcode, timing from the source spec
                let spec = &props.formats[0].frame_specs[0];
                pipe.framerate = *spec
                    .framerates
                    .iter()
                    .next()
                    .ok_or_else(|| ArgonError::av("no framerate for video source"))?
                    as i32;
                pipe.in_dim = spec.dim;
            }
            VideoSourceKind::CamRaw | VideoSourceKind::ScreenX11 => {
                let open = encoder::open_video_encoder(requested, props, v4l2_encoders)?;
                pipe.apply_encoder(open);
                pipe.open_device_input()?;
                pipe.open_decoder_from_input()?;
            }
            VideoSourceKind::ScreenNative | VideoSourceKind::Test => {
                let open = encoder::open_video_encoder(requested, props, v4l2_encoders)?;
                pipe.apply_encoder(open);
                pipe.decoder = Some(encoder::open_raw_video_decoder(
                    pipe.in_pixfmt,
                    pipe.in_dim,
                    pipe.framerate,
                )?);
                pipe.raw_frame_size = raw_frame_size(pipe.in_pixfmt, pipe.in_dim);
                pipe.build_filters()?;
            }
        }

        pipe.clock = VideoClock::new(pipe.framerate);
        Ok(pipe)
    }

    pub fn video_enabled(&self) -> bool {
        self.video.is_some()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }

    /// Duration of one audio codec frame in microseconds; valid after
    /// [`AvPipeline::start`]
    pub fn audio_frame_duration(&self) -> Option<i64> {
        self.audio.as_ref().map(|a| a.clock.frame_duration)
    }

    /// Raw input bytes backing one audio codec frame
    pub fn audio_frame_size(&self) -> Option<usize> {
        self.audio.as_ref().map(|a| a.frame_size)
    }

    /// Poll period of the muxing thread in microseconds
    pub fn video_frame_duration(&self) -> Option<i64> {
        self.video.as_ref().map(|v| v.clock.frame_duration)
    }

    /// Attach inputs, declare streams and write the container header
    pub fn start(&mut self) -> Result<()> {
        debug!("starting av");

        if let Some(video) = &mut self.video {
            match video.props.kind {
                VideoSourceKind::CamH264 => {
                    let shared = self.shared.clone();
                    let read = Box::new(move |buf: &mut [u8]| pushed_read(&shared, buf));
                    let mut input = InputContext::open_pushed(read, video.framerate)?;
                    let idx = input.find_best_video_stream()?;
                    // SAFETY: params pointer is valid while `input` lives;
                    // the muxer copies them synchronously.
                    video.stream_index = unsafe {
                        self.muxer
                            .add_video_stream_from_params(input.stream_params(idx), video.framerate)?
                    };
                    video.input = Some(input);
                }
                VideoSourceKind::CamRaw | VideoSourceKind::ScreenX11 => {
                    let enc = video.encoder.as_ref().expect("encoder opened at init");
                    video.stream_index = self
                        .muxer
                        .add_video_stream_from_encoder(enc, video.framerate)?;
                    video.build_filters()?;
                }
                VideoSourceKind::ScreenNative | VideoSourceKind::Test => {
                    let enc = video.encoder.as_ref().expect("encoder opened at init");
                    video.stream_index = self
                        .muxer
                        .add_video_stream_from_encoder(enc, video.framerate)?;
                }
            }

            let rotation = stream_rotation(self.config.video_orientation, video.props.orientation);
            debug!(
                "video rotation: {rotation}, native={}, requested={}",
                video.props.orientation, self.config.video_orientation
            );
            self.muxer.set_stream_rotation(video.stream_index, rotation)?;
        }

        if let Some(audio) = &mut self.audio {
            audio.stream_index = self.muxer.add_audio_stream_from_encoder(&audio.encoder)?;
        }

        self.muxer
            .set_metadata(&self.config.stream_author, &self.config.stream_title);
        self.muxer.write_header()?;

        if let Some(audio) = &mut self.audio {
            let frame_duration = rescale_to_usec(
                i64::from(audio.encoder.frame_size()),
                Rational(1, audio.props.rate as i32),
            );
            let pkt_duration =
                rescale_from_usec(frame_duration, self.muxer.stream_time_base(audio.stream_index));
            audio.clock = AudioClock::new(frame_duration, pkt_duration);

            debug!(
                "audio frame dur: {frame_duration}, pkt dur: {pkt_duration}, frame size: {}",
                audio.frame_size
            );
        }

        debug!("av start completed");
        Ok(())
    }

    /// Force the muxer to emit everything buffered for the last frame
    pub fn flush_fragment(&mut self) {
        self.muxer.flush_fragment();
    }

    /// Mux one video frame. `Ok(false)` when no frame was due or ready.
    pub fn mux_video(&mut self, pkt: &mut Packet) -> Result<bool> {
        let Some(video) = &mut self.video else {
            return Ok(false);
        };

        let now = self.wall.now();

        let restart_active = {
            let v = self.shared.video.lock();
            v.restart_requested || v.restarting
        };

        if restart_active {
            // replay the cached key frame with fresh timing while the
            // capture pipeline rebuilds
            let Some(key) = &video.key_pkt else {
                return Ok(false);
            };
            if video.clock.delay(now) < 0 {
                return Ok(false);
            }
            trace!("video read key frame");
            *pkt = key.clone();
        } else {
            match video.props.kind {
                VideoSourceKind::CamH264 => {
                    if !video.read_from_demuxer(pkt)? {
                        return Ok(false);
                    }
                }
                VideoSourceKind::CamRaw | VideoSourceKind::ScreenX11 => {
                    if !video.read_from_demuxer(pkt)? {
                        return Ok(false);
                    }
                    if !video.encode_frame(pkt)? {
                        return Ok(false);
                    }
                }
                VideoSourceKind::ScreenNative | VideoSourceKind::Test => {
                    if !video.read_from_buf(&self.shared, pkt)? {
                        return Ok(false);
                    }
                    if !video.encode_frame(pkt)? {
                        return Ok(false);
                    }
                }
            }

            let flags = pkt.flags();
            if flags.contains(ffmpeg_next::packet::Flags::CORRUPT) {
                warn!("corrupted pkt detected");
                unsafe { ffi::av_packet_unref(pkt.as_mut_ptr()) };
                return Ok(false);
            }
            if flags.contains(ffmpeg_next::packet::Flags::DISCARD) {
                warn!("discarded pkt detected");
                unsafe { ffi::av_packet_unref(pkt.as_mut_ptr()) };
                return Ok(false);
            }

            if flags.contains(ffmpeg_next::packet::Flags::KEY) && video.key_pkt.is_none() {
                video.key_pkt = Some(pkt.clone());
            }
        }

        video.clock.update_sample_stats(now);

        let time_base = self.muxer.stream_time_base(video.stream_index);
        let duration = rescale_from_usec(video.clock.real_frame_duration, time_base);

        pkt.set_stream(video.stream_index);
        pkt.set_pts(Some(video.clock.next_pts));
        pkt.set_dts(Some(video.clock.next_pts));
        pkt.set_duration(duration);
        video.clock.next_pts += duration;

        self.muxer.write_packet(pkt)?;

        if !video.flushed {
            debug!("first av video data");
            video.flushed = true;
        }

        Ok(true)
    }

    /// Mux as many audio frames as are due. `Ok(false)` when none were.
    pub fn mux_audio(&mut self, pkt: &mut Packet) -> Result<bool> {
        let mut pkt_done = false;

        while !self.shared.terminating() {
            let now = self.wall.now();

            if !self.read_raw_audio_pkt(pkt, now)? {
                break;
            }

            let audio = self.audio.as_mut().expect("audio pipe exists");

            match audio.decoder.send_packet(pkt) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::error::EAGAIN => {}
                Err(e) => return Err(ArgonError::av(format!("audio send_packet error: {e}"))),
            }
            audio
                .decoder
                .receive_frame(&mut audio.frame_in)
                .map_err(|e| ArgonError::av(format!("audio receive_frame error: {e}")))?;

            let send_result = match &mut audio.resampler {
                None => audio.encoder.send_frame(&audio.frame_in),
                Some(resampler) => {
                    resampler
                        .run(&audio.frame_in, &mut audio.frame_out)
                        .map_err(|e| ArgonError::av(format!("resample error: {e}")))?;
                    audio.encoder.send_frame(&audio.frame_out)
                }
            };
            match send_result {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::error::EAGAIN => {}
                Err(e) => return Err(ArgonError::av(format!("audio send_frame error: {e}"))),
            }

            match audio.encoder.receive_packet(pkt) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::error::EAGAIN =>
                {
                    debug!("audio pkt not ready");
                    break;
                }
                Err(e) => return Err(ArgonError::av(format!("audio receive_packet error: {e}"))),
            }

            pkt.set_stream(audio.stream_index);
            pkt.set_pts(Some(audio.clock.next_pts));
            pkt.set_dts(Some(audio.clock.next_pts));
            pkt.set_duration(audio.clock.pkt_duration);

            if audio.clock.next_pts == 0 {
                audio.clock.time_last_frame = now;
            } else {
                audio.clock.time_last_frame += audio.clock.frame_duration;
            }
            audio.clock.next_pts += audio.clock.pkt_duration;

            self.muxer.write_packet(pkt)?;

            if !audio.flushed {
                debug!("first av audio data");
                audio.flushed = true;
            }
            pkt_done = true;
        }

        Ok(pkt_done)
    }

    /// A/V drift in microseconds: positive when video runs ahead
    fn video_audio_delay(&self) -> i64 {
        let (Some(video), Some(audio)) = (&self.video, &self.audio) else {
            return 0;
        };
        let video_pts = rescale_to_usec(
            video.clock.next_pts,
            self.muxer.stream_time_base(video.stream_index),
        );
        let audio_pts = rescale_to_usec(
            audio.clock.next_pts,
            self.muxer.stream_time_base(audio.stream_index),
        );
        video_pts - audio_pts
    }

    /// Pull one frame's worth of raw samples, padding silence or
    /// discarding to correct drift one frame at a time
    fn read_raw_audio_pkt(&mut self, pkt: &mut Packet, now: i64) -> Result<bool> {
        let video_enabled = self.video.is_some();
        let delay = if video_enabled {
            self.video_audio_delay()
        } else {
            self.audio.as_ref().expect("audio pipe exists").clock.delay(now)
        };

        let audio = self.audio.as_mut().expect("audio pipe exists");
        let max_delay = 2 * audio.clock.frame_duration;

        trace!(
            "audio: delay={delay}, frame dur={}, frame size={}",
            audio.clock.frame_duration,
            audio.frame_size
        );

        if delay < -max_delay {
            debug!("too much audio, deleting audio frame: delay={delay}");
            let mut buf = self.shared.audio.lock();
            let n = audio.frame_size.min(buf.len());
            buf.discard_exact(n);
            return Ok(false);
        }

        if delay < audio.clock.frame_duration {
            return Ok(false);
        }

        let mut buf = self.shared.audio.lock();

        if !buf.has_enough_data(audio.frame_size) {
            let muted = audio.volume == 0.0;
            let stream_active = self.shared.audio_stream_active.load(Ordering::SeqCst);
            let push_null = !stream_active || delay > max_delay || muted;

            if push_null {
                trace!("audio push null: {}", audio.frame_size - buf.len());
                buf.push_null_exact_force(audio.frame_size - buf.len());
            } else {
                return Ok(false);
            }
        }

        *pkt = Packet::new(audio.frame_size);
        if let Some(data) = pkt.data_mut() {
            buf.pull(data);
        }
        drop(buf);

        if audio.volume != 1.0 && audio.volume != 0.0 {
            if let Some(data) = pkt.data_mut() {
                volume::apply_gain(data, audio.props.bps, audio.props.endian, audio.volume);
            }
        }

        Ok(true)
    }
}

impl VideoPipe {
    fn apply_encoder(&mut self, open: OpenVideoEncoder) {
        debug!("video encoder chosen: {}", open.kind);
        self.framerate = open.framerate;
        self.in_dim = open.in_dim;
        self.in_pixfmt = open.in_pixfmt;
        self.out_dim = open.out_dim;
        self.encoder = Some(open.encoder);
    }

    fn open_device_input(&mut self) -> Result<()> {
        let demuxer = match self.props.kind {
            VideoSourceKind::CamRaw => "video4linux2",
            VideoSourceKind::ScreenX11 => "x11grab",
            _ => return Err(ArgonError::av("not a device source")),
        };

        let mut opts = vec![
            (
                "video_size",
                format!("{}x{}", self.in_dim.width, self.in_dim.height),
            ),
            ("framerate", self.framerate.to_string()),
        ];
        if self.props.kind == VideoSourceKind::CamRaw {
            let name = self
                .in_pixfmt
                .descriptor()
                .map(|d| d.name())
                .ok_or_else(|| ArgonError::av("input pixfmt has no descriptor"))?;
            opts.push(("input_format", name.to_string()));
        }

        let input = InputContext::open_device(demuxer, &self.props.dev, &opts)?;
        self.input = Some(input);
        Ok(())
    }

    /// Open the raw decoder from the demuxer's stream parameters and
    /// cross-check them against the chosen capability
    fn open_decoder_from_input(&mut self) -> Result<()> {
        let input = self.input.as_mut().expect("device input opened");
        let idx = input.find_best_video_stream()?;

        let params = input.stream_params(idx);
        let codec_id: ffmpeg_next::codec::Id = unsafe { (*params).codec_id }.into();
        let ffcodec = ffmpeg_next::decoder::find(codec_id)
            .ok_or_else(|| ArgonError::av(format!("no decoder for {codec_id:?}")))?;

        let ctx = ffmpeg_next::codec::context::Context::new_with_codec(ffcodec);
        // SAFETY: the context was just allocated and the parameter
        // pointer is valid while `input` lives; the call copies out of it.
        unsafe {
            let ret =
                ffi::avcodec_parameters_to_context(ctx.as_ptr() as *mut ffi::AVCodecContext, params);
            if ret < 0 {
                return Err(ArgonError::av("avcodec_parameters_to_context error"));
            }
        }
        let dec = ctx.decoder().video()?;

        if dec.width() != self.in_dim.width
            || dec.height() != self.in_dim.height
            || dec.format() != self.in_pixfmt
        {
            return Err(ArgonError::av(format!(
                "input stream has invalid params, expected: pixfmt={:?}, dim={}",
                self.in_pixfmt, self.in_dim
            )));
        }

        self.raw_frame_size = raw_frame_size(self.in_pixfmt, self.in_dim);
        self.decoder = Some(dec);
        Ok(())
    }

    /// Decide the transform and build its graphs. `Off` escalates to
    /// `Scale` when the pixel format or dimensions still differ.
    fn build_filters(&mut self) -> Result<()> {
        let enc = self.encoder.as_ref().expect("encoder opened");
        let out_pixfmt = enc.format();

        self.trans = self.props.trans;
        if self.trans == VideoTrans::Off {
            if self.in_pixfmt != out_pixfmt {
                debug!(
                    "pixfmt conversion required: {:?} => {:?}",
                    self.in_pixfmt, out_pixfmt
                );
                self.trans = VideoTrans::Scale;
            } else if self.in_dim != self.out_dim {
                debug!("dim conversion required");
                self.trans = VideoTrans::Scale;
            } else {
                debug!("video filtering is not needed");
                return Ok(());
            }
        }

        let params = FilterParams {
            in_dim: self.in_dim,
            in_pixfmt: self.in_pixfmt,
            out_dim: self.out_dim,
            out_pixfmt,
            framerate: self.framerate,
        };
        self.filters = filter::build_filters(self.trans, &params)?;
        Ok(())
    }

    fn read_from_demuxer(&mut self, pkt: &mut Packet) -> Result<bool> {
        let input = self.input.as_mut().expect("input opened");
        if !input.read_packet(pkt)? {
            // the pull callback interrupts a blocked read with EOF while
            // a restart is pending; resume once the capture is back
            if self.props.kind == VideoSourceKind::CamH264 {
                input.clear_eof();
                return Ok(false);
            }
            return Err(ArgonError::av("video input reached end of stream"));
        }
        Ok(true)
    }

    /// Pull one raw frame out of the shared ring; sleeps one poll period
    /// when not enough data has arrived yet
    fn read_from_buf(&mut self, shared: &Arc<SessionShared>, pkt: &mut Packet) -> Result<bool> {
        let mut video = shared.video.lock();

        if !video.buf.has_enough_data(self.raw_frame_size) {
            trace!("video buf does not have enough data");
            drop(video);
            std::thread::sleep(std::time::Duration::from_micros(
                self.clock.frame_duration as u64,
            ));
            return Ok(false);
        }

        *pkt = Packet::new(self.raw_frame_size);
        if let Some(data) = pkt.data_mut() {
            video.buf.pull(data);
        }

        Ok(true)
    }

    /// Decode, filter and re-encode one raw frame
    fn encode_frame(&mut self, pkt: &mut Packet) -> Result<bool> {
        let dec = self.decoder.as_mut().expect("decoder opened");

        match dec.send_packet(&*pkt) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {}
            Err(e) => return Err(ArgonError::av(format!("video send_packet error: {e}"))),
        }
        unsafe { ffi::av_packet_unref(pkt.as_mut_ptr()) };

        dec.receive_frame(&mut self.frame_in)
            .map_err(|e| ArgonError::av(format!("video receive_frame error: {e}")))?;

        let enc = self.encoder.as_mut().expect("encoder opened");

        let send_result = if self.trans == VideoTrans::Off {
            enc.send_frame(&self.frame_in)
        } else {
            let graph = self
                .filters
                .get_mut(&self.trans)
                .ok_or_else(|| ArgonError::av("missing filter graph"))?;
            if !filter::run_graph(graph, &self.frame_in, &mut self.frame_filtered)? {
                return Ok(false);
            }
            let result = enc.send_frame(&self.frame_filtered);
            unsafe { ffi::av_frame_unref(self.frame_filtered.as_mut_ptr()) };
            result
        };

        match send_result {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {}
            Err(e) => return Err(ArgonError::av(format!("video send_frame error: {e}"))),
        }

        match enc.receive_packet(pkt) {
            Ok(()) => Ok(true),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::error::EAGAIN => {
                debug!("video pkt not ready");
                Ok(false)
            }
            Err(e) => Err(ArgonError::av(format!("video receive_packet error: {e}"))),
        }
    }
}

/// Rotation carried in stream metadata when the requested orientation
/// differs from the source's native one
fn stream_rotation(requested: VideoOrientation, native: VideoOrientation) -> i32 {
    if requested == VideoOrientation::Auto || requested == native {
        return 0;
    }
    (requested.rotation() + native.rotation()) % 360
}

/// Pull callback feeding the pushed-video demuxer: blocks until data,
/// termination or a restart
fn pushed_read(shared: &Arc<SessionShared>, buf: &mut [u8]) -> i32 {
    trace!("read packet: request");

    let mut video = shared.video.lock();
    shared.video_cv.wait_while(&mut video, |v| {
        !shared.terminating() && !v.restart_requested && !v.restarting && v.buf.is_empty()
    });

    if shared.terminating() {
        video.buf.clear();
        drop(video);
        shared.video_cv.notify_one();
        trace!("read packet: terminating");
        return ffi::AVERROR_EOF;
    }

    if video.restart_requested || video.restarting {
        drop(video);
        shared.video_cv.notify_one();
        trace!("read packet: restart");
        return ffi::AVERROR_EOF;
    }

    let pulled = video.buf.pull(buf);
    drop(video);
    shared.video_cv.notify_one();

    trace!("read packet: done, size={pulled}");
    pulled as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_rotation() {
        use VideoOrientation::*;
        assert_eq!(stream_rotation(Auto, Portrait), 0);
        assert_eq!(stream_rotation(Portrait, Portrait), 0);
        assert_eq!(stream_rotation(Portrait, Landscape), 90);
        assert_eq!(stream_rotation(InvertedLandscape, Portrait), 270);
        assert_eq!(stream_rotation(InvertedPortrait, InvertedLandscape), 90);
    }
}

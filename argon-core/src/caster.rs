//! One capture-encode-mux session
//!
//! A caster binds a validated session configuration to the machine's
//! sources, builds the AV pipeline and owns the worker threads that
//! drive it. States move strictly forward (Initing, Inited, Starting,
//! Started) except for the terminal arrow into Terminating, which any
//! failure on any thread may take via `report_error`.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ffmpeg_next::Packet;
use tracing::{debug, error, warn};

use crate::capture::audio::PaCapture;
use crate::capture::gst::{GstCameraSource, GstTarget};
use crate::capture::testsrc::TestPatternSource;
use crate::error::{ArgonError, Result};
use crate::pipeline::avio::WriteFn;
use crate::pipeline::{AvPipeline, PipelineConfig};
use crate::probe;
use crate::session::SessionShared;
use crate::types::{
    AudioSourceProps, CasterState, SensorDirection, StreamFormat, VideoEncoderKind,
    VideoOrientation, VideoSourceKind, VideoSourceProps,
};

/// Muxed bytes sink; returns the number of bytes it accepted
pub type DataReadyHandler = Box<dyn FnMut(&[u8]) -> usize + Send>;

/// Fired exactly once per state change, with the new state
pub type StateChangedHandler = Box<dyn Fn(CasterState) + Send + Sync>;

/// Session configuration; immutable once the caster runs
#[derive(Debug, Clone)]
pub struct Config {
    pub stream_format: StreamFormat,
    /// Video source id; empty disables video
    pub video_source: String,
    /// Audio source id; empty disables audio
    pub audio_source: String,
    /// 0.0 = silent padding, 1.0 = passthrough, up to 10.0 with clipping
    pub audio_volume: f32,
    pub video_orientation: VideoOrientation,
    pub video_encoder: VideoEncoderKind,
    pub stream_author: String,
    pub stream_title: String,
    /// Move the followed sink-input away from its sink while capturing
    pub mute_audio_source: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_format: StreamFormat::Mp4,
            video_source: String::new(),
            audio_source: String::new(),
            audio_volume: 1.0,
            video_orientation: VideoOrientation::Auto,
            video_encoder: VideoEncoderKind::Auto,
            stream_author: "argon".to_string(),
            stream_title: "Argon stream".to_string(),
            mute_audio_source: false,
        }
    }
}

pub struct Caster {
    config: Config,
    shared: Arc<SessionShared>,
    video_props: Option<VideoSourceProps>,
    audio_props: Option<AudioSourceProps>,
    all_video_props: HashMap<String, VideoSourceProps>,
    pipeline: Option<AvPipeline>,
    pa: Option<PaCapture>,
    gst: Option<GstCameraSource>,
    test: Option<TestPatternSource>,
    mux_thread: Option<JoinHandle<()>>,
}

impl Caster {
    /// Probe sources, validate the configuration and open every AV
    /// context. On success the caster is in the `Inited` state.
    pub fn new(
        config: Config,
        data_ready: DataReadyHandler,
        state_changed: StateChangedHandler,
    ) -> Result<Self> {
        debug!("creating caster: {config:?}");

        Self::validate(&config)?;

        let video_enabled = !config.video_source.is_empty();
        let audio_enabled = !config.audio_source.is_empty();
        debug!("video enabled: {video_enabled}, audio enabled: {audio_enabled}");

        let all_video_props = if video_enabled {
            probe::detect_video_sources(probe::VideoSourceFlags::all().with_only_nice_formats())
        } else {
            HashMap::new()
        };

        let video_props = if video_enabled {
            Some(
                all_video_props
                    .get(&config.video_source)
                    .cloned()
                    .ok_or_else(|| ArgonError::SourceNotFound(config.video_source.clone()))?,
            )
        } else {
            None
        };

        let audio_props = if audio_enabled {
            Some(
                probe::detect_audio_sources()?
                    .remove(&config.audio_source)
                    .ok_or_else(|| ArgonError::SourceNotFound(config.audio_source.clone()))?,
            )
        } else {
            None
        };

        let shared = Arc::new(SessionShared::new(state_changed));

        let pa = match &audio_props {
            Some(props) => Some(PaCapture::new(
                props.clone(),
                config.stream_author.clone(),
                config.stream_title.clone(),
                shared.clone(),
            )?),
            None => None,
        };

        let mut gst = None;
        let mut test = None;
        if let Some(props) = &video_props {
            match props.kind {
                VideoSourceKind::CamH264 => {
                    let spec = &props.formats[0].frame_specs[0];
                    let framerate = *spec
                        .framerates
                        .iter()
                        .next()
                        .ok_or_else(|| ArgonError::av("no framerate for video source"))?;
                    gst = Some(GstCameraSource::new(
                        shared.clone(),
                        GstTarget {
                            dev: props.dev.clone(),
                            dim: spec.dim,
                            framerate,
                        },
                    )?);
                }
                VideoSourceKind::ScreenNative | VideoSourceKind::Test => {
                    test = Some(TestPatternSource::new(shared.clone()));
                }
                VideoSourceKind::CamRaw | VideoSourceKind::ScreenX11 => {}
            }
        }

        let v4l2_encoders = if video_enabled {
            probe::v4l2_encoders()
        } else {
            Vec::new()
        };

        let pipeline = AvPipeline::new(
            PipelineConfig {
                stream_format: config.stream_format,
                video_props: video_props.clone(),
                audio_props: audio_props.clone(),
                video_encoder: config.video_encoder,
                video_orientation: config.video_orientation,
                audio_volume: config.audio_volume,
                stream_author: config.stream_author.clone(),
                stream_title: config.stream_title.clone(),
                v4l2_encoders,
            },
            shared.clone(),
            Self::make_write_handler(shared.clone(), data_ready),
        )?;

        shared.set_state(CasterState::Inited);

        Ok(Self {
            config,
            shared,
            video_props,
            audio_props,
            all_video_props,
            pipeline: Some(pipeline),
            pa,
            gst,
            test,
            mux_thread: None,
        })
    }

    fn validate(config: &Config) -> Result<()> {
        if config.video_source.is_empty() && config.audio_source.is_empty() {
            return Err(ArgonError::config(
                "both video-source and audio-source cannot be empty",
            ));
        }
        if config.stream_format.audio_only() && !config.video_source.is_empty() {
            return Err(ArgonError::config("stream-format does not support video"));
        }
        if !(0.0..=10.0).contains(&config.audio_volume) {
            return Err(ArgonError::config("audio-volume is invalid"));
        }
        if config.stream_author.is_empty() {
            return Err(ArgonError::config("stream-author is invalid"));
        }
        if config.stream_title.is_empty() {
            return Err(ArgonError::config("stream-title is invalid"));
        }
        Ok(())
    }

    fn make_write_handler(shared: Arc<SessionShared>, mut data_ready: DataReadyHandler) -> WriteFn {
        let mut first = true;
        Box::new(move |data: &[u8]| {
            if shared.terminating() {
                return data.len() as i32;
            }
            if first {
                debug!("first av muxed data");
                first = false;
            }
            data_ready(data) as i32
        })
    }

    pub fn state(&self) -> CasterState {
        self.shared.state()
    }

    pub fn terminating(&self) -> bool {
        self.shared.terminating()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sensor direction of the active video source
    pub fn video_direction(&self) -> SensorDirection {
        self.video_props
            .as_ref()
            .map(|p| p.sensor_direction)
            .unwrap_or(SensorDirection::Unknown)
    }

    /// Start capture and muxing. Only valid in the `Inited` state.
    pub fn start(&mut self) {
        if self.shared.state() != CasterState::Inited {
            warn!("start is only possible in inited state");
            return;
        }

        self.shared.set_state(CasterState::Starting);

        if let Err(e) = self.start_inner() {
            warn!("failed to start: {e}");
            self.shared.report_error();
            return;
        }

        self.shared.set_state(CasterState::Started);
    }

    fn start_inner(&mut self) -> Result<()> {
        if let Some(test) = &mut self.test {
            test.start();
        }
        if let Some(gst) = &mut self.gst {
            gst.start()?;
        }

        let mut pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| ArgonError::InvalidState("pipeline already taken".into()))?;
        pipeline.start()?;

        if self.audio_props.is_some() && self.config.audio_volume > 0.0 {
            let frame_duration = pipeline.audio_frame_duration().unwrap_or(0);
            let frame_size = pipeline.audio_frame_size().unwrap_or(0);
            if let Some(pa) = &self.pa {
                pa.start(
                    Duration::from_micros((frame_duration / 2).max(1) as u64),
                    frame_size as u32,
                );
            }
        }

        self.spawn_muxing(pipeline)?;
        Ok(())
    }

    fn spawn_muxing(&mut self, mut pipeline: AvPipeline) -> Result<()> {
        let shared = self.shared.clone();
        let video = pipeline.video_enabled();
        let audio = pipeline.audio_enabled();
        let audio_sleep = pipeline.audio_frame_duration().unwrap_or(0) / 2;

        let thread = thread::Builder::new()
            .name("av-muxing".to_string())
            .spawn(move || {
                debug!("starting muxing");

                let mut video_pkt = Packet::empty();
                let mut audio_pkt = Packet::empty();

                let result = (|| -> Result<()> {
                    while !shared.terminating() {
                        let mut pkt_done = false;
                        if video && pipeline.mux_video(&mut video_pkt)? {
                            pkt_done = true;
                        }
                        if audio && pipeline.mux_audio(&mut audio_pkt)? {
                            pkt_done = true;
                        }
                        if pkt_done {
                            pipeline.flush_fragment();
                        }
                        if !video {
                            thread::sleep(Duration::from_micros(audio_sleep.max(1) as u64));
                        }
                    }
                    Ok(())
                })();

                if let Err(e) = result {
                    error!("error in muxing thread: {e}");
                    shared.report_error();
                }

                debug!("muxing ended");
            })
            .map_err(|e| ArgonError::av(format!("failed to spawn muxing thread: {e}")))?;

        self.mux_thread = Some(thread);
        Ok(())
    }

    /// Request an in-session capture restart; only the compressed-camera
    /// flow honors it.
    pub fn restart_video_capture(&self) {
        if self.shared.state() != CasterState::Started {
            return;
        }
        if self
            .video_props
            .as_ref()
            .map(|p| p.kind != VideoSourceKind::CamH264)
            .unwrap_or(true)
        {
            warn!("restart is only supported for compressed cameras");
            return;
        }

        let mut video = self.shared.video.lock();
        if video.restart_requested || video.restarting {
            return;
        }

        debug!("restart video capture requested");
        video.restart_requested = true;
        drop(video);
        self.shared.video_cv.notify_all();
    }

    /// Switch between the front and back camera by retargeting the
    /// capture pipeline and replaying the cached key frame meanwhile
    pub fn switch_video_direction(&mut self) {
        let Some(current) = &self.video_props else {
            return;
        };

        let wanted = match current.sensor_direction {
            SensorDirection::Front => SensorDirection::Back,
            SensorDirection::Back => SensorDirection::Front,
            SensorDirection::Unknown => {
                warn!("failed to change video direction");
                return;
            }
        };

        let Some(next) = self
            .all_video_props
            .values()
            .find(|p| p.kind == VideoSourceKind::CamH264 && p.sensor_direction == wanted)
            .cloned()
        else {
            warn!("failed to change video direction");
            return;
        };

        debug!(
            "video direction change: {} => {}",
            current.sensor_direction, wanted
        );

        if let Some(gst) = &self.gst {
            let spec = &next.formats[0].frame_specs[0];
            let framerate = spec.framerates.iter().next().copied().unwrap_or(30);
            let mut target = gst.target().lock();
            target.dev = next.dev.clone();
            target.dim = spec.dim;
            target.framerate = framerate;
        }

        self.config.video_source = next.name.clone();
        self.video_props = Some(next);

        self.restart_video_capture();
    }
}

impl Drop for Caster {
    fn drop(&mut self) {
        debug!("caster termination started");
        self.shared.set_state(CasterState::Terminating);
        self.shared.video_cv.notify_all();

        if let Some(t) = self.mux_thread.take() {
            let _ = t.join();
        }
        debug!("muxing thread joined");

        // capture sources join their own threads on drop
        self.gst = None;
        self.test = None;
        self.pa = None;
        self.pipeline = None;

        debug!("caster termination completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_sources() {
        let config = Config::default();
        assert!(Caster::validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_mp3_with_video() {
        let config = Config {
            stream_format: StreamFormat::Mp3,
            video_source: "test".into(),
            audio_source: "playback".into(),
            ..Default::default()
        };
        assert!(Caster::validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_volume() {
        let config = Config {
            audio_source: "playback".into(),
            audio_volume: 10.5,
            ..Default::default()
        };
        assert!(Caster::validate(&config).is_err());
    }

    #[test]
    fn test_validate_accepts_audio_only_mp3() {
        let config = Config {
            stream_format: StreamFormat::Mp3,
            audio_source: "playback".into(),
            ..Default::default()
        };
        assert!(Caster::validate(&config).is_ok());
    }
}

//! Source probing
//!
//! Enumerates the machine's video and audio capture sources and reports
//! capability tuples. Source names are monotonic: a `cam-XYZ` name is
//! derived from a short hash of the card string, so hotplug order does
//! not shuffle ids between runs.

pub(crate) mod pulse;
mod testsrc;
mod v4l2;
mod x11;

use std::collections::HashMap;

use crate::error::Result;
use crate::types::{
    AudioSourceInfo, AudioSourceProps, V4l2EncoderProps, VideoSourceInfo, VideoSourceProps,
};

pub(crate) use pulse::detect_pa_sources;
pub(crate) use testsrc::detect_test_sources;
pub(crate) use v4l2::{detect_v4l2_encoders, detect_v4l2_sources};
pub(crate) use x11::detect_x11_sources;

/// Which video source families to probe
#[derive(Debug, Clone, Copy)]
pub struct VideoSourceFlags {
    pub v4l2: bool,
    pub x11: bool,
    pub test: bool,
    /// Restrict raw camera formats to the broadly-supported pixel formats
    pub only_nice_formats: bool,
}

impl VideoSourceFlags {
    pub fn all() -> Self {
        Self {
            v4l2: true,
            x11: true,
            test: true,
            only_nice_formats: false,
        }
    }

    pub fn with_only_nice_formats(mut self) -> Self {
        self.only_nice_formats = true;
        self
    }
}

pub(crate) fn detect_video_sources(flags: VideoSourceFlags) -> HashMap<String, VideoSourceProps> {
    ffmpeg_next::device::register_all();

    let mut props = HashMap::new();
    if flags.v4l2 {
        props.extend(detect_v4l2_sources(flags.only_nice_formats));
    }
    if flags.x11 {
        props.extend(detect_x11_sources());
    }
    if flags.test {
        props.extend(detect_test_sources());
    }
    props
}

pub(crate) fn detect_audio_sources() -> Result<HashMap<String, AudioSourceProps>> {
    detect_pa_sources()
}

/// Ordered listing of video sources, sorted by name descending
pub fn video_sources() -> Vec<VideoSourceInfo> {
    let mut sources: Vec<_> = detect_video_sources(VideoSourceFlags::all())
        .into_values()
        .map(|p| VideoSourceInfo {
            name: p.name,
            friendly_name: p.friendly_name,
        })
        .collect();

    sources.sort_by(|a, b| b.name.cmp(&a.name));
    sources
}

/// Ordered listing of audio sources, sorted by name descending
pub fn audio_sources() -> Result<Vec<AudioSourceInfo>> {
    let mut sources: Vec<_> = detect_audio_sources()?
        .into_values()
        .map(|p| AudioSourceInfo {
            name: p.name,
            friendly_name: p.friendly_name,
        })
        .collect();

    sources.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(sources)
}

/// V4L2 M2M hardware encoder devices present on the machine
pub fn v4l2_encoders() -> Vec<V4l2EncoderProps> {
    detect_v4l2_encoders()
}

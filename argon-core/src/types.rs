//! Core types for Argon
//!
//! Closed enumerations for stream formats, orientations, encoders and
//! transforms, plus the property records produced by source probing.

use std::collections::BTreeSet;

use ffmpeg_next::codec;
use ffmpeg_next::format::Pixel;
use serde::{Deserialize, Serialize};

/// Container format of an outgoing stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamFormat {
    /// Fragmented MP4
    #[default]
    Mp4,
    /// MPEG transport stream
    MpegTs,
    /// MP3, audio only
    Mp3,
}

impl StreamFormat {
    /// Wire spelling used in the config file and URL parameters
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::MpegTs => "mpegts",
            Self::Mp3 => "mp3",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "mp4" => Some(Self::Mp4),
            "mpegts" => Some(Self::MpegTs),
            "mp3" => Some(Self::Mp3),
            _ => None,
        }
    }

    /// FFmpeg muxer name
    pub fn muxer_name(&self) -> &'static str {
        self.as_str()
    }

    /// HTTP Content-Type of the stream body
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::MpegTs => "video/MP2T",
            Self::Mp3 => "audio/mpeg",
        }
    }

    /// True when the format cannot carry a video stream
    pub fn audio_only(&self) -> bool {
        matches!(self, Self::Mp3)
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested display orientation of the video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoOrientation {
    #[default]
    Auto,
    Landscape,
    InvertedLandscape,
    Portrait,
    InvertedPortrait,
}

impl VideoOrientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Landscape => "landscape",
            Self::InvertedLandscape => "inverted-landscape",
            Self::Portrait => "portrait",
            Self::InvertedPortrait => "inverted-portrait",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "landscape" => Some(Self::Landscape),
            "inverted-landscape" => Some(Self::InvertedLandscape),
            "portrait" => Some(Self::Portrait),
            "inverted-portrait" => Some(Self::InvertedPortrait),
            _ => None,
        }
    }

    /// Rotation conveyed by this orientation, degrees counter-clockwise
    pub fn rotation(&self) -> i32 {
        match self {
            Self::Auto | Self::Landscape => 0,
            Self::Portrait => 90,
            Self::InvertedLandscape => 180,
            Self::InvertedPortrait => 270,
        }
    }
}

impl std::fmt::Display for VideoOrientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// H.264 video encoder selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoEncoderKind {
    #[default]
    Auto,
    X264,
    Nvenc,
    V4l2,
}

impl VideoEncoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::X264 => "x264",
            Self::Nvenc => "nvenc",
            Self::V4l2 => "v4l2",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "x264" => Some(Self::X264),
            "nvenc" => Some(Self::Nvenc),
            "v4l2" => Some(Self::V4l2),
            _ => None,
        }
    }

    /// FFmpeg encoder name; `Auto` has none and must be resolved first
    pub fn av_name(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::X264 => Some("libx264"),
            Self::Nvenc => Some("h264_nvenc"),
            Self::V4l2 => Some("h264_v4l2m2m"),
        }
    }
}

impl std::fmt::Display for VideoEncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of video capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoSourceKind {
    /// V4L2 camera delivering raw frames
    CamRaw,
    /// Camera delivering H.264 directly; captured through GStreamer
    CamH264,
    /// X11 screen grab through the x11grab demuxer
    ScreenX11,
    /// Compositor-native screen recorder pushing raw frames
    ScreenNative,
    /// Synthetic moving test pattern
    Test,
}

impl std::fmt::Display for VideoSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CamRaw => "cam-raw",
            Self::CamH264 => "cam-h264",
            Self::ScreenX11 => "screen-x11",
            Self::ScreenNative => "screen-native",
            Self::Test => "test",
        };
        f.write_str(s)
    }
}

/// Kind of audio capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioSourceKind {
    /// Recording device (microphone)
    Mic,
    /// Monitor of an output sink
    Monitor,
    /// Follow the currently best-playing application
    Playback,
}

impl std::fmt::Display for AudioSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mic => "mic",
            Self::Monitor => "monitor",
            Self::Playback => "playback",
        };
        f.write_str(s)
    }
}

/// Which way a camera sensor faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorDirection {
    Front,
    Back,
    #[default]
    Unknown,
}

impl std::fmt::Display for SensorDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Byte order of raw PCM samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    Le,
    Be,
}

/// Pre-encode transform applied by the filter graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoTrans {
    #[default]
    Off,
    Scale,
    Vflip,
    Frame169,
    Frame169Rot90,
    Frame169Rot180,
    Frame169Rot270,
    Frame169Vflip,
    Frame169VflipRot90,
    Frame169VflipRot180,
    Frame169VflipRot270,
}

impl VideoTrans {
    /// True for every 16:9-letterbox variant
    pub fn is_frame169(&self) -> bool {
        !matches!(self, Self::Off | Self::Scale | Self::Vflip)
    }
}

/// Downscale factor applied before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoScale {
    #[default]
    Off,
    Down25,
    Down50,
    Down75,
}

impl VideoScale {
    pub fn factor(&self) -> f64 {
        match self {
            Self::Off => 1.0,
            Self::Down25 => 0.75,
            Self::Down50 => 0.5,
            Self::Down75 => 0.25,
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Dim {
    pub width: u32,
    pub height: u32,
}

impl Dim {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Natural orientation of a surface with these dimensions
    pub fn orientation(&self) -> VideoOrientation {
        if self.width < self.height {
            VideoOrientation::Portrait
        } else {
            VideoOrientation::Landscape
        }
    }

    /// True when the surface is taller than wide
    pub fn thin(&self) -> bool {
        self.width < self.height
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One advertised frame size with its discrete framerates
#[derive(Debug, Clone, Default)]
pub struct FrameSpec {
    pub dim: Dim,
    pub framerates: BTreeSet<u32>,
}

/// Codec and pixel format pair, without frame specs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub codec: codec::Id,
    pub pixfmt: Pixel,
}

/// Codec and pixel format with the frame sizes a source supports
#[derive(Debug, Clone)]
pub struct VideoFormatExt {
    pub codec: codec::Id,
    pub pixfmt: Pixel,
    pub frame_specs: Vec<FrameSpec>,
}

/// Public listing entry for a video source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSourceInfo {
    pub name: String,
    pub friendly_name: String,
}

/// Public listing entry for an audio source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSourceInfo {
    pub name: String,
    pub friendly_name: String,
}

/// Everything the caster needs to know about a video source
#[derive(Debug, Clone)]
pub struct VideoSourceProps {
    pub kind: VideoSourceKind,
    pub name: String,
    pub friendly_name: String,
    /// Device path or demuxer target, e.g. `/dev/video0` or `:0.0`
    pub dev: String,
    pub orientation: VideoOrientation,
    pub sensor_direction: SensorDirection,
    pub trans: VideoTrans,
    pub scale: VideoScale,
    /// Non-empty by construction; the chosen format must come from here
    pub formats: Vec<VideoFormatExt>,
}

impl Default for VideoSourceProps {
    fn default() -> Self {
        Self {
            kind: VideoSourceKind::Test,
            name: String::new(),
            friendly_name: String::new(),
            dev: String::new(),
            orientation: VideoOrientation::Landscape,
            sensor_direction: SensorDirection::Unknown,
            trans: VideoTrans::Off,
            scale: VideoScale::Off,
            formats: Vec::new(),
        }
    }
}

/// Everything the caster needs to know about an audio source
#[derive(Debug, Clone)]
pub struct AudioSourceProps {
    pub kind: AudioSourceKind,
    pub name: String,
    pub friendly_name: String,
    /// PulseAudio device name; empty for the default device
    pub dev: String,
    /// PCM codec matching the device sample format
    pub codec: codec::Id,
    pub channels: u8,
    pub rate: u32,
    /// Bytes per sample
    pub bps: u32,
    pub endian: Endianness,
    /// Move the followed sink-input away from its sink while capturing
    pub mute_source: bool,
}

/// A V4L2 memory-to-memory H.264 encoder device
#[derive(Debug, Clone)]
pub struct V4l2EncoderProps {
    pub dev: String,
    /// Input (OUTPUT queue) formats the encoder accepts
    pub formats: Vec<VideoFormat>,
}

/// Lifecycle state of a caster session
///
/// Transitions are strictly forward, except that any state may jump to
/// `Terminating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CasterState {
    Initing,
    Inited,
    Starting,
    Started,
    Terminating,
}

impl std::fmt::Display for CasterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initing => "initing",
            Self::Inited => "inited",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// Short additive hash used to keep source names stable across hotplug
/// reordering: 3 decimal digits derived from the device card string.
pub(crate) fn short_hash(s: &str) -> u32 {
    s.bytes().map(u32::from).sum::<u32>() % 999
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_format_spellings() {
        for f in [StreamFormat::Mp4, StreamFormat::MpegTs, StreamFormat::Mp3] {
            assert_eq!(StreamFormat::from_str_opt(f.as_str()), Some(f));
        }
        assert_eq!(StreamFormat::from_str_opt("mkv"), None);
    }

    #[test]
    fn test_orientation_rotation() {
        assert_eq!(VideoOrientation::Auto.rotation(), 0);
        assert_eq!(VideoOrientation::Portrait.rotation(), 90);
        assert_eq!(VideoOrientation::InvertedLandscape.rotation(), 180);
        assert_eq!(VideoOrientation::InvertedPortrait.rotation(), 270);
    }

    #[test]
    fn test_dim_orientation() {
        assert!(Dim::new(480, 640).thin());
        assert_eq!(Dim::new(480, 640).orientation(), VideoOrientation::Portrait);
        assert_eq!(
            Dim::new(640, 480).orientation(),
            VideoOrientation::Landscape
        );
    }

    #[test]
    fn test_short_hash_stable() {
        let h = short_hash("Integrated Camera: Integrated C");
        assert_eq!(h, short_hash("Integrated Camera: Integrated C"));
        assert!(h < 999);
    }
}

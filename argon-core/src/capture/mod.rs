//! Capture backends
//!
//! Video frames arrive either through an FFmpeg device demuxer (raw
//! cameras, X11 screens — owned by the pipeline) or through a pusher
//! that feeds the shared video ring (compressed cameras via GStreamer,
//! the synthetic test pattern). Audio always arrives through PulseAudio.

pub(crate) mod audio;
pub(crate) mod gst;
pub(crate) mod testsrc;

//! Argon Core Library
//!
//! Single-host HTTP media-streaming gateway.
//!
//! This library provides:
//! - Probing of V4L2 cameras, X11 screens and PulseAudio sources
//! - A capture-decode-filter-encode-mux pipeline (FFmpeg)
//! - Compressed-camera passthrough capture (GStreamer)
//! - A streaming HTTP server with per-connection backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌───────────────────┐    ┌───────────────┐
//! │ Capture      │───▶│ Decode → Filter → │───▶│ HTTP Server   │
//! │ (V4L2/X11/PA)│    │ Encode → Mux      │    │ (push/resume) │
//! └──────────────┘    └───────────────────┘    └───────────────┘
//! ```
//!
//! A `GET /{url-path}/stream` request starts one caster session; muxed
//! bytes flow into the connection's ring and out to the client until it
//! disconnects. The event loop serializes every lifecycle transition.

pub mod buffer;
pub mod caster;
pub(crate) mod capture;
pub mod error;
pub mod event;
pub mod gateway;
pub mod probe;
pub(crate) mod pipeline;
pub mod server;
pub(crate) mod session;
pub mod settings;
pub mod types;
pub mod webui;

pub use buffer::DataBuffer;
pub use caster::{Caster, Config as CasterConfig};
pub use error::{ArgonError, Result};
pub use event::{Event, EventQueue};
pub use gateway::{audio_sources_table, video_sources_table, Gateway, APP_NAME, APP_VERSION};
pub use server::{Config as ServerConfig, ConnectionId, HttpServer};
pub use settings::Settings;
pub use types::{
    AudioSourceInfo, CasterState, StreamFormat, VideoEncoderKind, VideoOrientation,
    VideoSourceInfo,
};

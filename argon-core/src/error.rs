//! Error types for Argon

use thiserror::Error;

/// Result type alias using ArgonError
pub type Result<T> = std::result::Result<T, ArgonError>;

/// Main error type for Argon operations
#[derive(Debug, Error)]
pub enum ArgonError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested capture source does not exist
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// PulseAudio error
    #[error("PulseAudio error: {0}")]
    Pulse(String),

    /// GStreamer error
    #[error("GStreamer error: {0}")]
    Gst(String),

    /// FFmpeg decode/filter/encode/mux error
    #[error("AV error: {0}")]
    Av(String),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(String),

    /// Network interface could not be resolved to an address
    #[error("Invalid interface name: {0}")]
    InvalidIfname(String),

    /// Capture session is not in the right state for the operation
    #[error("Invalid caster state: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ArgonError>,
    },
}

impl ArgonError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PulseAudio error
    pub fn pulse(msg: impl Into<String>) -> Self {
        Self::Pulse(msg.into())
    }

    /// Create a GStreamer error
    pub fn gst(msg: impl Into<String>) -> Self {
        Self::Gst(msg.into())
    }

    /// Create an AV error
    pub fn av(msg: impl Into<String>) -> Self {
        Self::Av(msg.into())
    }

    /// Create a server error
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

// Conversions from external error types

impl From<ffmpeg_next::Error> for ArgonError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Av(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for ArgonError {
    fn from(err: gstreamer::glib::Error) -> Self {
        Self::Gst(err.to_string())
    }
}

impl From<gstreamer::glib::BoolError> for ArgonError {
    fn from(err: gstreamer::glib::BoolError) -> Self {
        Self::Gst(err.to_string())
    }
}

impl From<gstreamer::StateChangeError> for ArgonError {
    fn from(err: gstreamer::StateChangeError) -> Self {
        Self::Gst(err.to_string())
    }
}

impl From<libpulse_binding::error::PAErr> for ArgonError {
    fn from(err: libpulse_binding::error::PAErr) -> Self {
        Self::Pulse(err.to_string())
    }
}

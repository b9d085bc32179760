//! Argon CLI
//!
//! Single-host HTTP media-streaming gateway for cameras, screens and
//! audio.
//!
//! # Usage
//!
//! ```bash
//! # List available sources
//! argon --list-sources
//!
//! # Serve a camera as fragmented MP4 on port 8080
//! argon --port 8080 --default-video-source cam-017
//! ```

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use argon_core::settings::Settings;
use argon_core::types::{StreamFormat, VideoEncoderKind, VideoOrientation};
use argon_core::Gateway;

/// HTTP media-streaming gateway for cameras, screens and audio
#[derive(Parser)]
#[command(name = "argon")]
#[command(version)]
#[command(about, long_about = None)]
#[command(after_help = "URL format:\n  \
    Web interface URL\n   http://[address]:[port]/[url-path]\n  \
    Control URL\n   http://[address]:[port]/[url-path]/ctrl/[cmd]\n   (cmds: info)\n  \
    Stream URL\n   http://[address]:[port]/[url-path]/stream?[param1]=[value1]&[paramN]=[valueN]\n   \
    (params: stream-format, video-source, audio-source, audio-volume, audio-source-muted, video-orientation)")]
struct Cli {
    /// A path portion of URL. Server rejects requests with invalid
    /// path. If path is not given it will be generated.
    #[arg(short = 'u', long, default_value = "")]
    url_path: String,

    /// Listening port. Port 0 means any port.
    #[arg(short = 'p', long, default_value_t = 0)]
    port: u16,

    /// IP address to listen on. Missing or 0.0.0.0 means listen for
    /// requests on all available interfaces.
    #[arg(short = 'a', long, default_value = "")]
    address: String,

    /// Network interface to listen on. This option works only when
    /// --address is not set.
    #[arg(short = 'i', long, default_value = "")]
    ifname: String,

    /// Set the default stream format. Supported formats: mp4, mpegts,
    /// mp3.
    #[arg(long, default_value = "mp4")]
    default_stream_format: String,

    /// Set the id of default video source. Use --list-video-sources to
    /// get available sources. Missing or empty means that by default
    /// video is disabled.
    #[arg(long, default_value = "")]
    default_video_source: String,

    /// Set the id of default audio source. Use --list-audio-sources to
    /// get available sources. Missing or empty means that by default
    /// audio is disabled.
    #[arg(long, default_value = "")]
    default_audio_source: String,

    /// Set the default video orientation. Supported orientations:
    /// auto, landscape, inverted-landscape, portrait, inverted-portrait.
    #[arg(long, default_value = "auto")]
    default_video_orientation: String,

    /// Set the default audio volume. Valid values are in a range
    /// 0.0-10.0. Value 0 mutes the audio. Value 1 means volume is not
    /// changed.
    #[arg(long, default_value_t = 1.0)]
    default_audio_volume: f32,

    /// By default the followed playback stream stays audible. When
    /// enabled, the captured application is muted while casting.
    #[arg(long, default_value_t = false)]
    default_audio_source_muted: bool,

    /// URL parameters in a request are ignored. Only default options
    /// are used.
    #[arg(long, default_value_t = false)]
    ignore_url_params: bool,

    /// Show all video and audio sources detected.
    #[arg(long, default_value_t = false)]
    list_sources: bool,

    /// Show all video sources detected.
    #[arg(long, default_value_t = false)]
    list_video_sources: bool,

    /// Show all audio sources detected.
    #[arg(long, default_value_t = false)]
    list_audio_sources: bool,

    /// Requests for web interface are ignored. Only stream requests are
    /// accepted.
    #[arg(long, default_value_t = false)]
    disable_web_ui: bool,

    /// Requests to control API are ignored. Web UI cannot work when
    /// API is disabled.
    #[arg(long, default_value_t = false)]
    disable_ctrl_api: bool,

    /// Print (to stdout) details of every request received.
    #[arg(long, default_value_t = false)]
    log_requests: bool,

    /// File where details of every received request are logged.
    #[arg(long, default_value = "")]
    log_file: String,

    /// Force specific video encoder. Supported values: auto, nvenc,
    /// v4l2, x264.
    #[arg(long, default_value = "auto")]
    video_encoder: String,

    /// Configuration file. When the file doesn't exist, it is created
    /// based on command-line options provided. Configuration file takes
    /// precedence over any conflicting command-line options.
    #[arg(short = 'c', long, default_value = "")]
    config_file: String,

    /// Enable debugging logs (stderr).
    #[arg(short = 'd', long, default_value_t = false)]
    debug: bool,

    /// File where debugging logs are written when --debug is enabled
    /// (instead of stderr).
    #[arg(long, default_value = "")]
    debug_file: String,
}

fn settings_from_cli(cli: &Cli) -> Result<Settings> {
    let stream_format = StreamFormat::from_str_opt(cli.default_stream_format.trim())
        .ok_or_else(|| anyhow::anyhow!("invalid option: default-stream-format"))?;
    let video_orientation = VideoOrientation::from_str_opt(cli.default_video_orientation.trim())
        .ok_or_else(|| anyhow::anyhow!("invalid option: default-video-orientation"))?;
    let video_encoder = VideoEncoderKind::from_str_opt(cli.video_encoder.trim())
        .ok_or_else(|| anyhow::anyhow!("invalid option: video-encoder"))?;

    let settings = Settings {
        url_path: cli.url_path.clone(),
        address: cli.address.clone(),
        ifname: cli.ifname.clone(),
        port: cli.port,
        video_encoder,
        stream_format,
        video_source: cli.default_video_source.clone(),
        audio_source: cli.default_audio_source.clone(),
        audio_volume: cli.default_audio_volume,
        video_orientation,
        audio_source_muted: cli.default_audio_source_muted,
        ignore_url_params: cli.ignore_url_params,
        disable_web_ui: cli.disable_web_ui,
        disable_ctrl_api: cli.disable_ctrl_api,
        log_requests: cli.log_requests,
        log_file: cli.log_file.clone(),
        config_file: cli.config_file.clone(),
        debug: cli.debug,
        debug_file: cli.debug_file.clone(),
    };

    Ok(settings.finalize()?)
}

fn init_logging(debug: bool, debug_file: &str) -> Result<()> {
    let level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("argon_core={level},argon_cli={level}")));

    if debug && !debug_file.is_empty() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(debug_file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, &cli.debug_file)?;

    if cli.list_sources {
        println!("Video sources:\n{}", argon_core::video_sources_table());
        println!("Audio sources:\n{}", argon_core::audio_sources_table()?);
        return Ok(());
    }
    if cli.list_video_sources {
        println!("Video sources:\n{}", argon_core::video_sources_table());
        return Ok(());
    }
    if cli.list_audio_sources {
        println!("Audio sources:\n{}", argon_core::audio_sources_table()?);
        return Ok(());
    }

    let settings = settings_from_cli(&cli)?;

    let mut gateway = Gateway::new(settings);

    let queue = gateway.queue();
    ctrlc::set_handler(move || {
        queue.enqueue(argon_core::Event::StopServer);
    })?;

    gateway.run()?;
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

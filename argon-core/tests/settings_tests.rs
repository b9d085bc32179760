//! Integration tests for settings persistence

use argon_core::settings::Settings;
use argon_core::types::{StreamFormat, VideoEncoderKind, VideoOrientation};
use tempfile::TempDir;

fn sample_settings(config_file: String) -> Settings {
    Settings {
        url_path: "cast".into(),
        address: "127.0.0.1".into(),
        port: 8080,
        video_encoder: VideoEncoderKind::X264,
        stream_format: StreamFormat::MpegTs,
        video_source: "cam-017".into(),
        audio_source: "mic-042".into(),
        audio_volume: 2.5,
        video_orientation: VideoOrientation::Portrait,
        audio_source_muted: true,
        ignore_url_params: true,
        disable_web_ui: true,
        disable_ctrl_api: false,
        log_requests: true,
        config_file,
        ..Default::default()
    }
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("argon.conf");
    let path_str = path.to_str().unwrap().to_string();

    let saved = sample_settings(path_str.clone()).finalize().unwrap();
    assert!(path.is_file());

    // a second start loads the same values back
    let loaded = Settings {
        config_file: path_str,
        ..Default::default()
    }
    .finalize()
    .unwrap();

    assert_eq!(loaded, saved);
}

#[test]
fn test_config_file_written_when_absent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new.conf");

    let settings = Settings {
        url_path: "x".into(),
        config_file: path.to_str().unwrap().into(),
        ..Default::default()
    }
    .finalize()
    .unwrap();

    assert!(path.is_file());
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[General]"));
    assert!(content.contains("url-path"));
    assert_eq!(settings.url_path, "x");
}

#[test]
fn test_invalid_file_values_keep_cli_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.conf");
    std::fs::write(
        &path,
        "[General]\nport=notaport\nvideo-encoder=quicksync\ndefault-stream-format=ogg\n",
    )
    .unwrap();

    let settings = Settings {
        url_path: "x".into(),
        port: 9000,
        video_encoder: VideoEncoderKind::Nvenc,
        stream_format: StreamFormat::Mp4,
        config_file: path.to_str().unwrap().into(),
        ..Default::default()
    }
    .finalize()
    .unwrap();

    assert_eq!(settings.port, 9000);
    assert_eq!(settings.video_encoder, VideoEncoderKind::Nvenc);
    assert_eq!(settings.stream_format, StreamFormat::Mp4);
}

#[test]
fn test_missing_url_path_is_generated() {
    let settings = Settings::default().finalize().unwrap();
    assert_eq!(settings.url_path.len(), 5);
    assert!(settings.url_path.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn test_url_param_enum_spellings() {
    let mut settings = Settings::default();

    settings.update_param("stream-format", "mpegts");
    assert_eq!(settings.stream_format, StreamFormat::MpegTs);

    settings.update_param("video-orientation", "inverted-portrait");
    assert_eq!(
        settings.video_orientation,
        VideoOrientation::InvertedPortrait
    );

    settings.update_param("audio-source-muted", "enabled");
    assert!(settings.audio_source_muted);
    settings.update_param("audio-source-muted", "off");
    assert!(!settings.audio_source_muted);
}

#[test]
fn test_unknown_url_param_is_ignored() {
    let mut settings = Settings::default();
    let before = settings.clone();
    settings.update_param("bitrate", "9000");
    assert_eq!(settings, before);
}

#[test]
fn test_source_off_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("off.conf");
    std::fs::write(
        &path,
        "[General]\ndefault-video-source=disabled\ndefault-audio-source=no\n",
    )
    .unwrap();

    let settings = Settings {
        url_path: "x".into(),
        video_source: "cam-001".into(),
        audio_source: "mic-001".into(),
        config_file: path.to_str().unwrap().into(),
        ..Default::default()
    }
    .finalize()
    .unwrap();

    assert!(settings.video_source.is_empty());
    assert!(settings.audio_source.is_empty());
}

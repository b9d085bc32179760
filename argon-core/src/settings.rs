//! Runtime settings
//!
//! Settings come from three places, later sources overriding earlier
//! ones: built-in defaults, the command line, and the INI config file.
//! A per-request copy may additionally be updated from URL query
//! parameters. When a config-file path is given but the file does not
//! exist yet, the effective settings are written there for the next run.

use ini::Ini;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ArgonError, Result};
use crate::types::{StreamFormat, VideoEncoderKind, VideoOrientation};

pub const SECTION_NAME: &str = "General";

pub const URL_PATH_OPT: &str = "url-path";
pub const ADDRESS_OPT: &str = "address";
pub const IFNAME_OPT: &str = "ifname";
pub const PORT_OPT: &str = "port";
pub const VIDEO_ENCODER_OPT: &str = "video-encoder";
pub const STREAM_FORMAT_OPT: &str = "stream-format";
pub const VIDEO_SOURCE_OPT: &str = "video-source";
pub const AUDIO_SOURCE_OPT: &str = "audio-source";
pub const AUDIO_VOLUME_OPT: &str = "audio-volume";
pub const AUDIO_SOURCE_MUTED_OPT: &str = "audio-source-muted";
pub const VIDEO_ORIENTATION_OPT: &str = "video-orientation";
pub const IGNORE_URL_PARAMS_OPT: &str = "ignore-url-params";
pub const DISABLE_WEB_UI_OPT: &str = "disable-web-ui";
pub const DISABLE_CTRL_API_OPT: &str = "disable-ctrl-api";
pub const LOG_REQUESTS_OPT: &str = "log-requests";
pub const LOG_FILE_OPT: &str = "log-file";

/// Query parameters recognized on the stream URL
pub const URL_OPTS: [&str; 6] = [
    STREAM_FORMAT_OPT,
    VIDEO_SOURCE_OPT,
    AUDIO_SOURCE_OPT,
    AUDIO_VOLUME_OPT,
    AUDIO_SOURCE_MUTED_OPT,
    VIDEO_ORIENTATION_OPT,
];

const OFF_VALUES: [&str; 6] = ["false", "no", "off", "0", "disable", "disabled"];
const ON_VALUES: [&str; 6] = ["true", "yes", "on", "1", "enable", "enabled"];

fn default_key(key: &str) -> String {
    format!("default-{key}")
}

/// Parse a truthy/falsy spelling; `None` for anything else
pub fn parse_bool(value: &str) -> Option<bool> {
    let v = value.trim();
    if ON_VALUES.contains(&v) {
        return Some(true);
    }
    if OFF_VALUES.contains(&v) {
        return Some(false);
    }
    None
}

fn is_off_value(value: &str) -> bool {
    OFF_VALUES.contains(&value.trim())
}

fn random_url_path() -> String {
    const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Effective gateway configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url_path: String,
    pub address: String,
    pub ifname: String,
    pub port: u16,
    pub video_encoder: VideoEncoderKind,
    pub stream_format: StreamFormat,
    /// Empty means video disabled by default
    pub video_source: String,
    /// Empty means audio disabled by default
    pub audio_source: String,
    pub audio_volume: f32,
    pub video_orientation: VideoOrientation,
    pub audio_source_muted: bool,
    pub ignore_url_params: bool,
    pub disable_web_ui: bool,
    pub disable_ctrl_api: bool,
    pub log_requests: bool,
    pub log_file: String,
    pub config_file: String,
    pub debug: bool,
    pub debug_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url_path: String::new(),
            address: String::new(),
            ifname: String::new(),
            port: 0,
            video_encoder: VideoEncoderKind::Auto,
            stream_format: StreamFormat::Mp4,
            video_source: String::new(),
            audio_source: String::new(),
            audio_volume: 1.0,
            video_orientation: VideoOrientation::Auto,
            audio_source_muted: false,
            ignore_url_params: false,
            disable_web_ui: false,
            disable_ctrl_api: false,
            log_requests: false,
            log_file: String::new(),
            config_file: String::new(),
            debug: false,
            debug_file: String::new(),
        }
    }
}

impl Settings {
    /// Finish construction: load the config file if present, validate,
    /// and persist the settings when the file path is new.
    pub fn finalize(mut self) -> Result<Self> {
        if !self.config_file.is_empty() {
            let readable = std::path::Path::new(&self.config_file).is_file();
            if readable {
                self.load_from_file()?;
            }
            self.check()?;
            if !readable {
                self.save_to_file()?;
            }
        } else {
            self.check()?;
        }

        Ok(self)
    }

    fn load_from_file(&mut self) -> Result<()> {
        debug!("loading config from file: {}", self.config_file);

        let ini = match Ini::load_from_file(&self.config_file) {
            Ok(ini) => ini,
            Err(e) => {
                warn!("failed to read config file: {e}");
                return Ok(());
            }
        };

        let Some(sec) = ini.section(Some(SECTION_NAME)) else {
            warn!("invalid config file: no [{SECTION_NAME}] section");
            return Ok(());
        };

        for (key, value) in sec.iter() {
            self.apply_str(key, value);
        }

        Ok(())
    }

    /// Persist everything except the debug switches, which stay
    /// command-line only.
    pub fn save_to_file(&self) -> Result<()> {
        debug!("saving config to file: {}", self.config_file);

        let mut ini = Ini::new();
        ini.with_section(Some(SECTION_NAME))
            .set(URL_PATH_OPT, self.url_path.clone())
            .set(ADDRESS_OPT, self.address.clone())
            .set(IFNAME_OPT, self.ifname.clone())
            .set(PORT_OPT, self.port.to_string())
            .set(VIDEO_ENCODER_OPT, self.video_encoder.as_str())
            .set(default_key(STREAM_FORMAT_OPT), self.stream_format.as_str())
            .set(default_key(VIDEO_SOURCE_OPT), self.video_source.clone())
            .set(default_key(AUDIO_SOURCE_OPT), self.audio_source.clone())
            .set(default_key(AUDIO_VOLUME_OPT), self.audio_volume.to_string())
            .set(
                default_key(VIDEO_ORIENTATION_OPT),
                self.video_orientation.as_str(),
            )
            .set(
                default_key(AUDIO_SOURCE_MUTED_OPT),
                bool_str(self.audio_source_muted),
            )
            .set(IGNORE_URL_PARAMS_OPT, bool_str(self.ignore_url_params))
            .set(DISABLE_WEB_UI_OPT, bool_str(self.disable_web_ui))
            .set(DISABLE_CTRL_API_OPT, bool_str(self.disable_ctrl_api))
            .set(LOG_REQUESTS_OPT, bool_str(self.log_requests))
            .set(LOG_FILE_OPT, self.log_file.clone());

        ini.write_to_file(&self.config_file)
            .map_err(|e| ArgonError::config(format!("failed to write config file: {e}")))
    }

    /// Apply one `key = value` pair from the config file. Invalid values
    /// are logged and ignored so the command-line defaults survive.
    fn apply_str(&mut self, key: &str, value: &str) {
        let invalid = || warn!("invalid '{key}' value: {value}");

        match key {
            URL_PATH_OPT => self.url_path = value.trim().to_string(),
            ADDRESS_OPT => self.address = value.trim().to_string(),
            IFNAME_OPT => self.ifname = value.trim().to_string(),
            PORT_OPT => match value.trim().parse::<u16>() {
                Ok(p) => self.port = p,
                Err(_) => invalid(),
            },
            VIDEO_ENCODER_OPT => match VideoEncoderKind::from_str_opt(value.trim()) {
                Some(v) => self.video_encoder = v,
                None => invalid(),
            },
            IGNORE_URL_PARAMS_OPT => match parse_bool(value) {
                Some(v) => self.ignore_url_params = v,
                None => invalid(),
            },
            DISABLE_WEB_UI_OPT => match parse_bool(value) {
                Some(v) => self.disable_web_ui = v,
                None => invalid(),
            },
            DISABLE_CTRL_API_OPT => match parse_bool(value) {
                Some(v) => self.disable_ctrl_api = v,
                None => invalid(),
            },
            LOG_REQUESTS_OPT => match parse_bool(value) {
                Some(v) => self.log_requests = v,
                None => invalid(),
            },
            LOG_FILE_OPT => self.log_file = value.trim().to_string(),
            _ => {
                if let Some(plain) = key.strip_prefix("default-") {
                    self.update_param(plain, value);
                } else {
                    warn!("unknown config key: {key}");
                }
            }
        }
    }

    /// Apply one of the URL-parameter options (`stream-format`,
    /// `video-source`, `audio-source`, `audio-volume`,
    /// `audio-source-muted`, `video-orientation`). Invalid values are
    /// logged and ignored.
    pub fn update_param(&mut self, key: &str, value: &str) {
        let invalid = || warn!("invalid '{key}' param: {value}");

        match key {
            STREAM_FORMAT_OPT => match StreamFormat::from_str_opt(value.trim()) {
                Some(v) => self.stream_format = v,
                None => invalid(),
            },
            VIDEO_SOURCE_OPT => {
                if is_off_value(value) {
                    self.video_source.clear();
                } else {
                    self.video_source = value.trim().to_string();
                }
            }
            AUDIO_SOURCE_OPT => {
                if is_off_value(value) {
                    self.audio_source.clear();
                } else {
                    self.audio_source = value.trim().to_string();
                }
            }
            AUDIO_VOLUME_OPT => match value.trim().parse::<f32>() {
                Ok(v) if (0.0..=10.0).contains(&v) => self.audio_volume = v,
                _ => invalid(),
            },
            AUDIO_SOURCE_MUTED_OPT => match parse_bool(value) {
                Some(v) => self.audio_source_muted = v,
                None => invalid(),
            },
            VIDEO_ORIENTATION_OPT => match VideoOrientation::from_str_opt(value.trim()) {
                Some(v) => self.video_orientation = v,
                None => invalid(),
            },
            _ => warn!("unknown url param: {key}"),
        }
    }

    /// Validate and normalize; generates a random url-path when none is
    /// configured.
    pub fn check(&mut self) -> Result<()> {
        self.url_path = self.url_path.trim_matches('/').trim().to_string();
        if self.url_path.is_empty() {
            self.url_path = random_url_path();
        }

        self.address = self.address.trim().to_string();
        self.ifname = self.ifname.trim().to_string();

        if is_off_value(&self.video_source) {
            self.video_source.clear();
        }
        if is_off_value(&self.audio_source) {
            self.audio_source.clear();
        }
        self.video_source = self.video_source.trim().to_string();
        self.audio_source = self.audio_source.trim().to_string();

        if !(0.0..=10.0).contains(&self.audio_volume) {
            return Err(ArgonError::config(format!(
                "invalid option: {}",
                default_key(AUDIO_VOLUME_OPT)
            )));
        }

        self.log_file = self.log_file.trim().to_string();
        if !self.log_file.is_empty() && std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .is_err()
        {
            warn!("failed to create log file: {}", self.log_file);
            self.log_file.clear();
        }

        Ok(())
    }
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_falsy() {
        for v in ["true", "yes", "on", "1", "enable", "enabled"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "no", "off", "0", "disable", "disabled"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_off_value_clears_source() {
        let mut s = Settings {
            video_source: "cam-001".into(),
            ..Default::default()
        };
        s.update_param(VIDEO_SOURCE_OPT, "off");
        assert!(s.video_source.is_empty());
    }

    #[test]
    fn test_volume_range() {
        let mut s = Settings::default();
        s.update_param(AUDIO_VOLUME_OPT, "2.5");
        assert_eq!(s.audio_volume, 2.5);
        s.update_param(AUDIO_VOLUME_OPT, "11");
        assert_eq!(s.audio_volume, 2.5);
        s.update_param(AUDIO_VOLUME_OPT, "-1");
        assert_eq!(s.audio_volume, 2.5);
    }

    #[test]
    fn test_random_url_path_shape() {
        let p = random_url_path();
        assert_eq!(p.len(), 5);
        assert!(p.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_check_trims_url_path() {
        let mut s = Settings {
            url_path: "/cast/".into(),
            ..Default::default()
        };
        s.check().unwrap();
        assert_eq!(s.url_path, "cast");
    }
}

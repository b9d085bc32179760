//! Gateway composition
//!
//! Owns the HTTP server and at most one caster, wires them together
//! through the event queue and routes requests: the web UI page on the
//! url-path root, `/stream` for live sessions, `/ctrl/info` for the
//! control API. A new stream request preempts the running session.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::caster::{self, Caster};
use crate::error::Result;
use crate::event::{Event, EventQueue};
use crate::probe;
use crate::server::{ConnectionId, Header, HttpServer};
use crate::settings::{self, Settings};
use crate::types::{AudioSourceInfo, CasterState, VideoSourceInfo};
use crate::webui::WEBUI_HTML;

pub const APP_NAME: &str = "argon";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const STREAM_URL_PATH: &str = "/stream";
const CTRL_URL_PATH: &str = "/ctrl";
const CONNECTION_LIMIT: usize = 5;

/// No connection id; ids start at 1
const NO_CONN: u32 = 0;

enum RequestType {
    Invalid,
    WebUi,
    Stream,
    Ctrl,
    Unknown,
}

/// State the request-routing closures share with the gateway
struct Router {
    settings: Settings,
    queue: Arc<EventQueue>,
    server: parking_lot::Mutex<Option<Arc<HttpServer>>>,
    casting_conn: AtomicU32,
}

impl Router {
    fn server(&self) -> Option<Arc<HttpServer>> {
        self.server.lock().clone()
    }

    fn determine_request_type(&self, url: &str) -> RequestType {
        if !url.starts_with(&self.settings.url_path) {
            debug!("invalid request");
            return RequestType::Invalid;
        }

        if url == self.settings.url_path {
            debug!("web ui request");
            return RequestType::WebUi;
        }

        if url == format!("{}{}", self.settings.url_path, STREAM_URL_PATH) {
            debug!("stream request");
            return RequestType::Stream;
        }

        if url.starts_with(&format!("{}{}", self.settings.url_path, CTRL_URL_PATH)) {
            debug!("ctrl request");
            return RequestType::Ctrl;
        }

        RequestType::Unknown
    }

    /// Timestamped request log on stdout and/or the log file
    fn log_connection(&self, message: &str, conn_id: Option<ConnectionId>) {
        if !self.settings.log_requests && self.settings.log_file.is_empty() {
            return;
        }

        let client = conn_id
            .and_then(|id| self.server().and_then(|s| s.client_address(id)))
            .map(|addr| format!(" (received from {addr})"))
            .unwrap_or_default();
        let line = format!(
            "[{}] {}{}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message,
            client
        );

        if self.settings.log_requests {
            print!("{line}");
        }
        if !self.settings.log_file.is_empty() {
            use std::io::Write;
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.settings.log_file)
            {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }

    fn handle_web_request(&self, id: ConnectionId, headers: &mut Vec<Header>) -> u16 {
        headers.push(("Content-Type".into(), "text/html".into()));
        if let Some(server) = self.server() {
            server.push_data(id, WEBUI_HTML.as_bytes());
        }
        200
    }

    fn handle_stream_request(&self, id: ConnectionId, headers: &mut Vec<Header>) -> u16 {
        let mut settings = self.settings.clone();

        if !settings.ignore_url_params {
            if let Some(server) = self.server() {
                for key in settings::URL_OPTS {
                    if let Some(value) = server.query_value(id, key) {
                        debug!("request url has param: {key}={value}");
                        settings.update_param(key, &value);
                    }
                }
            }
        }

        headers.push((
            "Content-Type".into(),
            settings.stream_format.content_type().into(),
        ));
        headers.push(("Accept-Ranges".into(), "none".into()));

        self.queue.enqueue(Event::StopCaster);
        self.queue.enqueue(Event::StartCaster {
            conn_id: id,
            settings: Box::new(settings),
        });

        200
    }

    fn handle_ctrl_request(
        &self,
        id: ConnectionId,
        url: &str,
        headers: &mut Vec<Header>,
    ) -> u16 {
        if url != format!("{}{}/info", self.settings.url_path, CTRL_URL_PATH) {
            warn!("unknown ctrl request");
            return 404;
        }

        let video_sources = probe::video_sources();
        let audio_sources = probe::audio_sources().unwrap_or_else(|e| {
            warn!("audio source detection failed: {e}");
            Vec::new()
        });

        let default_dev = |name: &str, present: bool| -> String {
            if present {
                name.to_string()
            } else {
                String::new()
            }
        };
        let video_present = video_sources
            .iter()
            .any(|s| s.name == self.settings.video_source);
        let audio_present = audio_sources
            .iter()
            .any(|s| s.name == self.settings.audio_source);

        let info = InfoResponse {
            server_name: APP_NAME,
            server_version: APP_VERSION,
            platform: "generic",
            video_sources,
            audio_sources,
            default_video_source: default_dev(&self.settings.video_source, video_present),
            default_audio_source: default_dev(&self.settings.audio_source, audio_present),
            default_video_orientation: self.settings.video_orientation.as_str(),
            default_stream_format: self.settings.stream_format.as_str(),
            default_audio_volume: self.settings.audio_volume.to_string(),
            default_audio_source_muted: self.settings.audio_source_muted,
        };

        let Ok(body) = serde_json::to_string(&info) else {
            return 500;
        };

        headers.push(("Content-Type".into(), "application/json".into()));
        if let Some(server) = self.server() {
            server.push_data(id, body.as_bytes());
        }

        200
    }

    fn handle_request(&self, id: ConnectionId, url: &str, headers: &mut Vec<Header>) -> u16 {
        let url = url.trim_matches('/').to_string();
        match self.determine_request_type(&url) {
            RequestType::Invalid => 404,
            RequestType::WebUi => {
                if self.settings.disable_web_ui {
                    debug!("web ui is disabled");
                    return 404;
                }
                self.log_connection("web interface request", Some(id));
                self.handle_web_request(id, headers)
            }
            RequestType::Stream => {
                self.log_connection("stream request", Some(id));
                self.handle_stream_request(id, headers)
            }
            RequestType::Ctrl => {
                if self.settings.disable_ctrl_api {
                    debug!("ctrl api is disabled");
                    return 404;
                }
                self.log_connection("control request", Some(id));
                self.handle_ctrl_request(id, &url, headers)
            }
            RequestType::Unknown => {
                self.log_connection("unknown request", Some(id));
                404
            }
        }
    }
}

#[derive(Serialize)]
struct InfoResponse {
    server_name: &'static str,
    server_version: &'static str,
    platform: &'static str,
    video_sources: Vec<VideoSourceInfo>,
    audio_sources: Vec<AudioSourceInfo>,
    default_video_source: String,
    default_audio_source: String,
    default_video_orientation: &'static str,
    default_stream_format: &'static str,
    default_audio_volume: String,
    default_audio_source_muted: bool,
}

pub struct Gateway {
    router: Arc<Router>,
    queue: Arc<EventQueue>,
    server: Option<Arc<HttpServer>>,
    caster: Option<Caster>,
    startup_error: Option<crate::error::ArgonError>,
}

impl Gateway {
    pub fn new(settings: Settings) -> Self {
        let queue = Arc::new(EventQueue::new());
        let router = Arc::new(Router {
            settings,
            queue: queue.clone(),
            server: parking_lot::Mutex::new(None),
            casting_conn: AtomicU32::new(NO_CONN),
        });

        Self {
            router,
            queue,
            server: None,
            caster: None,
            startup_error: None,
        }
    }

    /// Handle for shutdown from a signal handler: enqueue `StopServer`
    pub fn queue(&self) -> Arc<EventQueue> {
        self.queue.clone()
    }

    /// Run the event loop on the calling thread until shutdown.
    /// A failure to bring the server up ends the loop and is returned.
    pub fn run(&mut self) -> Result<()> {
        self.queue.enqueue(Event::StartServer);

        let queue = self.queue.clone();
        queue.run(|event| self.handle_event(event));

        // a StopServer may never have arrived (queue shut down directly)
        self.stop_caster();
        self.stop_server();

        match self.startup_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StartServer => {
                if let Err(e) = self.start_server() {
                    error!("failed to start server: {e}");
                    self.startup_error = Some(e);
                    self.queue.shutdown();
                }
            }
            Event::StartCaster { conn_id, settings } => {
                self.stop_caster();
                self.start_caster(conn_id, *settings);
            }
            Event::StopCaster => self.stop_caster(),
            Event::StopServer => {
                self.stop_caster();
                self.stop_server();
                debug!("server ended");
                self.queue.shutdown();
            }
            Event::CasterStarted(conn_id) => self.notify_casting_started(conn_id),
            Event::CasterEnded => self.notify_casting_ended(),
        }
    }

    fn start_server(&mut self) -> Result<()> {
        let config = crate::server::Config {
            port: self.router.settings.port,
            address: self.router.settings.address.clone(),
            ifname: self.router.settings.ifname.clone(),
            connection_limit: CONNECTION_LIMIT,
        };

        let handler_router = self.router.clone();
        let removed_router = self.router.clone();

        let server = Arc::new(HttpServer::new(
            config,
            Box::new(move |id, url, headers| handler_router.handle_request(id, url, headers)),
            Some(Box::new(move |id| {
                if removed_router.casting_conn.load(Ordering::SeqCst) == id {
                    debug!("connection was removed, so stopping caster");
                    removed_router.queue.enqueue(Event::StopCaster);
                }
            })),
        )?);

        *self.router.server.lock() = Some(server.clone());
        self.server = Some(server);

        self.notify_server_started();
        Ok(())
    }

    fn stop_server(&mut self) {
        *self.router.server.lock() = None;
        self.server = None;
        self.caster = None;
    }

    fn start_caster(&mut self, conn_id: ConnectionId, settings: Settings) {
        let Some(server) = &self.server else {
            return;
        };

        let mut config = caster::Config {
            stream_format: settings.stream_format,
            video_source: settings.video_source.clone(),
            audio_source: settings.audio_source.clone(),
            audio_volume: settings.audio_volume,
            video_orientation: settings.video_orientation,
            video_encoder: settings.video_encoder,
            stream_author: APP_NAME.to_string(),
            mute_audio_source: settings.audio_source_muted,
            ..Default::default()
        };

        if config.stream_format.audio_only() && !config.video_source.is_empty() {
            warn!("stream-format does not support video, so disabling video source");
            config.video_source.clear();
        }

        let data_server = server.clone();
        let data_ready = Box::new(move |data: &[u8]| {
            // None is the normal client-gone case; the removed handler
            // stops the caster through the queue
            data_server.push_data(conn_id, data);
            data.len()
        });

        let state_queue = self.queue.clone();
        let state_changed = Box::new(move |state: CasterState| match state {
            CasterState::Started => state_queue.enqueue(Event::CasterStarted(conn_id)),
            CasterState::Terminating => {
                state_queue.enqueue(Event::CasterEnded);
                state_queue.enqueue(Event::StopCaster);
            }
            _ => {}
        });

        let mut caster = match Caster::new(config, data_ready, state_changed) {
            Ok(caster) => caster,
            Err(e) => {
                error!("failed to init caster: {e}");
                server.drop_connection(conn_id);
                return;
            }
        };

        caster.start();

        self.router.casting_conn.store(conn_id, Ordering::SeqCst);
        self.caster = Some(caster);
    }

    fn stop_caster(&mut self) {
        if self.caster.is_some() {
            let conn_id = self.router.casting_conn.swap(NO_CONN, Ordering::SeqCst);
            if conn_id != NO_CONN {
                if let Some(server) = &self.server {
                    server.drop_connection(conn_id);
                }
            }
            self.caster = None;
            self.queue.enqueue(Event::CasterEnded);
        }
    }

    fn notify_casting_started(&self, conn_id: ConnectionId) {
        if self.server.is_none() || self.caster.is_none() {
            return;
        }

        self.router.log_connection("casting started", Some(conn_id));

        let client = self
            .server
            .as_ref()
            .and_then(|s| s.client_address(conn_id))
            .unwrap_or_else(|| "unknown".to_string());
        debug!("casting started: client address={client}");
    }

    fn notify_casting_ended(&self) {
        if self.server.is_none() {
            return;
        }
        self.router.log_connection("casting ended", None);
        debug!("casting ended");
    }

    /// Print the web and stream URLs for every listening address
    fn notify_server_started(&self) {
        let Some(server) = &self.server else {
            return;
        };

        let port = server.port();
        let url_path = &self.router.settings.url_path;
        let addrs = server.listening_addresses();

        println!("Use the following URL(s) to open web-interface:");
        for addr in &addrs {
            println!("{}", format_url(addr, port, url_path, ""));
        }

        println!("\nUse the following URL(s) to start streaming with default configuration:");
        for addr in &addrs {
            println!("{}", format_url(addr, port, url_path, STREAM_URL_PATH));
        }
    }
}

fn format_url(addr: &str, port: u16, url_path: &str, suffix: &str) -> String {
    if addr.contains(':') {
        format!("http://[{addr}]:{port}/{url_path}{suffix}")
    } else {
        format!("http://{addr}:{port}/{url_path}{suffix}")
    }
}

/// Aligned `id | name` table for the source listing commands
pub fn sources_table(sources: &[(String, String)]) -> String {
    let mut max_id = 4;
    let mut max_name = 4;
    for (id, name) in sources {
        max_id = max_id.max(id.len());
        max_name = max_name.max(name.len());
    }

    let mut out = String::new();
    out.push_str(&format!(
        "| {:<idw$} | {:<namew$} |\n",
        "id",
        "name",
        idw = max_id,
        namew = max_name
    ));
    out.push_str(&format!(
        "+-{:-<idw$}-+-{:-<namew$}-+\n",
        "",
        "",
        idw = max_id,
        namew = max_name
    ));
    for (id, name) in sources {
        out.push_str(&format!(
            "| {:<idw$} | {:<namew$} |\n",
            id,
            name,
            idw = max_id,
            namew = max_name
        ));
    }

    out
}

/// Listing for `--list-video-sources`
pub fn video_sources_table() -> String {
    let sources: Vec<_> = probe::video_sources()
        .into_iter()
        .map(|s| (s.name, s.friendly_name))
        .collect();
    sources_table(&sources)
}

/// Listing for `--list-audio-sources`
pub fn audio_sources_table() -> Result<String> {
    let sources: Vec<_> = probe::audio_sources()?
        .into_iter()
        .map(|s| (s.name, s.friendly_name))
        .collect();
    Ok(sources_table(&sources))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_url() {
        assert_eq!(
            format_url("192.168.1.5", 8080, "cast", "/stream"),
            "http://192.168.1.5:8080/cast/stream"
        );
        assert_eq!(
            format_url("2001:db8::1", 8080, "cast", ""),
            "http://[2001:db8::1]:8080/cast"
        );
    }

    #[test]
    fn test_sources_table_alignment() {
        let table = sources_table(&[
            ("cam-017".into(), "HD Webcam".into()),
            ("test".into(), "Test".into()),
        ]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("| id"));
        assert!(lines[1].starts_with("+-"));
        let widths: Vec<_> = lines.iter().map(|l| l.len()).collect();
        assert!(widths.iter().all(|w| *w == widths[0]));
    }
}

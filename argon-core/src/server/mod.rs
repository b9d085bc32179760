//! Streaming HTTP server
//!
//! HTTP/1.1 over plain threads: one accept thread, one writer thread
//! per connection, one ghost reaper. Every connection owns a byte ring
//! filled through [`HttpServer::push_data`]; an empty ring suspends the
//! connection (a timestamped condvar wait), a push resumes it. Bodies
//! are length-unknown and close-delimited, which is what a live muxed
//! stream needs.
//!
//! Ghosts are collected two ways: the reaper removes connections that
//! stay suspended longer than `MAX_SUSPEND_TIME`, and a writer whose
//! socket makes no progress for the same window removes itself (a
//! stalled client keeps the ring non-empty, so it never suspends).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::buffer::DataBuffer;
use crate::error::{ArgonError, Result};

pub type ConnectionId = u32;
pub type Header = (String, String);

/// Routes one request: receives the id and url path, may push an
/// immediate body and add response headers, returns the HTTP status.
/// A status of 400 or above rejects the connection.
pub type ConnectionHandler = Box<dyn Fn(ConnectionId, &str, &mut Vec<Header>) -> u16 + Send + Sync>;

/// Fired after a connection is gone, whatever the reason
pub type ConnectionRemovedHandler = Box<dyn Fn(ConnectionId) + Send + Sync>;

pub const ANY_ADDRESS: &str = "0.0.0.0";

const CONNECTION_BUF_SIZE: usize = 0x100_0000; // 16 MiB
const CONNECTION_BUF_MAX: usize = CONNECTION_BUF_SIZE * 10;
const MAX_SUSPEND_TIME: Duration = Duration::from_secs(5);
const MAX_REQUEST_SIZE: usize = 8192;
const WRITE_CHUNK_SIZE: usize = 0x10000;

#[derive(Debug, Clone)]
pub struct Config {
    /// 0 picks any free port
    pub port: u16,
    /// Address to bind; empty or `0.0.0.0` binds every interface
    pub address: String,
    /// Interface to bind (IPv4 preferred); wins over `address` when set
    pub ifname: String,
    pub connection_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            address: String::new(),
            ifname: String::new(),
            connection_limit: 10,
        }
    }
}

struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    /// Clone of the socket, kept to force-close from other threads
    stream: TcpStream,
    buf: DataBuffer,
    query: HashMap<String, String>,
    suspended: bool,
    suspend_time: Instant,
    removed: bool,
}

struct Inner {
    handler: ConnectionHandler,
    removed_handler: Option<ConnectionRemovedHandler>,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    cv: Condvar,
    next_id: AtomicU32,
    shutdown: AtomicBool,
    connection_limit: usize,
}

impl Inner {
    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

pub struct HttpServer {
    inner: Arc<Inner>,
    port: u16,
    bound_address: Option<String>,
    accept_thread: Option<JoinHandle<()>>,
    reaper_thread: Option<JoinHandle<()>>,
}

impl HttpServer {
    pub fn new(
        config: Config,
        handler: ConnectionHandler,
        removed_handler: Option<ConnectionRemovedHandler>,
    ) -> Result<Self> {
        let bound_address = if !config.ifname.is_empty() {
            Some(address_for_interface(&config.ifname)?)
        } else if !config.address.is_empty() && config.address != ANY_ADDRESS {
            Some(config.address.clone())
        } else {
            None
        };

        let ip: IpAddr = bound_address
            .as_deref()
            .unwrap_or(ANY_ADDRESS)
            .parse()
            .map_err(|_| ArgonError::server("invalid address"))?;

        let listener = TcpListener::bind((ip, config.port))
            .map_err(|e| ArgonError::server(format!("failed to start server: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ArgonError::server(format!("failed to configure listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| ArgonError::server(format!("failed to read bound port: {e}")))?
            .port();

        let inner = Arc::new(Inner {
            handler,
            removed_handler,
            connections: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            next_id: AtomicU32::new(1),
            shutdown: AtomicBool::new(false),
            connection_limit: config.connection_limit,
        });

        let accept_inner = inner.clone();
        let accept_thread = thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || accept_loop(accept_inner, listener))
            .map_err(|e| ArgonError::server(format!("failed to spawn accept thread: {e}")))?;

        let reaper_inner = inner.clone();
        let reaper_thread = thread::Builder::new()
            .name("http-reaper".to_string())
            .spawn(move || reaper_loop(reaper_inner))
            .map_err(|e| ArgonError::server(format!("failed to spawn reaper thread: {e}")))?;

        debug!("http-server started on port {port}");

        Ok(Self {
            inner,
            port,
            bound_address,
            accept_thread: Some(accept_thread),
            reaper_thread: Some(reaper_thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn shutting_down(&self) -> bool {
        self.inner.shutting_down()
    }

    /// Addresses clients can reach the server on
    pub fn listening_addresses(&self) -> Vec<String> {
        match &self.bound_address {
            Some(addr) => vec![addr.clone()],
            None => machine_addresses(),
        }
    }

    /// Append bytes to a connection's ring (force semantics) and resume
    /// it. `None` when the server is shutting down or the connection is
    /// gone or removed.
    pub fn push_data(&self, id: ConnectionId, data: &[u8]) -> Option<usize> {
        if self.inner.shutting_down() {
            return None;
        }

        let mut connections = self.inner.connections.lock();
        let conn = connections.get_mut(&id)?;
        if conn.removed {
            warn!("failed to push because connection was removed");
            return None;
        }

        trace!(
            "push data: size={}, buf size={}, buf max={}",
            data.len(),
            conn.buf.len(),
            conn.buf.max_size()
        );

        conn.buf.push_exact_force(data);
        conn.suspended = false;
        drop(connections);
        self.inner.cv.notify_all();

        Some(data.len())
    }

    /// Value of a GET query parameter
    pub fn query_value(&self, id: ConnectionId, key: &str) -> Option<String> {
        if self.inner.shutting_down() {
            return None;
        }
        self.inner.connections.lock().get(&id)?.query.get(key).cloned()
    }

    pub fn client_address(&self, id: ConnectionId) -> Option<String> {
        let connections = self.inner.connections.lock();
        let conn = connections.get(&id)?;
        Some(format_client_ip(conn.peer.ip()))
    }

    /// Mark a connection removed and wake it so its writer closes
    pub fn drop_connection(&self, id: ConnectionId) {
        let mut connections = self.inner.connections.lock();
        let Some(conn) = connections.get_mut(&id) else {
            warn!("can't drop because no connection with id: {id}");
            return;
        };

        conn.removed = true;
        conn.suspended = false;
        let _ = conn.stream.shutdown(Shutdown::Both);
        drop(connections);
        self.inner.cv.notify_all();
    }

    /// All interfaces that carry at least one usable address
    pub fn machine_ifs() -> Vec<String> {
        let mut ifs: Vec<String> = if_addrs::get_if_addrs()
            .unwrap_or_default()
            .into_iter()
            .filter(|ifa| !format_client_ip(ifa.ip()).is_empty())
            .map(|ifa| ifa.name)
            .collect();
        ifs.sort();
        ifs.dedup();
        ifs
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        debug!("http-server shutdown started");
        self.inner.shutdown.store(true, Ordering::SeqCst);

        {
            let mut connections = self.inner.connections.lock();
            for conn in connections.values_mut() {
                conn.removed = true;
                conn.suspended = false;
                let _ = conn.stream.shutdown(Shutdown::Both);
            }
        }
        self.inner.cv.notify_all();

        if let Some(t) = self.reaper_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.accept_thread.take() {
            let _ = t.join();
        }

        // writer threads are detached; give them a moment to drain
        let deadline = Instant::now() + Duration::from_secs(2);
        while !self.inner.connections.lock().is_empty() && Instant::now() < deadline {
            self.inner.cv.notify_all();
            thread::sleep(Duration::from_millis(10));
        }

        debug!("http-server shutdown completed");
    }
}

/// All non-link-local addresses of the machine
pub fn machine_addresses() -> Vec<String> {
    let mut addrs: Vec<String> = if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .map(|ifa| format_client_ip(ifa.ip()))
        .filter(|a| !a.is_empty())
        .collect();
    addrs.sort();
    addrs.dedup();
    addrs
}

/// IPv4 (preferred) or IPv6 address of a named interface
fn address_for_interface(ifname: &str) -> Result<String> {
    let addrs = if_addrs::get_if_addrs()
        .map_err(|e| ArgonError::server(format!("failed to enumerate interfaces: {e}")))?;

    let mut v6 = None;
    for ifa in addrs {
        if ifa.name != ifname {
            continue;
        }
        match ifa.ip() {
            IpAddr::V4(ip) => return Ok(ip.to_string()),
            IpAddr::V6(ip) => {
                if v6.is_none() && !is_link_local_v6(&ip) {
                    v6 = Some(ip.to_string());
                }
            }
        }
    }

    v6.ok_or_else(|| ArgonError::InvalidIfname(ifname.to_string()))
}

fn is_link_local_v6(ip: &std::net::Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Printable client address; link-local IPv6 yields an empty string
fn format_client_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if is_link_local_v6(&v6) {
                String::new()
            } else {
                v6.to_string()
            }
        }
    }
}

fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    debug!("http-server accept thread started");

    while !inner.shutting_down() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let conn_inner = inner.clone();
                let spawned = thread::Builder::new()
                    .name("http-conn".to_string())
                    .spawn(move || handle_connection(conn_inner, stream, peer));
                if let Err(e) = spawned {
                    warn!("failed to spawn connection thread: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!("accept error: {e}");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    debug!("http-server accept thread ended");
}

fn reaper_loop(inner: Arc<Inner>) {
    debug!("http-server gc thread started");

    while !inner.shutting_down() {
        thread::sleep(MAX_SUSPEND_TIME / 5);

        let now = Instant::now();
        let mut connections = inner.connections.lock();
        for conn in connections.values_mut() {
            if !conn.removed && conn.suspended {
                let duration = now.saturating_duration_since(conn.suspend_time);
                if duration >= MAX_SUSPEND_TIME {
                    warn!(
                        "removing ghost connection: id={}, dur={}ms",
                        conn.id,
                        duration.as_millis()
                    );
                    conn.removed = true;
                    conn.suspended = false;
                    let _ = conn.stream.shutdown(Shutdown::Both);
                }
            }
        }
        drop(connections);
        inner.cv.notify_all();
    }

    debug!("http-server gc thread ended");
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

fn write_simple_status(stream: &mut TcpStream, status: u16) {
    let _ = stream.write_all(
        format!(
            "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            status,
            status_text(status)
        )
        .as_bytes(),
    );
}

/// Read the request head (up to the blank line) and parse it
fn read_request(stream: &mut TcpStream) -> Option<(String, String, HashMap<String, String>)> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut data = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => {
                data.extend_from_slice(&chunk[..n]);
                if data.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
                if data.len() > MAX_REQUEST_SIZE {
                    return None;
                }
            }
            Err(_) => return None,
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(&data) {
        Ok(httparse::Status::Complete(_)) => {}
        _ => return None,
    }

    let method = req.method?.to_string();
    let target = req.path?;

    let (path, query_str) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };

    let query: HashMap<String, String> = form_urlencoded::parse(query_str.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    Some((method, path.to_string(), query))
}

fn unregister(inner: &Arc<Inner>, id: ConnectionId) {
    let existed = inner.connections.lock().remove(&id).is_some();
    if existed {
        if let Some(handler) = &inner.removed_handler {
            handler(id);
        }
        debug!("connection removed: {id}");
    }
}

fn handle_connection(inner: Arc<Inner>, mut stream: TcpStream, peer: SocketAddr) {
    if inner.shutting_down() {
        return;
    }

    let Some((method, path, query)) = read_request(&mut stream) else {
        write_simple_status(&mut stream, 400);
        return;
    };

    if method != "GET" {
        write_simple_status(&mut stream, 405);
        return;
    }

    let stream_clone = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("failed to clone connection socket: {e}");
            write_simple_status(&mut stream, 500);
            return;
        }
    };

    let id = {
        let mut connections = inner.connections.lock();
        if connections.len() >= inner.connection_limit {
            drop(connections);
            debug!("rejecting connection: limit reached");
            write_simple_status(&mut stream, 503);
            return;
        }

        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        connections.insert(
            id,
            Connection {
                id,
                peer,
                stream: stream_clone,
                buf: DataBuffer::new(CONNECTION_BUF_SIZE, CONNECTION_BUF_MAX),
                query,
                suspended: false,
                suspend_time: Instant::now(),
                removed: false,
            },
        );
        id
    };

    debug!("new connection ({id}): GET {path}");

    let mut response_headers: Vec<Header> = Vec::new();
    let status = (inner.handler)(id, &path, &mut response_headers);

    if status >= 400 {
        debug!("rejecting connection ({id}): {status}");
        write_simple_status(&mut stream, status);
        unregister(&inner, id);
        return;
    }

    // A body pushed during the handler is a finite response (web ui,
    // ctrl api); an empty ring means a stream follows.
    let immediate_body = {
        let mut connections = inner.connections.lock();
        match connections.get_mut(&id) {
            Some(conn) if !conn.buf.is_empty() => {
                let mut body = vec![0u8; conn.buf.len()];
                conn.buf.pull(&mut body);
                Some(body)
            }
            Some(_) => None,
            None => {
                drop(connections);
                return;
            }
        }
    };

    let mut head = format!("HTTP/1.1 {} {}\r\n", status, status_text(status));
    for (key, value) in &response_headers {
        head.push_str(&format!("{key}: {value}\r\n"));
    }

    match immediate_body {
        Some(body) => {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
            head.push_str("Connection: close\r\n\r\n");
            let _ = stream
                .write_all(head.as_bytes())
                .and_then(|_| stream.write_all(&body));
        }
        None => {
            head.push_str("Connection: close\r\n\r\n");
            if stream.write_all(head.as_bytes()).is_ok() {
                stream_body(&inner, &mut stream, id);
            }
        }
    }

    unregister(&inner, id);
}

/// Serve the connection's ring until removal, shutdown or client
/// disconnect
fn stream_body(inner: &Arc<Inner>, stream: &mut TcpStream, id: ConnectionId) {
    let _ = stream.set_write_timeout(Some(MAX_SUSPEND_TIME / 5));

    let mut chunk = vec![0u8; WRITE_CHUNK_SIZE];
    let mut stalled = Duration::ZERO;

    loop {
        // pull the next chunk, suspending while the ring is empty
        let pulled = {
            let mut connections = inner.connections.lock();
            let Some(conn) = connections.get_mut(&id) else {
                return;
            };
            if conn.removed || inner.shutting_down() {
                return;
            }

            if conn.buf.is_empty() {
                if !conn.suspended {
                    trace!("suspending connection: {id}");
                    conn.suspended = true;
                    conn.suspend_time = Instant::now();
                }
                inner
                    .cv
                    .wait_for(&mut connections, MAX_SUSPEND_TIME / 5);
                continue;
            }

            if conn.suspended {
                trace!("resuming connection: {id}");
                conn.suspended = false;
            }
            conn.buf.pull(&mut chunk)
        };

        // push it to the wire outside the lock
        let mut offset = 0;
        while offset < pulled {
            match stream.write(&chunk[offset..pulled]) {
                Ok(0) => return,
                Ok(n) => {
                    offset += n;
                    stalled = Duration::ZERO;
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    stalled += MAX_SUSPEND_TIME / 5;
                    if stalled >= MAX_SUSPEND_TIME {
                        warn!("removing ghost connection: id={id}, stalled write");
                        let mut connections = inner.connections.lock();
                        if let Some(conn) = connections.get_mut(&id) {
                            conn.removed = true;
                        }
                        return;
                    }
                    let connections = inner.connections.lock();
                    let gone = connections
                        .get(&id)
                        .map(|c| c.removed)
                        .unwrap_or(true);
                    if gone || inner.shutting_down() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(503), "Service Unavailable");
    }

    #[test]
    fn test_link_local_detection() {
        assert!(is_link_local_v6(&"fe80::1".parse().unwrap()));
        assert!(!is_link_local_v6(&"2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_format_client_ip() {
        assert_eq!(format_client_ip("192.168.1.7".parse().unwrap()), "192.168.1.7");
        assert_eq!(format_client_ip("fe80::1".parse().unwrap()), "");
    }
}

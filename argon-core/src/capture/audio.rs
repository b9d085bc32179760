//! PulseAudio capture
//!
//! All PulseAudio objects live on one dedicated thread (`audio-pa`) that
//! owns the standard mainloop and ticks it between sleeps. Two modes:
//!
//! - direct: a record stream on a named source (microphone or sink
//!   monitor);
//! - playback-follow: subscribe to client and sink-input events, keep a
//!   monitor stream attached to the best sink-input, optionally moving
//!   the followed input to the null sink while captured.
//!
//! Raw PCM is pushed into the shared audio ring under its mutex.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use libpulse_binding as pulse;
use pulse::context::subscribe::{Facility, InterestMaskSet, Operation};
use pulse::context::{Context, FlagSet as ContextFlags};
use pulse::def::BufferAttr;
use pulse::mainloop::standard::{IterateResult, Mainloop};
use pulse::proplist::properties::APPLICATION_PROCESS_ID;
use pulse::sample::Spec;
use pulse::stream::{FlagSet as StreamFlags, PeekResult, Stream};
use tracing::{debug, error, trace, warn};

use crate::error::{ArgonError, Result};
use crate::probe::pulse::{codec_pa_format, iterate_until_ready};
use crate::session::SessionShared;
use crate::types::{AudioSourceKind, AudioSourceProps};

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const NULL_SINK_NAME: &str = "auto_null";

/// Client names that never qualify as follow targets
const CLIENT_BLACKLIST: [&str; 1] = ["speech-dispatcher"];

#[derive(Debug)]
enum PaCommand {
    Start { tick: Duration, fragsize: u32 },
}

/// Handle to the PulseAudio thread
pub(crate) struct PaCapture {
    thread: Option<JoinHandle<()>>,
    cmd_tx: mpsc::Sender<PaCommand>,
    quit: Arc<AtomicBool>,
}

impl PaCapture {
    /// Connect to the server and, for playback-follow, set up the event
    /// subscription. Blocks until the context is ready or failed.
    pub fn new(
        props: AudioSourceProps,
        app_name: String,
        stream_title: String,
        shared: Arc<SessionShared>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();
        let quit = Arc::new(AtomicBool::new(false));

        let quit_t = quit.clone();
        let thread = thread::Builder::new()
            .name("audio-pa".to_string())
            .spawn(move || {
                run_pa_thread(props, app_name, stream_title, shared, cmd_rx, init_tx, quit_t)
            })
            .map_err(|e| ArgonError::pulse(format!("failed to spawn pa thread: {e}")))?;

        let mut capture = Self {
            thread: Some(thread),
            cmd_tx,
            quit,
        };

        match init_rx.recv_timeout(INIT_TIMEOUT) {
            Ok(Ok(())) => Ok(capture),
            Ok(Err(e)) => {
                capture.join();
                Err(e)
            }
            Err(_) => {
                capture.quit.store(true, Ordering::SeqCst);
                capture.join();
                Err(ArgonError::pulse("timeout waiting for context"))
            }
        }
    }

    /// Open the record stream and begin ticking the mainloop
    pub fn start(&self, tick: Duration, fragsize: u32) {
        let _ = self.cmd_tx.send(PaCommand::Start { tick, fragsize });
    }

    fn join(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for PaCapture {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        self.join();
    }
}

struct PaClient {
    idx: u32,
    name: String,
    bin: String,
}

struct PaSinkInput {
    idx: u32,
    name: String,
    client_idx: u32,
    sink_idx: u32,
    corked: bool,
    muted: bool,
    removed: bool,
}

struct PaSession {
    props: AudioSourceProps,
    stream_title: String,
    fragsize: u32,
    started: bool,
    clients: HashMap<u32, PaClient>,
    inputs: BTreeMap<u32, PaSinkInput>,
    connected: Option<u32>,
    stream: Option<Rc<RefCell<Stream>>>,
    shared: Arc<SessionShared>,
}

impl PaSession {
    /// Best follow target: keep the connected input while it is alive
    /// and uncorked, otherwise the first alive uncorked input with a
    /// known (unblacklisted) client.
    fn best_sink_input(&self) -> Option<u32> {
        if let Some(ci) = self.connected {
            if let Some(si) = self.inputs.get(&ci) {
                if !si.removed && !si.corked {
                    trace!("best pa sink input is the current one");
                    return Some(ci);
                }
            }
        }

        self.inputs
            .values()
            .find(|si| !si.removed && !si.corked && self.clients.contains_key(&si.client_idx))
            .map(|si| si.idx)
    }
}

fn client_should_be_ignored(info: &pulse::context::introspect::ClientInfo) -> bool {
    let me = match info.proplist.get_str(APPLICATION_PROCESS_ID) {
        None => true,
        Some(cpid) => cpid.parse::<u32>().ok() == Some(std::process::id()),
    };
    if me {
        return true;
    }

    let name = info.name.as_deref().unwrap_or("");
    CLIENT_BLACKLIST.contains(&name)
}

#[allow(clippy::too_many_arguments)]
fn run_pa_thread(
    props: AudioSourceProps,
    app_name: String,
    stream_title: String,
    shared: Arc<SessionShared>,
    cmd_rx: mpsc::Receiver<PaCommand>,
    init_tx: mpsc::Sender<Result<()>>,
    quit: Arc<AtomicBool>,
) {
    debug!("pa thread started");

    let mut ml = match Mainloop::new() {
        Some(ml) => ml,
        None => {
            let _ = init_tx.send(Err(ArgonError::pulse("failed to create mainloop")));
            return;
        }
    };

    let ctx = match Context::new(&ml, &app_name) {
        Some(ctx) => Rc::new(RefCell::new(ctx)),
        None => {
            let _ = init_tx.send(Err(ArgonError::pulse("failed to create context")));
            return;
        }
    };

    let connected = ctx
        .borrow_mut()
        .connect(None, ContextFlags::NOFLAGS, None)
        .map_err(ArgonError::from);
    if let Err(e) = connected {
        let _ = init_tx.send(Err(e));
        return;
    }
    {
        let ctx_ref = ctx.borrow();
        if let Err(e) = iterate_until_ready(&mut ml, &ctx_ref) {
            let _ = init_tx.send(Err(e));
            return;
        }
    }

    let kind = props.kind;
    let session = Rc::new(RefCell::new(PaSession {
        props,
        stream_title,
        fragsize: 0,
        started: false,
        clients: HashMap::new(),
        inputs: BTreeMap::new(),
        connected: None,
        stream: None,
        shared: shared.clone(),
    }));

    if kind == AudioSourceKind::Playback {
        setup_subscription(&ctx, &session);
    }

    let _ = init_tx.send(Ok(()));

    // Events stay queued on the server socket until start; nothing is
    // dispatched before the tick loop begins iterating.
    let start = loop {
        match cmd_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(cmd) => break Some(cmd),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if quit.load(Ordering::SeqCst) || shared.terminating() {
                    break None;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break None,
        }
    };

    if let Some(PaCommand::Start { tick, fragsize }) = start {
        session.borrow_mut().fragsize = fragsize;
        session.borrow_mut().started = true;

        let connect_result = match kind {
            AudioSourceKind::Mic | AudioSourceKind::Monitor => connect_source(&ctx, &session),
            AudioSourceKind::Playback => {
                connect_best_sink_input(&ctx, &session);
                Ok(())
            }
        };

        match connect_result {
            Ok(()) => {
                debug!("pa started");
                while !quit.load(Ordering::SeqCst) && !shared.terminating() {
                    match ml.iterate(false) {
                        IterateResult::Success(_) => {}
                        IterateResult::Quit(_) | IterateResult::Err(_) => {
                            error!("error in pa thread: mainloop iterate failed");
                            shared.report_error();
                            break;
                        }
                    }
                    thread::sleep(tick);
                }
            }
            Err(e) => {
                error!("error in pa thread: {e}");
                shared.report_error();
            }
        }
    }

    // teardown: stop capturing, restore moved inputs, flush the moves
    disconnect_stream(&ctx, &session);
    unmute_all(&ctx, &session);
    for _ in 0..64 {
        match ml.iterate(false) {
            IterateResult::Success(n) if n > 0 => {}
            _ => break,
        }
    }
    ctx.borrow_mut().disconnect();

    debug!("pa thread ended");
}

fn setup_subscription(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>) {
    {
        let ctx = ctx.clone();
        let session = session.clone();
        ctx.clone().borrow_mut().set_subscribe_callback(Some(Box::new(
            move |facility, op, idx| {
                if session.borrow().shared.terminating() {
                    return;
                }
                match facility {
                    Some(Facility::SinkInput) => match op {
                        Some(Operation::New) | Some(Operation::Changed) => {
                            debug!("pa sink input created/changed: {idx}");
                            query_sink_input(&ctx, &session, idx);
                        }
                        Some(Operation::Removed) => {
                            let mut s = session.borrow_mut();
                            if let Some(si) = s.inputs.get_mut(&idx) {
                                debug!("pa sink input removed: {idx}");
                                si.removed = true;
                                let started = s.started;
                                drop(s);
                                if started {
                                    connect_best_sink_input(&ctx, &session);
                                }
                            }
                        }
                        None => {}
                    },
                    Some(Facility::Client) => match op {
                        Some(Operation::New) | Some(Operation::Changed) => {
                            debug!("pa client created/changed: {idx}");
                            query_client(&ctx, &session, idx);
                        }
                        Some(Operation::Removed) => {
                            debug!("pa client removed: {idx}");
                            session.borrow_mut().clients.remove(&idx);
                        }
                        None => {}
                    },
                    _ => {}
                }
            },
        )));
    }

    let mask = InterestMaskSet::SINK_INPUT | InterestMaskSet::CLIENT;
    let ctx_cb = ctx.clone();
    let session_cb = session.clone();
    ctx.borrow_mut().subscribe(mask, move |success| {
        if !success {
            warn!("pa subscribe failed");
            return;
        }
        // seed the maps with everything already playing
        {
            let session = session_cb.clone();
            ctx_cb.borrow().introspect().get_client_info_list(move |res| {
                if let pulse::callbacks::ListResult::Item(info) = res {
                    upsert_client(&session, info);
                }
            });
        }
        let ctx = ctx_cb.clone();
        let session = session_cb.clone();
        ctx_cb
            .borrow()
            .introspect()
            .get_sink_input_info_list(move |res| {
                if let pulse::callbacks::ListResult::Item(info) = res {
                    upsert_sink_input(&ctx, &session, info);
                }
            });
    });
}

fn query_client(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>, idx: u32) {
    let session = session.clone();
    ctx.borrow().introspect().get_client_info(idx, move |res| {
        if let pulse::callbacks::ListResult::Item(info) = res {
            upsert_client(&session, info);
        }
    });
}

fn query_sink_input(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>, idx: u32) {
    let ctx2 = ctx.clone();
    let session = session.clone();
    ctx.borrow()
        .introspect()
        .get_sink_input_info(idx, move |res| {
            if let pulse::callbacks::ListResult::Item(info) = res {
                upsert_sink_input(&ctx2, &session, info);
            }
        });
}

fn upsert_client(
    session: &Rc<RefCell<PaSession>>,
    info: &pulse::context::introspect::ClientInfo,
) {
    if client_should_be_ignored(info) {
        return;
    }

    let client = PaClient {
        idx: info.index,
        name: info.name.as_deref().unwrap_or("").to_string(),
        bin: info
            .proplist
            .get_str(pulse::proplist::properties::APPLICATION_PROCESS_BINARY)
            .unwrap_or_default(),
    };

    debug!("pa client: idx={}, name={}, bin={}", client.idx, client.name, client.bin);
    session.borrow_mut().clients.insert(info.index, client);
}

fn upsert_sink_input(
    ctx: &Rc<RefCell<Context>>,
    session: &Rc<RefCell<PaSession>>,
    info: &pulse::context::introspect::SinkInputInfo,
) {
    let Some(client_idx) = info.client else {
        return;
    };

    {
        let mut s = session.borrow_mut();
        if !s.clients.contains_key(&client_idx) {
            return;
        }

        let entry = s.inputs.entry(info.index).or_insert(PaSinkInput {
            idx: info.index,
            name: String::new(),
            client_idx,
            sink_idx: info.sink,
            corked: false,
            muted: false,
            removed: false,
        });
        entry.name = info.name.as_deref().unwrap_or("").to_string();
        entry.client_idx = client_idx;
        entry.corked = info.corked;
        if !entry.muted {
            entry.sink_idx = info.sink;
        }

        debug!(
            "pa sink input: idx={}, name={}, client={}, corked={}",
            entry.idx, entry.name, entry.client_idx, entry.corked
        );

        if !s.started {
            return;
        }
    }

    connect_best_sink_input(ctx, session);
}

/// Open a record stream on the named device (microphone / sink monitor)
fn connect_source(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>) -> Result<()> {
    let (spec, dev, title, fragsize) = {
        let s = session.borrow();
        (
            sample_spec(&s.props)?,
            s.props.dev.clone(),
            s.stream_title.clone(),
            s.fragsize,
        )
    };

    debug!("connecting pa source: {dev}");

    let stream = Stream::new(&mut ctx.borrow_mut(), &title, &spec, None)
        .ok_or_else(|| ArgonError::pulse("failed to create stream"))?;
    let stream = Rc::new(RefCell::new(stream));

    attach_read_callback(&stream, session);

    let attr = record_attr(fragsize);
    stream
        .borrow_mut()
        .connect_record(
            if dev.is_empty() { None } else { Some(&dev) },
            Some(&attr),
            StreamFlags::ADJUST_LATENCY,
        )
        .map_err(|e| ArgonError::pulse(format!("connect_record error: {e}")))?;

    let mut s = session.borrow_mut();
    s.shared.audio_stream_active.store(true, Ordering::SeqCst);
    s.stream = Some(stream);

    Ok(())
}

/// Attach (or re-attach) the monitor stream to the current best
/// sink-input; disconnect when no candidate exists
fn connect_best_sink_input(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>) {
    let best = session.borrow().best_sink_input();

    let Some(idx) = best else {
        debug!("no active pa sink input");
        disconnect_stream(ctx, session);
        return;
    };

    {
        let s = session.borrow();
        if s.stream.is_some() && s.connected == Some(idx) {
            debug!("best pa sink input is already connected");
            return;
        }
    }

    disconnect_stream(ctx, session);

    let (spec, title, fragsize, mute_source) = {
        let s = session.borrow();
        let spec = match sample_spec(&s.props) {
            Ok(spec) => spec,
            Err(e) => {
                error!("invalid sample spec: {e}");
                s.shared.report_error();
                return;
            }
        };
        (spec, s.stream_title.clone(), s.fragsize, s.props.mute_source)
    };

    let Some(stream) = Stream::new(&mut ctx.borrow_mut(), &title, &spec, None) else {
        error!("failed to create pa stream");
        session.borrow().shared.report_error();
        return;
    };
    let stream = Rc::new(RefCell::new(stream));

    attach_read_callback(&stream, session);

    if mute_source {
        mute_sink_input(ctx, session, idx);
    }

    if let Err(e) = stream.borrow_mut().set_monitor_stream(idx) {
        error!("set_monitor_stream error: {e}");
        if mute_source {
            unmute_sink_input(ctx, session, idx);
        }
        session.borrow().shared.report_error();
        return;
    }

    debug!("connecting pa sink input: {idx}");

    let attr = record_attr(fragsize);
    if let Err(e) = stream
        .borrow_mut()
        .connect_record(None, Some(&attr), StreamFlags::ADJUST_LATENCY)
    {
        error!("connect_record error: {e}");
        if mute_source {
            unmute_sink_input(ctx, session, idx);
        }
        session.borrow().shared.report_error();
        return;
    }

    let mut s = session.borrow_mut();
    s.connected = Some(idx);
    s.stream = Some(stream);
    s.shared.audio_stream_active.store(true, Ordering::SeqCst);
}

fn disconnect_stream(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>) {
    let (stream, connected, mute_source) = {
        let mut s = session.borrow_mut();
        (s.stream.take(), s.connected.take(), s.props.mute_source)
    };

    let Some(stream) = stream else {
        return;
    };

    debug!("disconnecting pa stream");

    if let Some(ci) = connected {
        let muted = session
            .borrow()
            .inputs
            .get(&ci)
            .map(|si| si.muted)
            .unwrap_or(false);
        if mute_source && muted {
            unmute_sink_input(ctx, session, ci);
        }
    }

    let _ = stream.borrow_mut().disconnect();

    let mut s = session.borrow_mut();
    s.shared.audio_stream_active.store(false, Ordering::SeqCst);
    s.inputs.retain(|_, si| !si.removed);
}

/// Move the followed input to the null sink so the user stops hearing it
fn mute_sink_input(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>, idx: u32) {
    ctx.borrow().introspect().move_sink_input_by_name(
        idx,
        NULL_SINK_NAME,
        Some(Box::new(|success| {
            if success {
                debug!("pa sink input muted");
            } else {
                warn!("failed to mute pa sink input");
            }
        })),
    );
    if let Some(si) = session.borrow_mut().inputs.get_mut(&idx) {
        si.muted = true;
    }
}

fn unmute_sink_input(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>, idx: u32) {
    let sink_idx = match session.borrow().inputs.get(&idx) {
        Some(si) => si.sink_idx,
        None => return,
    };
    ctx.borrow().introspect().move_sink_input_by_index(
        idx,
        sink_idx,
        Some(Box::new(|success| {
            if success {
                debug!("pa sink input unmuted");
            } else {
                warn!("failed to unmute pa sink input");
            }
        })),
    );
    if let Some(si) = session.borrow_mut().inputs.get_mut(&idx) {
        si.muted = false;
    }
}

fn unmute_all(ctx: &Rc<RefCell<Context>>, session: &Rc<RefCell<PaSession>>) {
    let muted: Vec<u32> = session
        .borrow()
        .inputs
        .values()
        .filter(|si| si.muted)
        .map(|si| si.idx)
        .collect();
    for idx in muted {
        unmute_sink_input(ctx, session, idx);
    }
}

/// Read callback: drain every sample chunk into the shared audio ring
fn attach_read_callback(stream: &Rc<RefCell<Stream>>, session: &Rc<RefCell<PaSession>>) {
    let stream_cb = stream.clone();
    let shared = session.borrow().shared.clone();

    stream.borrow_mut().set_read_callback(Some(Box::new(move |nbytes| {
        trace!("pa audio sample: {nbytes}");

        let mut stream = stream_cb.borrow_mut();
        match stream.peek() {
            Ok(PeekResult::Data(data)) => {
                let mut audio = shared.audio.lock();
                audio.push_exact_force(data);
                drop(audio);
                let _ = stream.discard();
            }
            Ok(PeekResult::Hole(_)) => {
                let _ = stream.discard();
            }
            Ok(PeekResult::Empty) => warn!("no pa data"),
            Err(e) => warn!("pa stream peek error: {e}"),
        }
    })));
}

fn sample_spec(props: &AudioSourceProps) -> Result<Spec> {
    let format = codec_pa_format(props.codec)
        .ok_or_else(|| ArgonError::pulse(format!("no pa format for codec {:?}", props.codec)))?;
    Ok(Spec {
        format,
        rate: props.rate,
        channels: props.channels,
    })
}

fn record_attr(fragsize: u32) -> BufferAttr {
    BufferAttr {
        maxlength: u32::MAX,
        tlength: u32::MAX,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionShared;
    use crate::types::Endianness;
    use ffmpeg_next::codec;

    fn test_session() -> PaSession {
        PaSession {
            props: AudioSourceProps {
                kind: AudioSourceKind::Playback,
                name: "playback".into(),
                friendly_name: "Playback capture".into(),
                dev: String::new(),
                codec: codec::Id::PCM_S16LE,
                channels: 2,
                rate: 44100,
                bps: 2,
                endian: Endianness::Le,
                mute_source: false,
            },
            stream_title: "test".into(),
            fragsize: 0,
            started: true,
            clients: HashMap::new(),
            inputs: BTreeMap::new(),
            connected: None,
            stream: None,
            shared: Arc::new(SessionShared::new(Box::new(|_| {}))),
        }
    }

    fn input(idx: u32, client: u32, corked: bool) -> PaSinkInput {
        PaSinkInput {
            idx,
            name: format!("input-{idx}"),
            client_idx: client,
            sink_idx: 0,
            corked,
            muted: false,
            removed: false,
        }
    }

    #[test]
    fn test_best_prefers_connected() {
        let mut s = test_session();
        s.clients.insert(1, PaClient { idx: 1, name: "a".into(), bin: "a".into() });
        s.inputs.insert(10, input(10, 1, false));
        s.inputs.insert(20, input(20, 1, false));
        s.connected = Some(20);
        assert_eq!(s.best_sink_input(), Some(20));
    }

    #[test]
    fn test_best_skips_corked_and_unknown_clients() {
        let mut s = test_session();
        s.clients.insert(1, PaClient { idx: 1, name: "a".into(), bin: "a".into() });
        s.inputs.insert(10, input(10, 9, false)); // client unknown
        s.inputs.insert(20, input(20, 1, true)); // corked
        s.inputs.insert(30, input(30, 1, false));
        assert_eq!(s.best_sink_input(), Some(30));
    }

    #[test]
    fn test_best_switches_away_from_corked_current() {
        let mut s = test_session();
        s.clients.insert(1, PaClient { idx: 1, name: "a".into(), bin: "a".into() });
        s.inputs.insert(10, input(10, 1, true));
        s.inputs.insert(20, input(20, 1, false));
        s.connected = Some(10);
        assert_eq!(s.best_sink_input(), Some(20));
    }

    #[test]
    fn test_best_none_when_all_gone() {
        let mut s = test_session();
        s.clients.insert(1, PaClient { idx: 1, name: "a".into(), bin: "a".into() });
        let mut si = input(10, 1, false);
        si.removed = true;
        s.inputs.insert(10, si);
        assert_eq!(s.best_sink_input(), None);
    }
}

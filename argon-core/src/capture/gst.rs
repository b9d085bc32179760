//! Compressed-camera capture through GStreamer
//!
//! Cameras that deliver H.264 directly are read with a passthrough
//! pipeline (`v4l2src ! video/x-h264 ! h264parse ! queue ! appsink`).
//! Each Annex-B access unit lands in the shared video ring, from where
//! the AV pipeline demuxes it through a pull callback. A restart request
//! (camera direction switch) tears the pipeline down and rebuilds it
//! against the current target device while the muxing thread replays the
//! cached key packet.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::error::{ArgonError, Result};
use crate::session::SessionShared;
use crate::types::Dim;

/// Device the pipeline should capture from; updated before a restart
#[derive(Debug, Clone)]
pub(crate) struct GstTarget {
    pub dev: String,
    pub dim: Dim,
    pub framerate: u32,
}

pub(crate) struct GstCameraSource {
    shared: Arc<SessionShared>,
    target: Arc<Mutex<GstTarget>>,
    thread: Option<JoinHandle<()>>,
}

impl GstCameraSource {
    pub fn new(shared: Arc<SessionShared>, target: GstTarget) -> Result<Self> {
        gst::init().map_err(|e| ArgonError::gst(format!("gst init error: {e}")))?;

        Ok(Self {
            shared,
            target: Arc::new(Mutex::new(target)),
            thread: None,
        })
    }

    /// Handle used by the caster to retarget the capture before a restart
    pub fn target(&self) -> Arc<Mutex<GstTarget>> {
        self.target.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        let shared = self.shared.clone();
        let target = self.target.clone();

        let thread = thread::Builder::new()
            .name("gst-bus".to_string())
            .spawn(move || run_bus_loop(shared, target))
            .map_err(|e| ArgonError::gst(format!("failed to spawn gst thread: {e}")))?;

        self.thread = Some(thread);
        Ok(())
    }
}

impl Drop for GstCameraSource {
    fn drop(&mut self) {
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Build, run and (on restart) rebuild the capture pipeline until the
/// session terminates
fn run_bus_loop(shared: Arc<SessionShared>, target: Arc<Mutex<GstTarget>>) {
    debug!("gst pipeline thread started");

    loop {
        let current = target.lock().clone();

        let pipeline = match build_pipeline(&shared, &current) {
            Ok(p) => p,
            Err(e) => {
                error!("failed to build gst pipeline: {e}");
                shared.report_error();
                break;
            }
        };

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            error!("unable to set gst pipeline to playing: {e}");
            shared.report_error();
            break;
        }

        let result = watch_bus(&shared, &pipeline);

        let _ = pipeline.set_state(gst::State::Null);

        match result {
            BusOutcome::Restart => {
                debug!("restarting gst pipeline");
                let mut video = shared.video.lock();
                video.restart_requested = false;
                video.restarting = true;
                continue;
            }
            BusOutcome::Terminating => break,
            BusOutcome::Error(e) => {
                error!("error in gst pipeline thread: {e}");
                shared.report_error();
                break;
            }
        }
    }

    shared.video_cv.notify_all();
    debug!("gst pipeline thread ended");
}

enum BusOutcome {
    Terminating,
    Restart,
    Error(ArgonError),
}

fn watch_bus(shared: &Arc<SessionShared>, pipeline: &gst::Pipeline) -> BusOutcome {
    let Some(bus) = pipeline.bus() else {
        return BusOutcome::Error(ArgonError::gst("pipeline has no bus"));
    };

    loop {
        if shared.terminating() {
            return BusOutcome::Terminating;
        }
        if shared.video.lock().restart_requested {
            return BusOutcome::Restart;
        }

        let msg = bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(100),
            &[
                gst::MessageType::Error,
                gst::MessageType::Eos,
                gst::MessageType::StateChanged,
            ],
        );

        let Some(msg) = msg else {
            continue;
        };

        match msg.view() {
            gst::MessageView::Error(err) => {
                return BusOutcome::Error(ArgonError::gst(format!(
                    "error received from element {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                )));
            }
            gst::MessageView::Eos(_) => {
                return BusOutcome::Error(ArgonError::gst("end-of-stream reached"));
            }
            gst::MessageView::StateChanged(sc) => {
                if msg.src() == Some(pipeline.upcast_ref()) {
                    trace!(
                        "gst state changed: {:?} -> {:?}",
                        sc.old(),
                        sc.current()
                    );
                }
            }
            _ => warn!("unexpected gst message received"),
        }
    }
}

fn build_pipeline(shared: &Arc<SessionShared>, target: &GstTarget) -> Result<gst::Pipeline> {
    debug!(
        "building gst pipeline: dev={}, dim={}, fr={}",
        target.dev, target.dim, target.framerate
    );

    let pipeline = gst::Pipeline::new();

    let source = gst::ElementFactory::make("v4l2src")
        .property("device", &target.dev)
        .build()
        .map_err(|e| ArgonError::gst(format!("failed to create v4l2src: {e}")))?;

    let caps = gst::Caps::builder("video/x-h264")
        .field("stream-format", "byte-stream")
        .field("alignment", "au")
        .field("width", target.dim.width as i32)
        .field("height", target.dim.height as i32)
        .field("framerate", gst::Fraction::new(target.framerate as i32, 1))
        .build();
    let capsfilter = gst::ElementFactory::make("capsfilter")
        .property("caps", &caps)
        .build()
        .map_err(|e| ArgonError::gst(format!("failed to create capsfilter: {e}")))?;

    let parser = gst::ElementFactory::make("h264parse")
        .property("config-interval", -1i32)
        .build()
        .map_err(|e| ArgonError::gst(format!("failed to create h264parse: {e}")))?;

    let queue = gst::ElementFactory::make("queue")
        .build()
        .map_err(|e| ArgonError::gst(format!("failed to create queue: {e}")))?;

    let appsink = gst_app::AppSink::builder().name("sink").sync(false).build();

    let shared_cb = shared.clone();
    appsink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| new_sample(&shared_cb, sink))
            .build(),
    );

    pipeline
        .add_many([&source, &capsfilter, &parser, &queue, appsink.upcast_ref()])
        .map_err(|e| ArgonError::gst(format!("failed to add elements: {e}")))?;
    gst::Element::link_many([&source, &capsfilter, &parser, &queue, appsink.upcast_ref()])
        .map_err(|e| ArgonError::gst(format!("failed to link pipeline: {e}")))?;

    Ok(pipeline)
}

/// Push one access unit into the video ring, waiting for free space.
/// Terminating and restart both surface as EOS so the pipeline stops
/// delivering.
fn new_sample(
    shared: &Arc<SessionShared>,
    sink: &gst_app::AppSink,
) -> std::result::Result<gst::FlowSuccess, gst::FlowError> {
    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
    let Some(buffer) = sample.buffer() else {
        warn!("gst sample without buffer");
        return Ok(gst::FlowSuccess::Ok);
    };
    let map = buffer.map_readable().map_err(|_| {
        warn!("gst buffer map error");
        gst::FlowError::Error
    })?;

    if map.len() == 0 {
        warn!("gst sample size is zero");
        return Err(gst::FlowError::Error);
    }

    trace!("new gst video sample: {} bytes", map.len());

    let mut video = shared.video.lock();
    shared.video_cv.wait_while(&mut video, |v| {
        !shared.terminating() && !v.restart_requested && !v.buf.has_free_space(map.len())
    });

    let ret = if shared.terminating() {
        video.buf.clear();
        Err(gst::FlowError::Eos)
    } else if video.restart_requested {
        Err(gst::FlowError::Eos)
    } else {
        if video.restarting {
            // first fresh sample after a rebuild
            video.restarting = false;
        }
        video.buf.push_exact_force(map.as_slice());
        Ok(gst::FlowSuccess::Ok)
    };

    drop(video);
    shared.video_cv.notify_all();

    ret
}

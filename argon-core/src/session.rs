//! State shared between a caster's worker threads
//!
//! One instance lives behind an `Arc` for the lifetime of a caster. The
//! video ring and its condvar pair the capture callbacks with the
//! pipeline's read path; the audio ring pairs the PulseAudio read
//! callback with the audio muxing step. Terminating interrupts every
//! wait.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::buffer::DataBuffer;
use crate::types::CasterState;

const VIDEO_BUF_SIZE: usize = 0x80_0000; // 8 MiB
const AUDIO_BUF_SIZE: usize = 0x10_0000; // 1 MiB

/// Video ring plus the restart flags that gate it
pub(crate) struct VideoShared {
    pub buf: DataBuffer,
    /// A capture restart (camera direction switch) was requested
    pub restart_requested: bool,
    /// The capture pipeline is rebuilding; cleared on the first fresh sample
    pub restarting: bool,
}

pub(crate) type StateHandler = Box<dyn Fn(CasterState) + Send + Sync>;

pub(crate) struct SessionShared {
    state: Mutex<CasterState>,
    state_handler: StateHandler,
    terminating: AtomicBool,
    pub video: Mutex<VideoShared>,
    pub video_cv: Condvar,
    pub audio: Mutex<DataBuffer>,
    /// True while a PulseAudio record stream is connected
    pub audio_stream_active: AtomicBool,
}

impl SessionShared {
    pub fn new(state_handler: StateHandler) -> Self {
        Self {
            state: Mutex::new(CasterState::Initing),
            state_handler,
            terminating: AtomicBool::new(false),
            video: Mutex::new(VideoShared {
                buf: DataBuffer::new(VIDEO_BUF_SIZE, VIDEO_BUF_SIZE),
                restart_requested: false,
                restarting: false,
            }),
            video_cv: Condvar::new(),
            audio: Mutex::new(DataBuffer::new(AUDIO_BUF_SIZE, AUDIO_BUF_SIZE)),
            audio_stream_active: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CasterState {
        *self.state.lock()
    }

    pub fn terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Fires the state-changed handler exactly once per actual change
    pub fn set_state(&self, new_state: CasterState) {
        {
            let mut state = self.state.lock();
            if *state == new_state {
                return;
            }
            debug!("changing state: {} => {}", *state, new_state);
            *state = new_state;
        }
        if new_state == CasterState::Terminating {
            self.terminating.store(true, Ordering::SeqCst);
        }
        (self.state_handler)(new_state);
    }

    /// Worker-thread failure path: transition to Terminating and wake
    /// everything blocked on the video condvar
    pub fn report_error(&self) {
        self.set_state(CasterState::Terminating);
        self.video_cv.notify_all();
    }
}

//! Gateway event queue
//!
//! All lifecycle transitions between the HTTP server and the caster are
//! serialized through this FIFO queue: events are enqueued from any
//! thread and handled strictly in order on the loop thread. This is the
//! only channel between the two components, so no back-references
//! exist.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::server::ConnectionId;
use crate::settings::Settings;

#[derive(Debug)]
pub enum Event {
    StartServer,
    StopServer,
    StartCaster {
        conn_id: ConnectionId,
        settings: Box<Settings>,
    },
    StopCaster,
    CasterStarted(ConnectionId),
    CasterEnded,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StartServer => "start-server",
            Self::StopServer => "stop-server",
            Self::StartCaster { .. } => "start-caster",
            Self::StopCaster => "stop-caster",
            Self::CasterStarted(_) => "caster-started",
            Self::CasterEnded => "caster-ended",
        };
        f.write_str(s)
    }
}

/// FIFO queue with a blocking single-consumer loop
pub struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
    cv: Condvar,
    shutting_down: AtomicBool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Enqueue from any thread; ignored once shutdown started
    pub fn enqueue(&self, event: Event) {
        if self.shutting_down() {
            return;
        }

        self.queue.lock().push_back(event);
        self.cv.notify_one();
    }

    /// End the loop; callable from any thread (including a signal
    /// handler context)
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cv.notify_one();
    }

    /// Handle events in FIFO order until shutdown
    pub fn run(&self, mut handler: impl FnMut(Event)) {
        let mut local = VecDeque::new();

        while !self.shutting_down() {
            {
                let mut queue = self.queue.lock();
                self.cv
                    .wait_while(&mut queue, |q| q.is_empty() && !self.shutting_down());
                std::mem::swap(&mut local, &mut queue);
            }

            while !self.shutting_down() {
                let Some(event) = local.pop_front() else {
                    break;
                };
                debug!("new event: {event}");
                handler(event);
            }
        }

        debug!("event loop ended");
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = EventQueue::new();
        queue.enqueue(Event::StartServer);
        queue.enqueue(Event::StopCaster);
        queue.enqueue(Event::StopServer);

        let mut seen = Vec::new();
        queue.run(|event| {
            if matches!(event, Event::StopServer) {
                queue.shutdown();
            }
            seen.push(event.to_string());
        });

        assert_eq!(seen, ["start-server", "stop-caster", "stop-server"]);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_ignored() {
        let queue = EventQueue::new();
        queue.shutdown();
        queue.enqueue(Event::StartServer);
        assert!(queue.queue.lock().is_empty());
    }

    #[test]
    fn test_cross_thread_enqueue_unblocks_run() {
        let queue = Arc::new(EventQueue::new());

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                queue.enqueue(Event::CasterEnded);
            })
        };

        let mut got = false;
        queue.run(|event| {
            got = matches!(event, Event::CasterEnded);
            queue.shutdown();
        });

        producer.join().unwrap();
        assert!(got);
    }
}

//! The stream reader worker.
//!
//! `StreamReader` drives one session at a time: a dedicated worker thread
//! opens the frame source, and for every frame runs decode, presence
//! tracking, and the count-store side effects before touching the next
//! frame. All tracker state lives inside the worker; the calling thread
//! only ever flips the session's run flag and waits for the join.
//!
//! Failure triage happens here and nowhere else:
//! - open failure is fatal for the run (status becomes `FailedToOpen`)
//! - a transient read failure backs off one poll interval and retries
//! - a decode failure skips that frame only
//! - a store failure drops that event's side effect and continues

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::decode::Decoder;
use crate::ingest::{FrameSource, ReadOutcome};
use crate::lock;
use crate::store::CountStore;
use crate::tracker::{DetectionEvent, EventKind, PresenceTracker, TrackerConfig};

#[derive(Clone, Copy, Debug)]
pub struct ReaderSettings {
    /// Loop cadence, and the backoff after a transient read failure.
    pub poll_interval: Duration,
    /// How long `stop` waits for the worker before abandoning it.
    pub stop_grace: Duration,
    pub tracker: TrackerConfig,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stop_grace: Duration::from_secs(5),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Observable state of the current (or most recent) session.
///
/// `start` is fire-and-forget, so an open failure shows up here rather than
/// as a return value: a session that went straight from `Running` to
/// `FailedToOpen` never produced a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Stopped,
    Running,
    FailedToOpen,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Stopped => "stopped",
            SessionStatus::Running => "running",
            SessionStatus::FailedToOpen => "failed_to_open",
        }
    }
}

/// State shared between one worker and the handle that spawned it. Each
/// session gets its own instance, so a worker that outlives its `stop`
/// grace can only ever write to its own, superseded slot.
struct SessionShared {
    running: AtomicBool,
    status: Mutex<SessionStatus>,
}

impl SessionShared {
    fn idle() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            status: Mutex::new(SessionStatus::Stopped),
        })
    }

    fn set_status(&self, status: SessionStatus) {
        *lock(&self.status) = status;
    }
}

struct CurrentSession {
    shared: Arc<SessionShared>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the worker lifecycle for exactly one tracked stream.
pub struct StreamReader {
    source: Arc<dyn FrameSource>,
    decoder: Arc<dyn Decoder>,
    store: Arc<Mutex<dyn CountStore + Send>>,
    settings: ReaderSettings,
    current: Mutex<CurrentSession>,
}

impl StreamReader {
    pub fn new(
        source: Arc<dyn FrameSource>,
        decoder: Arc<dyn Decoder>,
        store: Arc<Mutex<dyn CountStore + Send>>,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            source,
            decoder,
            store,
            settings,
            current: Mutex::new(CurrentSession {
                shared: SessionShared::idle(),
                handle: None,
            }),
        }
    }

    /// Start a session against `stream_ref`, replacing any session that is
    /// already running. Returns before the stream is opened; check
    /// [`status`](Self::status) to discover an open failure.
    pub fn start(&self, stream_ref: &str) {
        self.stop();

        let shared = Arc::new(SessionShared {
            running: AtomicBool::new(true),
            status: Mutex::new(SessionStatus::Running),
        });
        let worker = Worker {
            source: self.source.clone(),
            decoder: self.decoder.clone(),
            store: self.store.clone(),
            settings: self.settings,
            shared: shared.clone(),
        };
        let stream_ref = stream_ref.to_string();
        let handle = std::thread::spawn(move || worker.run(&stream_ref));

        let mut current = lock(&self.current);
        current.shared = shared;
        current.handle = Some(handle);
    }

    /// Request cooperative termination and wait for the worker to exit.
    ///
    /// The wait is bounded by `stop_grace`; a worker stuck inside a
    /// blocking read is abandoned with an error log rather than blocking
    /// the caller forever. Idempotent: a no-op when nothing is running.
    pub fn stop(&self) {
        let mut current = lock(&self.current);
        current.shared.running.store(false, Ordering::SeqCst);
        let Some(handle) = current.handle.take() else {
            return;
        };

        let deadline = Instant::now() + self.settings.stop_grace;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                log::error!("reader worker panicked");
                current.shared.set_status(SessionStatus::Stopped);
            }
        } else {
            log::error!(
                "reader worker did not exit within {:?}; abandoning it",
                self.settings.stop_grace
            );
            current.shared.set_status(SessionStatus::Stopped);
        }
    }

    pub fn status(&self) -> SessionStatus {
        let current = lock(&self.current);
        let status = *lock(&current.shared.status);
        drop(current);
        status
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    source: Arc<dyn FrameSource>,
    decoder: Arc<dyn Decoder>,
    store: Arc<Mutex<dyn CountStore + Send>>,
    settings: ReaderSettings,
    shared: Arc<SessionShared>,
}

impl Worker {
    fn run(self, stream_ref: &str) {
        let mut stream = match self.source.open(stream_ref) {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("stream {} failed to open: {}", stream_ref, err);
                self.shared.set_status(SessionStatus::FailedToOpen);
                self.shared.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let mut tracker = PresenceTracker::new(self.settings.tracker);
        while self.shared.running.load(Ordering::SeqCst) {
            match stream.read() {
                ReadOutcome::Frame(frame) => {
                    let detected = match self.decoder.decode(&frame) {
                        Ok(detected) => detected,
                        Err(err) => {
                            log::warn!("frame skipped: {}", err);
                            std::thread::sleep(self.settings.poll_interval);
                            continue;
                        }
                    };
                    let events = tracker.process_frame(&detected, Instant::now());
                    self.apply(&events);
                    std::thread::sleep(self.settings.poll_interval);
                }
                ReadOutcome::EndOfStream => {
                    log::info!("stream {} ended", stream_ref);
                    break;
                }
                ReadOutcome::Transient => {
                    log::debug!("transient read failure on {}; retrying", stream_ref);
                    std::thread::sleep(self.settings.poll_interval);
                }
            }
        }

        self.shared.set_status(SessionStatus::Stopped);
    }

    /// Apply one frame's events to the store, in emission order, before the
    /// caller reads the next frame. A rejected write drops that event only.
    fn apply(&self, events: &[DetectionEvent]) {
        if events.is_empty() {
            return;
        }
        let mut store = lock(&self.store);
        for event in events {
            let result = match event.kind {
                EventKind::Entry => {
                    log::info!("item entered: {}", event.code);
                    store.increment(&event.code).map(|_| ())
                }
                EventKind::Exit => {
                    log::info!("item left: {}", event.code);
                    store.record_exit(&event.code)
                }
            };
            if let Err(err) = result {
                log::warn!("count write for {} dropped: {}", event.code, err);
            }
        }
    }
}

//! End-to-end reader sessions against scripted sources and decoders.
//!
//! These tests run the real worker thread: a scripted frame source plays a
//! fixed sequence of read outcomes, the text decoder turns frames back into
//! code sets, and an in-memory store records the side effects.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tally_kernel::decode::text_frame;
use tally_kernel::{
    Code, CountStore, Decoder, ExitPolicy, Frame, FrameSource, FrameStream, InMemoryCountStore,
    ReadOutcome, ReaderSettings, SessionStatus, StreamReader, TextDecoder, TrackerConfig,
};

#[derive(Clone)]
enum Step {
    Codes(&'static [&'static str]),
    Transient,
}

/// Frame source whose streams replay a fixed script. Each `open` yields an
/// independent replay; once the script runs out the stream either ends or,
/// with `repeat`, starts over.
struct ScriptedSource {
    steps: Vec<Step>,
    repeat: bool,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            repeat: false,
        }
    }

    fn repeating(steps: Vec<Step>) -> Self {
        Self {
            steps,
            repeat: true,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn open(&self, _stream_ref: &str) -> Result<Box<dyn FrameStream + Send>> {
        Ok(Box::new(ScriptedStream {
            steps: self.steps.clone(),
            repeat: self.repeat,
            next: 0,
        }))
    }
}

struct ScriptedStream {
    steps: Vec<Step>,
    repeat: bool,
    next: usize,
}

impl FrameStream for ScriptedStream {
    fn read(&mut self) -> ReadOutcome {
        if self.next >= self.steps.len() {
            if !self.repeat || self.steps.is_empty() {
                return ReadOutcome::EndOfStream;
            }
            self.next = 0;
        }
        let step = self.steps[self.next].clone();
        self.next += 1;
        match step {
            Step::Codes(codes) => ReadOutcome::Frame(text_frame(codes, 64, 64)),
            Step::Transient => ReadOutcome::Transient,
        }
    }
}

/// Source whose `open` always fails, for exercising the fatal path.
struct UnavailableSource;

impl FrameSource for UnavailableSource {
    fn open(&self, stream_ref: &str) -> Result<Box<dyn FrameStream + Send>> {
        anyhow::bail!("no such stream: {}", stream_ref)
    }
}

/// Text decoder that rejects any frame carrying the `bad_frame` marker.
struct FaultInjectingDecoder {
    inner: TextDecoder,
}

impl Decoder for FaultInjectingDecoder {
    fn decode(&self, frame: &Frame) -> Result<BTreeSet<Code>> {
        let codes = self.inner.decode(frame)?;
        if codes.contains("bad_frame") {
            anyhow::bail!("decoder rejected frame");
        }
        Ok(codes)
    }
}

fn fast_settings(policy: ExitPolicy) -> ReaderSettings {
    ReaderSettings {
        poll_interval: Duration::from_millis(1),
        stop_grace: Duration::from_secs(5),
        tracker: TrackerConfig { policy },
    }
}

fn reader_over(
    source: impl FrameSource + 'static,
    policy: ExitPolicy,
) -> (StreamReader, Arc<Mutex<InMemoryCountStore>>) {
    let store = Arc::new(Mutex::new(InMemoryCountStore::new()));
    let reader = StreamReader::new(
        Arc::new(source),
        Arc::new(TextDecoder::new()),
        store.clone(),
        fast_settings(policy),
    );
    (reader, store)
}

fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {}", what);
}

fn quantity_of(store: &Mutex<InMemoryCountStore>, code: &str) -> Option<i64> {
    let store = store.lock().unwrap();
    let readings = store.readings().unwrap();
    readings
        .iter()
        .find(|reading| reading.code == code)
        .map(|reading| reading.quantity)
}

#[test]
fn session_counts_entries_and_records_exits() {
    let source = ScriptedSource::new(vec![
        Step::Codes(&["box_a"]),
        Step::Codes(&["box_a"]),
        Step::Codes(&[]),
        Step::Codes(&[]),
        Step::Codes(&["box_b"]),
    ]);
    let (reader, store) = reader_over(source, ExitPolicy::Strict);

    reader.start("scripted://shelf");
    wait_for("end of stream", || {
        reader.status() == SessionStatus::Stopped
    });
    reader.stop();

    assert_eq!(quantity_of(&store, "box_a"), Some(1));
    assert_eq!(quantity_of(&store, "box_b"), Some(1));

    // box_a exited at the first empty frame; box_b was still present when
    // the stream ended, and stopping must not fabricate an exit for it.
    let exits = store.lock().unwrap().exits().unwrap();
    let exited: Vec<&str> = exits.iter().map(|marker| marker.code.as_str()).collect();
    assert_eq!(exited, vec!["box_a"]);
}

#[test]
fn debounce_absorbs_flicker_without_double_counting() {
    let source = ScriptedSource::new(vec![
        Step::Codes(&["box_a"]),
        Step::Codes(&[]),
        Step::Codes(&["box_a"]),
        Step::Codes(&[]),
        Step::Codes(&["box_a"]),
    ]);
    let policy = ExitPolicy::Debounced {
        timeout: Duration::from_secs(10),
    };
    let (reader, store) = reader_over(source, policy);

    reader.start("scripted://shelf");
    wait_for("end of stream", || {
        reader.status() == SessionStatus::Stopped
    });
    reader.stop();

    assert_eq!(quantity_of(&store, "box_a"), Some(1));
    assert!(store.lock().unwrap().exits().unwrap().is_empty());
}

#[test]
fn open_failure_is_reported_via_status() {
    let (reader, store) = reader_over(UnavailableSource, ExitPolicy::default());

    reader.start("rtsp://no-such-camera/stream");
    wait_for("failed-to-open status", || {
        reader.status() == SessionStatus::FailedToOpen
    });

    assert!(store.lock().unwrap().readings().unwrap().is_empty());

    // A stop after a failed open is a no-op and keeps the failure visible.
    reader.stop();
    assert_eq!(reader.status(), SessionStatus::FailedToOpen);
}

#[test]
fn stop_is_idempotent_and_restart_begins_fresh() {
    let source = ScriptedSource::repeating(vec![Step::Codes(&["box_a"])]);
    let (reader, store) = reader_over(source, ExitPolicy::default());

    reader.start("scripted://shelf");
    wait_for("first entry", || quantity_of(&store, "box_a") == Some(1));

    reader.stop();
    assert_eq!(reader.status(), SessionStatus::Stopped);
    reader.stop();
    assert_eq!(reader.status(), SessionStatus::Stopped);

    // The active set died with the session, so the same code entering again
    // counts again.
    reader.start("scripted://shelf");
    wait_for("second entry", || quantity_of(&store, "box_a") == Some(2));
    reader.stop();
}

#[test]
fn start_replaces_a_running_session() {
    let source = ScriptedSource::repeating(vec![Step::Codes(&["box_a"])]);
    let (reader, store) = reader_over(source, ExitPolicy::default());

    reader.start("scripted://shelf");
    wait_for("first entry", || quantity_of(&store, "box_a") == Some(1));

    // Replacing the session resets presence, so the code re-enters.
    reader.start("scripted://shelf");
    wait_for("entry after replace", || {
        quantity_of(&store, "box_a") == Some(2)
    });
    assert_eq!(reader.status(), SessionStatus::Running);
    reader.stop();
}

#[test]
fn decode_failure_skips_that_frame_only() {
    let source = ScriptedSource::new(vec![
        Step::Codes(&["box_a"]),
        Step::Codes(&["bad_frame"]),
        Step::Codes(&["box_b"]),
    ]);
    let store = Arc::new(Mutex::new(InMemoryCountStore::new()));
    let reader = StreamReader::new(
        Arc::new(source),
        Arc::new(FaultInjectingDecoder {
            inner: TextDecoder::new(),
        }),
        store.clone(),
        fast_settings(ExitPolicy::Strict),
    );

    reader.start("scripted://shelf");
    wait_for("end of stream", || {
        reader.status() == SessionStatus::Stopped
    });
    reader.stop();

    assert_eq!(quantity_of(&store, "box_a"), Some(1));
    assert_eq!(quantity_of(&store, "box_b"), Some(1));
    assert_eq!(quantity_of(&store, "bad_frame"), None);
}

#[test]
fn transient_read_failures_are_retried() {
    let source = ScriptedSource::new(vec![
        Step::Transient,
        Step::Transient,
        Step::Codes(&["box_a"]),
    ]);
    let (reader, store) = reader_over(source, ExitPolicy::default());

    reader.start("scripted://shelf");
    wait_for("entry after retries", || {
        quantity_of(&store, "box_a") == Some(1)
    });
    wait_for("end of stream", || {
        reader.status() == SessionStatus::Stopped
    });
    reader.stop();
}

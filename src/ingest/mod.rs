//! Frame ingestion sources.
//!
//! This module provides the contract between the reader loop and whatever
//! produces frames:
//! - RTSP streams (IP cameras, feature: rtsp-gstreamer)
//! - Stub streams (testing, `stub://` references)
//!
//! A source opens a stream reference into a live stream handle; the handle
//! yields frames one at a time. The ingestion layer is responsible for:
//! - Distinguishing fatal open failures from transient read failures
//! - Decoding video into a grayscale luma plane
//! - Signalling end-of-stream explicitly
//!
//! The ingestion layer MUST NOT:
//! - Retry a failed open on its own (the session stays stopped)
//! - Interpret frame content (decoding codes is the decoder's job)

mod rtsp;

pub use rtsp::{RtspConfig, RtspSource};

use anyhow::Result;

/// One captured frame: a grayscale luma plane plus its dimensions.
///
/// The core never looks inside; only decoders do.
#[derive(Clone, Debug)]
pub struct Frame {
    pub luma: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Result of one read from a live stream.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The stream ended cleanly (e.g. a file ran out). The session stops.
    EndOfStream,
    /// A single read failed after a successful open. The reader backs off
    /// for one poll interval and retries indefinitely while running.
    Transient,
}

/// Opens stream references into live streams.
///
/// An `Err` from `open` is fatal for the run: the worker exits and the
/// session reverts to stopped, discoverable via the status query.
pub trait FrameSource: Send + Sync {
    fn open(&self, stream_ref: &str) -> Result<Box<dyn FrameStream + Send>>;
}

/// A live, opened stream yielding frames until it ends.
pub trait FrameStream: Send {
    fn read(&mut self) -> ReadOutcome;
}

//! Barcode decoding backends.
//!
//! A decoder takes one frame and returns the set of code payloads visible
//! in it. Duplicate reads of the same code within a frame collapse into one
//! set membership by construction, and a frame with zero codes is a normal
//! empty result, never an error.
//!
//! Backends:
//! - `TextDecoder`: reads the plain-text payloads synthetic `stub://`
//!   streams embed in the luma plane; real camera frames decode to nothing.
//! - `RxingDecoder` (feature: decode-rxing): real multi-format barcode
//!   decoding over the luma plane.

mod text;

#[cfg(feature = "decode-rxing")]
mod rxing_backend;

pub use text::{text_frame, TextDecoder};

#[cfg(feature = "decode-rxing")]
pub use rxing_backend::RxingDecoder;

use anyhow::Result;
use std::collections::BTreeSet;

use crate::ingest::Frame;
use crate::Code;

/// Per-frame barcode decoder.
///
/// An `Err` means this frame could not be decoded at all; the reader skips
/// the frame and continues. Implementations hold no per-session state.
pub trait Decoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Result<BTreeSet<Code>>;
}

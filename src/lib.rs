//! Barcode presence-tracking kernel.
//!
//! This crate turns a continuous video stream into per-item counts: frames
//! are decoded into sets of barcode payloads, a presence tracker converts
//! the raw per-frame sets into debounced entry/exit events, and every entry
//! increments a durable count for that code.
//!
//! # Architecture
//!
//! - `ingest`: frame sources (RTSP, stub streams for tests)
//! - `decode`: per-frame barcode decoding backends
//! - `tracker`: the presence state machine (entry/exit derivation)
//! - `reader`: the worker loop driving source -> decode -> track -> store
//! - `store`: durable per-code counts, product registry, exit markers
//! - `api`: local HTTP control surface (start/stop/status, readings, report)
//!
//! The reader owns exactly one background worker per instance; all tracker
//! state is confined to that worker. `start` is fire-and-forget, `stop` is
//! blocking and idempotent, and open failures are surfaced through the
//! session status query rather than from `start` itself.

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod config;
pub mod decode;
pub mod ingest;
pub mod reader;
pub mod store;
pub mod tracker;

pub use decode::{Decoder, TextDecoder};
pub use ingest::{Frame, FrameSource, FrameStream, ReadOutcome, RtspConfig, RtspSource};
pub use reader::{ReaderSettings, SessionStatus, StreamReader};
pub use store::{
    CountStore, ExitMarker, InMemoryCountStore, Product, Reading, ReportRow, SqliteCountStore,
};
pub use tracker::{DetectionEvent, EventKind, ExitPolicy, PresenceTracker, TrackerConfig};

/// Decoded barcode payload, treated as an opaque identifier.
pub type Code = String;

/// URI for a process-shared in-memory SQLite database. Each call yields a
/// distinct database, so tests do not collide.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:tally_kernel_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Lock a shared mutex, recovering the data from a poisoned lock.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! tallyd - barcode tally daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + environment overrides)
//! 2. Opens the count store and ensures its schema
//! 3. Spawns the local control API (start/stop/status, readings, report)
//! 4. Optionally starts a session against the configured stream URL
//! 5. Runs until ctrl-c, then stops the session and the API in order

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tally_kernel::api::{ApiConfig, ApiServer};
use tally_kernel::config::TallydConfig;
use tally_kernel::{CountStore, Decoder, RtspSource, SqliteCountStore, StreamReader};

#[cfg(feature = "decode-rxing")]
use tally_kernel::decode::RxingDecoder;
#[cfg(not(feature = "decode-rxing"))]
use tally_kernel::TextDecoder;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = TallydConfig::load()?;
    let store = SqliteCountStore::open(&cfg.db_path)?;
    let store: Arc<Mutex<dyn CountStore + Send>> = Arc::new(Mutex::new(store));

    let source = Arc::new(RtspSource::new(cfg.rtsp_config()));
    #[cfg(feature = "decode-rxing")]
    let decoder: Arc<dyn Decoder> = Arc::new(RxingDecoder::new());
    #[cfg(not(feature = "decode-rxing"))]
    let decoder: Arc<dyn Decoder> = Arc::new(TextDecoder::new());

    let reader = Arc::new(StreamReader::new(
        source,
        decoder,
        store.clone(),
        cfg.reader_settings(),
    ));

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        default_stream_url: cfg.stream.url.clone(),
    };
    let api_handle = ApiServer::new(api_config, reader.clone(), store).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    if cfg.stream.auto_start {
        reader.start(&cfg.stream.url);
        log::info!("stream session started for {}", cfg.stream.url);
    }

    log::info!(
        "tallyd running. counting into {} (exit policy: {})",
        cfg.db_path,
        cfg.exit_policy
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    reader.stop();
    api_handle.stop()?;
    Ok(())
}

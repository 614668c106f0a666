//! Local HTTP control surface.
//!
//! A small hand-rolled server over `std::net`, bound to loopback by
//! default. It exposes the session controls (`/stream/start`,
//! `/stream/stop`, `/stream/status`) plus the read side of the count store
//! (`/readings`, `/report`, `/products`). Start requests are acknowledged
//! with 202 before the stream is opened; open failures surface through the
//! status endpoint.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::lock;
use crate::reader::StreamReader;
use crate::store::CountStore;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Stream reference used when a start request carries no `url`.
    pub default_stream_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8788".to_string(),
            default_stream_url: "stub://demo_item".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    reader: Arc<StreamReader>,
    store: Arc<Mutex<dyn CountStore + Send>>,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        reader: Arc<StreamReader>,
        store: Arc<Mutex<dyn CountStore + Send>>,
    ) -> Self {
        Self { cfg, reader, store }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let reader = self.reader.clone();
        let store = self.store.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, reader, store, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    reader: Arc<StreamReader>,
    store: Arc<Mutex<dyn CountStore + Send>>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &cfg, &reader, &store) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterProductRequest {
    code: String,
    description: String,
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    reader: &StreamReader,
    store: &Mutex<dyn CountStore + Send>,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/stream/status") => {
            let body = json!({ "state": reader.status().as_str() });
            write_json_response(&mut stream, 200, &body.to_string())
        }
        ("POST", "/stream/start") => {
            let url = match start_url(&request, cfg) {
                Ok(url) => url,
                Err(_) => {
                    write_json_response(&mut stream, 400, r#"{"error":"invalid_body"}"#)?;
                    return Ok(());
                }
            };
            reader.start(&url);
            let body = json!({ "state": reader.status().as_str(), "url": url });
            write_json_response(&mut stream, 202, &body.to_string())
        }
        ("POST", "/stream/stop") => {
            reader.stop();
            let body = json!({ "state": reader.status().as_str() });
            write_json_response(&mut stream, 200, &body.to_string())
        }
        ("GET", "/readings") => {
            let readings = lock(store).readings()?;
            write_json_response(&mut stream, 200, &serde_json::to_string(&readings)?)
        }
        ("GET", "/report") => {
            let report = lock(store).report()?;
            write_json_response(&mut stream, 200, &serde_json::to_string(&report)?)
        }
        ("GET", "/products") => {
            let products = lock(store).products()?;
            write_json_response(&mut stream, 200, &serde_json::to_string(&products)?)
        }
        ("POST", "/products") => {
            let Ok(body) = serde_json::from_slice::<RegisterProductRequest>(&request.body) else {
                write_json_response(&mut stream, 400, r#"{"error":"invalid_body"}"#)?;
                return Ok(());
            };
            let mut store = lock(store);
            if store.product(&body.code)?.is_some() {
                write_json_response(&mut stream, 409, r#"{"error":"code_already_registered"}"#)?;
                return Ok(());
            }
            match store.register_product(&body.code, &body.description) {
                Ok(product) => {
                    write_json_response(&mut stream, 201, &serde_json::to_string(&product)?)
                }
                Err(_) => write_json_response(&mut stream, 400, r#"{"error":"invalid_body"}"#),
            }
        }
        (_, path) if known_path(path) => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn known_path(path: &str) -> bool {
    matches!(
        path,
        "/health"
            | "/stream/status"
            | "/stream/start"
            | "/stream/stop"
            | "/readings"
            | "/report"
            | "/products"
    )
}

fn start_url(request: &HttpRequest, cfg: &ApiConfig) -> Result<String> {
    if request.body.is_empty() {
        return Ok(cfg.default_stream_url.clone());
    }
    let parsed: StartRequest = serde_json::from_slice(&request.body)?;
    Ok(parsed
        .url
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| cfg.default_stream_url.clone()))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers were complete"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?.to_string();
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?.to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = match headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request too large"));
    }
    while data.len() < header_end + content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body was complete"));
        }
        data.extend_from_slice(&buf[..n]);
    }
    let body = data[header_end..header_end + content_length].to_vec();

    let path = raw_path.split('?').next().unwrap_or(&raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        202 => "HTTP/1.1 202 Accepted",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

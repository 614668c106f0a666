//! RTSP frame source.
//!
//! `RtspSource` opens camera stream URLs. `stub://` references get a
//! synthetic backend that plays a deterministic scene of coded items coming
//! and going, which is what the tests and the demo configuration run
//! against. Any other URL requires the `rtsp-gstreamer` feature and is
//! decoded through a GStreamer pipeline into grayscale frames.

use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::{anyhow, Context};
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Duration;

use crate::decode::text_frame;
use crate::ingest::{Frame, FrameSource, FrameStream, ReadOutcome};

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Target frame rate (frames per second). Real streams decimate to this.
    pub target_fps: u32,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// RTSP frame source. One instance opens any number of sessions; each
/// `open` call yields an independent live stream.
pub struct RtspSource {
    config: RtspConfig,
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Self {
        Self { config }
    }
}

impl FrameSource for RtspSource {
    fn open(&self, stream_ref: &str) -> Result<Box<dyn FrameStream + Send>> {
        if let Some(roster) = stream_ref.strip_prefix("stub://") {
            log::info!("RtspSource: opened {} (synthetic)", stream_ref);
            return Ok(Box::new(SyntheticStream::new(
                roster,
                self.config.clone(),
            )));
        }

        #[cfg(feature = "rtsp-gstreamer")]
        {
            let stream = GstreamerStream::open(stream_ref, &self.config)?;
            log::info!("RtspSource: opened {}", stream_ref);
            return Ok(Box::new(stream));
        }

        #[cfg(not(feature = "rtsp-gstreamer"))]
        anyhow::bail!(
            "cannot open {}: RTSP requires the rtsp-gstreamer feature",
            stream_ref
        )
    }
}

// ----------------------------------------------------------------------------
// Synthetic stream (stub://) for tests and demos
// ----------------------------------------------------------------------------

/// Plays a scene over the roster named in the stream reference
/// (`stub://box_a,box_b`): each code is visible for a stretch of frames,
/// separated by an empty stretch, cycling forever. A bare `stub://` is a
/// stream with no codes at all.
struct SyntheticStream {
    roster: Vec<String>,
    config: RtspConfig,
    frame_count: u64,
}

const PHASE_FRAMES: u64 = 25;

impl SyntheticStream {
    fn new(roster: &str, config: RtspConfig) -> Self {
        let roster = roster
            .split(',')
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .map(|code| code.to_string())
            .collect();
        Self {
            roster,
            config,
            frame_count: 0,
        }
    }

    fn visible_codes(&self) -> Vec<&str> {
        if self.roster.is_empty() {
            return Vec::new();
        }
        let phases = self.roster.len() as u64 + 1;
        let phase = (self.frame_count / PHASE_FRAMES) % phases;
        match self.roster.get(phase as usize) {
            Some(code) => vec![code.as_str()],
            None => Vec::new(), // empty stretch between cycles
        }
    }
}

impl FrameStream for SyntheticStream {
    fn read(&mut self) -> ReadOutcome {
        let codes = self.visible_codes();
        let frame = text_frame(&codes, self.config.width, self.config.height);
        self.frame_count += 1;
        ReadOutcome::Frame(frame)
    }
}

// ----------------------------------------------------------------------------
// Production RTSP stream using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    target_fps: u32,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStream {
    /// Build and start the pipeline:
    /// rtspsrc ! decodebin ! videoconvert ! GRAY8 ! appsink
    fn open(url: &str, config: &RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! \
             video/x-raw,format=GRAY8 ! appsink name=appsink sync=false \
             max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse_launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "GRAY8")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        Ok(Self {
            pipeline,
            appsink,
            target_fps: config.target_fps,
        })
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            500
        } else {
            (1000 / self.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    /// Drain pending bus messages; returns true when the stream hit EOS.
    fn drain_bus(&mut self) -> bool {
        let Some(bus) = self.pipeline.bus() else {
            return false;
        };
        let mut eos = false;
        while let Some(message) = bus.timed_pop(Duration::from_millis(0)) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    log::warn!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    );
                }
                MessageView::Eos(..) => {
                    eos = true;
                }
                _ => {}
            }
        }
        eos
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameStream for GstreamerStream {
    fn read(&mut self) -> ReadOutcome {
        if self.drain_bus() {
            return ReadOutcome::EndOfStream;
        }

        let sample = match self.appsink.try_pull_sample(self.frame_timeout()) {
            Some(sample) => sample,
            None => return ReadOutcome::Transient,
        };

        match sample_to_luma(&sample) {
            Ok((luma, width, height)) => ReadOutcome::Frame(Frame {
                luma,
                width,
                height,
            }),
            Err(err) => {
                log::warn!("RTSP sample rejected: {}", err);
                ReadOutcome::Transient
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_luma(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut luma = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        luma.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((luma, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

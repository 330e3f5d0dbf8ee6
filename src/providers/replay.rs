//! Replay radio for recorded frame captures

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::provider::{FrameSink, PeerRadio};
use crate::types::Frame;
use crate::{GatewayError, Result};

/// Default gap between replayed frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(50);

/// Peer radio that plays back a recorded capture.
///
/// A capture is a text file with one frame per line in `ID#HEX` notation, the same notation
/// [`Frame`] displays as. Blank lines and lines starting with `#` are skipped:
///
/// ```text
/// # cells 1-4
/// 88008000#0CE40CE50CE60CE7
/// 90008000#3D3E2B40
/// ```
///
/// Enabling the radio spawns a playback task that feeds frames to the sink through the same
/// 16-byte transport encoding a real radio would use. Disabling cancels it.
pub struct ReplayRadio {
    /// Captured frames in playback order
    frames: Arc<[Frame]>,

    /// Gap between frames
    interval: Duration,

    /// Start over after the last frame
    repeat: bool,

    /// Running playback task
    playback: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ReplayRadio {
    /// Create a replay radio over already parsed frames.
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames: frames.into(), interval: DEFAULT_FRAME_INTERVAL, repeat: false, playback: None }
    }

    /// Parse a capture from text.
    pub fn from_capture(capture: &str) -> Result<Self> {
        let frames = parse_capture(capture)?;
        Ok(Self::new(frames))
    }

    /// Read and parse a capture file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let capture = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::capture(0, format!("cannot read {}: {}", path.display(), e))
        })?;
        let radio = Self::from_capture(&capture)?;
        info!("Opened capture {}: {} frames", path.display(), radio.frames.len());
        Ok(radio)
    }

    /// Set the gap between frames.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Loop the capture until disabled.
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Number of frames in the capture.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether a playback task is running.
    pub fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|(_, handle)| !handle.is_finished())
    }

    async fn play(
        frames: Arc<[Frame]>,
        pace: Duration,
        repeat: bool,
        sink: FrameSink,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(pace.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = 0u64;

        'replay: loop {
            for frame in frames.iter() {
                tokio::select! {
                    _ = cancel.cancelled() => break 'replay,
                    _ = ticker.tick() => {}
                }

                match sink.deliver(&frame.to_wire()) {
                    Ok(Some(group)) => trace!("Replayed {} as {}", frame, group),
                    Ok(None) => trace!("Replayed {} (no group)", frame),
                    Err(e) => warn!("Replay frame rejected: {}", e),
                }
                delivered += 1;
            }

            if !repeat || frames.is_empty() {
                break;
            }
            debug!("Capture finished, starting over");
        }

        debug!("Playback ended after {} frames", delivered);
    }

    fn stop(&mut self) -> Option<JoinHandle<()>> {
        let (cancel, handle) = self.playback.take()?;
        cancel.cancel();
        Some(handle)
    }
}

#[async_trait::async_trait]
impl PeerRadio for ReplayRadio {
    async fn enable(&mut self, sink: FrameSink) -> Result<()> {
        if let Some(handle) = self.stop() {
            let _ = handle.await;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::play(
            Arc::clone(&self.frames),
            self.interval,
            self.repeat,
            sink,
            cancel.clone(),
        ));
        self.playback = Some((cancel, task));
        debug!("Replay radio enabled ({} frames)", self.frames.len());
        Ok(())
    }

    async fn disable(&mut self) {
        if let Some(handle) = self.stop() {
            let _ = handle.await;
            debug!("Replay radio disabled");
        }
    }
}

impl Drop for ReplayRadio {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse `ID#HEX` capture text into frames.
pub fn parse_capture(capture: &str) -> Result<Vec<Frame>> {
    capture
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| parse_line(number, line))
        .collect()
}

fn parse_line(number: usize, line: &str) -> Result<Frame> {
    let (id, data) = line
        .split_once('#')
        .ok_or_else(|| GatewayError::capture(number, format!("missing '#' in '{}'", line)))?;
    let identifier = u32::from_str_radix(id.trim(), 16)
        .map_err(|e| GatewayError::capture(number, format!("bad identifier '{}': {}", id, e)))?;
    let payload = hex::decode(data.trim())
        .map_err(|e| GatewayError::capture(number, format!("bad payload '{}': {}", data, e)))?;
    Frame::new(identifier, &payload).map_err(|e| GatewayError::capture(number, e.to_string()))
}

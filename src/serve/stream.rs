use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::capture::{run_blocking, FrameLease, SensorConfiguration, SharedSensor};
use crate::error::{Result, SensorError, TransportError};
use crate::preset::StreamPreset;
use crate::serve::{
    allow_any_origin, CapturePolicy, ResponseChannel, Timing, FRAME_SEPARATOR,
    STREAM_BOUNDARY, STREAM_CONTENT_TYPE, STREAM_PART_HEADER,
};

/// How a stream went, reported once the peer is gone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_sent: u64,
    pub capture_failures: u64,
}

/// Serves an MJPEG stream per request.
///
/// The stream's preset stays ambient after the peer disconnects unless
/// [`MultipartStreamer::restore_on_exit`] is set.
#[derive(Clone)]
pub struct MultipartStreamer {
    sensor: SharedSensor,
    timing: Timing,
    policy: CapturePolicy,
    chunk_size: usize,
    restore_on_exit: bool,
    shutdown: CancellationToken,
}

impl MultipartStreamer {
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;

    pub fn new(sensor: SharedSensor, timing: Timing) -> Self {
        Self {
            sensor,
            timing,
            policy: CapturePolicy::RetryWithBackoff(timing.retry_backoff()),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            restore_on_exit: false,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: CapturePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Largest single write of JPEG payload.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Put the pre-stream configuration back when the stream ends.
    pub fn restore_on_exit(mut self, restore: bool) -> Self {
        self.restore_on_exit = restore;
        self
    }

    /// End every stream, between frames, once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Stream frames at `preset` until a send fails or shutdown begins.
    ///
    /// Returns `Ok` when the peer went away, which is the normal way for a
    /// stream to end. Errors mean the stream never got going (headers could
    /// not be set) or capture failed under [`CapturePolicy::FailFast`].
    #[instrument(skip(self, channel), fields(preset = %preset))]
    pub async fn stream<C: ResponseChannel>(
        &self,
        preset: StreamPreset,
        channel: &mut C,
    ) -> Result<StreamSummary> {
        let target = preset.configuration();
        let previous = {
            let mut sensor = self.sensor.lock().await;
            let previous = sensor.configuration();
            sensor.apply(target);
            sleep(self.timing.stream_settle()).await;
            previous
        };

        let outcome = self.run(target, channel).await;

        if self.restore_on_exit {
            self.sensor.lock().await.apply(previous);
            debug!(restored = %previous, "Sensor configuration restored");
        }

        match &outcome {
            Ok(summary) => info!(
                frames = summary.frames_sent,
                capture_failures = summary.capture_failures,
                "Stream ended"
            ),
            Err(e) => warn!(error = %e, "Stream aborted"),
        }
        outcome
    }

    async fn run<C: ResponseChannel>(
        &self,
        target: SensorConfiguration,
        channel: &mut C,
    ) -> Result<StreamSummary> {
        channel.set_content_type(STREAM_CONTENT_TYPE)?;
        let (name, value) = allow_any_origin();
        channel.set_header(name, value)?;

        let mut summary = StreamSummary::default();
        loop {
            let payload = match self.capture(target).await {
                Ok(payload) => payload,
                Err(e) => {
                    summary.capture_failures += 1;
                    counter!("iris_capture_failures_total", "mode" => "stream").increment(1);
                    let Some(delay) = self.policy.retry_delay() else {
                        return Err(e.into());
                    };
                    warn!(error = %e, "Frame capture failed");
                    if !self.pause(delay).await {
                        return Ok(summary);
                    }
                    continue;
                }
            };

            if let Err(e) = self.send_part(channel, payload).await {
                counter!("iris_transport_failures_total", "mode" => "stream").increment(1);
                debug!(error = %e, "Peer gone");
                return Ok(summary);
            }
            summary.frames_sent += 1;
            counter!("iris_frames_sent_total", "mode" => "stream").increment(1);

            if !self.pause(self.timing.frame_interval()).await {
                return Ok(summary);
            }
        }
    }

    /// Sleep for `delay`; `false` if shutdown started meanwhile.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => true,
            _ = self.shutdown.cancelled() => {
                debug!("Server shutting down, ending stream");
                false
            }
        }
    }

    /// Capture one frame at `target` and stage its payload.
    ///
    /// The buffer is back with the sensor by the time this returns; the staged
    /// bytes are reference counted and outlive it.
    async fn capture(&self, target: SensorConfiguration) -> Result<Bytes, SensorError> {
        let mut sensor = self.sensor.lock().await;

        // Another stream may have moved the sensor since our last frame.
        if sensor.configuration() != target {
            debug!(ambient = %sensor.configuration(), "Re-applying stream preset");
            sensor.apply(target);
            sleep(self.timing.stream_settle()).await;
        }

        let frame = run_blocking(|| sensor.acquire_frame())?;
        let lease = FrameLease::new(&mut **sensor, frame);
        trace!(sequence = lease.sequence(), bytes = lease.len(), "Frame captured");
        Ok(lease.stage())
    }

    async fn send_part<C: ResponseChannel>(
        &self,
        channel: &mut C,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        channel.send_chunk(Bytes::from_static(STREAM_BOUNDARY)).await?;
        channel.send_chunk(Bytes::from_static(STREAM_PART_HEADER)).await?;

        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + self.chunk_size).min(payload.len());
            channel.send_chunk(payload.slice(offset..end)).await?;
            offset = end;
        }

        channel.send_chunk(Bytes::from_static(FRAME_SEPARATOR)).await
    }
}

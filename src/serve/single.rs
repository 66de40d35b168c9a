use bytes::Bytes;
use metrics::counter;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::capture::{run_blocking, FrameLease, Sensor, SharedSensor};
use crate::error::{Result, TransportError};
use crate::preset::StreamPreset;
use crate::serve::{allow_any_origin, CapturePolicy, ResponseChannel, Timing, JPEG_CONTENT_TYPE};

/// Serves one JPEG per request and leaves the sensor as it found it.
#[derive(Clone)]
pub struct SingleFrameResponder {
    sensor: SharedSensor,
    timing: Timing,
    policy: CapturePolicy,
}

impl SingleFrameResponder {
    pub fn new(sensor: SharedSensor, timing: Timing) -> Self {
        Self {
            sensor,
            timing,
            policy: CapturePolicy::FailFast,
        }
    }

    pub fn with_policy(mut self, policy: CapturePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Capture one frame at `preset` and send it as the whole response.
    ///
    /// The sensor configuration in effect before the call is restored on
    /// every path out, including capture and transmit failures and the
    /// returned future being dropped. Returns the number of JPEG bytes sent.
    #[instrument(skip(self, channel), fields(preset = %preset))]
    pub async fn respond<C: ResponseChannel>(
        &self,
        preset: StreamPreset,
        channel: &mut C,
    ) -> Result<usize> {
        // Restores on drop, so a cancelled request cannot strand the preset.
        let mut sensor = self.sensor.lock_scoped().await;

        sensor.apply(preset.configuration());
        sleep(self.timing.single_settle()).await;

        let outcome = self.capture_and_send(&mut *sensor, channel).await;
        drop(sensor);

        outcome
    }

    async fn capture_and_send<C: ResponseChannel>(
        &self,
        sensor: &mut dyn Sensor,
        channel: &mut C,
    ) -> Result<usize> {
        let frame = loop {
            match run_blocking(|| sensor.acquire_frame()) {
                Ok(frame) => break frame,
                Err(e) => {
                    counter!("iris_capture_failures_total", "mode" => "single").increment(1);
                    let Some(delay) = self.policy.retry_delay() else {
                        warn!(error = %e, "Camera capture failed");
                        if let Err(send_err) = channel.send_server_error().await {
                            warn!(error = %send_err, "Failed to report capture failure");
                        }
                        return Err(e.into());
                    };
                    warn!(error = %e, "Camera capture failed, retrying");
                    sleep(delay).await;
                }
            }
        };

        let lease = FrameLease::new(sensor, frame);
        let len = lease.len();
        let sent = transmit(channel, lease.stage()).await;
        lease.release();

        match sent {
            Ok(()) => {
                counter!("iris_frames_sent_total", "mode" => "single").increment(1);
                info!(bytes = len, "JPEG sent");
                Ok(len)
            }
            Err(e) => {
                counter!("iris_transport_failures_total", "mode" => "single").increment(1);
                warn!(error = %e, "HTTP send error");
                Err(e.into())
            }
        }
    }
}

async fn transmit<C: ResponseChannel>(channel: &mut C, jpeg: Bytes) -> Result<(), TransportError> {
    channel.set_content_type(JPEG_CONTENT_TYPE)?;
    let (name, value) = allow_any_origin();
    channel.set_header(name, value)?;
    channel.send(jpeg).await
}

//! The sensor capability and the gate that serializes access to it

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::capture::frame::{FrameBuffer, FrameSize, JpegQuality, SensorConfiguration};
use crate::error::SensorError;

/// A camera whose operating parameters can be changed between captures.
///
/// Implementations are driven from one task at a time through
/// [`SharedSensor`]; they do not need interior synchronization.
pub trait Sensor: Send {
    /// Current live configuration.
    fn configuration(&self) -> SensorConfiguration;

    fn set_resolution(&mut self, resolution: FrameSize) -> Result<(), SensorError>;

    fn set_quality(&mut self, quality: JpegQuality) -> Result<(), SensorError>;

    /// Read out the next frame. May block until the hardware has one ready.
    fn acquire_frame(&mut self) -> Result<FrameBuffer, SensorError>;

    /// Hand a buffer obtained from [`Sensor::acquire_frame`] back to the driver.
    fn release_frame(&mut self, frame: FrameBuffer);

    /// Apply a full configuration, resolution first and quality second.
    ///
    /// Failures are logged and otherwise ignored: callers treat presets as
    /// always applicable and keep going with whatever the sensor accepted.
    fn apply(&mut self, config: SensorConfiguration) {
        if let Err(e) = self.set_resolution(config.resolution) {
            warn!(resolution = %config.resolution, error = %e, "Failed to set resolution");
        }
        if let Err(e) = self.set_quality(config.quality) {
            warn!(quality = %config.quality, error = %e, "Failed to set quality");
        }
    }
}

/// Process-wide handle to the one physical sensor.
///
/// Every configure/capture/restore sequence runs while holding the guard
/// returned by [`SharedSensor::lock`], so concurrent requests cannot observe
/// or clobber each other's half-applied configuration.
#[derive(Clone)]
pub struct SharedSensor {
    inner: Arc<Mutex<Box<dyn Sensor>>>,
}

pub type SensorGuard<'a> = MutexGuard<'a, Box<dyn Sensor>>;

impl SharedSensor {
    pub fn new(sensor: impl Sensor + 'static) -> Self {
        Self::from_boxed(Box::new(sensor))
    }

    pub fn from_boxed(sensor: Box<dyn Sensor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sensor)),
        }
    }

    /// Enter the critical section.
    pub async fn lock(&self) -> SensorGuard<'_> {
        self.inner.lock().await
    }

    /// Enter the critical section and restore the configuration found there
    /// when the returned scope is dropped.
    pub async fn lock_scoped(&self) -> ConfigurationScope<'_> {
        ConfigurationScope::enter(self.lock().await)
    }

    /// Snapshot of the ambient configuration.
    pub async fn configuration(&self) -> SensorConfiguration {
        self.inner.lock().await.configuration()
    }
}

/// Run a blocking sensor call such as a frame readout.
///
/// On the multi-threaded runtime the current worker hands its queued tasks to
/// another thread for the duration. Anywhere else the call runs inline.
pub fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// Exclusive access to the sensor that puts its configuration back on drop.
///
/// The restore runs whenever the scope goes away, so a request future that
/// is dropped mid-flight (client hung up) still leaves the sensor as it
/// found it.
pub struct ConfigurationScope<'a> {
    guard: SensorGuard<'a>,
    previous: SensorConfiguration,
}

impl<'a> ConfigurationScope<'a> {
    pub fn enter(guard: SensorGuard<'a>) -> Self {
        let previous = guard.configuration();
        Self { guard, previous }
    }

    /// Configuration that will be restored.
    pub fn previous(&self) -> SensorConfiguration {
        self.previous
    }
}

impl Deref for ConfigurationScope<'_> {
    type Target = dyn Sensor;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for ConfigurationScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

impl Drop for ConfigurationScope<'_> {
    fn drop(&mut self) {
        self.guard.apply(self.previous);
        debug!(restored = %self.previous, "Sensor configuration restored");
    }
}

/// A [`FrameBuffer`] that goes back to its sensor when dropped.
pub struct FrameLease<'a> {
    sensor: &'a mut dyn Sensor,
    frame: Option<FrameBuffer>,
}

impl<'a> FrameLease<'a> {
    pub fn new(sensor: &'a mut dyn Sensor, frame: FrameBuffer) -> Self {
        Self {
            sensor,
            frame: Some(frame),
        }
    }

    /// Return the buffer now instead of at end of scope.
    pub fn release(self) {}
}

impl Deref for FrameLease<'_> {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        // Only `Drop` takes the frame out.
        self.frame.as_ref().expect("frame lease already released")
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.sensor.release_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedSensor;

    #[test]
    fn lease_releases_on_drop() {
        let mut sensor = ScriptedSensor::default();
        let probe = sensor.probe();

        let frame = sensor.acquire_frame().unwrap();
        {
            let lease = FrameLease::new(&mut sensor, frame);
            assert!(!lease.is_empty());
            assert_eq!(probe.outstanding(), 1);
        }
        assert_eq!(probe.acquired(), 1);
        assert_eq!(probe.released(), 1);
        assert_eq!(probe.outstanding(), 0);
    }

    #[test]
    fn apply_sets_resolution_before_quality() {
        let mut sensor = ScriptedSensor::default();
        let probe = sensor.probe();
        let target = SensorConfiguration::new(FrameSize::Uxga, JpegQuality::new(8).unwrap());

        sensor.apply(target);

        assert_eq!(sensor.configuration(), target);
        let history = probe.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].resolution, FrameSize::Uxga);
        assert_eq!(history[1], target);
    }

    #[tokio::test]
    async fn shared_sensor_reports_configuration() {
        let initial = SensorConfiguration::new(FrameSize::Svga, JpegQuality::new(12).unwrap());
        let shared = SharedSensor::new(ScriptedSensor::new(initial));
        assert_eq!(shared.configuration().await, initial);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_restores_when_dropped_mid_request() {
        let initial = SensorConfiguration::new(FrameSize::Qvga, JpegQuality::new(30).unwrap());
        let sensor = ScriptedSensor::new(initial);
        let probe = sensor.probe();
        let shared = SharedSensor::new(sensor);
        let target = SensorConfiguration::new(FrameSize::Uxga, JpegQuality::new(8).unwrap());

        let request = async {
            let mut scope = shared.lock_scoped().await;
            scope.apply(target);
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        };
        let cancelled = tokio::time::timeout(std::time::Duration::from_millis(10), request).await;

        assert!(cancelled.is_err());
        assert_eq!(probe.history()[1], target);
        assert_eq!(probe.configuration(), initial);
        assert_eq!(shared.configuration().await, initial);
    }

    #[tokio::test]
    async fn run_blocking_inline_on_current_thread_runtime() {
        let mut sensor = ScriptedSensor::default();
        let frame = run_blocking(|| sensor.acquire_frame()).unwrap();
        sensor.release_frame(frame);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn run_blocking_keeps_worker_tasks_moving() {
        let started = std::time::Instant::now();
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            started.elapsed()
        });
        let slow = tokio::spawn(async {
            run_blocking(|| std::thread::sleep(std::time::Duration::from_millis(500)));
        });

        let ticked = ticker.await.unwrap();
        slow.await.unwrap();
        assert!(ticked < std::time::Duration::from_millis(400), "ticker waited {ticked:?}");
    }
}

pub mod frame;
pub mod pattern;
pub mod scripted;
pub mod sensor;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{FrameBuffer, FrameSize, JpegQuality, SensorConfiguration};
pub use pattern::PatternSensor;
pub use scripted::{ScriptedSensor, SensorProbe, Step};
pub use sensor::{run_blocking, ConfigurationScope, FrameLease, Sensor, SensorGuard, SharedSensor};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Sensor;

use tracing::info;

use crate::error::SensorError;
use crate::{SensorBackend, SensorConfig};

/// Open the sensor backend selected in the configuration.
pub fn open(config: &SensorConfig) -> Result<Box<dyn Sensor>, SensorError> {
    match config.backend {
        SensorBackend::Pattern => {
            info!(initial = %config.initial, "Using synthetic test-pattern sensor");
            Ok(Box::new(PatternSensor::new(config.initial)))
        }
        #[cfg(feature = "v4l2")]
        SensorBackend::V4l2 => {
            let path = if config.device.is_empty() {
                V4l2Sensor::detect().ok_or_else(|| {
                    SensorError::Device(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no MJPEG capture device found",
                    ))
                })?
            } else {
                config.device.clone()
            };
            Ok(Box::new(V4l2Sensor::open(
                &path,
                config.buffer_count,
                config.initial,
            )?))
        }
        #[cfg(not(feature = "v4l2"))]
        SensorBackend::V4l2 => Err(SensorError::Device(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "built without the `v4l2` feature",
        ))),
    }
}

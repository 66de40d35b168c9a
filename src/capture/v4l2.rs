//! V4L2 MJPEG capture device as a [`Sensor`]

use std::io;
use std::path::Path;

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{FrameBuffer, FrameSize, JpegQuality, SensorConfiguration};
use crate::capture::sensor::Sensor;
use crate::error::SensorError;

/// `V4L2_CID_JPEG_COMPRESSION_QUALITY`
const JPEG_COMPRESSION_QUALITY: u32 = 0x009d_0903;

/// USB/CSI camera delivering MJPEG frames through memory-mapped buffers.
///
/// The capture stream is torn down whenever the format changes and lazily
/// re-created on the next acquisition.
pub struct V4l2Sensor {
    device: Device,
    stream: Option<MmapStream<'static>>,
    buffer_count: u32,
    config: SensorConfiguration,
    sequence: u64,
}

impl V4l2Sensor {
    pub fn open(
        path: &str,
        buffer_count: u32,
        initial: SensorConfiguration,
    ) -> Result<Self, SensorError> {
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(SensorError::Device(io::Error::new(
                io::ErrorKind::Unsupported,
                "device doesn't support video capture",
            )));
        }

        let mut sensor = Self {
            device,
            stream: None,
            buffer_count,
            config: initial,
            sequence: 0,
        };
        sensor.set_resolution(initial.resolution)?;
        if let Err(e) = sensor.set_quality(initial.quality) {
            warn!(error = %e, "JPEG quality control unavailable");
        }
        Ok(sensor)
    }

    /// First `/dev/videoN` that captures MJPEG.
    pub fn detect() -> Option<String> {
        info!("Auto-detecting capture devices...");

        (0..10)
            .map(|i| format!("/dev/video{}", i))
            .filter(|path| Path::new(path).exists())
            .find(|path| {
                let Ok(dev) = Device::with_path(path) else {
                    return false;
                };
                let capture = dev
                    .query_caps()
                    .map(|caps| caps.capabilities.contains(CapFlags::VIDEO_CAPTURE))
                    .unwrap_or(false);
                let mjpeg = dev
                    .enum_formats()
                    .map(|formats| formats.iter().any(|f| f.fourcc == FourCC::new(b"MJPG")))
                    .unwrap_or(false);
                if capture && mjpeg {
                    info!("Found MJPEG device: {}", path);
                }
                capture && mjpeg
            })
    }
}

impl Sensor for V4l2Sensor {
    fn configuration(&self) -> SensorConfiguration {
        self.config
    }

    #[instrument(skip(self))]
    fn set_resolution(&mut self, resolution: FrameSize) -> Result<(), SensorError> {
        if resolution == self.config.resolution && self.stream.is_some() {
            return Ok(());
        }

        // Buffers are sized for the old format.
        self.stream = None;

        let (width, height) = resolution.dimensions();
        let mut fmt = self.device.format()?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(b"MJPG");

        let actual = self.device.set_format(&fmt)?;
        if (actual.width, actual.height) != (width, height) || actual.fourcc != fmt.fourcc {
            return Err(SensorError::UnsupportedResolution(resolution));
        }

        self.config.resolution = resolution;
        Ok(())
    }

    fn set_quality(&mut self, quality: JpegQuality) -> Result<(), SensorError> {
        // Recorded even when the driver lacks the control, so the gate does
        // not keep re-applying it.
        self.config.quality = quality;
        self.device.set_control(Control {
            id: JPEG_COMPRESSION_QUALITY,
            value: Value::Integer(i64::from(quality.as_percent())),
        })?;
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<FrameBuffer, SensorError> {
        if self.stream.is_none() {
            let stream =
                MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
            info!("Capture stream started with {} buffers", self.buffer_count);
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SensorError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(SensorError::CaptureFailed("driver returned an empty buffer".into()));
        }

        // The mmap'd buffer goes back to the driver on the next dequeue.
        let data = Bytes::copy_from_slice(&buf[..used]);
        self.sequence += 1;
        Ok(FrameBuffer::new(data, self.sequence, self.config))
    }

    fn release_frame(&mut self, _frame: FrameBuffer) {}
}

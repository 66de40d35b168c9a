//! Synthetic test-pattern sensor

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tracing::{debug, instrument};

use crate::capture::frame::{FrameBuffer, FrameSize, JpegQuality, SensorConfiguration};
use crate::capture::sensor::Sensor;
use crate::error::SensorError;

/// Produces a color-bar JPEG at whatever resolution and quality it is set to.
///
/// Encoding is done once per configuration; subsequent frames reuse the
/// cached payload.
pub struct PatternSensor {
    config: SensorConfiguration,
    sequence: u64,
    cache: Option<(SensorConfiguration, Bytes)>,
}

impl PatternSensor {
    pub fn new(initial: SensorConfiguration) -> Self {
        Self {
            config: initial,
            sequence: 0,
            cache: None,
        }
    }

    #[instrument(skip(self), fields(config = %self.config))]
    fn encode(&self) -> Result<Bytes, SensorError> {
        let (width, height) = self.config.resolution.dimensions();
        let image = color_bars(width, height);

        let mut jpeg = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, self.config.quality.as_percent());
        encoder.encode_image(&image)?;

        debug!(bytes = jpeg.len(), "Encoded test pattern");
        Ok(Bytes::from(jpeg))
    }
}

/// Eight vertical bars over a horizontal luma ramp in the bottom quarter.
fn color_bars(width: u32, height: u32) -> RgbImage {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [16, 16, 16],
    ];
    let ramp_start = height - height / 4;

    RgbImage::from_fn(width, height, |x, y| {
        if y >= ramp_start {
            let luma = (x * 255 / width.max(1)) as u8;
            Rgb([luma, luma, luma])
        } else {
            let bar = (x * BARS.len() as u32 / width.max(1)) as usize;
            Rgb(BARS[bar.min(BARS.len() - 1)])
        }
    })
}

impl Sensor for PatternSensor {
    fn configuration(&self) -> SensorConfiguration {
        self.config
    }

    fn set_resolution(&mut self, resolution: FrameSize) -> Result<(), SensorError> {
        self.config.resolution = resolution;
        Ok(())
    }

    fn set_quality(&mut self, quality: JpegQuality) -> Result<(), SensorError> {
        self.config.quality = quality;
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<FrameBuffer, SensorError> {
        let data = match &self.cache {
            Some((config, data)) if *config == self.config => data.clone(),
            _ => {
                let data = self.encode()?;
                self.cache = Some((self.config, data.clone()));
                data
            }
        };

        self.sequence += 1;
        Ok(FrameBuffer::new(data, self.sequence, self.config))
    }

    fn release_frame(&mut self, _frame: FrameBuffer) {}
}

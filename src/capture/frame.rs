use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Discrete frame size classes supported by the sensor, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    /// 160x120
    Qqvga,
    /// 320x240
    Qvga,
    /// 400x296
    Cif,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1280x720
    Hd,
    /// 1280x1024
    Sxga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 9] = [
        FrameSize::Qqvga,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Hd,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ];

    /// Pixel dimensions as (width, height).
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|size| size.dimensions() == (width, height))
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{w}x{h}")
    }
}

/// JPEG compression knob in the sensor's native scale.
///
/// Lower values mean less compression: higher fidelity and larger payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct JpegQuality(u8);

impl JpegQuality {
    pub const BEST: JpegQuality = JpegQuality(0);
    pub const WORST: JpegQuality = JpegQuality(63);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::WORST.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Map onto the 1..=100 "higher is better" scale used by JPEG encoders
    /// and the V4L2 compression-quality control.
    pub fn as_percent(self) -> u8 {
        let span = u32::from(Self::WORST.0);
        let inverted = span - u32::from(self.0);
        (10 + inverted * 90 / span) as u8
    }
}

impl TryFrom<u8> for JpegQuality {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| {
            format!(
                "jpeg quality {value} out of range {}..={}",
                Self::BEST.0,
                Self::WORST.0
            )
        })
    }
}

impl From<JpegQuality> for u8 {
    fn from(quality: JpegQuality) -> Self {
        quality.0
    }
}

impl fmt::Display for JpegQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The sensor's live operating parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfiguration {
    pub resolution: FrameSize,
    pub quality: JpegQuality,
}

impl SensorConfiguration {
    pub const fn new(resolution: FrameSize, quality: JpegQuality) -> Self {
        Self {
            resolution,
            quality,
        }
    }
}

impl fmt::Display for SensorConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} q{}", self.resolution, self.quality)
    }
}

/// One captured JPEG image on loan from a [`Sensor`](super::Sensor).
///
/// Not `Clone`: every buffer handed out by `acquire_frame` goes back through
/// `release_frame` exactly once.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Bytes,
    sequence: u64,
    captured_with: SensorConfiguration,
    timestamp: Instant,
}

impl FrameBuffer {
    pub fn new(data: Bytes, sequence: u64, captured_with: SensorConfiguration) -> Self {
        Self {
            data,
            sequence,
            captured_with,
            timestamp: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Configuration the sensor was running when this frame was read out.
    pub fn captured_with(&self) -> SensorConfiguration {
        self.captured_with
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Stage the payload for transmission.
    ///
    /// `Bytes` clones are reference counted, so staged copies stay valid after
    /// the buffer itself has been released.
    pub fn stage(&self) -> Bytes {
        self.data.clone()
    }
}

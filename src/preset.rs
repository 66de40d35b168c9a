//! Named endpoints and the (resolution, quality) preset each one serves

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::{FrameSize, JpegQuality, SensorConfiguration};

/// Latency/detail trade-off level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Low,
    High,
    Ultra,
}

/// How an endpoint delivers frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// One JPEG, then the sensor is put back the way it was.
    SingleFrame,
    /// Multipart MJPEG until the client goes away.
    Stream,
}

/// The six frame-serving endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    LowQuality,
    HighQuality,
    UltraQuality,
    LowQualityStream,
    HighQualityStream,
    UltraQualityStream,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::LowQuality,
        Endpoint::HighQuality,
        Endpoint::UltraQuality,
        Endpoint::LowQualityStream,
        Endpoint::HighQualityStream,
        Endpoint::UltraQualityStream,
    ];

    pub const fn path(self) -> &'static str {
        match self {
            Endpoint::LowQuality => "/low-quality",
            Endpoint::HighQuality => "/high-quality",
            Endpoint::UltraQuality => "/ultra-quality",
            Endpoint::LowQualityStream => "/low-quality-stream",
            Endpoint::HighQualityStream => "/high-quality-stream",
            Endpoint::UltraQualityStream => "/ultra-quality-stream",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|endpoint| endpoint.path() == path)
    }

    pub const fn tier(self) -> Tier {
        match self {
            Endpoint::LowQuality | Endpoint::LowQualityStream => Tier::Low,
            Endpoint::HighQuality | Endpoint::HighQualityStream => Tier::High,
            Endpoint::UltraQuality | Endpoint::UltraQualityStream => Tier::Ultra,
        }
    }

    pub const fn delivery(self) -> Delivery {
        match self {
            Endpoint::LowQuality | Endpoint::HighQuality | Endpoint::UltraQuality => {
                Delivery::SingleFrame
            }
            _ => Delivery::Stream,
        }
    }

    /// One-line summary for the index page.
    pub const fn description(self) -> &'static str {
        match self {
            Endpoint::LowQuality => "Single fast JPEG",
            Endpoint::HighQuality => "Single detailed JPEG",
            Endpoint::UltraQuality => "Maximum resolution JPEG",
            Endpoint::LowQualityStream => "MJPEG stream (low res)",
            Endpoint::HighQualityStream => "MJPEG stream (high res)",
            Endpoint::UltraQualityStream => "MJPEG stream (max res, slower)",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Immutable (resolution, quality) pair an endpoint runs the sensor at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPreset {
    pub resolution: FrameSize,
    pub quality: JpegQuality,
}

impl StreamPreset {
    pub const fn new(resolution: FrameSize, quality: JpegQuality) -> Self {
        Self {
            resolution,
            quality,
        }
    }

    pub const fn configuration(self) -> SensorConfiguration {
        SensorConfiguration::new(self.resolution, self.quality)
    }
}

impl fmt::Display for StreamPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.configuration().fmt(f)
    }
}

const fn quality(value: u8) -> JpegQuality {
    match JpegQuality::new(value) {
        Some(q) => q,
        None => JpegQuality::WORST,
    }
}

pub const LOW: StreamPreset = StreamPreset::new(FrameSize::Vga, quality(25));
pub const HIGH: StreamPreset = StreamPreset::new(FrameSize::Svga, quality(12));
pub const ULTRA: StreamPreset = StreamPreset::new(FrameSize::Uxga, quality(8));

/// One preset per tier, fixed at startup. Single-frame and stream endpoints of
/// the same tier share a preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetTable {
    pub low: StreamPreset,
    pub high: StreamPreset,
    pub ultra: StreamPreset,
}

impl Default for PresetTable {
    fn default() -> Self {
        Self {
            low: LOW,
            high: HIGH,
            ultra: ULTRA,
        }
    }
}

impl PresetTable {
    pub fn for_tier(&self, tier: Tier) -> StreamPreset {
        match tier {
            Tier::Low => self.low,
            Tier::High => self.high,
            Tier::Ultra => self.ultra,
        }
    }

    pub fn resolve(&self, endpoint: Endpoint) -> StreamPreset {
        self.for_tier(endpoint.tier())
    }
}

//! Error types for the capture and serving paths

use thiserror::Error;

use crate::capture::FrameSize;

/// Errors raised by a [`Sensor`](crate::capture::Sensor) backend.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The sensor could not produce a frame (busy, fault, no free buffer).
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("resolution {0} not supported by this sensor")]
    UnsupportedResolution(FrameSize),

    #[error("sensor device error: {0}")]
    Device(#[from] std::io::Error),

    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Failures writing to the peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Headers can no longer be changed because the body has started.
    #[error("response headers already committed")]
    HeadersCommitted,

    /// The peer went away or the connection was torn down.
    #[error("peer closed the connection")]
    Closed,
}

/// Why a responder stopped early.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Capture(#[from] SensorError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T, E = ServeError> = std::result::Result<T, E>;

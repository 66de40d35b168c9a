//! Frame-serving protocol engine
//!
//! Two responders drive the shared sensor on behalf of HTTP requests:
//!
//! - [`SingleFrameResponder`]: apply a preset, capture one JPEG, send it whole,
//!   put the previous configuration back.
//! - [`MultipartStreamer`]: apply a preset once, then send frames as
//!   `multipart/x-mixed-replace` parts until the peer goes away.
//!
//! Both write through [`ResponseChannel`], so the HTTP server is just another
//! adapter.

pub mod single;
pub mod stream;

use std::future::Future;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use single::SingleFrameResponder;
pub use stream::{MultipartStreamer, StreamSummary};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--frame";
pub const STREAM_BOUNDARY: &[u8] = b"\r\n--frame\r\n";
pub const STREAM_PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";
pub const FRAME_SEPARATOR: &[u8] = b"\r\n";

/// `Access-Control-Allow-Origin: *`, set on every frame response.
pub fn allow_any_origin() -> (HeaderName, HeaderValue) {
    (
        axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    )
}

/// Write side of one HTTP exchange.
///
/// Headers may be changed until the first body byte goes out. `send` and
/// `send_server_error` complete the response; `send_chunk` appends to a
/// chunked body.
pub trait ResponseChannel: Send {
    fn set_content_type(&mut self, content_type: &'static str) -> Result<(), TransportError>;

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), TransportError>;

    /// Send `body` as the complete response.
    fn send(&mut self, body: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Answer with a bare 500.
    fn send_server_error(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_chunk(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// What to do when the sensor fails to produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Report the failure to the client straight away.
    FailFast,
    /// Wait and try again, indefinitely.
    RetryWithBackoff(Duration),
}

impl CapturePolicy {
    /// Delay before the next attempt, or `None` to give up.
    pub fn retry_delay(self) -> Option<Duration> {
        match self {
            CapturePolicy::FailFast => None,
            CapturePolicy::RetryWithBackoff(backoff) => Some(backoff),
        }
    }
}

/// Fixed waits that pace the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Auto-exposure settling after a single-frame request applies its preset.
    pub single_settle_ms: u64,
    /// Settling after a stream applies its preset.
    pub stream_settle_ms: u64,
    /// Pause between stream frames; caps the frame rate.
    pub frame_interval_ms: u64,
    /// Wait after a failed capture before retrying.
    pub retry_backoff_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            single_settle_ms: 120,
            stream_settle_ms: 100,
            frame_interval_ms: 60,
            retry_backoff_ms: 50,
        }
    }
}

impl Timing {
    pub fn single_settle(&self) -> Duration {
        Duration::from_millis(self.single_settle_ms)
    }

    pub fn stream_settle(&self) -> Duration {
        Duration::from_millis(self.stream_settle_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

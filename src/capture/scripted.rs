//! Deterministic sensor for hardware-free runs and tests
//!
//! Hands out small canned JPEG payloads and fails on demand. A
//! [`SensorProbe`] cloned out before the sensor is moved behind the gate keeps
//! reporting what the sensor saw: acquire/release counts, configuration
//! changes and injected failures.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::capture::frame::{FrameBuffer, FrameSize, JpegQuality, SensorConfiguration};
use crate::capture::sensor::Sensor;
use crate::error::SensorError;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// What the next `acquire_frame` call does.
#[derive(Debug, Clone)]
pub enum Step {
    Frame(Bytes),
    Fail,
}

#[derive(Debug)]
struct ProbeState {
    configuration: SensorConfiguration,
    history: Vec<SensorConfiguration>,
    acquired: u64,
    released: u64,
    capture_failures: u64,
    outstanding: HashSet<u64>,
    double_releases: u64,
}

/// Read-only view of a [`ScriptedSensor`]'s bookkeeping.
#[derive(Debug, Clone)]
pub struct SensorProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl SensorProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn configuration(&self) -> SensorConfiguration {
        self.lock().configuration
    }

    /// Configuration after every `set_resolution`/`set_quality` call, in order.
    pub fn history(&self) -> Vec<SensorConfiguration> {
        self.lock().history.clone()
    }

    pub fn acquired(&self) -> u64 {
        self.lock().acquired
    }

    pub fn released(&self) -> u64 {
        self.lock().released
    }

    pub fn capture_failures(&self) -> u64 {
        self.lock().capture_failures
    }

    /// Buffers handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Releases of buffers that were not outstanding.
    pub fn double_releases(&self) -> u64 {
        self.lock().double_releases
    }
}

/// A sensor that follows a script.
///
/// Once the script runs out every acquisition succeeds with a frame of
/// `frame_len` bytes.
#[derive(Debug)]
pub struct ScriptedSensor {
    script: VecDeque<Step>,
    frame_len: usize,
    sequence: u64,
    state: Arc<Mutex<ProbeState>>,
}

impl Default for ScriptedSensor {
    fn default() -> Self {
        Self::new(SensorConfiguration::new(
            FrameSize::Vga,
            JpegQuality::new(12).unwrap_or(JpegQuality::BEST),
        ))
    }
}

impl ScriptedSensor {
    pub fn new(initial: SensorConfiguration) -> Self {
        Self {
            script: VecDeque::new(),
            frame_len: 64,
            sequence: 0,
            state: Arc::new(Mutex::new(ProbeState {
                configuration: initial,
                history: Vec::new(),
                acquired: 0,
                released: 0,
                capture_failures: 0,
                outstanding: HashSet::new(),
                double_releases: 0,
            })),
        }
    }

    /// Size of the frames produced once the script is exhausted. Clamped to
    /// fit the JPEG start and end markers.
    pub fn with_frame_len(mut self, len: usize) -> Self {
        self.frame_len = len.max(SOI.len() + EOI.len());
        self
    }

    /// Fail the next `count` acquisitions.
    pub fn fail_next(mut self, count: usize) -> Self {
        self.script.extend(std::iter::repeat(Step::Fail).take(count));
        self
    }

    pub fn then(mut self, step: Step) -> Self {
        self.script.push_back(step);
        self
    }

    pub fn probe(&self) -> SensorProbe {
        SensorProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fake JPEG: SOI marker, a sequence-dependent fill, EOI marker.
    fn synth_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len);
        buf.put_slice(&SOI);
        let fill = self.frame_len - SOI.len() - EOI.len();
        for i in 0..fill {
            buf.put_u8(((i as u64 * 17 + self.sequence * 31 + 73) % 0xFF) as u8);
        }
        buf.put_slice(&EOI);
        buf.freeze()
    }
}

impl Sensor for ScriptedSensor {
    fn configuration(&self) -> SensorConfiguration {
        self.lock().configuration
    }

    fn set_resolution(&mut self, resolution: FrameSize) -> Result<(), SensorError> {
        let mut state = self.lock();
        state.configuration.resolution = resolution;
        let snapshot = state.configuration;
        state.history.push(snapshot);
        Ok(())
    }

    fn set_quality(&mut self, quality: JpegQuality) -> Result<(), SensorError> {
        let mut state = self.lock();
        state.configuration.quality = quality;
        let snapshot = state.configuration;
        state.history.push(snapshot);
        Ok(())
    }

    fn acquire_frame(&mut self) -> Result<FrameBuffer, SensorError> {
        let data = match self.script.pop_front() {
            Some(Step::Fail) => {
                self.lock().capture_failures += 1;
                return Err(SensorError::CaptureFailed("scripted failure".into()));
            }
            Some(Step::Frame(data)) => data,
            None => self.synth_frame(),
        };

        self.sequence += 1;
        let mut state = self.lock();
        state.acquired += 1;
        state.outstanding.insert(self.sequence);
        trace!(sequence = self.sequence, bytes = data.len(), "Scripted frame");
        Ok(FrameBuffer::new(data, self.sequence, state.configuration))
    }

    fn release_frame(&mut self, frame: FrameBuffer) {
        let mut state = self.lock();
        if state.outstanding.remove(&frame.sequence()) {
            state.released += 1;
        } else {
            state.double_releases += 1;
        }
    }
}
